//! Assignment of the boxes in a [`BoxArray`] to worker ranks. A
//! [`DistributionMapping`] is built once, from a box array, a worker count,
//! and a [`Strategy`], and is immutable afterwards. Like the box array, it is
//! shared by cloning: structures built from clones of one mapping can
//! recognize each other with [`DistributionMapping::same_refs`] and skip
//! comparing owner arrays.
//!
//! Every strategy is deterministic in its inputs, so that every rank (and a
//! restarted run) computes the same mapping without communicating.

mod knapsack;
mod sfc;

use std::io::{Read, Write};
use std::ops::Index;
use std::sync::{Arc, OnceLock};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::box_array::BoxArray;
use crate::error::{Error, Result};
use crate::layout_data::LayoutData;
use crate::message::comm::Communicator;




/// The load balancing strategies.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Box `i` goes to rank `i % nprocs`.
    RoundRobin,

    /// Greedy bin packing by weight, optionally refined by pairwise swaps.
    Knapsack,

    /// Contiguous, weight-balanced runs along a space-filling curve.
    Sfc,

    /// Boxes in space-filling-curve order, dealt out round-robin.
    RoundRobinSfc,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Sfc
    }
}




/// Tuning knobs for building a [`DistributionMapping`].
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub strategy: Strategy,

    /// Scales the per-rank weight target of the SFC strategy.
    pub sfc_balance: f64,

    /// The SFC strategy falls back to knapsack when there are fewer than
    /// this many boxes per rank. Zero disables the fallback.
    pub sfc_threshold: usize,

    /// Refine the greedy knapsack assignment by local search.
    pub full_knapsack: bool,

    /// Maximum number of boxes per rank for the knapsack strategy.
    pub nmax: Option<usize>,

    /// Maximum number of swaps made by the knapsack local search.
    pub max_swap_passes: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            sfc_balance: 1.0,
            sfc_threshold: 0,
            full_knapsack: true,
            nmax: None,
            max_swap_passes: 1000,
        }
    }
}

static DEFAULT_CONFIG: OnceLock<DistributionConfig> = OnceLock::new();

/// Install the process-wide default configuration. This may be done at most
/// once, before any mapping is built with [`DistributionMapping::new`].
///
pub fn initialize(config: DistributionConfig) -> Result<()> {
    debug!("default distribution strategy: {:?}", config.strategy);
    DEFAULT_CONFIG
        .set(config)
        .map_err(|_| Error::AlreadyInitialized)
}

impl DistributionConfig {
    /// Return the process-wide default, or the built-in default if none was
    /// installed.
    ///
    pub fn global() -> Self {
        DEFAULT_CONFIG.get().cloned().unwrap_or_default()
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}




/// The owner rank of every box in a box array.
///
#[derive(Clone, Debug)]
pub struct DistributionMapping {
    pmap: Arc<[usize]>,
    nprocs: usize,
}




// ============================================================================
impl DistributionMapping {

    /// Build a mapping with the process-wide default configuration, using
    /// box cell counts as weights.
    ///
    pub fn new(boxes: &BoxArray, nprocs: usize) -> Result<Self> {
        Self::with_config(boxes, nprocs, &DistributionConfig::global())
    }

    /// Build a mapping with an explicit configuration, using box cell counts
    /// as weights.
    ///
    pub fn with_config(boxes: &BoxArray, nprocs: usize, config: &DistributionConfig) -> Result<Self> {
        Self::with_weights(boxes, &boxes.cell_counts(), nprocs, config)
    }

    /// Build a mapping from a weight per box, e.g. a measured cost.
    ///
    pub fn with_weights(
        boxes: &BoxArray,
        weights: &[u64],
        nprocs: usize,
        config: &DistributionConfig,
    ) -> Result<Self> {
        check_inputs(boxes.len(), weights.len(), nprocs)?;

        let dm = match config.strategy {
            Strategy::RoundRobin => Self::round_robin(boxes.len(), nprocs)?,
            Strategy::Knapsack => Self::knapsack(weights, nprocs, config)?.0,
            Strategy::Sfc => Self::sfc(boxes, weights, nprocs, config)?,
            Strategy::RoundRobinSfc => Self::round_robin_sfc(boxes, nprocs)?,
        };
        info!(
            "{:?} distribution of {} boxes over {} ranks, efficiency {:.3}",
            config.strategy,
            boxes.len(),
            nprocs,
            dm.efficiency(weights)
        );
        Ok(dm)
    }

    /// Box `i` is owned by rank `i % nprocs`.
    ///
    pub fn round_robin(nboxes: usize, nprocs: usize) -> Result<Self> {
        check_inputs(nboxes, nboxes, nprocs)?;
        Ok(Self::from_owners((0..nboxes).map(|i| i % nprocs).collect(), nprocs))
    }

    /// Knapsack partition of the given weights. Also returns the efficiency
    /// of the partition (mean rank load over maximum rank load).
    ///
    pub fn knapsack(weights: &[u64], nprocs: usize, config: &DistributionConfig) -> Result<(Self, f64)> {
        check_inputs(weights.len(), weights.len(), nprocs)?;

        let nmax = config.nmax.unwrap_or(usize::MAX);
        if nmax.checked_mul(nprocs).map_or(false, |cap| cap < weights.len()) {
            return Err(Error::BoxCapacity {
                nboxes: weights.len(),
                nprocs,
                nmax,
            });
        }
        let k = knapsack::partition(weights, nprocs, config.full_knapsack, nmax, config.max_swap_passes);
        Ok((Self::from_owners(k.assignment, nprocs), k.efficiency))
    }

    /// Space-filling-curve partition of the boxes.
    ///
    pub fn sfc(boxes: &BoxArray, weights: &[u64], nprocs: usize, config: &DistributionConfig) -> Result<Self> {
        check_inputs(boxes.len(), weights.len(), nprocs)?;

        if boxes.len() < config.sfc_threshold.saturating_mul(nprocs) {
            debug!("too few boxes for SFC ({}), falling back to knapsack", boxes.len());
            return Ok(Self::knapsack(weights, nprocs, config)?.0);
        }
        let order = sfc::curve_order(boxes);
        Ok(Self::from_owners(
            sfc::partition(&order, weights, nprocs, config.sfc_balance),
            nprocs,
        ))
    }

    /// The k-th box along the space-filling curve is owned by rank
    /// `k % nprocs`.
    ///
    pub fn round_robin_sfc(boxes: &BoxArray, nprocs: usize) -> Result<Self> {
        check_inputs(boxes.len(), boxes.len(), nprocs)?;

        let mut pmap = vec![0; boxes.len()];
        for (k, i) in sfc::curve_order(boxes).into_iter().enumerate() {
            pmap[i] = k % nprocs;
        }
        Ok(Self::from_owners(pmap, nprocs))
    }

    /// Adopt an explicit owner array. Every rank must be in `[0, nprocs)`.
    ///
    pub fn from_pmap(pmap: Vec<usize>, nprocs: usize) -> Result<Self> {
        if nprocs == 0 {
            return Err(Error::NonPositiveWorkerCount);
        }
        let dm = Self::from_owners(pmap, nprocs);
        dm.check()?;
        Ok(dm)
    }

    /// Rebuild a mapping from costs measured on each rank. Every rank
    /// contributes the costs of the boxes it owns; the costs are gathered
    /// with an all-reduce, and each rank then computes the same mapping.
    ///
    pub fn rebalance<C: Communicator>(
        comm: &C,
        costs: &LayoutData<u64>,
        config: &DistributionConfig,
    ) -> Result<Self> {
        let mut local = Vec::with_capacity(costs.local_len() * 16);
        for (i, cost) in costs.iter() {
            local.extend_from_slice(&(i as u64).to_le_bytes());
            local.extend_from_slice(&cost.to_le_bytes());
        }
        let gathered = comm.all_reduce(
            |mut a, b| {
                a.extend_from_slice(&b);
                a
            },
            local,
        )?;

        let boxes = costs.box_array();
        let mut weights = vec![0u64; boxes.len()];
        let mut seen = 0;
        for chunk in gathered.chunks_exact(16) {
            let mut index = [0; 8];
            let mut cost = [0; 8];
            index.copy_from_slice(&chunk[..8]);
            cost.copy_from_slice(&chunk[8..]);
            let index = u64::from_le_bytes(index) as usize;
            match weights.get_mut(index) {
                Some(w) => *w = u64::from_le_bytes(cost),
                None => {
                    return Err(Error::Transport(format!(
                        "cost reported for box {} of {}",
                        index,
                        boxes.len()
                    )))
                }
            }
            seen += 1;
        }
        if seen != boxes.len() {
            return Err(Error::WeightLengthMismatch {
                expected: boxes.len(),
                found: seen,
            });
        }
        Self::with_weights(boxes, &weights, comm.size(), config)
    }

    /// Read a mapping written by [`DistributionMapping::write_checkpoint`],
    /// validating it against the number of ranks.
    ///
    pub fn read_checkpoint<R: Read>(reader: R, nprocs: usize) -> Result<Self> {
        let pmap: Vec<usize> =
            ciborium::de::from_reader(reader).map_err(|e| Error::Checkpoint(e.to_string()))?;
        Self::from_pmap(pmap, nprocs)
    }

    /// Persist the owner array, one rank per box in box array order.
    ///
    pub fn write_checkpoint<W: Write>(&self, writer: W) -> Result<()> {
        ciborium::ser::into_writer(&self.pmap[..], writer).map_err(|e| Error::Checkpoint(e.to_string()))
    }

    /// The owner of each box; `processor_map()[i]` is in `[0, nprocs)`.
    ///
    pub fn processor_map(&self) -> &[usize] {
        &self.pmap
    }

    pub fn len(&self) -> usize {
        self.pmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pmap.is_empty()
    }

    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    pub fn get(&self, index: usize) -> Option<usize> {
        self.pmap.get(index).copied()
    }

    /// The indexes of the boxes owned by the given rank, ascending.
    ///
    pub fn local_indices(&self, rank: usize) -> Vec<usize> {
        self.pmap
            .iter()
            .enumerate()
            .filter(|(_, &r)| r == rank)
            .map(|(i, _)| i)
            .collect()
    }

    /// Mean rank load over maximum rank load for the given weights.
    ///
    pub fn efficiency(&self, weights: &[u64]) -> f64 {
        let mut loads = vec![0u64; self.nprocs];
        for (&rank, &w) in self.pmap.iter().zip(weights) {
            loads[rank] += w;
        }
        knapsack::efficiency(&loads)
    }

    /// Number of live clones sharing this mapping's owner array.
    ///
    pub fn link_count(&self) -> usize {
        Arc::strong_count(&self.pmap)
    }

    /// Whether two mappings share the same owner array.
    ///
    pub fn same_refs(lhs: &Self, rhs: &Self) -> bool {
        Arc::ptr_eq(&lhs.pmap, &rhs.pmap)
    }

    /// An identifier for the shared owner array, usable as a cache key.
    ///
    pub fn ref_id(&self) -> usize {
        self.pmap.as_ptr() as usize
    }

    /// Verify that every owner is a valid rank.
    ///
    pub fn check(&self) -> Result<()> {
        match self.pmap.iter().position(|&r| r >= self.nprocs) {
            Some(index) => Err(Error::RankOutOfRange {
                index,
                rank: self.pmap[index],
                nprocs: self.nprocs,
            }),
            None => Ok(()),
        }
    }

    fn from_owners(pmap: Vec<usize>, nprocs: usize) -> Self {
        Self {
            pmap: pmap.into(),
            nprocs,
        }
    }
}

impl PartialEq for DistributionMapping {
    fn eq(&self, other: &Self) -> bool {
        Self::same_refs(self, other) || self.pmap == other.pmap
    }
}

impl Eq for DistributionMapping {}

impl Index<usize> for DistributionMapping {
    type Output = usize;

    fn index(&self, index: usize) -> &usize {
        &self.pmap[index]
    }
}

fn check_inputs(nboxes: usize, nweights: usize, nprocs: usize) -> Result<()> {
    if nprocs == 0 {
        Err(Error::NonPositiveWorkerCount)
    } else if nweights != nboxes {
        Err(Error::WeightLengthMismatch {
            expected: nboxes,
            found: nweights,
        })
    } else {
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
#[cfg(not(feature = "dim3"))]
mod test {

    use super::{DistributionConfig, DistributionMapping, Strategy};
    use crate::box_array::BoxArray;
    use crate::error::Error;
    use crate::index_space::IndexSpace;

    fn unit_boxes(n: i64) -> BoxArray {
        BoxArray::new((0..n).map(|i| IndexSpace::unit([i, 0])).collect())
    }

    fn config(strategy: Strategy) -> DistributionConfig {
        DistributionConfig::default().with_strategy(strategy)
    }

    #[test]
    fn round_robin_of_four_unit_boxes() {
        let dm = DistributionMapping::with_config(&unit_boxes(4), 2, &config(Strategy::RoundRobin)).unwrap();
        assert_eq!(dm.processor_map(), &[0, 1, 0, 1]);
        assert_eq!(dm.local_indices(1), vec![1, 3]);
    }

    #[test]
    fn knapsack_isolates_the_heavy_box() {
        let ba = unit_boxes(4);
        let dm = DistributionMapping::with_weights(&ba, &[10, 1, 1, 1], 2, &config(Strategy::Knapsack)).unwrap();
        assert_eq!(dm.processor_map(), &[0, 1, 1, 1]);
    }

    #[test]
    fn zero_workers_is_an_error() {
        let result = DistributionMapping::with_config(&unit_boxes(4), 0, &config(Strategy::Sfc));
        assert!(matches!(result, Err(Error::NonPositiveWorkerCount)));
    }

    #[test]
    fn mismatched_weights_are_an_error() {
        let result = DistributionMapping::with_weights(&unit_boxes(4), &[1, 2, 3], 2, &config(Strategy::Knapsack));
        assert!(matches!(
            result,
            Err(Error::WeightLengthMismatch { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn knapsack_box_cap_too_small_is_an_error() {
        let mut c = config(Strategy::Knapsack);
        c.nmax = Some(1);
        let result = DistributionMapping::with_config(&unit_boxes(4), 2, &c);
        assert!(matches!(result, Err(Error::BoxCapacity { .. })));
    }

    #[test]
    fn sfc_falls_back_to_knapsack_below_threshold() {
        let ba = unit_boxes(4);
        let mut c = config(Strategy::Sfc);
        c.sfc_threshold = 4;
        let sfc = DistributionMapping::with_weights(&ba, &[10, 1, 1, 1], 2, &c).unwrap();
        let knap = DistributionMapping::with_weights(&ba, &[10, 1, 1, 1], 2, &config(Strategy::Knapsack)).unwrap();
        assert_eq!(sfc, knap);
    }

    #[test]
    fn round_robin_sfc_deals_along_the_curve() {
        let ba = BoxArray::decompose(IndexSpace::new([0, 0], [15, 15]), 4);
        let dm = DistributionMapping::with_config(&ba, 4, &config(Strategy::RoundRobinSfc)).unwrap();
        // the first four boxes on the curve are 0, 1, 4, 5
        assert_eq!((dm[0], dm[1], dm[4], dm[5]), (0, 1, 2, 3));
    }

    #[test]
    fn identity_and_value_equality_differ() {
        let ba = unit_boxes(6);
        let a = DistributionMapping::with_config(&ba, 3, &config(Strategy::RoundRobin)).unwrap();
        let b = a.clone();
        let c = DistributionMapping::from_pmap(vec![0, 1, 2, 0, 1, 2], 3).unwrap();
        assert!(DistributionMapping::same_refs(&a, &b));
        assert!(!DistributionMapping::same_refs(&a, &c));
        assert_eq!(a, c);
        assert_eq!(a.link_count(), 2);
    }

    #[test]
    fn out_of_range_owner_is_rejected() {
        let result = DistributionMapping::from_pmap(vec![0, 3], 2);
        assert!(matches!(result, Err(Error::RankOutOfRange { index: 1, rank: 3, nprocs: 2 })));
    }

    #[test]
    fn checkpoint_restores_the_same_owners() {
        let ba = BoxArray::decompose(IndexSpace::new([0, 0], [31, 31]), 8);
        let dm = DistributionMapping::with_config(&ba, 3, &config(Strategy::Sfc)).unwrap();
        let mut bytes = Vec::new();
        dm.write_checkpoint(&mut bytes).unwrap();
        let restored = DistributionMapping::read_checkpoint(bytes.as_slice(), 3).unwrap();
        assert_eq!(restored, dm);
        assert!(DistributionMapping::read_checkpoint(bytes.as_slice(), 2).is_err());
    }
}

use std::sync::Arc;

use rayon::prelude::*;

use crate::index_space::{IndexSpace, SPACE_DIM};

/// An ordered, immutable decomposition of index space into boxes. Box `i` of
/// the array is the unit of work `i` everywhere else in the crate: the
/// distribution mapping assigns it an owner, and the task graph names its
/// task after it.
///
/// Cloning a `BoxArray` is cheap and shares the underlying storage. Two
/// arrays can be compared by value (`==`) or by identity ([`same_refs`]);
/// structures that hold clones of the same array may skip re-validating
/// their layouts against one another.
///
/// [`same_refs`]: BoxArray::same_refs
///
#[derive(Clone, Debug)]
pub struct BoxArray {
    boxes: Arc<[IndexSpace]>,
}

impl BoxArray {
    pub fn new(boxes: Vec<IndexSpace>) -> Self {
        Self {
            boxes: boxes.into(),
        }
    }

    /// Chop a domain into boxes of at most `max_grid_size` cells per axis.
    /// Boxes are numbered in row-major order of their position.
    ///
    pub fn decompose(domain: IndexSpace, max_grid_size: usize) -> Self {
        Self::new(domain.chop(max_grid_size))
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&IndexSpace> {
        self.boxes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexSpace> + '_ {
        self.boxes.iter()
    }

    pub fn as_slice(&self) -> &[IndexSpace] {
        &self.boxes
    }

    /// Return the number of cells in each box. This is the default weight
    /// used by the knapsack and space-filling-curve strategies.
    ///
    pub fn cell_counts(&self) -> Vec<u64> {
        self.boxes.par_iter().map(|b| b.len() as u64).collect()
    }

    /// Return the smallest box containing every box in the array, or `None`
    /// if the array is empty.
    ///
    pub fn minimal_box(&self) -> Option<IndexSpace> {
        let first = self.boxes.first()?;
        let (mut lo, mut hi) = (first.lo(), first.hi());
        for b in self.boxes.iter() {
            for a in 0..SPACE_DIM {
                lo[a] = lo[a].min(b.lo()[a]);
                hi[a] = hi[a].max(b.hi()[a]);
            }
        }
        Some(IndexSpace::new(lo, hi))
    }

    /// Return the indexes of the boxes that overlap the given region, in
    /// ascending order.
    ///
    pub fn intersections(&self, region: &IndexSpace) -> Vec<usize> {
        self.boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.intersects(region))
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether the boxes are pairwise disjoint.
    ///
    pub fn is_disjoint(&self) -> bool {
        self.boxes.iter().enumerate().all(|(i, a)| {
            self.boxes[i + 1..].iter().all(|b| !a.intersects(b))
        })
    }

    /// Whether two arrays share the same storage.
    ///
    pub fn same_refs(lhs: &Self, rhs: &Self) -> bool {
        Arc::ptr_eq(&lhs.boxes, &rhs.boxes)
    }

    /// An identifier for the shared storage, usable as a cache key.
    ///
    pub fn ref_id(&self) -> usize {
        self.boxes.as_ptr() as usize
    }
}

impl PartialEq for BoxArray {
    fn eq(&self, other: &Self) -> bool {
        Self::same_refs(self, other) || self.boxes == other.boxes
    }
}

impl Eq for BoxArray {}

impl From<Vec<IndexSpace>> for BoxArray {
    fn from(boxes: Vec<IndexSpace>) -> Self {
        Self::new(boxes)
    }
}

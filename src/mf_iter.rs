//! Asynchronous iteration over the boxes of a multi-fab. Each locally owned
//! box gets a task that holds its [`Fab`], and at every step fills its ghost
//! cells from the messages of its neighbors, applies a kernel to the box, and
//! sends the edges of its valid region to the neighbors that need them.
//! There is no global exchange between steps: a box moves on as soon as its
//! own neighbors have caught up.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::error;

use crate::box_array::BoxArray;
use crate::config::RuntimeConfig;
use crate::distribution::DistributionMapping;
use crate::error::{Error, Result};
use crate::fab::Fab;
use crate::graph::{MfGraph, TaskGraph};
use crate::index_space::{IndexSpace, IntVect};
use crate::layout_data::LayoutData;
use crate::message::comm::Communicator;
use crate::rts::{IterationReport, Rts};
use crate::task::{Action, Kernel, Step, TaskContext, TaskName};




/// The numerical work done on one box at one step. It receives the box's
/// valid region and its fab, with ghost cells already filled; it should
/// only write inside the valid region.
///
pub trait BoxKernel: Send + Sync + 'static {
    fn apply(&self, valid: &IndexSpace, step: Step, fab: &mut Fab);
}

impl<F> BoxKernel for F
where
    F: Fn(&IndexSpace, Step, &mut Fab) + Send + Sync + 'static,
{
    fn apply(&self, valid: &IndexSpace, step: Step, fab: &mut Fab) {
        self(valid, step, fab)
    }
}




/// What a box task hands back when it finishes: its final fab, or the first
/// error that stopped it.
pub type BoxResult = (usize, Result<Fab>);

/// The per-box kernel of a halo-exchanging [`Action`]. Messages are tagged
/// with the step that produced them.
///
/// A ghost region that cannot be filled stops the kernel on that box. The
/// box keeps draining and sending messages so that its neighbors can finish,
/// and reports the first error in place of its fab.
///
pub struct HaloExchange<B> {
    index: usize,
    fab: Fab,
    kernel: Arc<B>,
    recv_from: Vec<(TaskName, IndexSpace)>,
    send_to: Vec<(TaskName, IndexSpace)>,
    results: Sender<BoxResult>,
    failure: Option<Error>,
}

/// The task type run for each box by [`AsyncMfIter`].
pub type HaloAction<B> = Action<HaloExchange<B>>;

impl<B: BoxKernel> HaloExchange<B> {
    /// Set up box `index` of `boxes`: its neighbors are the boxes that
    /// overlap its valid region grown by the fab's ghost width.
    ///
    pub fn new(boxes: &BoxArray, index: usize, fab: Fab, kernel: Arc<B>, results: Sender<BoxResult>) -> Result<Self> {
        let valid = fab.valid();
        let grown = valid.grow(fab.ghost());
        let mut recv_from = Vec::new();
        let mut send_to = Vec::new();

        for j in boxes.intersections(&grown) {
            if j == index {
                continue;
            }
            let other = boxes.as_slice()[j];
            let name = TaskName::from_box(j)?;

            if let Some(region) = other.intersect(&grown) {
                recv_from.push((name, region))
            }
            if let Some(region) = valid.intersect(&other.grow(fab.ghost())) {
                send_to.push((name, region))
            }
        }

        Ok(Self {
            index,
            fab,
            kernel,
            recv_from,
            send_to,
            results,
            failure: None,
        })
    }

    /// Names of the neighboring box tasks this one receives ghost data from.
    ///
    pub fn neighbors(&self) -> impl Iterator<Item = TaskName> + '_ {
        self.recv_from.iter().map(|(name, _)| *name)
    }

    pub fn fab(&self) -> &Fab {
        &self.fab
    }

    fn report(&self, result: Result<Fab>) {
        if self.results.send((self.index, result)).is_err() {
            error!("result for box {} has nowhere to go", self.index);
        }
    }
}

impl<B: BoxKernel> Kernel for HaloExchange<B> {
    fn dependency(&self, step: Step, ctx: &TaskContext) -> bool {
        let tag = step.index as i32 - 1;
        step.is_first() || self.recv_from.iter().all(|(src, _)| ctx.depend_on(src, tag))
    }

    fn compute(&mut self, step: Step, ctx: &mut TaskContext) {
        if !step.is_first() {
            let tag = step.index as i32 - 1;

            for (src, region) in &self.recv_from {
                let filled = ctx
                    .pull(src, tag)
                    .ok_or(Error::MissingResult(self.index))
                    .and_then(|data| match self.failure {
                        None => self.fab.fill_from_bytes(region, data.buffer()),
                        Some(_) => Ok(()),
                    });

                if let Err(e) = filled {
                    error!("box {} could not fill ghosts from {}: {}", self.index, src, e);
                    self.failure.get_or_insert(e);
                }
            }
        }
        if self.failure.is_none() {
            let valid = self.fab.valid();
            self.kernel.apply(&valid, step, &mut self.fab)
        }
    }

    fn post_completion(&mut self, step: Step, ctx: &mut TaskContext) {
        if step.is_last() {
            let result = match self.failure.take() {
                Some(e) => Err(e),
                None => {
                    let valid = self.fab.valid();
                    Ok(std::mem::replace(&mut self.fab, Fab::zeros(valid, 0, 0)))
                }
            };
            self.report(result)
        } else {
            for (dst, region) in &self.send_to {
                ctx.push(*dst, self.fab.region_to_bytes(region), step.index as i32)
            }
        }
    }
}




/// Drives the halo-exchange tasks of the locally owned boxes of a box array
/// for a fixed number of steps.
///
pub struct AsyncMfIter<C: Communicator> {
    boxes: BoxArray,
    dm: DistributionMapping,
    steps: usize,
    rts: Rts<C>,
}

impl<C: Communicator> AsyncMfIter<C> {
    pub fn new(boxes: &BoxArray, dm: &DistributionMapping, steps: usize, comm: C, config: RuntimeConfig) -> Self {
        Self {
            boxes: boxes.clone(),
            dm: dm.clone(),
            steps,
            rts: Rts::init(comm, config),
        }
    }

    pub fn rank(&self) -> usize {
        self.rts.rank()
    }

    /// Build the graph of local box tasks. Each box's fab has `ghost`
    /// layers and is initialized from `init`; the returned channel yields
    /// every local fab after its last step, or the error that stopped it.
    ///
    pub fn graph<B, F>(&self, ghost: i64, ncomp: usize, init: F, kernel: B) -> Result<(TaskGraph, Receiver<BoxResult>)>
    where
        B: BoxKernel,
        F: Fn(IntVect, usize) -> f64,
    {
        let (sink, source) = crossbeam_channel::unbounded();
        let kernel = Arc::new(kernel);
        let graph = MfGraph::build_actions(
            "async-mf-iter",
            &self.boxes,
            &self.dm,
            self.rank(),
            self.rts.config().mode,
            self.steps,
            |i, valid| {
                let fab = Fab::from_function(*valid, ghost, ncomp, &init);
                HaloExchange::new(&self.boxes, i, fab, kernel.clone(), sink.clone())
            },
        )?;
        Ok((graph, source))
    }

    /// Run the graph to completion and release the scheduler.
    ///
    pub fn iterate(mut self, graph: &mut TaskGraph) -> Result<(IterationReport, C)> {
        let report = self.rts.iterate(graph)?;
        Ok((report, self.rts.finalize()))
    }

    /// Build the halo graph, run it, and gather the final fabs of the local
    /// boxes. If any box failed, the error of the lowest such box is
    /// returned.
    ///
    pub fn run<B, F>(self, ghost: i64, ncomp: usize, init: F, kernel: B) -> Result<(LayoutData<Fab>, IterationReport, C)>
    where
        B: BoxKernel,
        F: Fn(IntVect, usize) -> f64,
    {
        let (mut graph, results) = self.graph(ghost, ncomp, init, kernel)?;
        let boxes = self.boxes.clone();
        let dm = self.dm.clone();
        let rank = self.rank();
        let (report, comm) = self.iterate(&mut graph)?;
        drop(graph);

        let mut fabs = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (i, result) in results.try_iter() {
            match result {
                Ok(fab) => {
                    fabs.insert(i, fab);
                }
                Err(e) => {
                    failures.insert(i, e);
                }
            }
        }
        if let Some((_, e)) = failures.into_iter().next() {
            return Err(e);
        }
        let layout = LayoutData::try_new(&boxes, &dm, rank, |i, _| {
            fabs.remove(&i).ok_or(Error::MissingResult(i))
        })?;
        Ok((layout, report, comm))
    }
}

/// Run `steps` applications of `kernel` over every box of `boxes` owned by
/// the communicator's rank, exchanging `ghost` layers of ghost cells between
/// steps.
///
#[allow(clippy::too_many_arguments)]
pub fn run_stencil<C, B, F>(
    comm: C,
    boxes: &BoxArray,
    dm: &DistributionMapping,
    config: RuntimeConfig,
    steps: usize,
    ghost: i64,
    init: F,
    kernel: B,
) -> Result<(LayoutData<Fab>, IterationReport, C)>
where
    C: Communicator,
    B: BoxKernel,
    F: Fn(IntVect, usize) -> f64,
{
    AsyncMfIter::new(boxes, dm, steps, comm, config).run(ghost, 1, init, kernel)
}




// ============================================================================
#[cfg(test)]
#[cfg(not(feature = "dim3"))]
mod test {

    use super::{HaloExchange, run_stencil};
    use crate::box_array::BoxArray;
    use crate::config::RuntimeConfig;
    use crate::distribution::DistributionMapping;
    use crate::error::Error;
    use crate::fab::Fab;
    use crate::index_space::IndexSpace;
    use crate::message::local::LocalCommunicator;
    use crate::task::{Action, Data, Step, Task, TaskContext, TaskName};
    use std::sync::Arc;

    fn count_steps(valid: &IndexSpace, _: Step, fab: &mut Fab) {
        for index in valid {
            let x = fab.get(index, 0);
            fab.set(index, 0, x + 1.0)
        }
    }

    #[test]
    fn neighbors_include_diagonals() {
        let boxes = BoxArray::decompose(IndexSpace::new([0, 0], [7, 7]), 4);
        let (sink, _) = crossbeam_channel::unbounded();
        let fab = Fab::zeros(boxes.as_slice()[0], 1, 1);
        let halo = HaloExchange::new(&boxes, 0, fab, Arc::new(count_steps), sink).unwrap();
        let neighbors: Vec<_> = halo.neighbors().collect();
        assert_eq!(neighbors, vec![TaskName::from(1), TaskName::from(2), TaskName::from(3)]);
        assert_eq!(halo.send_to[0].1, IndexSpace::new([0, 3], [3, 3]));
    }

    #[test]
    fn short_ghost_buffer_is_reported_instead_of_the_fab() {
        let boxes = BoxArray::decompose(IndexSpace::new([0, 0], [7, 7]), 4);
        let (sink, source) = crossbeam_channel::unbounded();
        let fab = Fab::zeros(boxes.as_slice()[0], 1, 1);
        let halo = HaloExchange::new(&boxes, 0, fab, Arc::new(count_steps), sink).unwrap();
        let neighbors: Vec<_> = halo.neighbors().collect();

        let me = TaskName::from(0);
        let mut action = Action::new(halo, 2);
        let mut ctx = TaskContext::new(me);
        action.job(&mut ctx);
        action.post_completion(&mut ctx);
        assert_eq!(ctx.take_outputs().len(), 3);

        for src in &neighbors {
            ctx.inputs_mut().push_back(*src, Data::new(*src, me, 0, vec![0; 3]), 0);
        }
        assert!(action.dependency(&ctx));
        action.job(&mut ctx);
        action.post_completion(&mut ctx);

        assert!(ctx.inputs().is_empty());
        match source.try_recv() {
            Ok((0, Err(Error::BufferLength { found: 3, .. }))) => {}
            other => panic!("expected a buffer length error, got {:?}", other.map(|(i, r)| (i, r.map(|_| ())))),
        }
        assert!(source.try_recv().is_err());
    }

    #[test]
    fn every_box_runs_every_step() {
        let boxes = BoxArray::decompose(IndexSpace::new([0, 0], [7, 7]), 4);
        let dm = DistributionMapping::round_robin(boxes.len(), 1).unwrap();
        let (fabs, report, _) = run_stencil(
            LocalCommunicator::solo(),
            &boxes,
            &dm,
            RuntimeConfig::default(),
            3,
            1,
            |_, _| 0.0,
            count_steps,
        )
        .unwrap();

        assert_eq!(fabs.local_len(), 4);
        assert_eq!(report.jobs_run, 12);
        assert_eq!(report.dropped, 0);
        for (_, fab) in fabs.iter() {
            assert!(fab.valid().iter().all(|i| fab.get(i, 0) == 3.0));
        }
    }
}

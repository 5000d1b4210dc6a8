//! The runtime task scheduler. One `Rts` drives the task graph of one
//! worker, in rounds:
//!
//! 1. Messages that arrived from other workers are parked on the graph, and
//!    parked messages are delivered to their recipients.
//! 2. Every live task is asked whether it is ready. The ready ones are taken
//!    out of the graph and their jobs are run, concurrently on the thread
//!    pool if there is one.
//! 3. Back on the scheduler thread, in name order, each task's
//!    post-completion hook runs, its spawned tasks join the graph, its
//!    outgoing messages are routed, and it is either put back or retired.
//!
//! A task is never in two rounds at once, since it is out of the graph
//! while its job runs. Messages produced in a round become visible to
//! readiness checks in the next one.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use log::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Slot, TaskGraph};
use crate::message::comm::{Communicator, TASK_TAG};
use crate::task::{Data, TaskName, TaskState};
use crate::thread_pool::ThreadPool;




/// Counters collected over one call to [`Rts::iterate`].
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Rounds in which at least one task ran.
    pub rounds: usize,
    pub jobs_run: usize,
    /// Messages routed to a task on this worker.
    pub delivered_local: usize,
    pub sent_remote: usize,
    pub received_remote: usize,
    /// Messages still parked when the graph finished.
    pub dropped: usize,
}

impl std::ops::AddAssign for IterationReport {
    fn add_assign(&mut self, rhs: Self) {
        self.rounds += rhs.rounds;
        self.jobs_run += rhs.jobs_run;
        self.delivered_local += rhs.delivered_local;
        self.sent_remote += rhs.sent_remote;
        self.received_remote += rhs.received_remote;
        self.dropped += rhs.dropped;
    }
}




/// The scheduler of one worker, holding its communicator and thread pool.
///
pub struct Rts<C: Communicator> {
    comm: C,
    config: RuntimeConfig,
    pool: Option<ThreadPool>,
}

impl<C: Communicator> Rts<C> {
    pub fn init(comm: C, config: RuntimeConfig) -> Self {
        let pool = if config.num_threads > 1 {
            Some(ThreadPool::new(config.num_threads))
        } else {
            None
        };
        info!(
            "scheduler on rank {} of {} with {} threads",
            comm.rank(),
            comm.size(),
            config.num_threads.max(1)
        );
        Self { comm, config, pool }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn nprocs(&self) -> usize {
        self.comm.size()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run the graph until every task in it is terminal. Messages left
    /// parked at that point have no recipient, and are dropped.
    ///
    pub fn iterate(&mut self, graph: &mut TaskGraph) -> Result<IterationReport> {
        let mut report = IterationReport::default();
        let mut last_progress = Instant::now();

        loop {
            let received = self.receive_remote(graph)?;
            let delivered = graph.deliver_parked();
            report.received_remote += received;

            if graph.is_empty() {
                break;
            }
            let ready = graph.take_ready();

            if ready.is_empty() {
                if received + delivered > 0 {
                    last_progress = Instant::now();
                    continue;
                }
                self.wait_for_messages(graph, &mut report, last_progress)?;
                continue;
            }
            report.rounds += 1;
            debug!(
                "[{}] round {}: {} ready of {} live",
                graph.name(),
                report.rounds,
                ready.len(),
                ready.len() + graph.len()
            );
            let finished = self.run_jobs(ready)?;
            self.complete(graph, finished, &mut report)?;
            last_progress = Instant::now();
        }

        report.dropped = graph.drop_parked();
        info!("[{}] finished on rank {}: {:?}", graph.name(), self.rank(), report);
        Ok(report)
    }

    /// Release the thread pool and hand back the communicator.
    ///
    pub fn finalize(self) -> C {
        debug!("finalizing scheduler on rank {}", self.comm.rank());
        drop(self.pool);
        self.comm
    }

    fn receive_remote(&self, graph: &mut TaskGraph) -> Result<usize> {
        let mut count = 0;
        while let Some(bytes) = self.comm.try_recv(TASK_TAG)? {
            graph.park(rmp_serde::from_slice::<Data>(&bytes)?);
            count += 1;
        }
        Ok(count)
    }

    /// Nothing is ready and nothing new has arrived. A lone worker is
    /// stalled for good; otherwise block until another worker sends
    /// something, or the stall timeout runs out.
    ///
    fn wait_for_messages(
        &self,
        graph: &mut TaskGraph,
        report: &mut IterationReport,
        last_progress: Instant,
    ) -> Result<()> {
        let stalled = || Error::Stalled {
            rank: self.rank(),
            pending: graph.names(),
        };
        if self.comm.size() <= 1 {
            return Err(stalled());
        }
        if let Some(limit) = self.config.stall_timeout() {
            if last_progress.elapsed() >= limit {
                return Err(stalled());
            }
        }
        if let Some(bytes) = self.comm.recv_timeout(TASK_TAG, self.config.poll_interval())? {
            let data: Data = rmp_serde::from_slice(&bytes)?;
            graph.park(data);
            report.received_remote += 1;
        }
        Ok(())
    }

    fn run_jobs(&self, ready: Vec<(TaskName, Slot)>) -> Result<Vec<(TaskName, Slot)>> {
        let pool = match &self.pool {
            Some(pool) if ready.len() > 1 => pool,
            _ => {
                return ready
                    .into_iter()
                    .map(|(name, mut slot)| {
                        match panic::catch_unwind(AssertUnwindSafe(|| slot.run_job())) {
                            Ok(()) => Ok((name, slot)),
                            Err(_) => Err(Error::TaskPanicked(name)),
                        }
                    })
                    .collect()
            }
        };

        let expected: Vec<TaskName> = ready.iter().map(|(name, _)| *name).collect();
        let (sink, source) = crossbeam_channel::unbounded();

        for (name, mut slot) in ready {
            let sink = sink.clone();
            pool.spawn(move || {
                slot.run_job();
                sink.send((name, slot)).ok();
            });
        }
        drop(sink);

        let mut finished: Vec<(TaskName, Slot)> = source.iter().collect();
        finished.sort_by_key(|(name, _)| *name);

        if finished.len() < expected.len() {
            let missing = expected
                .into_iter()
                .find(|name| finished.binary_search_by_key(name, |(n, _)| *n).is_err());
            if let Some(name) = missing {
                return Err(Error::TaskPanicked(name));
            }
        }
        Ok(finished)
    }

    fn complete(
        &self,
        graph: &mut TaskGraph,
        finished: Vec<(TaskName, Slot)>,
        report: &mut IterationReport,
    ) -> Result<()> {
        let mut spawned = Vec::new();
        let mut outgoing = Vec::new();

        for (name, mut slot) in finished {
            slot.state = TaskState::Completing;
            slot.task.post_completion(&mut slot.ctx);
            report.jobs_run += 1;

            outgoing.extend(slot.ctx.take_outputs());
            spawned.extend(slot.ctx.take_new_tasks());

            if slot.ctx.is_persistent() {
                graph.restore(name, slot)
            } else {
                graph.retire(name)
            }
        }
        for (name, task) in spawned {
            graph.spawn(name, task)?;
        }
        for data in outgoing {
            self.route(graph, data, report)?;
        }
        Ok(())
    }

    fn route(&self, graph: &mut TaskGraph, data: Data, report: &mut IterationReport) -> Result<()> {
        let dst = data.recipient();
        let owner = graph.find_process_association(&dst);

        if owner == self.rank() || graph.contains(&dst) {
            graph.park(data);
            report.delivered_local += 1;
        } else {
            self.comm.send(owner, TASK_TAG, rmp_serde::to_vec(&data)?)?;
            report.sent_remote += 1;
        }
        Ok(())
    }
}

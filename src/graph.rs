//! Task graphs: the collection of tasks one worker is responsible for in one
//! iteration space, with the messages waiting to be delivered to them.
//!
//! Messages are never handed straight to a task. They are first parked on
//! the graph, keyed by recipient, and moved into the recipients' input maps
//! at the start of a scheduling round. This keeps the readiness checks of a
//! round from seeing messages produced during that same round, and lets a
//! message wait for a recipient that has not been spawned yet.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::box_array::BoxArray;
use crate::distribution::DistributionMapping;
use crate::error::{Error, Result};
use crate::index_space::IndexSpace;
use crate::task::{Action, Data, DependencyMap, Kernel, Task, TaskContext, TaskName, TaskState};




/// How parked messages are handed to their recipients.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Every parked message is delivered at the next round boundary.
    #[default]
    Push,
    /// A recipient gets at most one message per (source, tag) queue at a
    /// time; the next one is delivered after it consumed the previous.
    Pull,
}




pub(crate) struct Slot {
    pub(crate) task: Box<dyn Task>,
    pub(crate) ctx: TaskContext,
    pub(crate) state: TaskState,
}

impl Slot {
    fn new(name: TaskName, task: Box<dyn Task>) -> Self {
        Self {
            task,
            ctx: TaskContext::new(name),
            state: TaskState::Created,
        }
    }

    pub(crate) fn run_job(&mut self) {
        self.state = TaskState::Running;
        self.task.job(&mut self.ctx)
    }
}




type Owner = Arc<dyn Fn(&TaskName) -> usize + Send + Sync>;

/// A named set of tasks keyed by [`TaskName`], owned by one worker. Each
/// task is addressed only by name; tasks never hold references to each
/// other. The graph also knows which worker owns any name
/// ([`TaskGraph::find_process_association`]), so that the scheduler can
/// route messages addressed to tasks that live elsewhere.
///
pub struct TaskGraph {
    name: String,
    rank: usize,
    nprocs: usize,
    mode: Mode,
    pool: BTreeMap<TaskName, Slot>,
    initial: Vec<TaskName>,
    retired: BTreeSet<TaskName>,
    parked: BTreeMap<TaskName, DependencyMap>,
    owner: Owner,
}

impl TaskGraph {
    /// Create an empty graph for the given worker. Every name is owned by
    /// this worker until [`TaskGraph::with_owner`] says otherwise.
    ///
    pub fn new(name: &str, rank: usize, nprocs: usize, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            rank,
            nprocs,
            mode,
            pool: BTreeMap::new(),
            initial: Vec::new(),
            retired: BTreeSet::new(),
            parked: BTreeMap::new(),
            owner: Arc::new(move |_| rank),
        }
    }

    /// Use the given function to map task names to their owning rank.
    ///
    pub fn with_owner<F>(mut self, owner: F) -> Self
    where
        F: Fn(&TaskName) -> usize + Send + Sync + 'static,
    {
        self.owner = Arc::new(owner);
        self
    }

    /// Add a task to the initial task set.
    ///
    pub fn insert<T: Task>(&mut self, name: TaskName, task: T) -> Result<()> {
        self.insert_boxed(name, Box::new(task))?;
        self.initial.push(name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The rank that owns the task with the given name.
    ///
    pub fn find_process_association(&self, name: &TaskName) -> usize {
        (self.owner)(name)
    }

    pub fn is_local(&self, name: &TaskName) -> bool {
        self.find_process_association(name) == self.rank
    }

    /// Number of live tasks (not yet terminal).
    ///
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn contains(&self, name: &TaskName) -> bool {
        self.pool.contains_key(name)
    }

    /// The state of a task, or `None` if no task by that name was ever in
    /// the graph.
    ///
    pub fn state(&self, name: &TaskName) -> Option<TaskState> {
        match self.pool.get(name) {
            Some(slot) => Some(slot.state),
            None if self.retired.contains(name) => Some(TaskState::Terminal),
            None => None,
        }
    }

    /// Names of the live tasks, in order.
    ///
    pub fn names(&self) -> Vec<TaskName> {
        self.pool.keys().copied().collect()
    }

    pub fn initial_tasks(&self) -> &[TaskName] {
        &self.initial
    }

    /// Number of messages waiting on the graph for delivery.
    ///
    pub fn parked_len(&self) -> usize {
        self.parked.values().map(DependencyMap::len).sum()
    }

    pub(crate) fn park(&mut self, data: Data) {
        let (src, dst, tag) = (data.source(), data.recipient(), data.tag());
        self.parked.entry(dst).or_default().push_back(src, data, tag)
    }

    /// Move parked messages into the input maps of their recipients,
    /// according to the graph's mode. Returns the number of messages moved.
    ///
    pub(crate) fn deliver_parked(&mut self) -> usize {
        let mut moved = 0;

        for (dst, waiting) in self.parked.iter_mut() {
            let slot = match self.pool.get_mut(dst) {
                Some(slot) => slot,
                None => continue,
            };
            for (src, tag) in waiting.keys() {
                let count = match self.mode {
                    Mode::Push => waiting.queue_len(&src, tag),
                    Mode::Pull if slot.ctx.inputs().is_satisfied(&src, tag) => 0,
                    Mode::Pull => 1,
                };
                for data in (0..count).filter_map(|_| waiting.pop_front(&src, tag)) {
                    slot.ctx.inputs_mut().push_back(src, data, tag);
                    moved += 1;
                }
            }
        }
        self.parked.retain(|_, waiting| !waiting.is_empty());
        moved
    }

    /// Evaluate every live task's readiness and take out the ones that are
    /// ready, in name order. Readiness is evaluated for all tasks before any
    /// is taken out.
    ///
    pub(crate) fn take_ready(&mut self) -> Vec<(TaskName, Slot)> {
        let ready: Vec<TaskName> = self
            .pool
            .iter_mut()
            .filter_map(|(name, slot)| {
                if slot.task.dependency(&slot.ctx) {
                    slot.state = TaskState::Ready;
                    Some(*name)
                } else {
                    slot.state = TaskState::Pending;
                    None
                }
            })
            .collect();

        ready
            .into_iter()
            .filter_map(|name| self.pool.remove(&name).map(|slot| (name, slot)))
            .collect()
    }

    /// Put back a task that wants to run again.
    ///
    pub(crate) fn restore(&mut self, name: TaskName, mut slot: Slot) {
        slot.state = TaskState::Pending;
        self.pool.insert(name, slot);
    }

    pub(crate) fn retire(&mut self, name: TaskName) {
        debug!("[{}] task {} is terminal", self.name, name);
        self.retired.insert(name);
    }

    /// Add a task spawned while the graph is being iterated.
    ///
    pub(crate) fn spawn(&mut self, name: TaskName, task: Box<dyn Task>) -> Result<()> {
        debug!("[{}] spawned task {}", self.name, name);
        self.insert_boxed(name, task)
    }

    /// Drop every parked message, returning how many there were.
    ///
    pub(crate) fn drop_parked(&mut self) -> usize {
        let count = self.parked_len();

        if count > 0 {
            let recipients: Vec<_> = self.parked.keys().copied().collect();
            warn!(
                "[{}] dropping {} undelivered messages for {:?}",
                self.name, count, recipients
            );
        }
        self.parked.clear();
        count
    }

    fn insert_boxed(&mut self, name: TaskName, task: Box<dyn Task>) -> Result<()> {
        if self.pool.contains_key(&name) {
            return Err(Error::DuplicateTask(name));
        }
        self.retired.remove(&name);
        self.pool.insert(name, Slot::new(name, task));
        Ok(())
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("name", &self.name)
            .field("rank", &self.rank)
            .field("mode", &self.mode)
            .field("tasks", &self.names())
            .field("parked", &self.parked_len())
            .finish()
    }
}




/// Builds the task graph of a multi-fab iteration: one task per box owned
/// by the local rank, named by the box index, and an owner lookup taken
/// from the distribution mapping.
///
pub struct MfGraph;

impl MfGraph {
    pub fn build<T, F>(
        name: &str,
        boxes: &BoxArray,
        dm: &DistributionMapping,
        rank: usize,
        mode: Mode,
        mut make: F,
    ) -> Result<TaskGraph>
    where
        T: Task,
        F: FnMut(usize, &IndexSpace) -> Result<T>,
    {
        if boxes.len() != dm.len() {
            return Err(Error::LayoutMismatch {
                boxes: boxes.len(),
                owners: dm.len(),
            });
        }
        if rank >= dm.nprocs() {
            return Err(Error::Config(format!(
                "rank {} is outside a mapping over {} ranks",
                rank,
                dm.nprocs()
            )));
        }
        let owners = dm.clone();
        let mut graph = TaskGraph::new(name, rank, dm.nprocs(), mode).with_owner(move |task| {
            usize::try_from(task[0])
                .ok()
                .and_then(|i| owners.get(i))
                .unwrap_or(rank)
        });

        for i in dm.local_indices(rank) {
            graph.insert(TaskName::from_box(i)?, make(i, &boxes.as_slice()[i])?)?;
        }
        debug!(
            "[{}] rank {} holds {} of {} box tasks",
            name,
            rank,
            graph.len(),
            boxes.len()
        );
        Ok(graph)
    }

    /// Build a graph of [`Action`] tasks, each running its kernel for
    /// `steps` iterations.
    ///
    pub fn build_actions<K, F>(
        name: &str,
        boxes: &BoxArray,
        dm: &DistributionMapping,
        rank: usize,
        mode: Mode,
        steps: usize,
        mut make: F,
    ) -> Result<TaskGraph>
    where
        K: Kernel,
        F: FnMut(usize, &IndexSpace) -> Result<K>,
    {
        Self::build(name, boxes, dm, rank, mode, |i, b| Ok(Action::new(make(i, b)?, steps)))
    }
}

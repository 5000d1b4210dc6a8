//! The unit of schedulable work. A task is a state machine driven by the
//! runtime scheduler: each round the scheduler asks whether the task is
//! ready ([`Task::dependency`]), and if it is, runs its [`Task::job`] and then
//! its [`Task::post_completion`] hook. Tasks never block waiting for data;
//! a task that is not ready is simply asked again next round.
//!
//! Tasks communicate by message passing. A task pushes [`Data`] addressed to
//! another task's name onto its context; the scheduler routes it, either to
//! a task on the same worker or over the wire, and the message shows up in
//! the recipient's input [`DependencyMap`] at the start of a later round.
//! Tasks own their state and never hold references to one another.

mod action;
mod data;
mod dependency;
mod name;

use std::collections::VecDeque;

pub use action::{Action, Kernel, Step};
pub use data::Data;
pub use dependency::DependencyMap;
pub use name::TaskName;




/// Capability interface implemented by every kind of task.
///
pub trait Task: Send + 'static {
    /// Whether the task can run this round. This must only inspect the
    /// queued inputs; consuming them is the job's business.
    fn dependency(&self, ctx: &TaskContext) -> bool;

    /// Do one unit of work. This is the only place compute-heavy work should
    /// be done, and it may run on a worker thread.
    fn job(&mut self, ctx: &mut TaskContext);

    /// Apply side effects of the job: push messages to peers, spawn new
    /// tasks, or decide whether to stay alive.
    fn post_completion(&mut self, _ctx: &mut TaskContext) {}
}




/// Where a task is in its life cycle.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Inserted in a graph, never evaluated.
    Created,
    /// Evaluated and found not ready, or waiting for its next invocation.
    Pending,
    /// Found ready this round and about to run.
    Ready,
    /// Running its job.
    Running,
    /// Running its post-completion hook.
    Completing,
    /// Finished and reclaimed.
    Terminal,
}




/// The runtime-owned state of one task: its name, its queued inputs, the
/// messages it has produced this round, the tasks it has spawned, and
/// whether it wants to run again. A fresh context is not persistent: unless
/// the task calls [`TaskContext::keep_alive`], it runs once and is
/// reclaimed.
///
pub struct TaskContext {
    name: TaskName,
    inputs: DependencyMap,
    outputs: VecDeque<Data>,
    new_tasks: Vec<(TaskName, Box<dyn Task>)>,
    persistent: bool,
}

impl TaskContext {
    pub fn new(name: TaskName) -> Self {
        Self {
            name,
            inputs: DependencyMap::new(),
            outputs: VecDeque::new(),
            new_tasks: Vec::new(),
            persistent: false,
        }
    }

    pub fn name(&self) -> TaskName {
        self.name
    }

    /// Queue a message for another task.
    ///
    pub fn push(&mut self, dest: TaskName, buffer: Vec<u8>, tag: i32) {
        self.outputs.push_back(Data::new(self.name, dest, tag, buffer))
    }

    /// Whether a message from `src` with the given tag is waiting.
    ///
    pub fn depend_on(&self, src: &TaskName, tag: i32) -> bool {
        self.inputs.is_satisfied(src, tag)
    }

    /// Take the oldest message from `src` with the given tag.
    ///
    pub fn pull(&mut self, src: &TaskName, tag: i32) -> Option<Data> {
        self.inputs.pop_front(src, tag)
    }

    pub fn inputs(&self) -> &DependencyMap {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut DependencyMap {
        &mut self.inputs
    }

    /// Messages produced and not yet routed, oldest first.
    ///
    pub fn outputs(&self) -> impl Iterator<Item = &Data> + '_ {
        self.outputs.iter()
    }

    /// Add a task to the graph. It joins the next scheduling round.
    ///
    pub fn register_task<T: Task>(&mut self, name: TaskName, task: T) {
        self.new_tasks.push((name, Box::new(task)))
    }

    pub fn keep_alive(&mut self) {
        self.persistent = true
    }

    pub fn self_destroy(&mut self) {
        self.persistent = false
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub(crate) fn take_outputs(&mut self) -> VecDeque<Data> {
        std::mem::take(&mut self.outputs)
    }

    pub(crate) fn take_new_tasks(&mut self) -> Vec<(TaskName, Box<dyn Task>)> {
        std::mem::take(&mut self.new_tasks)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Task, TaskContext, TaskName};

    struct Echo;

    impl Task for Echo {
        fn dependency(&self, ctx: &TaskContext) -> bool {
            ctx.depend_on(&TaskName::from(0), 0)
        }

        fn job(&mut self, ctx: &mut TaskContext) {
            if let Some(data) = ctx.pull(&TaskName::from(0), 0) {
                ctx.push(data.source(), data.into_buffer(), 1)
            }
        }
    }

    #[test]
    fn context_routes_replies_to_the_source() {
        let me = TaskName::from(1);
        let mut ctx = TaskContext::new(me);
        let mut task = Echo;
        assert!(!task.dependency(&ctx));

        ctx.inputs_mut().push_back(
            TaskName::from(0),
            super::Data::new(TaskName::from(0), me, 0, vec![1, 2, 3]),
            0,
        );
        assert!(task.dependency(&ctx));
        task.job(&mut ctx);
        assert!(ctx.inputs().is_empty());

        let out: Vec<_> = ctx.take_outputs().into_iter().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient(), TaskName::from(0));
        assert_eq!(out[0].source(), me);
        assert_eq!(out[0].tag(), 1);
        assert!(!ctx.is_persistent());
    }

    #[test]
    fn default_post_completion_leaves_the_context_alone() {
        let mut ctx = TaskContext::new(TaskName::from(1));
        ctx.push(TaskName::from(0), vec![4], 0);
        ctx.keep_alive();
        Echo.post_completion(&mut ctx);
        assert_eq!(ctx.outputs().count(), 1);
        assert!(ctx.is_persistent());
        assert!(ctx.take_new_tasks().is_empty());
    }

    #[test]
    fn spawned_tasks_are_collected() {
        let mut ctx = TaskContext::new(TaskName::from(1));
        ctx.register_task(TaskName::from((1, 1)), Echo);
        let spawned = ctx.take_new_tasks();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].0, TaskName::from((1, 1)));
        assert!(ctx.take_new_tasks().is_empty());
    }
}

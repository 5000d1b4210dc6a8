use super::{Task, TaskContext};

/// The position of one invocation in an [`Action`]'s iteration budget.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    pub index: usize,
    pub total: usize,
}

impl Step {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.total
    }
}

/// The per-application part of an [`Action`]: what to wait for, what to
/// compute, and what to send, at each step.
///
pub trait Kernel: Send + 'static {
    /// Readiness for steps after the first. The first step is always ready.
    fn dependency(&self, _step: Step, _ctx: &TaskContext) -> bool {
        true
    }

    fn compute(&mut self, step: Step, ctx: &mut TaskContext);

    fn post_completion(&mut self, _step: Step, _ctx: &mut TaskContext) {}
}

/// A task that runs its kernel a fixed number of times and then destroys
/// itself. The iteration counter reads `None` until the first invocation,
/// and is incremented exactly once per invocation afterwards.
///
pub struct Action<K> {
    kernel: K,
    steps: usize,
    iteration: Option<usize>,
    computed: Option<Step>,
}

impl<K: Kernel> Action<K> {
    pub fn new(kernel: K, steps: usize) -> Self {
        Self {
            kernel,
            steps,
            iteration: None,
            computed: None,
        }
    }

    pub fn set_steps(&mut self, steps: usize) {
        self.steps = steps
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of invocations so far, or `None` before the first.
    ///
    pub fn iteration(&self) -> Option<usize> {
        self.iteration
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn into_kernel(self) -> K {
        self.kernel
    }

    fn step(&self, index: usize) -> Step {
        Step {
            index,
            total: self.steps,
        }
    }
}

impl<K: Kernel> Task for Action<K> {
    fn dependency(&self, ctx: &TaskContext) -> bool {
        match self.iteration {
            None => true,
            Some(n) if n >= self.steps => true,
            Some(n) => self.kernel.dependency(self.step(n), ctx),
        }
    }

    fn job(&mut self, ctx: &mut TaskContext) {
        let n = self.iteration.unwrap_or(0);

        self.computed = if n < self.steps {
            let step = self.step(n);
            self.kernel.compute(step, ctx);
            Some(step)
        } else {
            None
        };
        self.iteration = Some(n + 1);

        if n + 1 < self.steps {
            ctx.keep_alive()
        } else {
            ctx.self_destroy()
        }
    }

    fn post_completion(&mut self, ctx: &mut TaskContext) {
        if let Some(step) = self.computed.take() {
            self.kernel.post_completion(step, ctx)
        }
    }
}

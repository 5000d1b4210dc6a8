use core_affinity::{get_core_ids, set_for_current, CoreId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, warn};
use std::cell;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Worker {
    handle: Option<thread::JoinHandle<()>>,
    sender: Option<Sender<Job>>,
}

/// A minimal thread pool implementation with core affinity. No effort is made
/// to schedule jobs intelligently, it just goes round-robin. Jobs must be
/// `'static`. A job that panics is logged and dropped; the worker thread
/// that ran it keeps serving jobs.
///
pub struct ThreadPool {
    workers: Vec<Worker>,
    current_worker_id: cell::Cell<usize>,
}

impl ThreadPool {
    /// Create a new thread pool with the given number of threads. Threads
    /// are pinned to distinct cores while there are cores left to pin to;
    /// the remaining threads, or all of them if the core list is not
    /// available on this platform, run unpinned.
    ///
    pub fn new(num_threads: usize) -> Self {
        let mut core_ids = get_core_ids().unwrap_or_default().into_iter();

        if num_threads > core_ids.len() {
            warn!(
                "{} threads requested but only {} cores can be pinned",
                num_threads,
                core_ids.len()
            );
        }

        let workers = (0..num_threads.max(1))
            .map(|_| Worker::start(core_ids.next()))
            .collect();

        ThreadPool {
            workers,
            current_worker_id: cell::Cell::new(0),
        }
    }

    /// Return the number of worker threads in the pool.
    ///
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Spawn a new job into the pool. Job submissions go cyclically to the
    /// workers: if worker `n` gets this job, then worker `(n + 1) %
    /// num_workers` gets the next one.
    ///
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_on(None, job)
    }

    /// Spawn a job onto the worker thread with the given index, if it is
    /// `Some`. The current worker index is not incremented. If the worker
    /// index is `None`, then the job is run on the current worker index,
    /// which is then incremented.
    ///
    pub fn spawn_on<F>(&self, worker_id: Option<usize>, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let worker_id = if let Some(worker_id) = worker_id {
            worker_id % self.num_threads()
        } else {
            let worker_id = self.current_worker_id.get();
            self.current_worker_id
                .set((worker_id + 1) % self.num_threads());
            worker_id
        };
        let worker = &self.workers[worker_id];

        match worker.sender.as_ref().map(|s| s.send(Box::new(job))) {
            Some(Ok(())) => {}
            _ => error!("worker {} is not accepting jobs", worker_id),
        }
    }
}

impl Worker {
    fn start(core_id: Option<CoreId>) -> Self {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = unbounded();
        let handle = thread::spawn(move || {
            if let Some(core_id) = core_id {
                set_for_current(core_id);
                debug!("worker thread pinned to core {}", core_id.id);
            }
            for job in receiver {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("a job panicked on a pool thread");
                }
            }
        });
        Worker {
            handle: Some(handle),
            sender: Some(sender),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.sender.take();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("pool thread exited with a panic");
            }
        }
    }
}

//! Worker pool that executes submitted tasks on named threads.
//!
//! Components that need background execution depend on the [`Scheduler`]
//! trait rather than on this pool, so hosts can plug in their own executor.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::trace::{debug, error, info};

/// A unit of work handed to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The scheduler is no longer accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("scheduler rejected the task")]
pub struct Rejected;

/// Submission seam for background work.
///
/// `submit` must not block on the task's execution.
pub trait Scheduler: Send + Sync {
    /// Queues `task` for execution on some worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`] if the scheduler has been shut down.
    fn submit(&self, task: Task) -> Result<(), Rejected>;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn submit(&self, task: Task) -> Result<(), Rejected> {
        (**self).submit(task)
    }
}

/// Fixed-size pool of worker threads sharing one unbounded task queue.
///
/// Dropping the pool closes the queue but does not join the workers; call
/// [`WorkerPool::shutdown`] to wait for queued tasks to drain.
pub struct WorkerPool {
    name: String,
    queue: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `threads` workers named `{name}-{index}`. Zero is treated as one.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned. Workers
    /// that were already started exit on their own.
    pub fn spawn(name: &str, threads: usize) -> io::Result<Self> {
        let threads = threads.max(1);
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }

        info!(pool = name, threads, "worker pool started");

        Ok(Self {
            name: name.to_owned(),
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Number of worker threads still owned by the pool.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stops accepting work and joins the workers after the queue drains.
    ///
    /// Called from one of the pool's own workers, that worker is not joined.
    pub fn shutdown(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

impl Scheduler for WorkerPool {
    fn submit(&self, task: Task) -> Result<(), Rejected> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        match queue.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| Rejected),
            None => Err(Rejected),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn worker_loop(rx: &Mutex<Receiver<Task>>) {
    loop {
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(task) = next else {
            debug!("task queue closed, worker exiting");
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("task panicked on worker thread");
        }
    }
}

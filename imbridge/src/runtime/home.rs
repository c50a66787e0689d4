//! A dedicated owner thread with a job loop.
//!
//! [`HomeLoop`] is the stock [`HomeRuntime`] for hosts that do not bring
//! their own single-threaded runtime. Referenced targets live in a
//! thread-local table on the loop thread, so they never need to be `Send`
//! and can only be looked up or released from that thread.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::runtime::handle::{HomeRuntime, Job, PostError};
use crate::trace::{debug, error, info, warn};

thread_local! {
    static REFERENCES: RefCell<HashMap<u64, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Reference to a target stored on a [`HomeLoop`] thread.
///
/// Moving the reference between threads is fine; dereferencing or releasing
/// it only works on the loop thread.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RawRef(u64);

impl fmt::Display for RawRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// Single owner thread running posted jobs in order.
///
/// Dropping the loop stops it accepting jobs without joining the thread.
pub struct HomeLoop {
    name: String,
    home: ThreadId,
    jobs: Mutex<Option<Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    next_ref: AtomicU64,
    live: AtomicUsize,
}

impl HomeLoop {
    /// Starts the loop thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread = thread::Builder::new().name(name.to_owned()).spawn(move || {
            while let Ok(job) = rx.recv() {
                job();
            }
            let leaked = REFERENCES.with(|refs| refs.borrow().len());
            if leaked > 0 {
                warn!(leaked, "home loop exiting with unreleased references");
            }
        })?;

        info!(thread = name, "home loop started");

        Ok(Self {
            name: name.to_owned(),
            home: thread.thread().id(),
            jobs: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            next_ref: AtomicU64::new(1),
            live: AtomicUsize::new(0),
        })
    }

    /// Posts a closure to run on the loop thread.
    ///
    /// # Errors
    ///
    /// Returns [`PostError`] once the loop has been shut down.
    pub fn run<F>(&self, f: F) -> Result<(), PostError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_to_owner_loop(Box::new(f))
    }

    /// Number of references created and not yet released.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Calls `f` with the target behind `raw`.
    ///
    /// `f` receives `None` when called off the loop thread or after release.
    pub fn with_target<R>(raw: &RawRef, f: impl FnOnce(Option<&dyn Any>) -> R) -> R {
        REFERENCES.with(|refs| f(refs.borrow().get(&raw.0).map(|target| &**target)))
    }

    /// Stops accepting jobs, lets queued ones finish and joins the thread.
    ///
    /// Called from the loop thread itself, the join is skipped.
    pub fn shutdown(&self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if thread::current().id() == self.home {
            return;
        }
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(thread = %self.name, "home loop panicked");
        }
        debug!(thread = %self.name, "home loop joined");
    }
}

impl HomeRuntime for HomeLoop {
    type Target = Box<dyn Any>;
    type Raw = RawRef;

    fn home_thread(&self) -> ThreadId {
        self.home
    }

    /// Off the loop thread the target is dropped and the returned reference
    /// never resolves.
    fn create_handle(&self, target: Self::Target) -> RawRef {
        let id = self.next_ref.fetch_add(1, Ordering::Relaxed);
        if !self.is_home_thread() {
            error!(raw = %RawRef(id), "create attempted off the home thread; target dropped");
            drop(target);
            return RawRef(id);
        }
        REFERENCES.with(|refs| refs.borrow_mut().insert(id, target));
        self.live.fetch_add(1, Ordering::AcqRel);
        RawRef(id)
    }

    fn release_handle(&self, raw: RawRef) {
        if !self.is_home_thread() {
            error!(%raw, "release attempted off the home thread; ignored");
            return;
        }
        if REFERENCES.with(|refs| refs.borrow_mut().remove(&raw.0)).is_some() {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn post_to_owner_loop(&self, job: Job) -> Result<(), PostError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        match jobs.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| PostError),
            None => Err(PostError),
        }
    }
}

impl Drop for HomeLoop {
    fn drop(&mut self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

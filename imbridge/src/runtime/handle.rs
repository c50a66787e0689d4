//! Thread-affine handles.
//!
//! A [`Handle`] references a resource owned by a single-threaded runtime
//! (its *home thread*). The resource is only ever released on that thread:
//!
//! ```text
//! teardown on home thread    Active ──────────────────────────────► Released
//! teardown elsewhere         Active ─► PendingCrossThreadRelease ─┬► Released   (loop ran the job in time)
//!                                                                 └► Abandoned  (bound elapsed, reference leaked)
//! ```
//!
//! Off-thread teardown posts a release job to the home thread's loop and
//! waits on a [`BlockingResult`] for at most the handle's release timeout.
//! If the loop does not get to it in time the handle is abandoned: the
//! reference is leaked rather than freed from the wrong thread, and a late
//! job sees the abandoned state and skips the release.
//!
//! [`DualHandle`] pairs two references with a weak link to the
//! message-processing context that uses them. It does *not* hand off
//! across threads: dropped elsewhere, it logs and leaks both references.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use thiserror::Error;

use crate::runtime::pool::Task;
use crate::sync::blocking::BlockingResult;
use crate::trace::{debug, trace, warn};

/// A job posted to a home thread's event loop.
pub type Job = Task;

/// The owner loop is not accepting jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("owner loop is not accepting jobs")]
pub struct PostError;

/// Single-threaded runtime that owns handle targets.
pub trait HomeRuntime: Send + Sync + 'static {
    /// What a handle refers to. Created on the home thread; need not be `Send`.
    type Target;
    /// The runtime's reference to a target.
    type Raw: Send + 'static;

    /// The only thread allowed to create and release references.
    fn home_thread(&self) -> ThreadId;

    /// Creates a reference to `target`. Must be called on the home thread.
    fn create_handle(&self, target: Self::Target) -> Self::Raw;

    /// Releases a reference. Must be called on the home thread.
    fn release_handle(&self, raw: Self::Raw);

    /// Queues `job` on the home thread's loop without waiting for it to run.
    ///
    /// # Errors
    ///
    /// Returns [`PostError`] if the loop is gone.
    fn post_to_owner_loop(&self, job: Job) -> Result<(), PostError>;

    fn is_home_thread(&self) -> bool {
        thread::current().id() == self.home_thread()
    }
}

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    PendingCrossThreadRelease,
    Released,
    /// Teardown finished without confirmation; the reference was leaked.
    Abandoned,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::PendingCrossThreadRelease => "pending-cross-thread-release",
            Self::Released => "released",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Identifier for a registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Handle construction errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("handle must be created on its home thread {home:?}, not {current:?}")]
    WrongThread { home: ThreadId, current: ThreadId },
}

/// Cross-thread release was not confirmed before the bound; the reference leaked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("release of handle {id} not confirmed within {timeout:?}; reference leaked")]
pub struct ResourceAbandoned {
    pub id: HandleId,
    pub timeout: Duration,
}

/// Shared view of a handle's state. Stays readable after the handle is gone.
#[derive(Clone)]
pub struct StateWatch(Arc<Mutex<HandleState>>);

impl StateWatch {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(HandleState::Active)))
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self) -> HandleState {
        *self.lock()
    }

    fn set(&self, state: HandleState) {
        *self.lock() = state;
    }

    /// Moves `from` → `to`; returns `false` and changes nothing otherwise.
    fn transition(&self, from: HandleState, to: HandleState) -> bool {
        let mut state = self.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for StateWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateWatch").field(&self.get()).finish()
    }
}

fn ensure_home<Rt: HomeRuntime>(runtime: &Rt) -> Result<(), HandleError> {
    let current = thread::current().id();
    let home = runtime.home_thread();
    if current == home {
        Ok(())
    } else {
        Err(HandleError::WrongThread { home, current })
    }
}

/// A reference owned by a home thread, released there on teardown.
pub struct Handle<Rt: HomeRuntime> {
    id: HandleId,
    runtime: Arc<Rt>,
    raw: Option<Rt::Raw>,
    state: StateWatch,
    release_timeout: Duration,
}

impl<Rt: HomeRuntime> Handle<Rt> {
    /// Registers `target` with the runtime. Must run on the home thread.
    ///
    /// `release_timeout` bounds how long an off-thread teardown waits for the
    /// home thread.
    ///
    /// # Errors
    ///
    /// [`HandleError::WrongThread`] when called elsewhere.
    pub fn create(
        runtime: Arc<Rt>,
        target: Rt::Target,
        release_timeout: Duration,
    ) -> Result<Self, HandleError> {
        ensure_home(&*runtime)?;
        let raw = runtime.create_handle(target);
        let id = HandleId::generate();
        trace!(%id, "handle created");
        Ok(Self {
            id,
            runtime,
            raw: Some(raw),
            state: StateWatch::new(),
            release_timeout,
        })
    }

    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state.get()
    }

    /// A state view that outlives the handle.
    #[must_use]
    pub fn watch(&self) -> StateWatch {
        self.state.clone()
    }

    #[must_use]
    pub fn home_thread(&self) -> ThreadId {
        self.runtime.home_thread()
    }

    /// The runtime reference, while the handle is active.
    #[must_use]
    pub const fn raw(&self) -> Option<&Rt::Raw> {
        self.raw.as_ref()
    }

    /// Tears the handle down now and reports how it ended.
    ///
    /// # Errors
    ///
    /// [`ResourceAbandoned`] if an off-thread release was not confirmed in time.
    pub fn release(mut self) -> Result<(), ResourceAbandoned> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), ResourceAbandoned> {
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };

        if self.runtime.is_home_thread() {
            self.runtime.release_handle(raw);
            self.state.set(HandleState::Released);
            trace!(id = %self.id, "handle released on home thread");
            return Ok(());
        }

        self.state.set(HandleState::PendingCrossThreadRelease);
        debug!(id = %self.id, "handing release to home thread");

        let done = BlockingResult::new(self.release_timeout);
        let ack = done.setter();
        let runtime = Arc::clone(&self.runtime);
        let state = self.state.clone();
        let job: Job = Box::new(move || {
            if state.transition(HandleState::PendingCrossThreadRelease, HandleState::Released) {
                runtime.release_handle(raw);
            }
            ack.set(());
        });

        let confirmed = match self.runtime.post_to_owner_loop(job) {
            Ok(()) => done.get_value().is_ok(),
            Err(PostError) => false,
        };

        if confirmed
            || !self
                .state
                .transition(HandleState::PendingCrossThreadRelease, HandleState::Abandoned)
        {
            return Ok(());
        }

        warn!(
            id = %self.id,
            timeout_ms = self.release_timeout.as_millis() as u64,
            "home thread did not confirm release; leaking reference"
        );
        Err(ResourceAbandoned {
            id: self.id,
            timeout: self.release_timeout,
        })
    }
}

impl<Rt: HomeRuntime> Drop for Handle<Rt> {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl<Rt: HomeRuntime> fmt::Debug for Handle<Rt> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// Mutex-guarded set of live handles, keyed by id.
pub struct HandleRegistry<Rt: HomeRuntime> {
    handles: Mutex<HashMap<HandleId, Handle<Rt>>>,
}

impl<Rt: HomeRuntime> Default for HandleRegistry<Rt> {
    fn default() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }
}

impl<Rt: HomeRuntime> HandleRegistry<Rt> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<HandleId, Handle<Rt>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes ownership of `handle` and returns its id.
    pub fn register(&self, handle: Handle<Rt>) -> HandleId {
        let id = handle.id();
        self.handles().insert(id, handle);
        id
    }

    /// Removes and tears down the handle, outside the registry lock.
    ///
    /// Returns `None` if no handle has that id.
    pub fn unregister(&self, id: HandleId) -> Option<Result<(), ResourceAbandoned>> {
        let handle = self.handles().remove(&id)?;
        Some(handle.release())
    }

    /// Tears down every handle; returns the ones that were abandoned.
    pub fn release_all(&self) -> Vec<ResourceAbandoned> {
        let drained: Vec<_> = self.handles().drain().map(|(_, h)| h).collect();
        drained
            .into_iter()
            .filter_map(|handle| handle.release().err())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, id: HandleId) -> bool {
        self.handles().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }
}

/// Two related references plus a weak link to the context that processes
/// their messages.
///
/// Dropped on the home thread, both references are released. Dropped
/// anywhere else, it warns and leaks them; there is no cross-thread hand-off.
pub struct DualHandle<Rt: HomeRuntime, C> {
    id: HandleId,
    runtime: Arc<Rt>,
    primary: Option<Rt::Raw>,
    secondary: Option<Rt::Raw>,
    context: Weak<C>,
    state: StateWatch,
}

impl<Rt: HomeRuntime, C> DualHandle<Rt, C> {
    /// Registers both targets. Must run on the home thread.
    ///
    /// # Errors
    ///
    /// [`HandleError::WrongThread`] when called elsewhere.
    pub fn create(
        runtime: Arc<Rt>,
        primary: Rt::Target,
        secondary: Rt::Target,
        context: &Arc<C>,
    ) -> Result<Self, HandleError> {
        ensure_home(&*runtime)?;
        let primary = runtime.create_handle(primary);
        let secondary = runtime.create_handle(secondary);
        Ok(Self {
            id: HandleId::generate(),
            runtime,
            primary: Some(primary),
            secondary: Some(secondary),
            context: Arc::downgrade(context),
            state: StateWatch::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state.get()
    }

    #[must_use]
    pub fn watch(&self) -> StateWatch {
        self.state.clone()
    }

    #[must_use]
    pub const fn primary(&self) -> Option<&Rt::Raw> {
        self.primary.as_ref()
    }

    #[must_use]
    pub const fn secondary(&self) -> Option<&Rt::Raw> {
        self.secondary.as_ref()
    }

    /// The message-processing context, if it is still alive.
    #[must_use]
    pub fn context(&self) -> Option<Arc<C>> {
        self.context.upgrade()
    }
}

impl<Rt: HomeRuntime, C> Drop for DualHandle<Rt, C> {
    fn drop(&mut self) {
        if !self.runtime.is_home_thread() {
            warn!(id = %self.id, "dual handle dropped off its home thread; references not released");
            self.state.set(HandleState::Abandoned);
            return;
        }
        for raw in [self.primary.take(), self.secondary.take()].into_iter().flatten() {
            self.runtime.release_handle(raw);
        }
        self.state.set(HandleState::Released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::home::HomeLoop;
    use std::any::Any;
    use std::sync::mpsc;

    use minstant::Instant;

    const BOUND: Duration = Duration::from_millis(2000);

    fn on_loop<R, F>(home: &Arc<HomeLoop>, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(Arc<HomeLoop>) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let rt = Arc::clone(home);
        home.run(move || {
            let _ = tx.send(f(rt));
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn target(v: u32) -> Box<dyn Any> {
        Box::new(v)
    }

    #[test]
    fn create_off_home_thread_is_refused() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let err = Handle::create(Arc::clone(&home), target(1), BOUND).unwrap_err();
        assert!(matches!(err, HandleError::WrongThread { .. }));
        assert_eq!(home.live_handles(), 0);
        home.shutdown();
    }

    #[test]
    fn release_on_home_thread_is_synchronous() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let (before, after, outcome, elapsed, live) = on_loop(&home, |rt| {
            let handle = Handle::create(Arc::clone(&rt), target(1), BOUND).unwrap();
            let watch = handle.watch();
            let before = watch.get();
            let start = Instant::now();
            let outcome = handle.release();
            (before, watch.get(), outcome, start.elapsed(), rt.live_handles())
        });

        assert_eq!(before, HandleState::Active);
        assert_eq!(after, HandleState::Released);
        assert_eq!(outcome, Ok(()));
        assert!(elapsed < Duration::from_millis(50));
        assert_eq!(live, 0);
        home.shutdown();
    }

    #[test]
    fn off_thread_release_goes_through_pending() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let handle = on_loop(&home, |rt| Handle::create(rt, target(2), BOUND).unwrap());
        let watch = handle.watch();
        assert_eq!(home.live_handles(), 1);

        // Hold the loop so the release job queues behind us.
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        home.run(move || {
            let _ = resume_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();

        let releaser = std::thread::spawn(move || handle.release());

        let start = Instant::now();
        while watch.get() != HandleState::PendingCrossThreadRelease {
            assert!(start.elapsed() < Duration::from_secs(1), "never went pending");
            std::thread::yield_now();
        }
        resume_tx.send(()).unwrap();

        assert_eq!(releaser.join().unwrap(), Ok(()));
        assert_eq!(watch.get(), HandleState::Released);
        assert_eq!(home.live_handles(), 0);
        home.shutdown();
    }

    #[test]
    fn unresponsive_home_thread_abandons_after_bound() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let bound = Duration::from_millis(80);
        let handle = on_loop(&home, move |rt| Handle::create(rt, target(3), bound).unwrap());
        let watch = handle.watch();
        let id = handle.id();

        home.run(|| std::thread::sleep(Duration::from_millis(400)))
            .unwrap();

        let start = Instant::now();
        let outcome = handle.release();
        let elapsed = start.elapsed();

        assert_eq!(outcome, Err(ResourceAbandoned { id, timeout: bound }));
        assert!(elapsed >= Duration::from_millis(75), "gave up early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(350), "hung past bound: {elapsed:?}");
        assert_eq!(watch.get(), HandleState::Abandoned);

        // The late job must not release an abandoned reference.
        home.shutdown();
        assert_eq!(watch.get(), HandleState::Abandoned);
        assert_eq!(home.live_handles(), 1);
    }

    #[test]
    fn stopped_loop_abandons_immediately() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let handle = on_loop(&home, |rt| Handle::create(rt, target(4), BOUND).unwrap());
        home.shutdown();

        let start = Instant::now();
        assert!(handle.release().is_err());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn drop_runs_the_same_protocol() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let handle = on_loop(&home, |rt| Handle::create(rt, target(5), BOUND).unwrap());
        let watch = handle.watch();
        drop(handle);
        assert_eq!(watch.get(), HandleState::Released);
        assert_eq!(home.live_handles(), 0);
        home.shutdown();
    }

    #[test]
    fn registry_unregister_releases() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let registry = HandleRegistry::new();
        let a = registry.register(on_loop(&home, |rt| Handle::create(rt, target(6), BOUND).unwrap()));
        let b = registry.register(on_loop(&home, |rt| Handle::create(rt, target(7), BOUND).unwrap()));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a));

        assert_eq!(registry.unregister(a), Some(Ok(())));
        assert_eq!(registry.unregister(a), None);
        assert_eq!(home.live_handles(), 1);

        assert!(registry.release_all().is_empty());
        assert!(registry.is_empty());
        assert!(!registry.contains(b));
        assert_eq!(home.live_handles(), 0);
        home.shutdown();
    }

    struct Pump;

    #[test]
    fn dual_handle_releases_on_home_thread() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let (state, live, had_context) = on_loop(&home, |rt| {
            let pump = Arc::new(Pump);
            let dual = DualHandle::create(Arc::clone(&rt), target(1), target(2), &pump).unwrap();
            let had_context = dual.context().is_some();
            let watch = dual.watch();
            drop(dual);
            (watch.get(), rt.live_handles(), had_context)
        });
        assert!(had_context);
        assert_eq!(state, HandleState::Released);
        assert_eq!(live, 0);
        home.shutdown();
    }

    #[test]
    fn dual_handle_dropped_elsewhere_skips_release() {
        let home = Arc::new(HomeLoop::spawn("handle-test").unwrap());
        let pump = Arc::new(Pump);
        let pump_for_loop = Arc::clone(&pump);
        let dual = on_loop(&home, move |rt| {
            DualHandle::create(rt, target(1), target(2), &pump_for_loop).unwrap()
        });
        let watch = dual.watch();
        assert!(dual.primary().is_some() && dual.secondary().is_some());

        drop(pump);
        assert!(dual.context().is_none());

        let start = Instant::now();
        drop(dual);
        assert!(start.elapsed() < Duration::from_millis(50), "must not block");
        assert_eq!(watch.get(), HandleState::Abandoned);
        assert_eq!(home.live_handles(), 2);
        home.shutdown();
    }
}

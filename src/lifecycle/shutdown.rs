//! Graceful Shutdown Coordinator
//!
//! Owns the lifecycle state, the one-shot shutdown signal, the exit code and
//! the shutdown listeners. Cheap to clone; every clone shares the same state.

use super::error::Result;
use super::hangup::{HangupState, HangupToggle, OsSignalHook, SignalHook, SignalInterceptor};
use super::signal::ShutdownSignal;
use super::state::{LifecycleState, StateCell};
use super::LifecycleError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// Exit code before anyone decided one
pub const UNINITIALIZED_EXIT_CODE: i32 = i32::MIN;

/// Exit code of a regular shutdown
pub const DEFAULT_EXIT_CODE: i32 = 0;

type ShutdownCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    name: String,
    state: StateCell,
    signal: ShutdownSignal,
    exit_code: AtomicI32,
    // `None` once drained by the winning shutdown request
    shutdown_listeners: Mutex<Option<Vec<ShutdownCallback>>>,
    hangup: SignalInterceptor,
}

/// Coordinates the run/shutdown transition of a managed runtime
///
/// # Example
///
/// ```rust,no_run
/// use conduit_main::lifecycle::ShutdownCoordinator;
///
/// # async fn run() {
/// let coordinator = ShutdownCoordinator::new("routing-engine");
///
/// let admin = coordinator.clone();
/// tokio::spawn(async move {
///     // e.g. an admin endpoint
///     admin.request_shutdown();
/// });
///
/// coordinator.wait().await;
/// assert!(!coordinator.is_run_allowed());
/// # }
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator that maps OS termination signals to shutdown
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), Arc::new(OsSignalHook))
    }

    /// Create a coordinator with a custom signal hook
    pub fn with_signal_hook(hook: Arc<dyn SignalHook>) -> Self {
        Self::build("main".to_string(), hook)
    }

    pub(crate) fn build(name: String, hook: Arc<dyn SignalHook>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: StateCell::new(),
                signal: ShutdownSignal::new(),
                exit_code: AtomicI32::new(UNINITIALIZED_EXIT_CODE),
                shutdown_listeners: Mutex::new(Some(Vec::new())),
                hangup: SignalInterceptor::new(hook),
            }),
        }
    }

    /// Name of the managed runtime, used in logs
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    /// True until shutdown is requested
    pub fn is_run_allowed(&self) -> bool {
        !self.inner.signal.is_completed()
    }

    /// Request shutdown.
    ///
    /// Returns `true` only for the call that moved the runtime out of the
    /// running state; every later or concurrent call returns `false`.
    pub fn request_shutdown(&self) -> bool {
        self.request_shutdown_with_exit_code(DEFAULT_EXIT_CODE)
    }

    /// Request shutdown and propose an exit code.
    ///
    /// The first proposed exit code wins, even if that proposer lost the
    /// shutdown race.
    pub fn request_shutdown_with_exit_code(&self, exit_code: i32) -> bool {
        let _ = self.inner.exit_code.compare_exchange(
            UNINITIALIZED_EXIT_CODE,
            exit_code,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.inner.state.advance(LifecycleState::StopRequested);

        if !self.inner.signal.complete() {
            return false;
        }

        tracing::info!(name = %self.inner.name, "Initiating shutdown");
        self.notify_shutdown_listeners();
        true
    }

    /// Resolved exit code; [`DEFAULT_EXIT_CODE`] when nobody set one
    pub fn exit_code(&self) -> i32 {
        match self.inner.exit_code.load(Ordering::Acquire) {
            UNINITIALIZED_EXIT_CODE => DEFAULT_EXIT_CODE,
            code => code,
        }
    }

    /// Wait until shutdown is requested.
    ///
    /// The first wait installs the hangup interceptor. Dropping the future
    /// cancels the wait.
    pub async fn wait(&self) {
        self.install_hangup();
        self.inner.signal.wait().await;
    }

    /// Wait until shutdown is requested or `timeout` elapses.
    ///
    /// Returns `true` if shutdown was requested.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        self.install_hangup();
        self.inner.signal.wait_timeout(timeout).await
    }

    /// Blocking form of [`wait`](Self::wait) for hosts driven from plain threads
    pub fn wait_blocking(&self) {
        self.install_hangup();
        self.inner.signal.wait_blocking();
    }

    /// Blocking form of [`wait_timeout`](Self::wait_timeout)
    pub fn wait_blocking_timeout(&self, timeout: Duration) -> bool {
        self.install_hangup();
        self.inner.signal.wait_blocking_timeout(timeout)
    }

    /// Register a callback run once after shutdown is requested.
    ///
    /// Callbacks never run on the requesting thread: they go to tokio's
    /// blocking pool when a runtime is present, or to a dedicated thread
    /// otherwise. A callback registered after shutdown was requested is
    /// dispatched the same way right away.
    pub fn add_shutdown_listener<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self
            .inner
            .shutdown_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(listeners) = guard.as_mut() {
            listeners.push(Box::new(listener));
            return;
        }
        drop(guard);
        spawn_shutdown_listeners(vec![Box::new(listener)]);
    }

    /// Enable or disable mapping of OS termination signals to shutdown
    pub fn set_hangup_enabled(&self, enabled: bool) -> HangupToggle {
        self.inner.hangup.set_enabled(enabled)
    }

    pub fn hangup_state(&self) -> HangupState {
        self.inner.hangup.state()
    }

    /// Handle that requests shutdown without keeping the coordinator alive
    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Move the lifecycle forward to `to`
    pub(crate) fn advance(&self, to: LifecycleState) -> Result<()> {
        self.inner
            .state
            .advance(to)
            .map(|from| tracing::debug!(%from, %to, "Lifecycle transition"))
            .map_err(|from| LifecycleError::InvalidTransition { from, to })
    }

    /// Resolves once shutdown is requested, without touching the hangup hook
    pub(crate) async fn stopped(&self) {
        self.inner.signal.wait().await;
    }

    fn install_hangup(&self) {
        self.inner.hangup.install(self.trigger());
    }

    fn notify_shutdown_listeners(&self) {
        let listeners = self
            .inner
            .shutdown_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();

        spawn_shutdown_listeners(listeners);
    }
}

fn spawn_shutdown_listeners(listeners: Vec<ShutdownCallback>) {
    if listeners.is_empty() {
        return;
    }

    let run = move || {
        for listener in listeners {
            run_shutdown_listener(listener);
        }
    };

    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn_blocking(run);
        return;
    }

    if let Err(e) = std::thread::Builder::new()
        .name("conduit-shutdown-listeners".to_string())
        .spawn(run)
    {
        tracing::error!("Cannot run shutdown listeners: {}", e);
    }
}

fn run_shutdown_listener(listener: ShutdownCallback) {
    if catch_unwind(AssertUnwindSafe(listener)).is_err() {
        tracing::error!("Shutdown listener panicked");
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("run_allowed", &self.is_run_allowed())
            .field("hangup", &self.inner.hangup)
            .finish()
    }
}

/// Weak handle used by signal hooks and watchdogs to request shutdown
#[derive(Clone)]
pub struct ShutdownTrigger {
    inner: Weak<Inner>,
}

impl ShutdownTrigger {
    /// Request shutdown; `false` if it was already requested or the
    /// coordinator is gone
    pub fn fire(&self) -> bool {
        self.fire_with_exit_code(DEFAULT_EXIT_CODE)
    }

    pub fn fire_with_exit_code(&self, exit_code: i32) -> bool {
        match self.inner.upgrade() {
            Some(inner) => ShutdownCoordinator { inner }.request_shutdown_with_exit_code(exit_code),
            None => false,
        }
    }
}

impl std::fmt::Debug for ShutdownTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownTrigger")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

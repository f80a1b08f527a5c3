//! Lifecycle and Graceful Shutdown Module
//!
//! This module drives a routing engine from construction to exit and
//! coordinates a single, orderly shutdown no matter who asks for it.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. BeforeInitialize                  ← Listener event (blocking)
//!    ↓
//! 2. BeforeConfigure                   ← Listener event (blocking)
//!    ↓
//! 3. Configuration applied (initial + override + wildcard properties)
//!    ↓
//! 4. AfterConfigure                    ← Listener event
//!    ↓
//! 5. Bootstrap resources released
//!    ↓
//! 6. BeforeStart                       ← Listener event (blocking)
//!    ↓
//! 7. Engine Start
//!    ↓
//! 8. AfterStart                        ← Listener event
//!    ↓
//! [Running... live reconfiguration allowed]
//!    ↓
//! 9. Shutdown requested (call, SIGHUP/SIGTERM/SIGINT, duration limit)
//!    ↓
//! 10. BeforeStop                       ← Listener event (blocking)
//!    ↓
//! 11. Engine Stop
//!    ↓
//! 12. AfterStop                        ← Listener event
//! ```
//!
//! A failing listener aborts a blocking phase; failures in the other
//! phases are logged and the sequence continues.
//!
//! # Example
//!
//! ```rust
//! use conduit_main::lifecycle::ShutdownCoordinator;
//!
//! let coordinator = ShutdownCoordinator::new("orders");
//! coordinator.add_shutdown_listener(|| tracing::info!("draining"));
//!
//! assert!(coordinator.request_shutdown());
//! assert!(!coordinator.request_shutdown());
//! assert!(!coordinator.is_run_allowed());
//! ```

mod application;
mod duration;
mod error;
mod hangup;
mod manager;
mod shutdown;
mod signal;
mod state;
mod traits;

pub use application::{Main, MainBuilder};
pub use duration::{ActivityTracker, DurationLimit, DurationWatchdog};
pub use error::{LifecycleError, Result};
pub use hangup::{
    HangupState, HangupToggle, OsSignalHook, SignalHook, SignalInterceptor, termination_signal,
};
pub use manager::{DispatchOutcome, LifecycleListenerBus, ListenerFailure};
pub use shutdown::{DEFAULT_EXIT_CODE, ShutdownCoordinator, ShutdownTrigger, UNINITIALIZED_EXIT_CODE};
pub use signal::ShutdownSignal;
pub use state::LifecycleState;
pub use traits::{LifecycleContext, LifecycleEvent, LifecycleListener};

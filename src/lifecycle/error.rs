//! Lifecycle-specific error types

use super::{LifecycleEvent, LifecycleState};
use crate::config::ConfigError;
use thiserror::Error;

/// Errors that can occur during lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Startup sequence failed before the engine was running
    #[error("Startup failed: {0}")]
    StartupFailed(String),

    /// Shutdown sequence failed
    #[error("Shutdown failed: {0}")]
    ShutdownFailed(String),

    /// A listener returned an error during a blocking phase
    #[error("Listener {listener} failed during {event}: {message}")]
    ListenerFailed {
        /// The event being dispatched
        event: LifecycleEvent,
        /// Name of the listener that failed
        listener: String,
        /// Error message
        message: String,
    },

    /// The engine refused to start or stop
    #[error("Engine {operation} failed: {message}")]
    EngineFailed {
        /// `start` or `stop`
        operation: &'static str,
        /// Error message
        message: String,
    },

    /// A phase was requested from a state that does not allow it
    #[error("Cannot enter {to} from {from}")]
    InvalidTransition {
        /// Current state
        from: LifecycleState,
        /// Requested state
        to: LifecycleState,
    },

    /// Configuration was mutated after the engine started
    #[error("Configuration is read-only during {0}")]
    ConfigurationFrozen(LifecycleEvent),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The properties file watcher could not be started
    #[error("Cannot watch properties file: {0}")]
    Watch(#[from] notify::Error),
}

impl LifecycleError {
    /// Create a startup failure error
    pub fn startup_failed(msg: impl Into<String>) -> Self {
        Self::StartupFailed(msg.into())
    }

    /// Create a shutdown failure error
    pub fn shutdown_failed(msg: impl Into<String>) -> Self {
        Self::ShutdownFailed(msg.into())
    }

    /// Create a listener failure error
    pub fn listener_failed(
        event: LifecycleEvent,
        listener: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ListenerFailed {
            event,
            listener: listener.into(),
            message: message.into(),
        }
    }

    /// Create an engine failure error
    pub fn engine_failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::EngineFailed {
            operation,
            message: message.into(),
        }
    }

    /// True when the error happened while stopping
    pub fn is_shutdown_failure(&self) -> bool {
        match self {
            Self::ShutdownFailed(_) => true,
            Self::ListenerFailed { event, .. } => event.is_stop_phase(),
            Self::EngineFailed { operation, .. } => *operation == "stop",
            _ => false,
        }
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

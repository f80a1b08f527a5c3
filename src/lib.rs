//! # Conduit Main
//!
//! Application lifecycle and graceful shutdown for long-running routing
//! engines.
//!
//! Conduit Main runs an engine through an ordered startup sequence, blocks
//! until shutdown is requested, then stops it cleanly. Shutdown can come
//! from any thread or task, from an OS termination signal, or from a
//! duration limit, and it happens exactly once.
//!
//! ## Features
//!
//! - **Shutdown coordination**: linearizable shutdown request with async and blocking waits
//! - **Hangup interception**: SIGHUP/SIGTERM/SIGINT mapped to a shutdown request, installed at most once
//! - **Lifecycle listeners**: ordered `Before*`/`After*` events with fail-fast blocking phases
//! - **Bootstrap cleanup**: initial, override and wildcard properties dropped once applied
//! - **Live reconfiguration**: all-or-nothing property reloads on a running engine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit_main::prelude::*;
//!
//! struct Router;
//!
//! #[async_trait]
//! impl Engine for Router {
//!     async fn start(&self, configuration: &Properties) -> anyhow::Result<()> {
//!         tracing::info!(properties = configuration.len(), "Routing");
//!         Ok(())
//!     }
//!
//!     async fn stop(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut main = Main::builder()
//!         .config(MainConfig::from_env()?)
//!         .engine(Arc::new(Router))
//!         .build()?;
//!
//!     // Ctrl-C or SIGTERM stops the engine
//!     let exit_code = main.run().await?;
//!     std::process::exit(exit_code);
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod reload;

// Re-export core types
pub use config::{MainConfig, Properties, Property};
pub use engine::{Engine, Reconfigurable};
pub use lifecycle::{LifecycleError, Main, Result, ShutdownCoordinator};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;

/// Prelude module for convenient imports
///
/// ```
/// use conduit_main::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigError, MainConfig, Properties, Property};
    pub use crate::engine::{Engine, Reconfigurable};
    pub use crate::lifecycle::{
        ActivityTracker, HangupToggle, LifecycleContext, LifecycleError, LifecycleEvent,
        LifecycleListener, LifecycleState, Main, MainBuilder, ShutdownCoordinator,
        ShutdownTrigger,
    };
    pub use crate::reload::{LiveReconfigurationBridge, ReloadReport};
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}

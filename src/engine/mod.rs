//! Routing engine boundary
//!
//! The runner never routes messages itself. It starts and stops an
//! [`Engine`], and pushes live configuration into a [`Reconfigurable`] one.

use crate::config::Properties;
use crate::lifecycle::ShutdownTrigger;
use async_trait::async_trait;

/// The routing engine driven by [`Main`](crate::lifecycle::Main)
#[async_trait]
pub trait Engine: Send + Sync {
    /// Names of the configurable targets (components, endpoints, ...)
    ///
    /// Wildcard properties are expanded against these names.
    fn target_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once before [`start`](Self::start).
    ///
    /// An engine that can stop on its own (fatal error, remote management)
    /// keeps `trigger` and fires it so the runner leaves its wait and runs
    /// the regular stop sequence.
    fn attach(&self, _trigger: ShutdownTrigger) {}

    /// Start routing with the assembled configuration
    async fn start(&self, configuration: &Properties) -> anyhow::Result<()>;

    /// Stop routing
    async fn stop(&self) -> anyhow::Result<()>;
}

/// An engine whose properties can change while it runs
pub trait Reconfigurable: Engine {
    /// Current value of `name`, if set
    fn property(&self, name: &str) -> Option<String>;

    fn set_property(&self, name: &str, value: &str) -> anyhow::Result<()>;

    /// Remove `name`, restoring the engine's built-in default
    fn unset_property(&self, name: &str) -> anyhow::Result<()>;
}

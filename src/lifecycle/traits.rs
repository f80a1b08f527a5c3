//! Lifecycle listener contract
//!
//! Listeners observe the seven lifecycle events through a single dispatch
//! method. They can read the configuration being assembled, and change it
//! up to and including `BeforeStart`, but they cannot veto a transition.

use super::{LifecycleError, LifecycleState, Result};
use crate::config::Properties;
use async_trait::async_trait;
use strum_macros::{AsRefStr, Display, EnumIter};

/// The seven points a managed runtime passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
pub enum LifecycleEvent {
    BeforeInitialize,
    BeforeConfigure,
    AfterConfigure,
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
}

impl LifecycleEvent {
    /// A listener failure during a blocking event aborts the transition.
    ///
    /// Failures during the `After*` events are logged; the state they
    /// report on is already committed.
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::BeforeInitialize | Self::BeforeConfigure | Self::BeforeStart | Self::BeforeStop
        )
    }

    pub fn is_stop_phase(self) -> bool {
        matches!(self, Self::BeforeStop | Self::AfterStop)
    }

    /// Whether listeners may still change the configuration
    pub fn allows_configuration_changes(self) -> bool {
        matches!(
            self,
            Self::BeforeInitialize | Self::BeforeConfigure | Self::AfterConfigure | Self::BeforeStart
        )
    }
}

/// What a listener sees while an event is dispatched
#[derive(Debug)]
pub struct LifecycleContext {
    name: String,
    event: LifecycleEvent,
    state: LifecycleState,
    properties: Properties,
}

impl LifecycleContext {
    pub fn new(name: impl Into<String>, properties: Properties) -> Self {
        Self {
            name: name.into(),
            event: LifecycleEvent::BeforeInitialize,
            state: LifecycleState::Created,
            properties,
        }
    }

    /// Name of the managed runtime
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event currently being dispatched
    pub fn event(&self) -> LifecycleEvent {
        self.event
    }

    /// Lifecycle state when the event was raised
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Mutable configuration, available until the engine starts
    pub fn properties_mut(&mut self) -> Result<&mut Properties> {
        if !self.event.allows_configuration_changes() {
            return Err(LifecycleError::ConfigurationFrozen(self.event));
        }
        Ok(&mut self.properties)
    }

    pub(crate) fn enter(&mut self, event: LifecycleEvent, state: LifecycleState) {
        self.event = event;
        self.state = state;
    }
}

/// Receives lifecycle events
///
/// Events are delivered synchronously on the task driving the lifecycle, in
/// registration order. Implement only the events you care about by matching
/// on `event` and returning `Ok(())` for the rest.
///
/// # Example
///
/// ```rust
/// use conduit_main::lifecycle::{LifecycleContext, LifecycleEvent, LifecycleListener};
/// use async_trait::async_trait;
///
/// struct DefaultTimeout;
///
/// #[async_trait]
/// impl LifecycleListener for DefaultTimeout {
///     async fn on_event(
///         &self,
///         event: LifecycleEvent,
///         context: &mut LifecycleContext,
///     ) -> anyhow::Result<()> {
///         if event == LifecycleEvent::BeforeConfigure {
///             context.properties_mut()?.set("route.timeout", "30s", "DefaultTimeout");
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    /// Name used in logs and error reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_event(
        &self,
        event: LifecycleEvent,
        context: &mut LifecycleContext,
    ) -> anyhow::Result<()>;
}

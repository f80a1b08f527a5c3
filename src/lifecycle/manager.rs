//! Lifecycle Listener Bus
//!
//! Ordered multicast of lifecycle events to registered listeners.

use super::{LifecycleContext, LifecycleError, LifecycleEvent, LifecycleListener, Result};
use arc_swap::ArcSwap;
use std::sync::{Arc, Weak};

/// A weak registration; the host owns the listener
#[derive(Clone)]
struct Registration {
    listener: Weak<dyn LifecycleListener>,
    name: String,
}

/// A listener failure recorded during a non-blocking event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: String,
    pub message: String,
}

/// Result of dispatching one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Listeners that were called
    pub invoked: usize,
    /// Failures that were logged instead of aborting the event
    pub failures: Vec<ListenerFailure>,
}

/// Dispatches lifecycle events to listeners in registration order
///
/// The bus only holds weak references: a listener dropped by its owner is
/// skipped and pruned. Registration is safe while a dispatch is running;
/// the running dispatch keeps using the list it started with.
///
/// # Example
///
/// ```rust,ignore
/// use conduit_main::lifecycle::{LifecycleListenerBus, LifecycleEvent};
///
/// let bus = LifecycleListenerBus::new();
/// let audit: Arc<dyn LifecycleListener> = Arc::new(AuditListener::default());
/// bus.add_listener(&audit);
///
/// bus.dispatch(LifecycleEvent::BeforeStart, &mut context).await?;
/// ```
pub struct LifecycleListenerBus {
    registrations: ArcSwap<Vec<Registration>>,
}

impl Default for LifecycleListenerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleListenerBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            registrations: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register a listener.
    ///
    /// Registering the same instance twice delivers every event to it twice.
    pub fn add_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        let registration = Registration {
            listener: Arc::downgrade(listener),
            name: listener.name().to_string(),
        };
        tracing::debug!(listener = %registration.name, "Registering lifecycle listener");

        self.registrations.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(registration.clone());
            next
        });
    }

    /// Remove every registration of `listener`
    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        let target = Arc::downgrade(listener);
        self.registrations.rcu(|current| {
            current
                .iter()
                .filter(|r| !Weak::ptr_eq(&r.listener, &target))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Number of registrations whose listener is still alive
    pub fn listener_count(&self) -> usize {
        self.registrations
            .load()
            .iter()
            .filter(|r| r.listener.strong_count() > 0)
            .count()
    }

    /// Deliver `event` to every listener, in registration order.
    ///
    /// For blocking events the first failure aborts the remaining listeners
    /// and is returned. For the other events failures are logged and
    /// collected in the outcome.
    pub async fn dispatch(
        &self,
        event: LifecycleEvent,
        context: &mut LifecycleContext,
    ) -> Result<DispatchOutcome> {
        let snapshot = self.registrations.load_full();
        let mut outcome = DispatchOutcome::default();
        let mut dropped = 0;

        tracing::debug!(%event, listeners = snapshot.len(), "Dispatching lifecycle event");

        for registration in snapshot.iter() {
            let Some(listener) = registration.listener.upgrade() else {
                dropped += 1;
                continue;
            };

            tracing::debug!(%event, listener = %registration.name, "Invoking listener");
            outcome.invoked += 1;

            if let Err(e) = listener.on_event(event, context).await {
                if event.is_blocking() {
                    tracing::error!(%event, listener = %registration.name, "Listener failed: {:#}", e);
                    return Err(LifecycleError::listener_failed(
                        event,
                        &registration.name,
                        format!("{:#}", e),
                    ));
                }
                tracing::error!(
                    %event,
                    listener = %registration.name,
                    "Listener failed, continuing: {:#}",
                    e
                );
                outcome.failures.push(ListenerFailure {
                    listener: registration.name.clone(),
                    message: format!("{:#}", e),
                });
            }
        }

        if dropped > 0 {
            self.prune();
        }
        Ok(outcome)
    }

    fn prune(&self) {
        self.registrations.rcu(|current| {
            current
                .iter()
                .filter(|r| r.listener.strong_count() > 0)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

impl std::fmt::Debug for LifecycleListenerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .registrations
            .load()
            .iter()
            .map(|r| r.name.clone())
            .collect();
        f.debug_struct("LifecycleListenerBus")
            .field("listeners", &names)
            .finish()
    }
}

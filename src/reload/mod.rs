//! Live reconfiguration
//!
//! Applies a batch of changed properties to a running engine without a
//! stop/start cycle. A batch is all-or-nothing: when one property is
//! rejected, the ones already applied are rolled back in reverse order.

mod watcher;

pub use watcher::PropertiesFileWatcher;

use crate::config::{self, Properties, Property};
use crate::engine::Reconfigurable;
use crate::lifecycle::{LifecycleState, ShutdownCoordinator};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// What happened to one property of a reload batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyStatus {
    Applied,
    Rejected { reason: String },
    /// Not applied, or rolled back because another property was rejected
    NotApplied,
    /// A wildcard that matched no engine target
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyOutcome {
    pub name: String,
    pub value: String,
    /// Where the value came from, e.g. the file that set it
    pub location: String,
    pub status: PropertyStatus,
}

impl PropertyOutcome {
    fn new(property: &Property, status: PropertyStatus) -> Self {
        Self {
            name: property.name.clone(),
            value: property.value.clone(),
            location: property.location.clone(),
            status,
        }
    }
}

/// Why a whole batch was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SkipReason {
    ShutdownRequested,
    NotRunning,
}

/// Per-property report of one reload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub outcomes: Vec<PropertyOutcome>,
    pub skipped: Option<SkipReason>,
}

impl ReloadReport {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == PropertyStatus::Applied)
            .count()
    }

    pub fn rejected(&self) -> impl Iterator<Item = &PropertyOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PropertyStatus::Rejected { .. }))
    }

    /// True when the batch was applied in full
    pub fn is_success(&self) -> bool {
        self.skipped.is_none() && self.rejected().next().is_none()
    }

    fn skipped(batch: &Properties, reason: SkipReason) -> Self {
        Self {
            outcomes: batch
                .iter()
                .map(|p| PropertyOutcome::new(p, PropertyStatus::NotApplied))
                .collect(),
            skipped: Some(reason),
        }
    }
}

/// Applies reloaded configuration to a running engine
pub struct LiveReconfigurationBridge {
    coordinator: ShutdownCoordinator,
    engine: Arc<dyn Reconfigurable>,
    // one batch at a time
    apply_lock: Mutex<()>,
    last_report: ArcSwapOption<ReloadReport>,
}

impl LiveReconfigurationBridge {
    pub fn new(coordinator: ShutdownCoordinator, engine: Arc<dyn Reconfigurable>) -> Self {
        Self {
            coordinator,
            engine,
            apply_lock: Mutex::new(()),
            last_report: ArcSwapOption::empty(),
        }
    }

    /// Report of the most recent reload, skipped ones included
    pub fn last_report(&self) -> Option<Arc<ReloadReport>> {
        self.last_report.load_full()
    }

    /// Apply one reload batch.
    ///
    /// A no-op unless the runtime is running and shutdown has not been
    /// requested.
    pub async fn reload(&self, batch: Properties) -> ReloadReport {
        let _guard = self.apply_lock.lock().await;
        let report = self.reload_locked(batch);
        self.last_report.store(Some(Arc::new(report.clone())));
        report
    }

    fn reload_locked(&self, batch: Properties) -> ReloadReport {
        if !self.coordinator.is_run_allowed() {
            tracing::debug!(properties = batch.len(), "Shutdown requested, skipping reload");
            return ReloadReport::skipped(&batch, SkipReason::ShutdownRequested);
        }
        if self.coordinator.state() != LifecycleState::Running {
            tracing::debug!(state = %self.coordinator.state(), "Not running, skipping reload");
            return ReloadReport::skipped(&batch, SkipReason::NotRunning);
        }

        let mut explicit = batch;
        let wildcards = explicit.split_wildcards();
        let expansion = config::expand_wildcards(&wildcards, &self.engine.target_names());
        config::autowire(&mut explicit, &expansion);

        let mut report = self.apply(&explicit);
        for property in &expansion.unmatched {
            tracing::warn!(
                property = %property.name,
                location = %property.location,
                "Wildcard property matches no target"
            );
            report
                .outcomes
                .push(PropertyOutcome::new(property, PropertyStatus::Unmatched));
        }

        if report.is_success() {
            tracing::info!(applied = report.applied_count(), "Reloaded properties");
        }
        report
    }

    fn apply(&self, batch: &Properties) -> ReloadReport {
        // (name, previous value) of every property set so far
        let mut applied: Vec<(&str, Option<String>)> = Vec::with_capacity(batch.len());
        let mut failure = None;

        for (index, property) in batch.iter().enumerate() {
            let previous = self.engine.property(&property.name);
            match self.engine.set_property(&property.name, &property.value) {
                Ok(()) => applied.push((&property.name, previous)),
                Err(e) => {
                    tracing::warn!(
                        property = %property.name,
                        location = %property.location,
                        "Property rejected, rolling back reload: {:#}",
                        e
                    );
                    failure = Some((index, format!("{:#}", e)));
                    break;
                }
            }
        }

        let Some((failed_index, reason)) = failure else {
            return ReloadReport {
                outcomes: batch
                    .iter()
                    .map(|p| PropertyOutcome::new(p, PropertyStatus::Applied))
                    .collect(),
                skipped: None,
            };
        };

        self.rollback(applied);

        ReloadReport {
            outcomes: batch
                .iter()
                .enumerate()
                .map(|(index, p)| {
                    let status = if index == failed_index {
                        PropertyStatus::Rejected {
                            reason: reason.clone(),
                        }
                    } else {
                        PropertyStatus::NotApplied
                    };
                    PropertyOutcome::new(p, status)
                })
                .collect(),
            skipped: None,
        }
    }

    fn rollback(&self, applied: Vec<(&str, Option<String>)>) {
        for (name, previous) in applied.into_iter().rev() {
            let restored = match &previous {
                Some(value) => self.engine.set_property(name, value),
                None => self.engine.unset_property(name),
            };
            if let Err(e) = restored {
                tracing::error!(property = %name, "Rollback failed: {:#}", e);
            }
        }
    }

    /// Apply every batch received on `updates` until the channel closes or
    /// shutdown is requested
    pub fn listen(self: Arc<Self>, mut updates: mpsc::UnboundedReceiver<Properties>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.coordinator.stopped() => break,
                    batch = updates.recv() => match batch {
                        Some(batch) => {
                            let report = self.reload(batch).await;
                            for rejected in report.rejected() {
                                tracing::warn!(
                                    property = %rejected.name,
                                    location = %rejected.location,
                                    "Reload rejected"
                                );
                            }
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("Reload listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::lifecycle::{ShutdownTrigger, SignalHook};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct NoopHook;

    impl SignalHook for NoopHook {
        fn install(&self, _trigger: ShutdownTrigger) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MapEngine {
        values: StdMutex<HashMap<String, String>>,
        writes: StdMutex<usize>,
    }

    impl MapEngine {
        fn with(values: &[(&str, &str)]) -> Arc<Self> {
            let engine = Self::default();
            for (k, v) in values {
                engine.values.lock().unwrap().insert(k.to_string(), v.to_string());
            }
            Arc::new(engine)
        }

        fn get(&self, name: &str) -> Option<String> {
            self.values.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl Engine for MapEngine {
        fn target_names(&self) -> Vec<String> {
            vec!["kafka".to_string(), "jms".to_string()]
        }

        async fn start(&self, _configuration: &Properties) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Reconfigurable for MapEngine {
        fn property(&self, name: &str) -> Option<String> {
            self.get(name)
        }

        fn set_property(&self, name: &str, value: &str) -> anyhow::Result<()> {
            if value == "invalid" {
                anyhow::bail!("{name} cannot be '{value}'");
            }
            *self.writes.lock().unwrap() += 1;
            self.values.lock().unwrap().insert(name.to_string(), value.to_string());
            Ok(())
        }

        fn unset_property(&self, name: &str) -> anyhow::Result<()> {
            self.values.lock().unwrap().remove(name);
            Ok(())
        }
    }

    fn running_coordinator() -> ShutdownCoordinator {
        let coordinator = ShutdownCoordinator::with_signal_hook(Arc::new(NoopHook));
        coordinator.advance(LifecycleState::Running).unwrap();
        coordinator
    }

    fn batch(entries: &[(&str, &str)]) -> Properties {
        entries
            .iter()
            .map(|(k, v)| Property::new(*k, *v, "/etc/conduit/app.toml"))
            .collect()
    }

    #[tokio::test]
    async fn test_full_batch_applied() {
        let engine = MapEngine::with(&[("kafka.brokers", "old:9092")]);
        let bridge = LiveReconfigurationBridge::new(running_coordinator(), engine.clone());

        let report = bridge
            .reload(batch(&[("kafka.brokers", "new:9092"), ("*.timeout", "5s")]))
            .await;

        assert!(report.is_success());
        assert_eq!(report.applied_count(), 3);
        assert_eq!(engine.get("kafka.brokers").as_deref(), Some("new:9092"));
        assert_eq!(engine.get("jms.timeout").as_deref(), Some("5s"));
        assert_eq!(report.outcomes[0].location, "/etc/conduit/app.toml");
    }

    #[tokio::test]
    async fn test_rejected_property_rolls_back_batch() {
        let engine = MapEngine::with(&[("kafka.brokers", "old:9092")]);
        let bridge = LiveReconfigurationBridge::new(running_coordinator(), engine.clone());

        let report = bridge
            .reload(batch(&[
                ("kafka.brokers", "new:9092"),
                ("jms.concurrency", "4"),
                ("jms.pool", "invalid"),
                ("kafka.poll", "100"),
            ]))
            .await;

        assert!(!report.is_success());
        assert_eq!(report.applied_count(), 0);
        let statuses: Vec<_> = report.outcomes.iter().map(|o| &o.status).collect();
        assert_eq!(statuses[0], &PropertyStatus::NotApplied);
        assert_eq!(statuses[1], &PropertyStatus::NotApplied);
        assert!(matches!(statuses[2], PropertyStatus::Rejected { .. }));
        assert_eq!(statuses[3], &PropertyStatus::NotApplied);

        assert_eq!(engine.get("kafka.brokers").as_deref(), Some("old:9092"));
        assert_eq!(engine.get("jms.concurrency"), None);
        assert_eq!(engine.get("kafka.poll"), None);
    }

    #[tokio::test]
    async fn test_reload_after_shutdown_is_noop() {
        let engine = MapEngine::with(&[]);
        let coordinator = running_coordinator();
        let bridge = LiveReconfigurationBridge::new(coordinator.clone(), engine.clone());

        assert!(coordinator.request_shutdown());
        let report = bridge.reload(batch(&[("kafka.brokers", "new:9092")])).await;

        assert_eq!(report.skipped, Some(SkipReason::ShutdownRequested));
        assert_eq!(bridge.last_report().as_deref(), Some(&report));
        assert_eq!(report.applied_count(), 0);
        assert_eq!(*engine.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reload_before_running_is_noop() {
        let engine = MapEngine::with(&[]);
        let coordinator = ShutdownCoordinator::with_signal_hook(Arc::new(NoopHook));
        let bridge = LiveReconfigurationBridge::new(coordinator, engine.clone());

        let report = bridge.reload(batch(&[("kafka.brokers", "new:9092")])).await;
        assert_eq!(report.skipped, Some(SkipReason::NotRunning));
        assert_eq!(*engine.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_wildcard_reported() {
        let engine = MapEngine::with(&[]);
        let bridge = LiveReconfigurationBridge::new(running_coordinator(), engine);

        let report = bridge.reload(batch(&[("ftp*.passive", "true")])).await;
        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].status, PropertyStatus::Unmatched);
    }

    #[tokio::test]
    async fn test_listen_stops_on_shutdown() {
        let engine = MapEngine::with(&[]);
        let coordinator = running_coordinator();
        let bridge = Arc::new(LiveReconfigurationBridge::new(coordinator.clone(), engine.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::clone(&bridge).listen(rx);

        tx.send(batch(&[("kafka.poll", "250")])).unwrap();
        for _ in 0..100 {
            if engine.get("kafka.poll").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.get("kafka.poll").as_deref(), Some("250"));

        coordinator.request_shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}

//! Duration limits
//!
//! A watchdog that requests shutdown when the runtime has run long enough,
//! processed enough messages, or sat idle for too long.

use super::ShutdownCoordinator;
use crate::config::MainConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Counts processed messages; the engine calls [`record_message`](Self::record_message)
#[derive(Debug)]
pub struct ActivityTracker {
    base: Instant,
    messages: AtomicU64,
    // millis since `base`
    last_activity: AtomicU64,
    notify: Notify,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            messages: AtomicU64::new(0),
            last_activity: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Record one processed message
    pub fn record_message(&self) {
        let now = self.base.elapsed().as_millis() as u64;
        self.last_activity.fetch_max(now, Ordering::AcqRel);
        self.messages.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// Restart the idle clock without counting a message
    pub fn touch(&self) {
        let now = self.base.elapsed().as_millis() as u64;
        self.last_activity.fetch_max(now, Ordering::AcqRel);
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Acquire)
    }

    /// When the last message was recorded, or when tracking started
    pub fn last_activity(&self) -> Instant {
        self.base + Duration::from_millis(self.last_activity.load(Ordering::Acquire))
    }
}

/// Why the watchdog requested shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum DurationLimit {
    MaxSeconds,
    MaxIdleSeconds,
    MaxMessages,
}

/// Requests shutdown when a configured duration limit is hit
pub struct DurationWatchdog {
    max: Option<Duration>,
    max_idle: Option<Duration>,
    max_messages: Option<u64>,
    exit_code: i32,
}

impl DurationWatchdog {
    /// Watchdog for the limits in `config`; `None` when no limit is set
    pub fn from_config(config: &MainConfig) -> Option<Self> {
        config.has_duration_limits().then(|| Self {
            max: config.duration_max(),
            max_idle: config.duration_max_idle(),
            max_messages: config.duration_max_messages(),
            exit_code: config.duration_hit_exit_code,
        })
    }

    /// Run on the current runtime until a limit is hit or shutdown is
    /// requested by someone else
    pub fn spawn(
        self,
        coordinator: &ShutdownCoordinator,
        tracker: Arc<ActivityTracker>,
    ) -> JoinHandle<Option<DurationLimit>> {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { self.run(coordinator, tracker).await })
    }

    async fn run(
        self,
        coordinator: ShutdownCoordinator,
        tracker: Arc<ActivityTracker>,
    ) -> Option<DurationLimit> {
        let started = Instant::now();
        // idle time is counted from here, not from when the tracker was built
        tracker.touch();
        self.log_limits();

        let hit = loop {
            if let Some(limit) = self.check(started, &tracker) {
                break limit;
            }

            let next_deadline = [
                self.max.map(|max| started + max),
                self.max_idle.map(|idle| tracker.last_activity() + idle),
            ]
            .into_iter()
            .flatten()
            .min();

            let sleep = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = coordinator.stopped() => return None,
                _ = tracker.notify.notified() => {}
                _ = sleep => {}
            }
        };

        tracing::info!(limit = %hit, exit_code = self.exit_code, "Duration limit hit");
        coordinator.request_shutdown_with_exit_code(self.exit_code);
        Some(hit)
    }

    fn check(&self, started: Instant, tracker: &ActivityTracker) -> Option<DurationLimit> {
        let now = Instant::now();
        if self.max.is_some_and(|max| now >= started + max) {
            return Some(DurationLimit::MaxSeconds);
        }
        if self.max_messages.is_some_and(|max| tracker.messages() >= max) {
            return Some(DurationLimit::MaxMessages);
        }
        if self
            .max_idle
            .is_some_and(|idle| now >= tracker.last_activity() + idle)
        {
            return Some(DurationLimit::MaxIdleSeconds);
        }
        None
    }

    fn log_limits(&self) {
        match (self.max, self.max_idle, self.max_messages) {
            (Some(max), _, _) => tracing::info!("Waiting for: {:?}", max),
            (None, Some(idle), Some(messages)) => tracing::info!(
                "Waiting to be idle for: {:?} or until: {} messages has been processed",
                idle,
                messages
            ),
            (None, Some(idle), None) => tracing::info!("Waiting to be idle for: {:?}", idle),
            (None, None, Some(messages)) => {
                tracing::info!("Waiting until: {} messages has been processed", messages)
            }
            (None, None, None) => {}
        }
    }
}

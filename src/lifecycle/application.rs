//! Main runner
//!
//! Drives an [`Engine`] through the full lifecycle: listeners are notified
//! around configuration, start and stop, the process blocks until shutdown
//! is requested, and shutdown always completes even when a listener fails.

use super::{
    ActivityTracker, DurationLimit, DurationWatchdog, HangupToggle, LifecycleContext,
    LifecycleError, LifecycleEvent, LifecycleListener, LifecycleListenerBus, LifecycleState,
    OsSignalHook, Result, ShutdownCoordinator, SignalHook,
};
use crate::bootstrap::{BootstrapResources, BootstrapScratch};
use crate::config::{MainConfig, Properties};
use crate::engine::{Engine, Reconfigurable};
use crate::reload::{LiveReconfigurationBridge, PropertiesFileWatcher};
use notify::RecommendedWatcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs an engine until shutdown is requested
///
/// # Example
///
/// ```rust,no_run
/// use conduit_main::prelude::*;
///
/// struct Router;
///
/// #[async_trait]
/// impl Engine for Router {
///     async fn start(&self, _configuration: &Properties) -> anyhow::Result<()> {
///         Ok(())
///     }
///
///     async fn stop(&self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut main = Main::builder()
///         .engine(Arc::new(Router))
///         .initial_property("route.timeout", "30s")
///         .build()?;
///
///     let exit_code = main.run().await?;
///     std::process::exit(exit_code);
/// }
/// ```
pub struct Main {
    config: MainConfig,
    coordinator: ShutdownCoordinator,
    bus: LifecycleListenerBus,
    // the bus only holds weak references
    listeners: Vec<Arc<dyn LifecycleListener>>,
    engine: Arc<dyn Engine>,
    reconfigurable: Option<Arc<dyn Reconfigurable>>,
    bootstrap: BootstrapResources,
    context: LifecycleContext,
    activity: Arc<ActivityTracker>,
    watchdog: Option<JoinHandle<Option<DurationLimit>>>,
    bridge: Option<Arc<LiveReconfigurationBridge>>,
    watch_file: Option<PathBuf>,
    watcher: Option<RecommendedWatcher>,
    reload_task: Option<JoinHandle<()>>,
    engine_started: bool,
}

impl Main {
    /// Create a new runner builder
    pub fn builder() -> MainBuilder {
        MainBuilder::new()
    }

    pub fn config(&self) -> &MainConfig {
        &self.config
    }

    /// Handle for requesting and awaiting shutdown from anywhere
    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    pub fn bus(&self) -> &LifecycleListenerBus {
        &self.bus
    }

    pub fn state(&self) -> LifecycleState {
        self.coordinator.state()
    }

    /// Configuration handed to the engine at start
    pub fn configuration(&self) -> &Properties {
        self.context.properties()
    }

    /// Message counter consulted by the duration watchdog
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub fn bootstrap(&self) -> &BootstrapResources {
        &self.bootstrap
    }

    /// Bridge for pushing configuration into a running reconfigurable
    /// engine; `None` before start or for plain engines
    pub fn reconfiguration_bridge(&self) -> Option<&Arc<LiveReconfigurationBridge>> {
        self.bridge.as_ref()
    }

    /// Register a listener; it is kept alive as long as this runner
    pub fn add_listener(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.bus.add_listener(&listener);
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn LifecycleListener>) {
        self.bus.remove_listener(listener);
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn enable_hangup_support(&self) -> HangupToggle {
        self.coordinator.set_hangup_enabled(true)
    }

    pub fn disable_hangup_support(&self) -> HangupToggle {
        self.coordinator.set_hangup_enabled(false)
    }

    /// Start, wait for shutdown, stop.
    ///
    /// Returns the resolved exit code. When startup or the graceful stop
    /// fails, the runner is force-stopped and the original error returned.
    pub async fn run(&mut self) -> Result<i32> {
        if let Err(e) = self.start().await {
            tracing::error!(name = %self.config.name, "Startup failed: {}", e);
            if let Err(stop) = self.force_stop().await {
                tracing::error!(name = %self.config.name, "Forced stop failed: {}", stop);
            }
            return Err(e);
        }

        self.wait().await;

        if let Err(e) = self.stop().await {
            tracing::error!(name = %self.config.name, "Graceful stop failed, forcing: {}", e);
            if let Err(stop) = self.force_stop().await {
                tracing::error!(name = %self.config.name, "Forced stop failed: {}", stop);
            }
            return Err(e);
        }

        Ok(self.coordinator.exit_code())
    }

    /// Run the startup sequence up to `AfterStart`
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(name = %self.config.name, "Starting");

        self.enter(LifecycleState::Initializing)?;
        self.fire(LifecycleEvent::BeforeInitialize).await?;

        self.enter(LifecycleState::Configuring)?;
        self.fire(LifecycleEvent::BeforeConfigure).await?;
        self.configure()?;
        self.fire(LifecycleEvent::AfterConfigure).await?;
        self.bootstrap.release();

        self.enter(LifecycleState::Starting)?;
        self.fire(LifecycleEvent::BeforeStart).await?;
        self.engine.attach(self.coordinator.trigger());
        self.engine
            .start(self.context.properties())
            .await
            .map_err(|e| LifecycleError::engine_failed("start", format!("{:#}", e)))?;
        self.engine_started = true;

        self.enter(LifecycleState::Running)?;
        self.fire(LifecycleEvent::AfterStart).await?;
        self.spawn_background()?;

        tracing::info!(
            name = %self.config.name,
            properties = self.context.properties().len(),
            "Started"
        );
        Ok(())
    }

    /// Block until shutdown is requested
    pub async fn wait(&self) {
        self.coordinator.wait().await;
    }

    /// Block until shutdown is requested or `timeout` elapses
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        self.coordinator.wait_timeout(timeout).await
    }

    /// Request shutdown and run the graceful stop sequence.
    ///
    /// A failing `BeforeStop` listener aborts the sequence and leaves the
    /// runner in [`LifecycleState::Stopping`]; call
    /// [`force_stop`](Self::force_stop) to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if self.coordinator.state() == LifecycleState::Stopped {
            return Ok(());
        }

        self.coordinator.request_shutdown();
        self.coordinator.advance(LifecycleState::Stopping)?;
        self.fire(LifecycleEvent::BeforeStop).await?;
        self.finish_stop().await
    }

    /// Stop the engine and reach [`LifecycleState::Stopped`] without
    /// notifying `BeforeStop` listeners
    pub async fn force_stop(&mut self) -> Result<()> {
        if self.coordinator.state() == LifecycleState::Stopped {
            return Ok(());
        }

        tracing::warn!(name = %self.config.name, "Forcing stop");
        self.coordinator.request_shutdown();
        // already Stopping when a BeforeStop listener failed
        let _ = self.coordinator.advance(LifecycleState::Stopping);
        self.finish_stop().await
    }

    async fn finish_stop(&mut self) -> Result<()> {
        self.halt_background();

        let engine_stopped = if std::mem::take(&mut self.engine_started) {
            self.engine
                .stop()
                .await
                .map_err(|e| LifecycleError::engine_failed("stop", format!("{:#}", e)))
        } else {
            Ok(())
        };
        if let Err(e) = &engine_stopped {
            tracing::error!(name = %self.config.name, "{}", e);
        }

        self.coordinator.advance(LifecycleState::Stopped)?;
        self.fire(LifecycleEvent::AfterStop).await?;

        tracing::info!(
            name = %self.config.name,
            exit_code = self.coordinator.exit_code(),
            "Stopped"
        );
        engine_stopped
    }

    fn enter(&self, state: LifecycleState) -> Result<()> {
        self.coordinator.advance(state).map_err(|e| {
            if self.coordinator.is_run_allowed() {
                e
            } else {
                LifecycleError::startup_failed(format!("shutdown requested before {state}"))
            }
        })
    }

    async fn fire(&mut self, event: LifecycleEvent) -> Result<()> {
        self.context.enter(event, self.coordinator.state());
        self.bus.dispatch(event, &mut self.context).await?;
        Ok(())
    }

    /// Merge the bootstrap properties over what listeners set so far
    fn configure(&mut self) -> Result<()> {
        let Some(scratch) = self.bootstrap.scratch_mut() else {
            return Ok(());
        };

        let (resolved, expansion) = scratch.resolve(&self.engine.target_names());
        if !expansion.unmatched.is_empty() {
            let names: Vec<&str> = expansion.unmatched.iter().map(|p| p.name.as_str()).collect();
            if self.config.auto_configuration_fail_fast {
                return Err(LifecycleError::startup_failed(format!(
                    "wildcard properties match no target: {}",
                    names.join(", ")
                )));
            }
            tracing::warn!(properties = ?names, "Wildcard properties match no target");
        }

        if !resolved.is_empty() {
            tracing::info!("Auto-configuration summary:");
            for property in &resolved {
                tracing::info!(
                    location = %property.location,
                    "\t{}={}",
                    property.name,
                    property.masked_value()
                );
            }
        }

        self.context.properties_mut()?.merge(&resolved);
        Ok(())
    }

    fn spawn_background(&mut self) -> Result<()> {
        if let Some(watchdog) = DurationWatchdog::from_config(&self.config) {
            self.watchdog = Some(watchdog.spawn(&self.coordinator, Arc::clone(&self.activity)));
        }

        let Some(engine) = &self.reconfigurable else {
            return Ok(());
        };
        let bridge = Arc::new(LiveReconfigurationBridge::new(
            self.coordinator.clone(),
            Arc::clone(engine),
        ));

        if let Some(path) = &self.watch_file {
            let (watcher, updates) = PropertiesFileWatcher::new(path);
            self.watcher = Some(watcher.run()?);
            self.reload_task = Some(Arc::clone(&bridge).listen(updates));
        }
        self.bridge = Some(bridge);
        Ok(())
    }

    fn halt_background(&mut self) {
        // dropping the watcher stops notify's thread
        self.watcher = None;
        if let Some(task) = self.reload_task.take() {
            task.abort();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

impl std::fmt::Debug for Main {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Main")
            .field("name", &self.config.name)
            .field("state", &self.coordinator.state())
            .field("listeners", &self.listeners.len())
            .field("engine_started", &self.engine_started)
            .finish()
    }
}

/// Builder for [`Main`]
pub struct MainBuilder {
    config: MainConfig,
    engine: Option<Arc<dyn Engine>>,
    reconfigurable: Option<Arc<dyn Reconfigurable>>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    scratch: BootstrapScratch,
    signal_hook: Option<Arc<dyn SignalHook>>,
    activity: Option<Arc<ActivityTracker>>,
    watch_file: Option<PathBuf>,
}

impl Default for MainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MainBuilder {
    pub fn new() -> Self {
        Self {
            config: MainConfig::default(),
            engine: None,
            reconfigurable: None,
            listeners: Vec::new(),
            scratch: BootstrapScratch::default(),
            signal_hook: None,
            activity: None,
            watch_file: None,
        }
    }

    pub fn config(mut self, config: MainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self.reconfigurable = None;
        self
    }

    /// Use an engine that accepts live property changes
    pub fn reconfigurable_engine<E>(mut self, engine: Arc<E>) -> Self
    where
        E: Reconfigurable + 'static,
    {
        self.engine = Some(engine.clone());
        self.reconfigurable = Some(engine);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn initial_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.scratch.add_initial_property(name, value);
        self
    }

    pub fn initial_properties(mut self, properties: Properties) -> Self {
        self.scratch.initial.merge(&properties);
        self
    }

    /// Override properties win over initial properties
    pub fn override_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.scratch.add_override_property(name, value);
        self
    }

    pub fn override_properties(mut self, properties: Properties) -> Self {
        self.scratch.overrides.merge(&properties);
        self
    }

    /// Replace the OS signal hook, e.g. in tests
    pub fn signal_hook(mut self, hook: Arc<dyn SignalHook>) -> Self {
        self.signal_hook = Some(hook);
        self
    }

    /// Share an activity tracker with the engine
    pub fn activity(mut self, tracker: Arc<ActivityTracker>) -> Self {
        self.activity = Some(tracker);
        self
    }

    /// Reload the engine from this TOML file whenever it changes.
    ///
    /// Only used with a [`reconfigurable_engine`](Self::reconfigurable_engine).
    pub fn watch_properties_file(mut self, path: impl AsRef<Path>) -> Self {
        self.watch_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> Result<Main> {
        let engine = self
            .engine
            .ok_or_else(|| LifecycleError::startup_failed("no engine configured"))?;
        if self.watch_file.is_some() && self.reconfigurable.is_none() {
            tracing::warn!("Properties file watching needs a reconfigurable engine; ignoring");
        }

        let hook = self.signal_hook.unwrap_or_else(|| Arc::new(OsSignalHook));
        let coordinator = ShutdownCoordinator::build(self.config.name.clone(), hook);
        if !self.config.hangup_interceptor_enabled {
            coordinator.set_hangup_enabled(false);
        }

        let bus = LifecycleListenerBus::new();
        for listener in &self.listeners {
            bus.add_listener(listener);
        }

        Ok(Main {
            context: LifecycleContext::new(self.config.name.clone(), Properties::new()),
            config: self.config,
            coordinator,
            bus,
            listeners: self.listeners,
            engine,
            reconfigurable: self.reconfigurable,
            bootstrap: BootstrapResources::new(self.scratch),
            activity: self.activity.unwrap_or_default(),
            watchdog: None,
            bridge: None,
            watch_file: self.watch_file,
            watcher: None,
            reload_task: None,
            engine_started: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{HangupState, ShutdownTrigger};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    struct NoopHook;

    impl SignalHook for NoopHook {
        fn install(&self, _trigger: ShutdownTrigger) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Recorder {
        label: &'static str,
        log: Log,
        fail_on: Option<LifecycleEvent>,
    }

    #[async_trait]
    impl LifecycleListener for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn on_event(
            &self,
            event: LifecycleEvent,
            _context: &mut LifecycleContext,
        ) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("{}.{}", self.label, event));
            if self.fail_on == Some(event) {
                anyhow::bail!("{} refuses {}", self.label, event);
            }
            Ok(())
        }
    }

    /// Requests shutdown as soon as the engine runs
    struct StopAfterStart {
        trigger: ShutdownTrigger,
        exit_code: i32,
    }

    #[async_trait]
    impl LifecycleListener for StopAfterStart {
        async fn on_event(
            &self,
            event: LifecycleEvent,
            _context: &mut LifecycleContext,
        ) -> anyhow::Result<()> {
            if event == LifecycleEvent::AfterStart {
                self.trigger.fire_with_exit_code(self.exit_code);
            }
            Ok(())
        }
    }

    struct RecordingEngine {
        log: Log,
        started_with: StdMutex<Option<Properties>>,
    }

    #[async_trait]
    impl Engine for RecordingEngine {
        fn target_names(&self) -> Vec<String> {
            vec!["kafka".to_string(), "jms".to_string()]
        }

        async fn start(&self, configuration: &Properties) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("engine.start".to_string());
            *self.started_with.lock().unwrap() = Some(configuration.clone());
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("engine.stop".to_string());
            Ok(())
        }
    }

    fn recorder(label: &'static str, log: &Log) -> Arc<dyn LifecycleListener> {
        Arc::new(Recorder {
            label,
            log: log.clone(),
            fail_on: None,
        })
    }

    fn failing(label: &'static str, log: &Log, event: LifecycleEvent) -> Arc<dyn LifecycleListener> {
        Arc::new(Recorder {
            label,
            log: log.clone(),
            fail_on: Some(event),
        })
    }

    fn engine(log: &Log) -> Arc<RecordingEngine> {
        Arc::new(RecordingEngine {
            log: log.clone(),
            started_with: StdMutex::new(None),
        })
    }

    fn builder(log: &Log) -> MainBuilder {
        Main::builder()
            .engine(engine(log))
            .signal_hook(Arc::new(NoopHook))
    }

    fn stop_after_start(main: &mut Main, exit_code: i32) {
        let trigger = main.coordinator().trigger();
        main.add_listener(Arc::new(StopAfterStart { trigger, exit_code }));
    }

    #[tokio::test]
    async fn test_full_sequence_order() {
        let log = Log::default();
        let mut main = builder(&log)
            .listener(recorder("A", &log))
            .listener(recorder("B", &log))
            .build()
            .unwrap();
        stop_after_start(&mut main, 3);

        let exit_code = main.run().await.unwrap();

        assert_eq!(exit_code, 3);
        assert_eq!(main.state(), LifecycleState::Stopped);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "A.BeforeInitialize",
                "B.BeforeInitialize",
                "A.BeforeConfigure",
                "B.BeforeConfigure",
                "A.AfterConfigure",
                "B.AfterConfigure",
                "A.BeforeStart",
                "B.BeforeStart",
                "engine.start",
                "A.AfterStart",
                "B.AfterStart",
                "A.BeforeStop",
                "B.BeforeStop",
                "engine.stop",
                "A.AfterStop",
                "B.AfterStop",
            ]
        );
    }

    #[tokio::test]
    async fn test_configuration_assembled_and_bootstrap_released() {
        let log = Log::default();
        let engine = engine(&log);
        let mut main = Main::builder()
            .engine(engine.clone())
            .signal_hook(Arc::new(NoopHook))
            .initial_property("kafka.brokers", "initial:9092")
            .initial_property("*.timeout", "5s")
            .override_property("kafka.brokers", "override:9092")
            .build()
            .unwrap();

        main.start().await.unwrap();
        assert!(main.bootstrap().is_released());
        assert!(main.reconfiguration_bridge().is_none());

        let started_with = engine.started_with.lock().unwrap().clone().unwrap();
        assert_eq!(started_with.get("kafka.brokers"), Some("override:9092"));
        assert_eq!(started_with.get("kafka.timeout"), Some("5s"));
        assert_eq!(started_with.get("jms.timeout"), Some("5s"));
        assert!(!started_with.contains("*.timeout"));

        main.stop().await.unwrap();
        assert_eq!(main.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_before_stop_failure_still_completes_shutdown() {
        let log = Log::default();
        let mut main = builder(&log)
            .listener(failing("A", &log, LifecycleEvent::BeforeStop))
            .listener(recorder("B", &log))
            .build()
            .unwrap();
        stop_after_start(&mut main, 0);

        let err = main.run().await.unwrap_err();

        assert!(err.is_shutdown_failure());
        assert_eq!(main.state(), LifecycleState::Stopped);
        let log = log.lock().unwrap();
        assert!(!log.contains(&"B.BeforeStop".to_string()));
        assert!(log.contains(&"engine.stop".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("B.AfterStop"));
    }

    #[tokio::test]
    async fn test_startup_listener_failure_aborts_start() {
        let log = Log::default();
        let mut main = builder(&log)
            .listener(failing("A", &log, LifecycleEvent::BeforeStart))
            .listener(recorder("B", &log))
            .build()
            .unwrap();

        let err = main.run().await.unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::ListenerFailed {
                event: LifecycleEvent::BeforeStart,
                ..
            }
        ));
        assert_eq!(main.state(), LifecycleState::Stopped);
        assert!(!main.coordinator().is_run_allowed());
        let log = log.lock().unwrap();
        assert!(!log.contains(&"B.BeforeStart".to_string()));
        assert!(!log.contains(&"engine.start".to_string()));
        assert!(!log.contains(&"engine.stop".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_fails_startup() {
        let log = Log::default();
        let mut main = builder(&log).build().unwrap();
        main.coordinator().request_shutdown();

        let err = main.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::StartupFailed(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_wildcard_fails_fast() {
        let log = Log::default();
        let mut main = builder(&log)
            .config(MainConfig {
                auto_configuration_fail_fast: true,
                ..MainConfig::default()
            })
            .initial_property("ftp*.passive", "true")
            .build()
            .unwrap();

        let err = main.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::StartupFailed(_)));
        assert!(!log.lock().unwrap().contains(&"engine.start".to_string()));
    }

    #[tokio::test]
    async fn test_duration_limit_sets_exit_code() {
        let log = Log::default();
        let activity = Arc::new(ActivityTracker::new());
        activity.record_message();
        activity.record_message();

        let mut main = builder(&log)
            .config(MainConfig {
                duration_max_messages: 2,
                duration_hit_exit_code: 7,
                ..MainConfig::default()
            })
            .activity(activity)
            .build()
            .unwrap();

        let exit_code = tokio::time::timeout(Duration::from_secs(5), main.run())
            .await
            .expect("duration limit did not stop the runner")
            .unwrap();
        assert_eq!(exit_code, 7);
    }

    #[tokio::test]
    async fn test_hangup_disabled_by_config() {
        let log = Log::default();
        let mut main = builder(&log)
            .config(MainConfig {
                hangup_interceptor_enabled: false,
                ..MainConfig::default()
            })
            .build()
            .unwrap();
        stop_after_start(&mut main, 0);

        main.run().await.unwrap();
        assert_eq!(main.coordinator().hangup_state(), HangupState::InstalledDisabled);
        assert_eq!(main.enable_hangup_support(), HangupToggle::Ignored);
    }

    #[test]
    fn test_build_without_engine() {
        let err = Main::builder().build().unwrap_err();
        assert!(matches!(err, LifecycleError::StartupFailed(_)));
    }

    /// Fails `start` or `stop` on request
    struct FaultyEngine {
        log: Log,
        fail_start: bool,
        fail_stop: bool,
    }

    #[async_trait]
    impl Engine for FaultyEngine {
        async fn start(&self, _configuration: &Properties) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("engine.start".to_string());
            if self.fail_start {
                anyhow::bail!("port 8080 already in use");
            }
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("engine.stop".to_string());
            if self.fail_stop {
                anyhow::bail!("connection pool did not drain");
            }
            Ok(())
        }
    }

    /// Stops itself shortly after starting, like an engine hitting a fatal error
    struct SelfStoppingEngine {
        log: Log,
        trigger: StdMutex<Option<ShutdownTrigger>>,
    }

    #[async_trait]
    impl Engine for SelfStoppingEngine {
        fn attach(&self, trigger: ShutdownTrigger) {
            *self.trigger.lock().unwrap() = Some(trigger);
        }

        async fn start(&self, _configuration: &Properties) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("engine.start".to_string());
            if let Some(trigger) = self.trigger.lock().unwrap().take() {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    trigger.fire_with_exit_code(2);
                });
            }
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("engine.stop".to_string());
            Ok(())
        }
    }

    /// Keeps its live settings in a map
    #[derive(Default)]
    struct SettingsEngine {
        settings: StdMutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl Engine for SettingsEngine {
        async fn start(&self, configuration: &Properties) -> anyhow::Result<()> {
            let mut settings = self.settings.lock().unwrap();
            for property in configuration {
                settings.insert(property.name.clone(), property.value.clone());
            }
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Reconfigurable for SettingsEngine {
        fn property(&self, name: &str) -> Option<String> {
            self.settings.lock().unwrap().get(name).cloned()
        }

        fn set_property(&self, name: &str, value: &str) -> anyhow::Result<()> {
            self.settings
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            Ok(())
        }

        fn unset_property(&self, name: &str) -> anyhow::Result<()> {
            self.settings.lock().unwrap().remove(name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_engine_stop_failure_still_reaches_stopped() {
        let log = Log::default();
        let mut main = Main::builder()
            .engine(Arc::new(FaultyEngine {
                log: log.clone(),
                fail_start: false,
                fail_stop: true,
            }))
            .signal_hook(Arc::new(NoopHook))
            .listener(recorder("A", &log))
            .build()
            .unwrap();

        main.start().await.unwrap();
        let err = main.stop().await.unwrap_err();

        assert!(matches!(err, LifecycleError::EngineFailed { operation: "stop", .. }));
        assert!(err.is_shutdown_failure());
        assert_eq!(main.state(), LifecycleState::Stopped);
        assert!(log.lock().unwrap().contains(&"A.AfterStop".to_string()));
        main.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_start_failure_skips_engine_stop() {
        let log = Log::default();
        let mut main = Main::builder()
            .engine(Arc::new(FaultyEngine {
                log: log.clone(),
                fail_start: true,
                fail_stop: false,
            }))
            .signal_hook(Arc::new(NoopHook))
            .listener(recorder("A", &log))
            .build()
            .unwrap();

        let err = main.run().await.unwrap_err();

        assert!(matches!(err, LifecycleError::EngineFailed { operation: "start", .. }));
        assert_eq!(main.state(), LifecycleState::Stopped);
        let log = log.lock().unwrap();
        assert!(log.contains(&"engine.start".to_string()));
        assert!(!log.contains(&"engine.stop".to_string()));
        assert!(!log.contains(&"A.BeforeStop".to_string()));
        assert!(log.contains(&"A.AfterStop".to_string()));
    }

    #[tokio::test]
    async fn test_engine_can_request_its_own_shutdown() {
        let log = Log::default();
        let mut main = Main::builder()
            .engine(Arc::new(SelfStoppingEngine {
                log: log.clone(),
                trigger: StdMutex::new(None),
            }))
            .signal_hook(Arc::new(NoopHook))
            .listener(recorder("A", &log))
            .build()
            .unwrap();

        let exit_code = tokio::time::timeout(Duration::from_secs(5), main.run())
            .await
            .expect("engine shutdown did not end the run")
            .unwrap();

        assert_eq!(exit_code, 2);
        assert_eq!(main.state(), LifecycleState::Stopped);
        let log = log.lock().unwrap();
        let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
        assert!(position("A.AfterStart") < position("A.BeforeStop"));
        assert!(position("A.BeforeStop") < position("engine.stop"));
        assert!(position("engine.stop") < position("A.AfterStop"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watched_file_reconfigures_running_engine() {
        let path = std::env::temp_dir().join(format!("conduit-{}-watched.toml", std::process::id()));
        std::fs::write(&path, "[kafka]\nbrokers = \"a:9092\"\n").unwrap();
        let location = path.display().to_string();

        let engine = Arc::new(SettingsEngine::default());
        let mut main = Main::builder()
            .reconfigurable_engine(Arc::clone(&engine))
            .override_properties(PropertiesFileWatcher::load(&path).unwrap())
            .watch_properties_file(&path)
            .signal_hook(Arc::new(NoopHook))
            .build()
            .unwrap();

        main.start().await.unwrap();
        assert_eq!(engine.property("kafka.brokers").as_deref(), Some("a:9092"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, "[kafka]\nbrokers = \"b:9092\"\n").unwrap();

        let bridge = Arc::clone(main.reconfiguration_bridge().unwrap());
        let reloaded = || {
            engine.property("kafka.brokers").as_deref() == Some("b:9092")
                && bridge.last_report().is_some_and(|report| {
                    report
                        .outcomes
                        .iter()
                        .any(|o| o.name == "kafka.brokers" && o.location == location)
                })
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !reloaded() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(reloaded(), "file change was not applied");

        // a broken file keeps the running configuration
        std::fs::write(&path, "[kafka]\nbrokers = = 1\n").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.property("kafka.brokers").as_deref(), Some("b:9092"));

        main.stop().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}

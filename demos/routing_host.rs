//! Runs an in-memory router until Ctrl-C, SIGTERM or a duration limit.
//!
//! ```text
//! CONDUIT_MAIN_DURATION_MAX_MESSAGES=20 cargo run --example routing-host -- app.toml
//! ```
//!
//! When a TOML file is given, editing it reconfigures the running router.

use conduit_main::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Moves messages between in-memory queues
struct InMemoryRouter {
    settings: Mutex<HashMap<String, String>>,
    activity: Arc<ActivityTracker>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryRouter {
    fn new(activity: Arc<ActivityTracker>) -> Self {
        Self {
            settings: Mutex::new(HashMap::new()),
            activity,
            pump: Mutex::new(None),
        }
    }

    fn settings(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn poll_interval(&self) -> Duration {
        self.settings()
            .get("orders.poll")
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(500))
    }
}

#[async_trait]
impl Engine for InMemoryRouter {
    fn target_names(&self) -> Vec<String> {
        vec!["orders".to_string(), "orders-audit".to_string()]
    }

    async fn start(&self, configuration: &Properties) -> anyhow::Result<()> {
        {
            let mut settings = self.settings();
            for property in configuration {
                tracing::info!(
                    property = %property.name,
                    value = %property.value,
                    location = %property.location,
                    "Configured"
                );
                settings.insert(property.name.clone(), property.value.clone());
            }
        }

        let activity = Arc::clone(&self.activity);
        let interval = self.poll_interval();
        let pump = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                activity.record_message();
                tracing::debug!(messages = activity.messages(), "Routed message");
            }
        });
        *self.pump.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(pump);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        tracing::info!(messages = self.activity.messages(), "Router stopped");
        Ok(())
    }
}

impl Reconfigurable for InMemoryRouter {
    fn property(&self, name: &str) -> Option<String> {
        self.settings().get(name).cloned()
    }

    fn set_property(&self, name: &str, value: &str) -> anyhow::Result<()> {
        if name.ends_with(".poll") {
            value
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("{name} must be milliseconds: {e}"))?;
        }
        self.settings().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn unset_property(&self, name: &str) -> anyhow::Result<()> {
        self.settings().remove(name);
        Ok(())
    }
}

/// Supplies defaults before the bootstrap properties are applied
struct Defaults;

#[async_trait]
impl LifecycleListener for Defaults {
    fn name(&self) -> &str {
        "Defaults"
    }

    async fn on_event(
        &self,
        event: LifecycleEvent,
        context: &mut LifecycleContext,
    ) -> anyhow::Result<()> {
        match event {
            LifecycleEvent::BeforeConfigure => {
                context
                    .properties_mut()?
                    .set("orders.poll", "250", "Defaults");
            }
            LifecycleEvent::AfterStart => {
                tracing::info!(name = %context.name(), "Press Ctrl-C to stop");
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let activity = Arc::new(ActivityTracker::new());
    let router = Arc::new(InMemoryRouter::new(Arc::clone(&activity)));

    let mut builder = Main::builder()
        .config(MainConfig::from_env()?)
        .reconfigurable_engine(router)
        .activity(activity)
        .listener(Arc::new(Defaults))
        .initial_property("orders.queue", "incoming")
        .initial_property("orders*.batch", "10");

    if let Some(path) = std::env::args().nth(1) {
        let properties = conduit_main::reload::PropertiesFileWatcher::load(std::path::Path::new(&path))?;
        builder = builder
            .override_properties(properties)
            .watch_properties_file(&path);
    }

    let mut main = builder.build()?;
    main.coordinator()
        .add_shutdown_listener(|| tracing::info!("Shutdown requested, draining"));

    let exit_code = main.run().await?;
    tracing::info!(exit_code, "Bye");
    std::process::exit(exit_code);
}

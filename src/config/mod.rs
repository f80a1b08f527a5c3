//! Main configuration and property sets
//!
//! `MainConfig` holds the knobs of the runner itself. Engine configuration
//! travels as [`Properties`], an ordered `name -> value` list that remembers
//! where every value was set.

mod properties;
mod wildcard;

pub use properties::{INITIAL_LOCATION, OVERRIDE_LOCATION, Properties, Property};
pub use wildcard::{WildcardExpansion, autowire, expand_wildcards};

use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment variables read by [`MainConfig::from_env`]
pub const ENV_PREFIX: &str = "CONDUIT_MAIN_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {location}: {source}")]
    Io {
        location: String,
        source: std::io::Error,
    },

    #[error("Cannot parse {location}: {message}")]
    Parse { location: String, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    /// Name used in logs
    pub name: String,
    /// Map OS termination signals to a shutdown request
    pub hangup_interceptor_enabled: bool,
    /// Stop after running this many seconds; `<= 0` disables
    pub duration_max_seconds: i64,
    /// Stop after this many seconds without a processed message; `<= 0` disables
    pub duration_max_idle_seconds: i64,
    /// Stop after this many processed messages; `<= 0` disables
    pub duration_max_messages: i64,
    /// Exit code used when one of the duration limits is hit
    pub duration_hit_exit_code: i32,
    /// Fail startup when a wildcard property matches no engine target
    pub auto_configuration_fail_fast: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            name: "conduit".to_string(),
            hangup_interceptor_enabled: true,
            duration_max_seconds: 0,
            duration_max_idle_seconds: 0,
            duration_max_messages: 0,
            duration_hit_exit_code: 0,
            auto_configuration_fail_fast: false,
        }
    }
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    main: MainConfig,
}

impl MainConfig {
    /// Read the `[main]` table of a TOML document; other tables are ignored
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str::<Document>(text)
            .map(|doc| doc.main)
            .map_err(|e| ConfigError::Parse {
                location: "[main]".to_string(),
                message: e.to_string(),
            })
    }

    /// Defaults overridden by `CONDUIT_MAIN_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(env::vars())?;
        Ok(config)
    }

    /// Apply `CONDUIT_MAIN_*` variables from `vars`; unknown names are ignored
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(option) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match option.to_ascii_lowercase().as_str() {
                "name" => self.name = value,
                "hangup_interceptor_enabled" => {
                    self.hangup_interceptor_enabled = parse(&key, &value)?
                }
                "duration_max_seconds" => self.duration_max_seconds = parse(&key, &value)?,
                "duration_max_idle_seconds" => {
                    self.duration_max_idle_seconds = parse(&key, &value)?
                }
                "duration_max_messages" => self.duration_max_messages = parse(&key, &value)?,
                "duration_hit_exit_code" => self.duration_hit_exit_code = parse(&key, &value)?,
                "auto_configuration_fail_fast" => {
                    self.auto_configuration_fail_fast = parse(&key, &value)?
                }
                _ => tracing::debug!(key = %key, "Ignoring unknown main option"),
            }
        }
        Ok(())
    }

    pub fn duration_max(&self) -> Option<Duration> {
        positive_secs(self.duration_max_seconds)
    }

    pub fn duration_max_idle(&self) -> Option<Duration> {
        positive_secs(self.duration_max_idle_seconds)
    }

    pub fn duration_max_messages(&self) -> Option<u64> {
        u64::try_from(self.duration_max_messages).ok().filter(|n| *n > 0)
    }

    /// True when any duration limit is configured
    pub fn has_duration_limits(&self) -> bool {
        self.duration_max().is_some()
            || self.duration_max_idle().is_some()
            || self.duration_max_messages().is_some()
    }
}

fn positive_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })
}

//! Bootstrap-only state
//!
//! Initial, override and wildcard properties are only needed while the
//! configuration is assembled. [`BootstrapResources`] owns them until
//! [`release`](BootstrapResources::release) drops them, right after the
//! configuration has been applied, so a long-running process does not
//! carry them for its whole life.

use crate::config::{self, INITIAL_LOCATION, OVERRIDE_LOCATION, Properties, WildcardExpansion};

/// Transient configuration inputs
#[derive(Debug, Default, Clone)]
pub struct BootstrapScratch {
    pub initial: Properties,
    pub overrides: Properties,
    /// Filled by [`resolve`](Self::resolve)
    pub wildcards: Properties,
}

impl BootstrapScratch {
    pub fn new(initial: Properties, overrides: Properties) -> Self {
        Self {
            initial,
            overrides,
            wildcards: Properties::new(),
        }
    }

    pub fn add_initial_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.initial.set(name, value, INITIAL_LOCATION);
    }

    pub fn add_override_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.overrides.set(name, value, OVERRIDE_LOCATION);
    }

    /// Total number of properties held
    pub fn len(&self) -> usize {
        self.initial.len() + self.overrides.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge initial and override properties (overrides win), then
    /// auto-wire wildcard properties against `targets`.
    ///
    /// Wildcards that match nothing are returned in the expansion's
    /// `unmatched` list.
    pub fn resolve(&mut self, targets: &[String]) -> (Properties, WildcardExpansion) {
        let mut merged = self.initial.clone();
        merged.merge(&self.overrides);
        self.wildcards.merge(&merged.split_wildcards());

        let expansion = config::expand_wildcards(&self.wildcards, targets);
        let wired = config::autowire(&mut merged, &expansion);
        if wired > 0 {
            tracing::debug!(wired, "Auto-wired wildcard properties");
        }
        (merged, expansion)
    }
}

/// One-shot owner of [`BootstrapScratch`]
#[derive(Debug, Default)]
pub struct BootstrapResources {
    scratch: Option<BootstrapScratch>,
}

impl BootstrapResources {
    pub fn new(scratch: BootstrapScratch) -> Self {
        Self {
            scratch: Some(scratch),
        }
    }

    /// The scratch state, until released
    pub fn scratch_mut(&mut self) -> Option<&mut BootstrapScratch> {
        self.scratch.as_mut()
    }

    pub fn is_released(&self) -> bool {
        self.scratch.is_none()
    }

    /// Drop the scratch state.
    ///
    /// Returns the number of properties released; a second call is a no-op
    /// returning `None`.
    pub fn release(&mut self) -> Option<usize> {
        let scratch = self.scratch.take()?;
        let released = scratch.len();
        drop(scratch);
        tracing::debug!(released, "Released bootstrap resources");
        Some(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> BootstrapScratch {
        let mut scratch = BootstrapScratch::default();
        scratch.add_initial_property("kafka.brokers", "initial:9092");
        scratch.add_initial_property("route.timeout", "10s");
        scratch.add_initial_property("kafka*.poll", "500");
        scratch.add_override_property("kafka.brokers", "override:9092");
        scratch
    }

    #[test]
    fn test_resolve_merges_and_autowires() {
        let mut scratch = scratch();
        let targets = vec!["kafka".to_string(), "kafka-dlq".to_string()];
        let (merged, expansion) = scratch.resolve(&targets);

        assert_eq!(merged.get("kafka.brokers"), Some("override:9092"));
        assert_eq!(merged.location("kafka.brokers"), Some(OVERRIDE_LOCATION));
        assert_eq!(merged.get("route.timeout"), Some("10s"));
        assert_eq!(merged.get("kafka.poll"), Some("500"));
        assert_eq!(merged.get("kafka-dlq.poll"), Some("500"));
        assert!(!merged.contains("kafka*.poll"));
        assert!(expansion.unmatched.is_empty());
        assert_eq!(scratch.wildcards.len(), 1);
    }

    #[test]
    fn test_unmatched_wildcards_reported() {
        let mut scratch = scratch();
        let (_, expansion) = scratch.resolve(&["jms".to_string()]);
        assert_eq!(expansion.unmatched.len(), 1);
        assert_eq!(expansion.unmatched[0].name, "kafka*.poll");
    }

    #[test]
    fn test_release_twice_is_noop() {
        let mut resources = BootstrapResources::new(scratch());
        assert!(!resources.is_released());
        assert_eq!(resources.release(), Some(4));
        assert!(resources.is_released());
        assert!(resources.scratch_mut().is_none());
        assert_eq!(resources.release(), None);
    }
}

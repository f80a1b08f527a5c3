//! Wildcard property auto-wiring
//!
//! A key of the form `<prefix>*.<option>` applies `<option>` to every engine
//! target whose name starts with `<prefix>` (case-insensitive):
//! `kafka*.brokers` sets `kafka.brokers` and `kafka-audit.brokers`, and
//! `*.timeout` sets `timeout` on every target.

use super::{Properties, Property};

/// Result of expanding wildcard properties
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WildcardExpansion {
    /// Concrete `<target>.<option>` properties
    pub resolved: Properties,
    /// Wildcard keys that matched no target or are malformed
    pub unmatched: Vec<Property>,
}

/// Expand every wildcard in `wildcards` against `targets`
pub fn expand_wildcards(wildcards: &Properties, targets: &[String]) -> WildcardExpansion {
    let mut expansion = WildcardExpansion::default();

    for wildcard in wildcards {
        let Some((prefix, option)) = split(&wildcard.name) else {
            tracing::warn!(property = %wildcard.name, "Malformed wildcard property");
            expansion.unmatched.push(wildcard.clone());
            continue;
        };

        let prefix = prefix.to_lowercase();
        let mut matched = false;
        for target in targets {
            if target.to_lowercase().starts_with(&prefix) {
                matched = true;
                expansion.resolved.set(
                    format!("{target}.{option}"),
                    wildcard.value.clone(),
                    wildcard.location.clone(),
                );
            }
        }

        if !matched {
            expansion.unmatched.push(wildcard.clone());
        }
    }

    expansion
}

/// Overlay `expansion` onto `explicit`; explicit keys always win
pub fn autowire(explicit: &mut Properties, expansion: &WildcardExpansion) -> usize {
    let mut wired = 0;
    for property in &expansion.resolved {
        if !explicit.contains(&property.name) {
            explicit.insert(property.clone());
            wired += 1;
        }
    }
    wired
}

fn split(key: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = key.split_once('*')?;
    let option = rest.strip_prefix('.')?;
    (!option.is_empty() && !option.contains('*')).then_some((prefix, option))
}

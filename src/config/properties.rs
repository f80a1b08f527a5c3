//! Insertion-ordered properties with a source location per entry

use super::{ConfigError, Result};

/// Location tag for initial properties
pub const INITIAL_LOCATION: &str = "initial";

/// Location tag for override properties
pub const OVERRIDE_LOCATION: &str = "override";

const SENSITIVE_KEYS: [&str; 4] = ["password", "secret", "passphrase", "token"];
const MASK: &str = "xxxxxx";

/// A single `name = value` pair and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: String,
    pub location: String,
}

impl Property {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            location: location.into(),
        }
    }

    /// Wildcard keys contain a `*` and are auto-wired against engine targets
    pub fn is_wildcard(&self) -> bool {
        self.name.contains('*')
    }

    /// Keys naming a password, secret, passphrase or token
    pub fn is_sensitive(&self) -> bool {
        let name = self.name.to_lowercase();
        SENSITIVE_KEYS.iter().any(|key| name.contains(key))
    }

    /// The value, or a mask for sensitive keys; use this when logging
    pub fn masked_value(&self) -> &str {
        if self.is_sensitive() {
            MASK
        } else {
            &self.value
        }
    }
}

/// Ordered property set; replacing a key keeps its original position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<Property>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entry(name).map(|p| p.value.as_str())
    }

    /// Where the current value of `name` was set
    pub fn location(&self, name: &str) -> Option<&str> {
        self.entry(name).map(|p| p.location.as_str())
    }

    pub fn entry(&self, name: &str) -> Option<&Property> {
        self.entries.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Set a property, returning the previous value
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        location: impl Into<String>,
    ) -> Option<String> {
        self.insert(Property::new(name, value, location))
    }

    /// Insert a property, returning the previous value
    pub fn insert(&mut self, property: Property) -> Option<String> {
        match self.entries.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => {
                existing.location = property.location;
                Some(std::mem::replace(&mut existing.value, property.value))
            }
            None => {
                self.entries.push(property);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        let index = self.entries.iter().position(|p| p.name == name)?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.name.as_str())
    }

    /// Copy every entry of `other` into `self`; `other` wins on conflicts
    pub fn merge(&mut self, other: &Properties) {
        for property in other {
            self.insert(property.clone());
        }
    }

    /// Remove and return every wildcard property
    pub fn split_wildcards(&mut self) -> Properties {
        let (wildcards, plain): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(Property::is_wildcard);
        self.entries = plain;
        Properties { entries: wildcards }
    }

    /// Parse a TOML document, flattening nested tables into dotted keys
    ///
    /// ```
    /// use conduit_main::config::Properties;
    ///
    /// let props = Properties::from_toml_str(
    ///     "[kafka]\nbrokers = \"localhost:9092\"\npoll = 500\n",
    ///     "app.toml",
    /// ).unwrap();
    /// assert_eq!(props.get("kafka.brokers"), Some("localhost:9092"));
    /// assert_eq!(props.get("kafka.poll"), Some("500"));
    /// assert_eq!(props.location("kafka.poll"), Some("app.toml"));
    /// ```
    pub fn from_toml_str(text: &str, location: &str) -> Result<Self> {
        let table: toml::Table = text.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            location: location.to_string(),
            message: e.to_string(),
        })?;

        let mut properties = Properties::new();
        flatten(&mut properties, None, &table, location);
        Ok(properties)
    }
}

fn flatten(out: &mut Properties, prefix: Option<&str>, table: &toml::Table, location: &str) {
    for (key, value) in table {
        let name = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            toml::Value::Table(nested) => flatten(out, Some(&name), nested, location),
            other => {
                out.set(name, scalar(other), location);
            }
        }
    }
}

fn scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for Properties {
    type Item = Property;
    type IntoIter = std::vec::IntoIter<Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<Property> for Properties {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        let mut properties = Properties::new();
        for property in iter {
            properties.insert(property);
        }
        properties
    }
}

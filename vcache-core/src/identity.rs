//! Identity types for cached entries

use crate::{Labels, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between namespace and name in the string form of a key.
pub const KEY_SEPARATOR: char = '/';

/// Composite `(namespace, name)` identity of an entry.
///
/// Keys order lexicographically by namespace, then name. That order is the
/// one every listing is returned in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped (namespace-less) entry.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    /// Parse the string form: `namespace/name`, or a bare `name`.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let key = match s.split_once(KEY_SEPARATOR) {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::cluster(s),
        };
        key.validate()?;
        Ok(key)
    }

    /// Check that the key has an unambiguous string form.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.namespace.contains(KEY_SEPARATOR) {
            return Err(StoreError::InvalidEntry {
                reason: format!("namespace {:?} contains '{}'", self.namespace, KEY_SEPARATOR),
            });
        }
        if self.name.contains(KEY_SEPARATOR) {
            return Err(StoreError::InvalidEntry {
                reason: format!("name {:?} contains '{}'", self.name, KEY_SEPARATOR),
            });
        }
        if !self.namespace.is_empty() && self.name.is_empty() {
            return Err(StoreError::InvalidEntry {
                reason: format!("namespace {:?} given without a name", self.namespace),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}{}", self.namespace, KEY_SEPARATOR, self.name)
        }
    }
}

impl From<(&str, &str)> for ObjectKey {
    fn from((namespace, name): (&str, &str)) -> Self {
        Self::new(namespace, name)
    }
}

/// Standard identity and label metadata that entry types can embed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: Labels::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(ObjectKey::new("a", "x").to_string(), "a/x");
        assert_eq!(ObjectKey::cluster("x").to_string(), "x");
        assert_eq!(ObjectKey::default().to_string(), "");
    }

    #[test]
    fn test_key_parse() {
        assert_eq!(ObjectKey::parse("a/x").unwrap(), ObjectKey::new("a", "x"));
        assert_eq!(ObjectKey::parse("x").unwrap(), ObjectKey::cluster("x"));
        assert!(ObjectKey::parse("a/b/c").is_err());
        assert!(ObjectKey::parse("a/").is_err());
    }

    #[test]
    fn test_empty_key_is_valid() {
        assert!(ObjectKey::default().validate().is_ok());
    }

    #[test]
    fn test_key_order_is_namespace_then_name() {
        let mut keys = vec![
            ObjectKey::new("b", "a"),
            ObjectKey::new("a", "z"),
            ObjectKey::cluster("m"),
            ObjectKey::new("a", "b"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["m", "a/b", "a/z", "b/a"]);
    }

    #[test]
    fn test_meta_serializes_without_empty_fields() {
        let meta = ObjectMeta {
            namespace: String::new(),
            name: "x".to_string(),
            labels: Labels::new(),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"name":"x"}"#);
    }
}

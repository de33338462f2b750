//! Watch event types

use serde::{Deserialize, Serialize};
use std::fmt;
use vcache_core::{Labels, ObjectKey};

/// Name of a watched resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Resource type named after a Rust type.
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// What happened to the watched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Added => write!(f, "added"),
            EventKind::Modified => write!(f, "modified"),
            EventKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A change notification for one object of a watched resource type.
///
/// Carries the object's identity and labels only: reconcilers read current
/// state themselves, so events never need the full object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub resource: ResourceType,
    pub kind: EventKind,
    pub key: ObjectKey,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

impl WatchEvent {
    pub fn new(resource: ResourceType, kind: EventKind, key: ObjectKey) -> Self {
        Self {
            resource,
            kind,
            key,
            labels: Labels::new(),
        }
    }

    pub fn added(resource: ResourceType, key: ObjectKey) -> Self {
        Self::new(resource, EventKind::Added, key)
    }

    pub fn modified(resource: ResourceType, key: ObjectKey) -> Self {
        Self::new(resource, EventKind::Modified, key)
    }

    pub fn deleted(resource: ResourceType, key: ObjectKey) -> Self {
        Self::new(resource, EventKind::Deleted, key)
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_of() {
        assert!(ResourceType::of::<String>().as_str().ends_with("String"));
        assert_eq!(ResourceType::from("ConfigMap").to_string(), "ConfigMap");
    }

    #[test]
    fn test_event_serde_shape() {
        let event = WatchEvent::deleted("ConfigMap".into(), ObjectKey::new("a", "x"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "resource": "ConfigMap",
                "kind": "deleted",
                "key": { "namespace": "a", "name": "x" }
            })
        );
        let back: WatchEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}

//! Type scheme: maps Rust entry types to the group/kind reported in
//! not-found errors.
//!
//! The scheme is plain configuration handed to the cache at construction.
//! There is no process-wide registry.

use crate::SchemeError;
use serde::{Deserialize, Serialize};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;

/// API group and kind of a resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Registry of known entry types.
#[derive(Debug, Clone, Default)]
pub struct TypeScheme {
    kinds: HashMap<TypeId, GroupKind>,
}

impl TypeScheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under the given group/kind, replacing any earlier entry.
    pub fn register<T: 'static>(&mut self, group_kind: GroupKind) -> &mut Self {
        self.kinds.insert(TypeId::of::<T>(), group_kind);
        self
    }

    /// Builder form of [`TypeScheme::register`].
    pub fn with<T: 'static>(mut self, group_kind: GroupKind) -> Self {
        self.register::<T>(group_kind);
        self
    }

    pub fn group_kind_for<T: 'static>(&self) -> Result<&GroupKind, SchemeError> {
        self.kinds
            .get(&TypeId::of::<T>())
            .ok_or_else(|| SchemeError::NotRegistered {
                type_name: type_name::<T>().to_string(),
            })
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.kinds.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;
    struct Gadget;

    #[test]
    fn test_register_and_lookup() {
        let scheme = TypeScheme::new().with::<Widget>(GroupKind::new("toys.io", "Widget"));
        assert!(scheme.is_registered::<Widget>());
        assert_eq!(
            scheme.group_kind_for::<Widget>().unwrap(),
            &GroupKind::new("toys.io", "Widget")
        );
    }

    #[test]
    fn test_unregistered_type() {
        let scheme = TypeScheme::new();
        let err = scheme.group_kind_for::<Gadget>().unwrap_err();
        assert!(err.to_string().contains("Gadget"));
    }

    #[test]
    fn test_group_kind_display() {
        assert_eq!(GroupKind::new("", "ConfigMap").to_string(), "ConfigMap");
        assert_eq!(GroupKind::new("vcache.io", "VirtualConfigMap").to_string(), "VirtualConfigMap.vcache.io");
    }
}

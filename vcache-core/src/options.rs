//! List request options.

use crate::{FieldRequirement, FieldSelector, LabelSelector, Labels, SelectorError};
use serde::{Deserialize, Serialize};

/// A read request against the store.
///
/// Stages apply in order: namespace and field selector resolve a candidate
/// set through indexes, the label selector narrows it, and `limit` caps the
/// result (`0` means unlimited).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub namespace: Option<String>,
    pub field_selector: Option<FieldSelector>,
    pub label_selector: Option<LabelSelector>,
    pub limit: usize,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a single namespace. An empty namespace means all namespaces.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = if namespace.is_empty() {
            None
        } else {
            Some(namespace)
        };
        self
    }

    pub fn with_field_selector(mut self, selector: FieldSelector) -> Self {
        self.field_selector = Some(selector);
        self
    }

    pub fn with_label_selector(mut self, selector: LabelSelector) -> Self {
        self.label_selector = Some(selector);
        self
    }

    /// Require every given label to be present with the given value.
    pub fn matching_labels(self, labels: &Labels) -> Result<Self, SelectorError> {
        Ok(self.with_label_selector(LabelSelector::from_labels(labels)?))
    }

    /// Append equality requirements to the field selector.
    pub fn matching_fields<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut selector = self.field_selector.take().unwrap_or_default();
        for (field, value) in pairs {
            selector = selector.add(FieldRequirement::eq(field, value));
        }
        self.field_selector = Some(selector);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

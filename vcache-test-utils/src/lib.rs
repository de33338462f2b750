//! VCache Test Utilities
//!
//! Centralized test infrastructure for the VCache workspace:
//! - Fixture entry types (`ConfigMap` as an external source object and
//!   `VirtualConfigMap` as the derived entry)
//! - Proptest generators for entries and store operation sequences
//! - Test fixtures for common scenarios
//! - Custom assertions for VCache-specific errors

pub use vcache_core::{
    DeepCopy, Entry, Labels, ListOptions, ObjectKey, ObjectMeta, QueryError, StoreError,
    VcacheError, VcacheResult,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// FIXTURE ENTRY TYPES
// ============================================================================

/// External source object: the state reconcilers read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl DeepCopy for ConfigMap {
    fn deep_copy(&self) -> Self {
        self.clone()
    }
}

impl Entry for ConfigMap {
    fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn labels(&self) -> &Labels {
        &self.metadata.labels
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualConfigMapSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

/// Derived entry: a materialized view of a `ConfigMap`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualConfigMapSpec,
}

impl VirtualConfigMap {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: VirtualConfigMapSpec::default(),
        }
    }

    /// Derive the view of a source config map, carrying its labels over.
    pub fn from_config_map(cm: &ConfigMap) -> Self {
        Self {
            metadata: cm.metadata.clone(),
            spec: VirtualConfigMapSpec {
                data: cm.data.clone(),
            },
        }
    }

    /// Keys of the data map, used as a multi-valued index.
    pub fn data_keys(&self) -> Vec<String> {
        self.spec.data.keys().cloned().collect()
    }
}

impl DeepCopy for VirtualConfigMap {
    fn deep_copy(&self) -> Self {
        self.clone()
    }
}

impl Entry for VirtualConfigMap {
    fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn labels(&self) -> &Labels {
        &self.metadata.labels
    }
}

// ============================================================================
// INDEX FUNCTIONS
// ============================================================================

pub mod index_fns {
    //! Index functions over `VirtualConfigMap`, for registering test indexes.

    use super::*;

    /// Value of the `tier` label, if present.
    pub fn tier(entry: &VirtualConfigMap) -> Vec<String> {
        entry.metadata.labels.get("tier").cloned().into_iter().collect()
    }

    /// Value of the `owner` label, if present.
    pub fn owner(entry: &VirtualConfigMap) -> Vec<String> {
        entry.metadata.labels.get("owner").cloned().into_iter().collect()
    }

    /// Every key of the data map.
    pub fn data_key(entry: &VirtualConfigMap) -> Vec<String> {
        entry.data_keys()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating VCache entries and operations.

    use super::*;
    use proptest::prelude::*;

    /// A mutation applied to a store.
    #[derive(Debug, Clone)]
    pub enum StoreOp {
        Upsert(VirtualConfigMap),
        Remove(VirtualConfigMap),
    }

    /// Namespace from a small pool (including cluster scope) so keys collide.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            Just("a".to_string()),
            Just("b".to_string()),
            Just("c".to_string()),
        ]
    }

    /// Name from a small alphabet so upserts often replace existing keys.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-e]{1,2}".prop_map(|s| s)
    }

    /// Label set over the `tier` and `owner` keys.
    pub fn arb_labels() -> impl Strategy<Value = Labels> {
        (
            prop::option::of(prop_oneof![Just("hot"), Just("cold")]),
            prop::option::of(prop_oneof![Just("alice"), Just("bob"), Just("carol")]),
        )
            .prop_map(|(tier, owner)| {
                let mut labels = Labels::new();
                if let Some(tier) = tier {
                    labels.insert("tier".to_string(), tier.to_string());
                }
                if let Some(owner) = owner {
                    labels.insert("owner".to_string(), owner.to_string());
                }
                labels
            })
    }

    /// Data map over a small key pool, giving a multi-valued index.
    pub fn arb_data() -> impl Strategy<Value = BTreeMap<String, String>> {
        prop::collection::btree_map("k[1-4]", "[a-z]{0,3}", 0..4)
    }

    pub fn arb_vcm() -> impl Strategy<Value = VirtualConfigMap> {
        (arb_namespace(), arb_name(), arb_labels(), arb_data()).prop_map(
            |(namespace, name, labels, data)| VirtualConfigMap {
                metadata: ObjectMeta::new(namespace, name).with_labels(labels),
                spec: VirtualConfigMapSpec { data },
            },
        )
    }

    /// Entries with pairwise distinct keys.
    pub fn arb_unique_vcms(max: usize) -> impl Strategy<Value = Vec<VirtualConfigMap>> {
        prop::collection::vec(arb_vcm(), 0..max).prop_map(|entries| {
            let mut by_key = BTreeMap::new();
            for entry in entries {
                by_key.insert(entry.metadata.key(), entry);
            }
            by_key.into_values().collect()
        })
    }

    pub fn arb_store_op() -> impl Strategy<Value = StoreOp> {
        prop_oneof![
            3 => arb_vcm().prop_map(StoreOp::Upsert),
            1 => arb_vcm().prop_map(StoreOp::Remove),
        ]
    }

    pub fn arb_store_ops(max: usize) -> impl Strategy<Value = Vec<StoreOp>> {
        prop::collection::vec(arb_store_op(), 0..max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entries for common test scenarios.

    use super::*;

    pub fn vcm(namespace: &str, name: &str) -> VirtualConfigMap {
        VirtualConfigMap::new(namespace, name)
    }

    pub fn vcm_with_labels(namespace: &str, name: &str, labels: &[(&str, &str)]) -> VirtualConfigMap {
        let mut entry = vcm(namespace, name);
        for (k, v) in labels {
            entry.metadata.labels.insert(k.to_string(), v.to_string());
        }
        entry
    }

    pub fn vcm_with_data(namespace: &str, name: &str, data: &[(&str, &str)]) -> VirtualConfigMap {
        let mut entry = vcm(namespace, name);
        for (k, v) in data {
            entry.spec.data.insert(k.to_string(), v.to_string());
        }
        entry
    }

    pub fn config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta::new(namespace, name),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// `a/x {tier: hot}`, `a/y {}`, `b/z {tier: hot}`.
    pub fn tiered_entries() -> Vec<VirtualConfigMap> {
        vec![
            vcm_with_labels("a", "x", &[("tier", "hot")]),
            vcm("a", "y"),
            vcm_with_labels("b", "z", &[("tier", "hot")]),
        ]
    }

    /// Two namespaces, each with unlabeled and `my-label=set` entries.
    pub fn labeled_entries() -> Vec<VirtualConfigMap> {
        vec![
            vcm_with_data("namespace", "name", &[("test", "test")]),
            {
                let mut e = vcm_with_labels("namespace", "with-labels", &[("my-label", "set")]);
                e.spec.data.insert("test".to_string(), "test".to_string());
                e
            },
            vcm_with_data("namespace-2", "name", &[("test", "test")]),
            {
                let mut e = vcm_with_labels("namespace-2", "with-labels-2", &[("my-label", "set")]);
                e.spec.data.insert("test".to_string(), "test".to_string());
                e
            },
            {
                let mut e = vcm_with_labels(
                    "namespace-2",
                    "with-labels-alt-2",
                    &[("my-label", "set"), ("my-label-alt", "set")],
                );
                e.spec.data.insert("test".to_string(), "test".to_string());
                e
            },
        ]
    }

    /// Entries owned by alice/bob across tiers, for field selector tests.
    pub fn owned_entries() -> Vec<VirtualConfigMap> {
        vec![
            vcm_with_labels("a", "p", &[("owner", "alice"), ("tier", "hot")]),
            vcm_with_labels("a", "q", &[("owner", "alice"), ("tier", "cold")]),
            vcm_with_labels("a", "r", &[("owner", "bob"), ("tier", "hot")]),
            vcm_with_labels("b", "s", &[("owner", "alice"), ("tier", "hot")]),
            vcm_with_labels("b", "t", &[("tier", "hot")]),
        ]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! VCache-specific assertion helpers.

    use super::*;

    /// Assert that the entries carry exactly the given keys, in order.
    #[track_caller]
    pub fn assert_keys<T: Entry>(entries: &[T], expected: &[&str]) {
        let actual: Vec<String> = entries
            .iter()
            .map(|e| ObjectKey::new(e.namespace(), e.name()).to_string())
            .collect();
        assert_eq!(actual, expected, "Entry keys mismatch");
    }

    /// Assert that a result is a store- or resource-level not-found.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &VcacheResult<T>) {
        match result {
            Err(e) if e.is_not_found() => {}
            other => panic!("Expected not-found, got {:?}", other),
        }
    }

    /// Assert that a result is an invalid-entry store error.
    #[track_caller]
    pub fn assert_invalid_entry<T: std::fmt::Debug>(result: &VcacheResult<T>) {
        assert!(
            matches!(result, Err(VcacheError::Store(StoreError::InvalidEntry { .. }))),
            "Expected InvalidEntry, got {:?}",
            result
        );
    }

    /// Assert that a result is an unsupported-operator query error.
    #[track_caller]
    pub fn assert_unsupported_operator<T: std::fmt::Debug>(result: &VcacheResult<T>) {
        assert!(
            matches!(result, Err(VcacheError::Query(QueryError::UnsupportedOperator { .. }))),
            "Expected UnsupportedOperator, got {:?}",
            result
        );
    }

    /// Assert that a result is an index-not-found query error for `index`.
    #[track_caller]
    pub fn assert_index_not_found<T: std::fmt::Debug>(result: &VcacheResult<T>, index: &str) {
        match result {
            Err(VcacheError::Query(QueryError::IndexNotFound { index: actual })) => {
                assert_eq!(actual, index, "IndexNotFound for unexpected index");
            }
            other => panic!("Expected IndexNotFound({}), got {:?}", index, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

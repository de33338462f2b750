//! Error types for VCache operations

use crate::{ObjectKey, Operator};
use thiserror::Error;

/// Entry store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid entry: {reason}")]
    InvalidEntry { reason: String },

    #[error("Entry not found: {key}")]
    NotFound { key: ObjectKey },

    #[error("Index {index} is already registered")]
    IndexConflict { index: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Query evaluation errors. Raised before any candidate is produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unsupported operator {operator} on field {field}: only exact matches (= or ==) are supported")]
    UnsupportedOperator { field: String, operator: Operator },

    #[error("Index not found: {index:?}")]
    IndexNotFound { index: String },
}

/// Selector parsing and validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Unable to parse selector {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid value {value:?} for key {key:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Operator {operator} on key {key:?} requires {expected}")]
    MissingValues {
        key: String,
        operator: Operator,
        expected: String,
    },
}

/// Type scheme lookup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemeError {
    #[error("Type {type_name} is not registered in the scheme")]
    NotRegistered { type_name: String },
}

/// Reconciliation errors, surfaced to the dispatch framework which owns retries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReconcileError {
    #[error("Reconcile of {target} failed: {source}")]
    Failed {
        target: ObjectKey,
        source: Box<VcacheError>,
    },

    #[error("Reading external state for {target} failed: {reason}")]
    External { target: ObjectKey, reason: String },
}

/// Dispatch loop errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatcher already started")]
    AlreadyStarted,

    #[error("Event channel closed: {reason}")]
    ChannelClosed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all VCache errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VcacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("Scheme error: {0}")]
    Scheme(#[from] SchemeError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Resource-shaped not-found signal produced by the cache facade.
    #[error("{} {name:?} not found", qualified_kind(.kind, .group))]
    NotFound {
        group: String,
        kind: String,
        name: String,
    },
}

impl VcacheError {
    /// True for both the store-level and the resource-level not-found signal.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VcacheError::NotFound { .. } | VcacheError::Store(StoreError::NotFound { .. })
        )
    }

    /// True when the error is a caller mistake that retrying cannot fix.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            VcacheError::Store(StoreError::InvalidEntry { .. })
                | VcacheError::Query(_)
                | VcacheError::Selector(_)
                | VcacheError::Config(_)
        )
    }
}

fn qualified_kind(kind: &str, group: &str) -> String {
    if group.is_empty() {
        kind.to_string()
    } else {
        format!("{}.{}", kind, group)
    }
}

/// Result type alias for VCache operations.
pub type VcacheResult<T> = Result<T, VcacheError>;

// =============================================================================
// TESTS
// =============================================================================

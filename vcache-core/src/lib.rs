//! VCache Core - Entry Types, Selectors and Errors
//!
//! Pure data structures shared by every VCache crate: entry identity, the
//! entry and deep-copy contracts, label and field selectors, list options,
//! the type scheme and the error taxonomy. No store logic lives here.

mod entry;
mod error;
mod fields;
mod identity;
mod labels;
mod options;
mod scheme;
mod selection;

pub use entry::{DeepCopy, Entry, Labels};
pub use error::{
    ConfigError, DispatchError, QueryError, ReconcileError, SchemeError, SelectorError,
    StoreError, VcacheError, VcacheResult,
};
pub use fields::{FieldRequirement, FieldSelector};
pub use identity::{ObjectKey, ObjectMeta, KEY_SEPARATOR};
pub use labels::{validate_label_key, validate_label_value, LabelSelector, Requirement};
pub use options::ListOptions;
pub use scheme::{GroupKind, TypeScheme};
pub use selection::Operator;

/// Name of the built-in index keyed by namespace.
pub const NAMESPACE_INDEX: &str = "namespace";

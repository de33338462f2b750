//! Entry contract: identity, labels and deep-copy capability.

use crate::{ObjectKey, StoreError};
use std::collections::BTreeMap;

/// Label set attached to an entry.
pub type Labels = BTreeMap<String, String>;

/// Explicit deep-copy capability.
///
/// A copy must share no mutable state with its source: mutating either side
/// afterwards must never be observable through the other. Plain owned data
/// satisfies this with `self.clone()`; types holding `Arc<Mutex<_>>` or
/// similar must copy the pointee.
pub trait DeepCopy: Sized {
    /// Produce an independent copy.
    fn deep_copy(&self) -> Self;

    /// Overwrite `out` with an independent copy of `self`.
    fn deep_copy_into(&self, out: &mut Self) {
        *out = self.deep_copy();
    }
}

/// A cacheable entry, identified by `(namespace, name)` and carrying labels.
pub trait Entry: DeepCopy + Send + Sync + 'static {
    fn namespace(&self) -> &str;

    fn name(&self) -> &str;

    fn labels(&self) -> &Labels;

    /// Derive the primary key, rejecting identities with no unambiguous key.
    fn key(&self) -> Result<ObjectKey, StoreError> {
        let key = ObjectKey::new(self.namespace(), self.name());
        key.validate()?;
        Ok(key)
    }
}

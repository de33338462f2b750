//! VCache Storage - Entry Store Traits and Indexed In-Memory Store
//!
//! Defines the read and write contracts of the entry store and the
//! in-memory implementation behind them: a primary `key -> entry` map plus
//! named secondary indexes, all guarded by a single lock so that readers
//! never observe an entry without its index entries or vice versa.

mod index;
mod query;

pub use index::{namespace_index_fn, IndexFn, Indexers};

use index::Index;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use vcache_core::{
    DeepCopy, Entry, ListOptions, ObjectKey, QueryError, StoreError, VcacheResult,
    NAMESPACE_INDEX,
};

// ============================================================================
// STORE TRAITS
// ============================================================================

/// Read side of the store. Every returned entry is an independent deep copy.
pub trait StoreReader<T: Entry>: Send + Sync {
    /// Get the entry at `key`.
    fn get(&self, key: &ObjectKey) -> VcacheResult<T>;

    /// Overwrite `out` with the entry at `key`. On error `out` is untouched.
    fn get_into(&self, key: &ObjectKey, out: &mut T) -> VcacheResult<()> {
        *out = self.get(key)?;
        Ok(())
    }

    /// List entries matching the request, ordered by key.
    fn list(&self, opts: &ListOptions) -> VcacheResult<Vec<T>>;

    /// Replace the contents of `out` with the matching entries. On error `out`
    /// is untouched.
    fn list_into(&self, opts: &ListOptions, out: &mut Vec<T>) -> VcacheResult<()> {
        *out = self.list(opts)?;
        Ok(())
    }
}

/// Write side of the store.
pub trait StoreWriter<T: Entry>: Send + Sync {
    /// Insert the entry, or fully replace the one stored at its key.
    fn upsert(&self, entry: &T) -> VcacheResult<()>;

    /// Delete the entry stored at the entry's key. Absent keys are not an error.
    fn remove(&self, entry: &T) -> VcacheResult<()>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

pub(crate) struct StoreInner<T> {
    pub(crate) items: HashMap<ObjectKey, T>,
    pub(crate) indices: BTreeMap<String, Index<T>>,
}

impl<T> StoreInner<T> {
    fn index(&self, name: &str) -> Result<&Index<T>, QueryError> {
        self.indices.get(name).ok_or_else(|| QueryError::IndexNotFound {
            index: name.to_string(),
        })
    }
}

/// Indexed in-memory entry store.
///
/// The store owns every entry it holds: writes store a deep copy of the
/// argument and reads hand out deep copies, so no caller can reach stored
/// state. A namespace index named [`NAMESPACE_INDEX`] always exists.
pub struct Store<T> {
    inner: RwLock<StoreInner<T>>,
}

impl<T: Entry> Store<T> {
    /// Create a store with only the built-in namespace index.
    pub fn new() -> Self {
        let mut indices = BTreeMap::new();
        indices.insert(
            NAMESPACE_INDEX.to_string(),
            Index::new(namespace_index_fn::<T>()),
        );
        Self {
            inner: RwLock::new(StoreInner {
                items: HashMap::new(),
                indices,
            }),
        }
    }

    /// Create a store with the given indexes plus the built-in namespace index.
    pub fn with_indexers(indexers: Indexers<T>) -> VcacheResult<Self> {
        let store = Self::new();
        {
            let mut inner = store.write()?;
            for (name, func) in indexers.into_inner() {
                if inner.indices.contains_key(&name) {
                    return Err(StoreError::IndexConflict { index: name }.into());
                }
                inner.indices.insert(name, Index::new(func));
            }
        }
        Ok(store)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner<T>>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner<T>>, StoreError> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Register an index after construction and back-fill it from the
    /// entries currently stored.
    pub fn add_index<F>(&self, name: impl Into<String>, func: F) -> VcacheResult<()>
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut inner = self.write()?;
        if inner.indices.contains_key(&name) {
            return Err(StoreError::IndexConflict { index: name }.into());
        }
        let mut index = Index::new(Arc::new(func));
        for (key, entry) in &inner.items {
            index.insert(key, entry);
        }
        tracing::debug!(index = %name, entries = inner.items.len(), "Index registered");
        inner.indices.insert(name, index);
        Ok(())
    }

    /// Atomically replace the whole content of the store.
    ///
    /// Fails without modifying the store if any entry has no valid key.
    pub fn replace(&self, entries: &[T]) -> VcacheResult<()> {
        let mut items = HashMap::with_capacity(entries.len());
        for entry in entries {
            items.insert(entry.key()?, entry.deep_copy());
        }

        let mut inner = self.write()?;
        for index in inner.indices.values_mut() {
            index.clear();
            for (key, entry) in &items {
                index.insert(key, entry);
            }
        }
        inner.items = items;
        tracing::debug!(entries = inner.items.len(), "Store content replaced");
        Ok(())
    }

    /// Delete the entry stored at `key`, if any. Returns whether one existed.
    pub fn remove_key(&self, key: &ObjectKey) -> VcacheResult<bool> {
        let mut inner = self.write()?;
        Ok(Self::remove_locked(&mut inner, key))
    }

    fn remove_locked(inner: &mut StoreInner<T>, key: &ObjectKey) -> bool {
        let Some(old) = inner.items.remove(key) else {
            return false;
        };
        for index in inner.indices.values_mut() {
            index.remove(key, &old);
        }
        true
    }

    /// Entries whose `index` produces `value`, ordered by key.
    pub fn by_index(&self, index: &str, value: &str) -> VcacheResult<Vec<T>> {
        let inner = self.read()?;
        let keys = inner.index(index)?.lookup(value);
        Ok(keys
            .into_iter()
            .flatten()
            .filter_map(|key| inner.items.get(key))
            .map(|entry| entry.deep_copy())
            .collect())
    }

    /// Keys whose entries produce `value` for `index`, ordered.
    pub fn index_keys(&self, index: &str, value: &str) -> VcacheResult<Vec<ObjectKey>> {
        let inner = self.read()?;
        Ok(inner
            .index(index)?
            .lookup(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every value currently produced for `index`, sorted.
    pub fn index_values(&self, index: &str) -> VcacheResult<Vec<String>> {
        let inner = self.read()?;
        let mut values: Vec<String> = inner.index(index)?.values().cloned().collect();
        values.sort();
        Ok(values)
    }

    /// Names of the registered indexes, including the namespace index.
    pub fn index_names(&self) -> VcacheResult<Vec<String>> {
        Ok(self.read()?.indices.keys().cloned().collect())
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> VcacheResult<Vec<ObjectKey>> {
        let inner = self.read()?;
        let mut keys: Vec<ObjectKey> = inner.items.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> VcacheResult<usize> {
        Ok(self.read()?.items.len())
    }

    pub fn is_empty(&self) -> VcacheResult<bool> {
        Ok(self.read()?.items.is_empty())
    }

    /// Remove every entry, keeping the registered indexes.
    pub fn clear(&self) -> VcacheResult<()> {
        let mut inner = self.write()?;
        inner.items.clear();
        for index in inner.indices.values_mut() {
            index.clear();
        }
        Ok(())
    }
}

impl<T: Entry> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.read() {
            Ok(inner) => f
                .debug_struct("Store")
                .field("entries", &inner.items.len())
                .field("indices", &inner.indices.keys().collect::<Vec<_>>())
                .finish(),
            Err(_) => f.write_str("Store { <poisoned> }"),
        }
    }
}

impl<T: Entry> StoreReader<T> for Store<T> {
    fn get(&self, key: &ObjectKey) -> VcacheResult<T> {
        let inner = self.read()?;
        inner
            .items
            .get(key)
            .map(DeepCopy::deep_copy)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() }.into())
    }

    fn list(&self, opts: &ListOptions) -> VcacheResult<Vec<T>> {
        let inner = self.read()?;
        query::evaluate(&inner, opts)
    }
}

impl<T: Entry> StoreWriter<T> for Store<T> {
    fn upsert(&self, entry: &T) -> VcacheResult<()> {
        let key = entry.key()?;
        let copy = entry.deep_copy();

        let mut inner = self.write()?;
        let replaced = Self::remove_locked(&mut inner, &key);
        for index in inner.indices.values_mut() {
            index.insert(&key, &copy);
        }
        inner.items.insert(key.clone(), copy);

        tracing::trace!(key = %key, replaced, "Entry upserted");
        Ok(())
    }

    fn remove(&self, entry: &T) -> VcacheResult<()> {
        let key = entry.key()?;
        let removed = self.remove_key(&key)?;
        tracing::trace!(key = %key, removed, "Entry removed");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Named index functions and their incrementally maintained reverse mappings.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use vcache_core::{Entry, ObjectKey};

/// Derives zero, one or many index values from an entry.
pub type IndexFn<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

/// Index function of the built-in namespace index.
pub fn namespace_index_fn<T: Entry>() -> IndexFn<T> {
    Arc::new(|entry: &T| vec![entry.namespace().to_string()])
}

/// Set of named index functions supplied at construction.
pub struct Indexers<T> {
    funcs: BTreeMap<String, IndexFn<T>>,
}

impl<T> Indexers<T> {
    pub fn new() -> Self {
        Self {
            funcs: BTreeMap::new(),
        }
    }

    /// Register an index function, replacing any earlier one with the same name.
    pub fn insert<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(func));
    }

    /// Builder form of [`Indexers::insert`].
    pub fn with<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        self.insert(name, func);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, IndexFn<T>> {
        self.funcs
    }
}

impl<T> Default for Indexers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Indexers<T> {
    fn clone(&self) -> Self {
        Self {
            funcs: self.funcs.clone(),
        }
    }
}

impl<T> fmt::Debug for Indexers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexers")
            .field("names", &self.funcs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One registered index: its function plus `value -> keys`.
///
/// The reverse mapping only ever holds non-empty key sets, so the set of
/// values is exactly the set of values some stored entry produces.
pub(crate) struct Index<T> {
    func: IndexFn<T>,
    reverse: HashMap<String, BTreeSet<ObjectKey>>,
}

impl<T> Index<T> {
    pub(crate) fn new(func: IndexFn<T>) -> Self {
        Self {
            func,
            reverse: HashMap::new(),
        }
    }

    /// Distinct index values of an entry.
    pub(crate) fn values_of(&self, entry: &T) -> Vec<String> {
        let mut values = (self.func)(entry);
        values.sort();
        values.dedup();
        values
    }

    /// True if the index function produces `value` for the entry.
    pub(crate) fn produces(&self, entry: &T, value: &str) -> bool {
        (self.func)(entry).iter().any(|v| v == value)
    }

    pub(crate) fn insert(&mut self, key: &ObjectKey, entry: &T) {
        for value in self.values_of(entry) {
            self.reverse.entry(value).or_default().insert(key.clone());
        }
    }

    pub(crate) fn remove(&mut self, key: &ObjectKey, entry: &T) {
        for value in self.values_of(entry) {
            if let Some(keys) = self.reverse.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.reverse.remove(&value);
                }
            }
        }
    }

    pub(crate) fn lookup(&self, value: &str) -> Option<&BTreeSet<ObjectKey>> {
        self.reverse.get(value)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &String> {
        self.reverse.keys()
    }

    pub(crate) fn clear(&mut self) {
        self.reverse.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcache_test_utils::{fixtures, VirtualConfigMap};

    #[test]
    fn test_insert_and_remove_keep_sets_non_empty() {
        let mut index: Index<VirtualConfigMap> =
            Index::new(Arc::new(|e: &VirtualConfigMap| e.data_keys()));
        let entry = fixtures::vcm_with_data("a", "x", &[("k1", "v"), ("k2", "v")]);
        let key = ObjectKey::new("a", "x");

        index.insert(&key, &entry);
        assert_eq!(index.lookup("k1").map(|s| s.len()), Some(1));
        assert_eq!(index.lookup("k2").map(|s| s.len()), Some(1));

        index.remove(&key, &entry);
        assert!(index.lookup("k1").is_none());
        assert_eq!(index.values().count(), 0);
    }

    #[test]
    fn test_duplicate_values_are_collapsed() {
        let index: Index<VirtualConfigMap> = Index::new(Arc::new(|_: &VirtualConfigMap| {
            vec!["x".to_string(), "x".to_string()]
        }));
        let entry = fixtures::vcm("a", "x");
        assert_eq!(index.values_of(&entry), vec!["x".to_string()]);
    }

    #[test]
    fn test_indexers_builder() {
        let indexers: Indexers<VirtualConfigMap> =
            Indexers::new().with("owner", |_| vec![]).with("tier", |_| vec![]);
        assert!(indexers.contains("owner"));
        assert_eq!(indexers.len(), 2);
        assert_eq!(format!("{:?}", indexers), r#"Indexers { names: ["owner", "tier"] }"#);
    }
}

//! List evaluation: index resolution, label filtering, limit.
//!
//! Runs entirely under the store's read lock, so every stage sees the same
//! consistent snapshot of entries and indexes.

use vcache_core::{
    Entry, FieldRequirement, ListOptions, ObjectKey, QueryError, VcacheResult, NAMESPACE_INDEX,
};

use crate::StoreInner;

/// An equality requirement resolved against a named index.
struct Lookup<'a> {
    index: &'a str,
    value: &'a str,
}

/// Evaluate a list request and return deep copies of the matches, ordered by key.
pub(crate) fn evaluate<T: Entry>(inner: &StoreInner<T>, opts: &ListOptions) -> VcacheResult<Vec<T>> {
    let lookups = plan(inner, opts)?;
    let candidates = resolve(inner, &lookups);

    let selector = opts.label_selector.as_ref().filter(|s| !s.is_empty());
    let capacity = match opts.limit {
        0 => candidates.len(),
        limit => limit.min(candidates.len()),
    };

    let mut results = Vec::with_capacity(capacity);
    for key in candidates {
        let Some(entry) = inner.items.get(key) else {
            continue;
        };
        if selector.map_or(true, |s| s.matches(entry.labels())) {
            results.push(entry.deep_copy());
            if opts.limit != 0 && results.len() == opts.limit {
                break;
            }
        }
    }
    Ok(results)
}

/// Validate the request and turn namespace plus field selector into index lookups.
///
/// Every requirement is checked before any lookup runs: a non-equality
/// operator or an unknown index fails the whole request.
fn plan<'a, T: Entry>(
    inner: &StoreInner<T>,
    opts: &'a ListOptions,
) -> Result<Vec<Lookup<'a>>, QueryError> {
    let requirements: &[FieldRequirement] = opts
        .field_selector
        .as_ref()
        .map(|s| s.requirements())
        .unwrap_or_default();

    for r in requirements {
        if !r.operator.is_equality() {
            return Err(QueryError::UnsupportedOperator {
                field: r.field.clone(),
                operator: r.operator,
            });
        }
    }

    let mut lookups = Vec::with_capacity(requirements.len() + 1);
    if let Some(namespace) = opts.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        lookups.push(Lookup {
            index: NAMESPACE_INDEX,
            value: namespace,
        });
    }
    for r in requirements {
        if !inner.indices.contains_key(&r.field) {
            return Err(QueryError::IndexNotFound {
                index: r.field.clone(),
            });
        }
        lookups.push(Lookup {
            index: &r.field,
            value: &r.value,
        });
    }
    Ok(lookups)
}

/// Resolve the candidate keys, sorted.
///
/// The first lookup reads the reverse mapping; each later one filters the
/// current candidates through its index function instead of re-reading the
/// whole index.
fn resolve<'s, T: Entry>(inner: &'s StoreInner<T>, lookups: &[Lookup<'_>]) -> Vec<&'s ObjectKey> {
    let Some((first, rest)) = lookups.split_first() else {
        let mut all: Vec<&ObjectKey> = inner.items.keys().collect();
        all.sort();
        return all;
    };

    let mut candidates: Vec<&ObjectKey> = inner
        .indices
        .get(first.index)
        .and_then(|index| index.lookup(first.value))
        .map(|keys| keys.iter().collect())
        .unwrap_or_default();

    for lookup in rest {
        if candidates.is_empty() {
            break;
        }
        let Some(index) = inner.indices.get(lookup.index) else {
            return Vec::new();
        };
        candidates.retain(|key| {
            inner
                .items
                .get(*key)
                .is_some_and(|entry| index.produces(entry, lookup.value))
        });
    }
    candidates
}

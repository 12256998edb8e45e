//! # Reconciler
//!
//! Merges a freshly fetched collection into the one a page currently holds.
//!
//! Collections are `Arc<Vec<Arc<T>>>`. An unchanged entity keeps its previous
//! `Arc`, and if nothing changed at all the previous outer `Arc` is returned,
//! so consumers can decide whether to redraw with `Arc::ptr_eq` alone.
//!
//! Rules, applied in `next` order:
//! 1. Key not seen before: the new entity is used (added).
//! 2. Key seen and entity equal: the previous `Arc` is reused (retained).
//! 3. Key seen and entity differs: the new entity is used (changed).
//! 4. Keys only in `previous` are dropped (removed).
//!
//! A pure reordering of otherwise identical entities counts as a change.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// An ordered, shareable collection of shared entities.
pub type Collection<T> = Arc<Vec<Arc<T>>>;

/// The empty collection.
pub fn empty<T>() -> Collection<T> {
    Arc::new(Vec::new())
}

/// Wraps owned entities into a fresh collection.
pub fn collect<T>(items: Vec<T>) -> Collection<T> {
    Arc::new(items.into_iter().map(Arc::new).collect())
}

/// What one merge pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entities with a key not present before.
    pub added: usize,
    /// Previous keys missing from the new collection.
    pub removed: usize,
    /// Keys present in both with differing content.
    pub changed: usize,
    /// Keys present in both with identical content (reference kept).
    pub retained: usize,
    /// True when the retained entities came back in a different order.
    pub reordered: bool,
}

impl MergeReport {
    /// No additions, removals, changes or reordering.
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.changed == 0 && !self.reordered
    }
}

/// Merges `next` into `previous`; see the module docs for the rules.
pub fn merge<T, K, F>(previous: &Collection<T>, next: Vec<T>, key_of: F) -> Collection<T>
where
    T: PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    merge_with_report(previous, next, key_of).0
}

/// [`merge`] plus the [`MergeReport`] describing what changed.
pub fn merge_with_report<T, K, F>(previous: &Collection<T>, next: Vec<T>, key_of: F) -> (Collection<T>, MergeReport)
where
    T: PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    // Nothing held yet: take `next` as-is
    if previous.is_empty() {
        if next.is_empty() {
            return (Arc::clone(previous), MergeReport::default());
        }
        let report = MergeReport {
            added: next.len(),
            ..MergeReport::default()
        };
        return (collect(next), report);
    }

    // Later duplicates win, matching a plain key -> entity map
    let mut lookup: HashMap<K, (&Arc<T>, bool)> =
        previous.iter().map(|item| (key_of(item), (item, false))).collect();

    let mut report = MergeReport::default();
    let mut seen = 0usize;
    let mut merged: Vec<Arc<T>> = Vec::with_capacity(next.len());

    for item in next {
        let key = key_of(&item);
        match lookup.get_mut(&key) {
            Some((old, matched)) if ***old == item => {
                *matched = true;
                report.retained += 1;
                merged.push(Arc::clone(old));
            }
            Some((_, matched)) => {
                *matched = true;
                report.changed += 1;
                merged.push(Arc::new(item));
            }
            None => {
                report.added += 1;
                merged.push(Arc::new(item));
            }
        }
        seen += 1;
    }
    report.removed = lookup.values().filter(|(_, matched)| !matched).count();

    if report.added == 0 && report.removed == 0 && report.changed == 0 {
        let same_order = merged.len() == previous.len()
            && merged.iter().zip(previous.iter()).all(|(a, b)| Arc::ptr_eq(a, b));
        if same_order {
            return (Arc::clone(previous), report);
        }
        report.reordered = true;
    }

    log::debug!(
        "Merged {} entities: +{} -{} ~{} ={}{}",
        seen,
        report.added,
        report.removed,
        report.changed,
        report.retained,
        if report.reordered { " (reordered)" } else { "" }
    );
    (Arc::new(merged), report)
}

//! Shared immutable lookup tables keyed by chip model.
//!
//! Building a table takes the cache lock; chip instances then hold an `Arc`
//! and read it without any locking. The cache only keeps weak references, so
//! a table is freed as soon as the last instance using it is dropped.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Lazily built lookup tables, one per key
///
/// # Example
///
/// ```
/// use chipsynth_common::TableCache;
///
/// static SQUARES: TableCache<u8, Vec<u32>> = TableCache::new();
///
/// let a = SQUARES.get_or_build(4, |&n| (0..n as u32).map(|i| i * i).collect());
/// let b = SQUARES.get_or_build(4, |_| unreachable!("already built"));
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// ```
pub struct TableCache<K, T> {
    entries: Mutex<Vec<(K, Weak<T>)>>,
}

impl<K: PartialEq + std::fmt::Debug, T> TableCache<K, T> {
    /// Create an empty cache (usable in `static` items)
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Fetch the table for `key`, building it under the lock if no live
    /// instance holds it
    pub fn get_or_build<F>(&self, key: K, build: F) -> Arc<T>
    where
        F: FnOnce(&K) -> T,
    {
        let mut entries = self.entries.lock();
        entries.retain(|(_, table)| table.strong_count() > 0);

        if let Some(table) = entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, table)| table.upgrade())
        {
            return table;
        }

        log::debug!("building lookup table for {key:?}");
        let table = Arc::new(build(&key));
        entries.push((key, Arc::downgrade(&table)));
        table
    }

    /// Number of tables currently alive
    pub fn live_tables(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(_, table)| table.strong_count() > 0)
            .count()
    }
}

impl<K: PartialEq + std::fmt::Debug, T> Default for TableCache<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> std::fmt::Debug for TableCache<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

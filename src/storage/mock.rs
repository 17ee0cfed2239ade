//! In-memory state store
//!
//! This module provides a simple in-memory [`StateStore`] used by tests and for
//! running business logic locally. Every namespace is its own ordered map.
//! Operation counters and per-namespace failure switches let tests observe
//! exactly what the cache sends to the store and how it copes with errors.

use crate::error::{Error, Result};
use crate::storage::engine::{Namespace, RawEntry, StateCursor, StateStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub ranges: u64,
    /// Cursors opened and not yet closed.
    pub open_cursors: u64,
}

#[derive(Default)]
struct Inner {
    spaces: HashMap<Namespace, BTreeMap<String, Vec<u8>>>,
    stats: StoreStats,
    failing_writes: HashSet<Namespace>,
    failing_reads: HashSet<Namespace>,
    failing_cursors: HashSet<Namespace>,
}

fn toggle(set: &mut HashSet<Namespace>, ns: &Namespace, failing: bool) {
    if failing {
        set.insert(ns.clone());
    } else {
        set.remove(ns);
    }
}

/// In-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write raw bytes directly, bypassing any cache. Used to seed fixtures.
    pub fn insert_raw(&self, ns: &Namespace, key: &str, value: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .spaces
            .entry(ns.clone())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Read raw bytes directly. `None` when absent.
    pub fn get_raw(&self, ns: &Namespace, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .spaces
            .get(ns)
            .and_then(|space| space.get(key).cloned())
    }

    /// Get the number of keys stored in a namespace
    pub fn len(&self, ns: &Namespace) -> usize {
        self.inner.lock().spaces.get(ns).map_or(0, BTreeMap::len)
    }

    /// Check if a namespace is empty
    pub fn is_empty(&self, ns: &Namespace) -> bool {
        self.len(ns) == 0
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.lock().stats
    }

    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        let open = inner.stats.open_cursors;
        inner.stats = StoreStats {
            open_cursors: open,
            ..StoreStats::default()
        };
    }

    /// Make every put/delete against `ns` fail until switched off again.
    pub fn fail_writes(&self, ns: &Namespace, failing: bool) {
        toggle(&mut self.inner.lock().failing_writes, ns, failing);
    }

    /// Make every get and range open against `ns` fail.
    pub fn fail_reads(&self, ns: &Namespace, failing: bool) {
        toggle(&mut self.inner.lock().failing_reads, ns, failing);
    }

    /// Make `next` fail on every cursor over `ns`, including ones already open.
    pub fn fail_cursor_reads(&self, ns: &Namespace, failing: bool) {
        toggle(&mut self.inner.lock().failing_cursors, ns, failing);
    }

    fn check_writable(inner: &Inner, ns: &Namespace) -> Result<()> {
        if inner.failing_writes.contains(ns) {
            return Err(Error::Storage(format!("write rejected for namespace {}", ns)));
        }
        Ok(())
    }

    fn check_readable(inner: &Inner, ns: &Namespace) -> Result<()> {
        if inner.failing_reads.contains(ns) {
            return Err(Error::Storage(format!("read rejected for namespace {}", ns)));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, ns: &Namespace, key: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        Self::check_readable(&inner, ns)?;
        inner.stats.gets += 1;
        Ok(inner
            .spaces
            .get(ns)
            .and_then(|space| space.get(key).cloned())
            .unwrap_or_default())
    }

    async fn put(&self, ns: &Namespace, key: &str, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner, ns)?;
        inner.stats.puts += 1;
        inner
            .spaces
            .entry(ns.clone())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, ns: &Namespace, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner, ns)?;
        inner.stats.deletes += 1;
        if let Some(space) = inner.spaces.get_mut(ns) {
            space.remove(key);
        }
        Ok(())
    }

    async fn range(&self, ns: &Namespace, start: &str, end: &str) -> Result<Box<dyn StateCursor>> {
        let mut inner = self.inner.lock();
        Self::check_readable(&inner, ns)?;
        inner.stats.ranges += 1;
        inner.stats.open_cursors += 1;

        let entries: VecDeque<RawEntry> = match inner.spaces.get(ns) {
            Some(space) if start < end => space
                .range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => VecDeque::new(),
        };

        Ok(Box::new(MemoryCursor {
            namespace: ns.clone(),
            entries,
            store: Arc::clone(&self.inner),
            open: true,
        }))
    }
}

/// Cursor over a snapshot taken when the range was opened.
struct MemoryCursor {
    namespace: Namespace,
    entries: VecDeque<RawEntry>,
    store: Arc<Mutex<Inner>>,
    open: bool,
}

#[async_trait]
impl StateCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<RawEntry>> {
        if !self.open {
            return Err(Error::CursorClosed);
        }
        if self.store.lock().failing_cursors.contains(&self.namespace) {
            return Err(Error::Storage(format!(
                "cursor read failed for namespace {}",
                self.namespace
            )));
        }
        Ok(self.entries.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.entries.clear();
            self.store.lock().stats.open_cursors -= 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_basic_ops() -> Result<()> {
        let store = MemoryStore::new();
        let ns = Namespace::WorldState;

        store.put(&ns, "key1", b"\"v\"".to_vec()).await?;
        assert_eq!(store.get(&ns, "key1").await?, b"\"v\"".to_vec());

        store.delete(&ns, "key1").await?;
        assert!(store.get(&ns, "key1").await?.is_empty());
        assert!(store.is_empty(&ns));

        let stats = store.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.deletes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_range_is_half_open() -> Result<()> {
        let store = MemoryStore::new();
        let ns = Namespace::WorldState;
        for key in ["a", "b", "c", "d"] {
            store.insert_raw(&ns, key, key.as_bytes());
        }

        let mut cursor = store.range(&ns, "b", "d").await?;
        assert_eq!(store.stats().open_cursors, 1);
        assert_eq!(cursor.next().await?.map(|(k, _)| k), Some("b".to_string()));
        assert_eq!(cursor.next().await?.map(|(k, _)| k), Some("c".to_string()));
        assert_eq!(cursor.next().await?, None);

        cursor.close().await?;
        cursor.close().await?;
        assert_eq!(store.stats().open_cursors, 0);
        assert!(matches!(cursor.next().await, Err(Error::CursorClosed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_namespaces_are_isolated() -> Result<()> {
        let store = MemoryStore::new();
        let private = Namespace::Collection("private".into());

        store.put(&private, "k", b"1".to_vec()).await?;
        assert!(store.get(&Namespace::WorldState, "k").await?.is_empty());
        assert_eq!(store.len(&private), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_failing_writes() -> Result<()> {
        let store = MemoryStore::new();
        let ns = Namespace::WorldState;
        store.fail_writes(&ns, true);

        assert!(matches!(
            store.put(&ns, "k", b"1".to_vec()).await,
            Err(Error::Storage(_))
        ));
        assert!(store.delete(&ns, "k").await.is_err());

        store.fail_writes(&ns, false);
        store.put(&ns, "k", b"1".to_vec()).await?;
        assert_eq!(store.get_raw(&ns, "k"), Some(b"1".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_failing_reads() -> Result<()> {
        let store = MemoryStore::new();
        let ns = Namespace::WorldState;
        store.insert_raw(&ns, "a", "1");
        store.insert_raw(&ns, "b", "2");

        let mut cursor = store.range(&ns, "a", "z").await?;
        assert!(cursor.next().await?.is_some());

        store.fail_reads(&ns, true);
        assert!(matches!(store.get(&ns, "a").await, Err(Error::Storage(_))));
        assert!(store.range(&ns, "a", "z").await.is_err());
        assert_eq!(store.stats().ranges, 1);
        // An already open cursor is not affected by the read switch.
        assert!(cursor.next().await?.is_some());
        store.fail_reads(&ns, false);

        store.fail_cursor_reads(&ns, true);
        assert!(matches!(cursor.next().await, Err(Error::Storage(_))));
        cursor.close().await?;
        assert_eq!(store.stats().open_cursors, 0);
        store.fail_cursor_reads(&ns, false);

        // Other namespaces keep working.
        store.fail_reads(&ns, true);
        assert!(store.get(&Namespace::Collection("c".into()), "a").await?.is_empty());
        Ok(())
    }
}

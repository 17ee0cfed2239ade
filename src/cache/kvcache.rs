//! Per-namespace read cache and write buffer.

use super::{decode_stored, MergeIterator, SharedReadCache};
use crate::composite::CompositeKey;
use crate::error::{Error, Result};
use crate::storage::{Namespace, Partition};
use crate::value::{self, Datum};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// What the read cache knows about a key.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadSlot {
    /// Never looked up; the next get goes to the store.
    Unknown,
    /// Looked up and not in the store.
    Absent,
    /// Looked up and decoded.
    Present(Datum),
}

impl ReadSlot {
    pub fn value(&self) -> Option<&Datum> {
        match self {
            ReadSlot::Present(v) => Some(v),
            _ => None,
        }
    }
}

/// Pending change for a key in the current unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteSlot {
    /// Not written; reads fall through to the read cache.
    Untouched,
    /// Tombstone: hidden from reads, deleted on commit.
    Deleted,
    /// Overrides the stored value, written on commit.
    Written(Datum),
}

impl WriteSlot {
    /// The read-cache state after this slot has been committed.
    fn committed(self) -> Option<ReadSlot> {
        match self {
            WriteSlot::Untouched => None,
            WriteSlot::Deleted => Some(ReadSlot::Absent),
            WriteSlot::Written(v) => Some(ReadSlot::Present(v)),
        }
    }
}

/// Read cache plus write buffer over one [`Partition`].
pub struct KVCache {
    partition: Partition,
    reads: SharedReadCache,
    writes: BTreeMap<String, WriteSlot>,
    warn_unclosed: bool,
}

impl std::fmt::Debug for KVCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KVCache")
            .field("namespace", self.partition.namespace())
            .field("pending_writes", &self.writes.len())
            .finish()
    }
}

impl KVCache {
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            reads: SharedReadCache::default(),
            writes: BTreeMap::new(),
            warn_unclosed: true,
        }
    }

    /// Whether iterators opened by this cache log a warning when dropped open.
    pub fn warn_on_unclosed_iterator(mut self, warn: bool) -> Self {
        self.warn_unclosed = warn;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        self.partition.namespace()
    }

    /// Number of buffered puts and deletes.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    pub fn read_slot(&self, key: &str) -> ReadSlot {
        self.reads
            .lock()
            .get(key)
            .cloned()
            .unwrap_or(ReadSlot::Unknown)
    }

    pub fn write_slot(&self, key: &str) -> WriteSlot {
        self.writes
            .get(key)
            .cloned()
            .unwrap_or(WriteSlot::Untouched)
    }

    /// Current value of `key` as seen by this unit of work.
    pub async fn get(&mut self, key: &str) -> Result<Option<Datum>> {
        match self.writes.get(key) {
            Some(WriteSlot::Deleted) => return Ok(None),
            Some(WriteSlot::Written(v)) => return Ok(Some(v.clone())),
            Some(WriteSlot::Untouched) | None => {}
        }

        match self.read_slot(key) {
            ReadSlot::Present(v) => return Ok(Some(v)),
            ReadSlot::Absent => return Ok(None),
            ReadSlot::Unknown => {}
        }

        debug!(namespace = %self.namespace(), key, "read cache miss");
        let raw = self.partition.get(key).await?;
        let slot = if raw.is_empty() {
            ReadSlot::Absent
        } else {
            ReadSlot::Present(decode_stored(key, &raw)?)
        };
        let value = slot.value().cloned();
        self.reads.lock().insert(key.to_string(), slot);
        Ok(value)
    }

    /// Buffer a write. `Datum::Null` is rejected and leaves the buffer as it was.
    ///
    /// Non-finite floats convert to `Datum::Null`, so they are rejected here
    /// too and never reach the store.
    pub async fn put(&mut self, key: &str, value: Datum) -> Result<()> {
        if value.is_null() {
            return Err(Error::InvalidValue(format!(
                "cannot put null or non-finite number for key {:?}",
                key
            )));
        }
        trace!(namespace = %self.namespace(), key, "buffered put");
        self.writes.insert(key.to_string(), WriteSlot::Written(value));
        Ok(())
    }

    /// Buffer a delete.
    pub async fn delete(&mut self, key: &str) -> Result<()> {
        trace!(namespace = %self.namespace(), key, "buffered delete");
        self.writes.insert(key.to_string(), WriteSlot::Deleted);
        Ok(())
    }

    /// Scan `[start, end)`, merging buffered writes over the store's contents.
    ///
    /// The returned iterator sees the write buffer as it is now; writes made
    /// while it is open do not show up in it.
    pub async fn range_scan(&mut self, start: &str, end: &str) -> Result<MergeIterator> {
        if start >= end {
            debug!(namespace = %self.namespace(), start, end, "empty range");
            return Ok(MergeIterator::empty(self.namespace().clone()));
        }

        let pending: Vec<(String, WriteSlot)> = self
            .writes
            .range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, slot)| (k.clone(), slot.clone()))
            .collect();

        debug!(
            namespace = %self.namespace(),
            start,
            end,
            pending = pending.len(),
            "opening range scan"
        );

        let cursor = self.partition.range(start, end).await?;
        MergeIterator::open(
            self.namespace().clone(),
            pending,
            cursor,
            Arc::clone(&self.reads),
            self.warn_unclosed,
        )
        .await
    }

    /// Scan every composite key that starts with `object_type` + `attributes`.
    pub async fn scan_by_partial_key<S: AsRef<str>>(
        &mut self,
        object_type: &str,
        attributes: &[S],
    ) -> Result<MergeIterator> {
        let prefix = CompositeKey::new(object_type, attributes)?;
        let start = prefix.encode();
        let end = prefix.prefix_end();
        self.range_scan(&start, &end).await
    }

    /// Flush the write buffer to the store.
    ///
    /// Entries are applied in key order and removed from the buffer one at a
    /// time, so a failure leaves exactly the unapplied entries buffered. Each
    /// applied key's read-cache slot is updated to the committed state, which
    /// keeps later reads consistent and makes a repeated commit a no-op.
    ///
    /// Returns the number of entries applied.
    pub async fn commit(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Some((key, slot)) = self.writes.pop_first() {
            if let Err(e) = self.flush_one(&key, &slot).await {
                self.writes.insert(key, slot);
                return Err(e);
            }
            if let Some(read) = slot.committed() {
                self.reads.lock().insert(key, read);
            }
            applied += 1;
        }

        if applied > 0 {
            info!(namespace = %self.namespace(), applied, "committed write buffer");
        }
        Ok(applied)
    }

    async fn flush_one(&self, key: &str, slot: &WriteSlot) -> Result<()> {
        match slot {
            WriteSlot::Untouched => Ok(()),
            WriteSlot::Deleted => self.partition.delete(key).await,
            WriteSlot::Written(datum) => {
                let raw = value::encode(datum)?;
                self.partition.put(key, raw).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StateStore};

    fn seeded(keys: &[&str]) -> (MemoryStore, KVCache) {
        let store = MemoryStore::new();
        for key in keys {
            store.insert_raw(&Namespace::WorldState, key, format!("\"{}\"", key));
        }
        let cache = KVCache::new(Partition::new(
            Arc::new(store.clone()),
            Namespace::WorldState,
        ));
        (store, cache)
    }

    #[tokio::test]
    async fn test_get_populates_read_cache() -> Result<()> {
        let (store, mut cache) = seeded(&["1010"]);
        assert_eq!(cache.read_slot("1010"), ReadSlot::Unknown);

        assert_eq!(cache.get("1010").await?, Some(Datum::from("1010")));
        assert_eq!(cache.read_slot("1010"), ReadSlot::Present(Datum::from("1010")));

        // Served from cache the second time.
        cache.get("1010").await?;
        assert_eq!(store.stats().gets, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_key_is_negatively_cached() -> Result<()> {
        let (store, mut cache) = seeded(&[]);
        assert_eq!(cache.get("4010").await?, None);
        assert_eq!(cache.get("4010").await?, None);
        assert_eq!(cache.read_slot("4010"), ReadSlot::Absent);
        assert_eq!(store.stats().gets, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_after_write_and_delete() -> Result<()> {
        let (store, mut cache) = seeded(&["1010"]);

        cache.put("1010", Datum::from("1011")).await?;
        assert_eq!(cache.get("1010").await?, Some(Datum::from("1011")));

        cache.delete("1010").await?;
        assert_eq!(cache.get("1010").await?, None);
        assert_eq!(cache.write_slot("1010"), WriteSlot::Deleted);

        // Nothing reached the store, and the read cache was never consulted.
        assert_eq!(store.get_raw(&Namespace::WorldState, "1010"), Some(b"\"1010\"".to_vec()));
        assert_eq!(store.stats().gets, 0);
        assert_eq!(cache.read_slot("1010"), ReadSlot::Unknown);
        Ok(())
    }

    #[tokio::test]
    async fn test_put_null_is_rejected() -> Result<()> {
        let (_store, mut cache) = seeded(&[]);
        let err = cache.put("k", Datum::Null).await.unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        assert_eq!(cache.write_slot("k"), WriteSlot::Untouched);
        assert!(!cache.is_dirty());
        Ok(())
    }

    #[tokio::test]
    async fn test_put_non_finite_is_rejected() -> Result<()> {
        let (store, mut cache) = seeded(&[]);
        cache.put("k", Datum::from("kept")).await?;

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = cache.put("k", Datum::from(bad)).await.unwrap_err();
            assert!(matches!(err, Error::InvalidValue(_)));
        }
        assert_eq!(cache.write_slot("k"), WriteSlot::Written(Datum::from("kept")));

        cache.commit().await?;
        assert_eq!(store.get_raw(&Namespace::WorldState, "k"), Some(b"\"kept\"".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_read_failure_propagates() -> Result<()> {
        let (store, mut cache) = seeded(&["a"]);
        cache.put("b", Datum::from("b+")).await?;
        store.fail_reads(&Namespace::WorldState, true);

        let err = cache.get("a").await.unwrap_err();
        assert_eq!(err.to_string(), "Storage error: read rejected for namespace <world-state>");
        assert_eq!(cache.read_slot("a"), ReadSlot::Unknown);

        let err = cache.range_scan("a", "z").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.stats().open_cursors, 0);

        // The write buffer is untouched and still served.
        assert_eq!(cache.pending_writes(), 1);
        assert_eq!(cache.get("b").await?, Some(Datum::from("b+")));

        store.fail_reads(&Namespace::WorldState, false);
        assert_eq!(cache.get("a").await?, Some(Datum::from("a")));
        assert_eq!(cache.commit().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_value_is_fatal() {
        let (store, mut cache) = seeded(&[]);
        store.insert_raw(&Namespace::WorldState, "bad", "{oops");

        let err = cache.get("bad").await.unwrap_err();
        assert!(matches!(err, Error::Corruption { ref key, .. } if key == "bad"));
        assert_eq!(cache.read_slot("bad"), ReadSlot::Unknown);
    }

    #[tokio::test]
    async fn test_commit_drains_and_refreshes_reads() -> Result<()> {
        let (store, mut cache) = seeded(&["a", "b"]);
        cache.get("a").await?;

        cache.put("a", Datum::from("a+")).await?;
        cache.delete("b").await?;
        cache.put("c", Datum::from(3)).await?;
        assert_eq!(cache.pending_writes(), 3);

        assert_eq!(cache.commit().await?, 3);
        assert!(!cache.is_dirty());

        let ns = Namespace::WorldState;
        assert_eq!(store.get_raw(&ns, "a"), Some(b"\"a+\"".to_vec()));
        assert_eq!(store.get_raw(&ns, "b"), None);
        assert_eq!(store.get_raw(&ns, "c"), Some(b"3".to_vec()));

        assert_eq!(cache.read_slot("a"), ReadSlot::Present(Datum::from("a+")));
        assert_eq!(cache.read_slot("b"), ReadSlot::Absent);

        store.reset_stats();
        assert_eq!(cache.get("c").await?, Some(Datum::from(3)));
        assert_eq!(store.stats().gets, 0);

        // Nothing left to apply.
        assert_eq!(cache.commit().await?, 0);
        assert_eq!(store.stats().puts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_unapplied_entries() -> Result<()> {
        let (store, mut cache) = seeded(&[]);
        cache.put("a", Datum::from(1)).await?;
        cache.put("b", Datum::from(2)).await?;

        store.fail_writes(&Namespace::WorldState, true);
        assert!(matches!(cache.commit().await, Err(Error::Storage(_))));
        assert_eq!(cache.pending_writes(), 2);
        assert_eq!(cache.get("a").await?, Some(Datum::from(1)));

        store.fail_writes(&Namespace::WorldState, false);
        assert_eq!(cache.commit().await?, 2);
        assert_eq!(store.len(&Namespace::WorldState), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_abandoned_cache_writes_nothing() -> Result<()> {
        let store = MemoryStore::new();
        {
            let mut cache = KVCache::new(Partition::new(
                Arc::new(store.clone()),
                Namespace::Collection("private".into()),
            ));
            cache.put("k", Datum::from("v")).await?;
        }
        let ns = Namespace::Collection("private".into());
        assert!(store.get(&ns, "k").await?.is_empty());
        assert_eq!(store.stats().puts, 0);
        Ok(())
    }
}

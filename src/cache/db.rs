//! Cache multiplexer for one unit of work.
//!
//! Every operation takes an optional collection name. `None` (or `""`)
//! addresses the world state. The KVCache for a namespace is created on first
//! use and lives until the `Db` is dropped.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use txcache::storage::MemoryStore;
//! use txcache::{Datum, Db};
//!
//! # async fn example() -> txcache::error::Result<()> {
//! let store = MemoryStore::new();
//! let mut db = Db::new(Arc::new(store.clone()));
//!
//! db.put("asset1", Datum::from("blue"), None).await?;
//! db.put("secret", Datum::from(7), Some("orgA")).await?;
//! assert_eq!(db.get("asset1", None).await?, Some(Datum::from("blue")));
//!
//! db.commit().await?;
//! # Ok(())
//! # }
//! ```

use super::{KVCache, MergeIterator};
use crate::config::{CacheConfig, CommitPolicy};
use crate::error::Result;
use crate::storage::{Namespace, Partition, StateStore};
use crate::value::Datum;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Owns one [`KVCache`] per namespace touched during a unit of work.
pub struct Db {
    store: Arc<dyn StateStore>,
    config: CacheConfig,
    caches: BTreeMap<Namespace, KVCache>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("config", &self.config)
            .field("caches", &self.caches)
            .finish()
    }
}

impl Db {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    pub fn with_config(store: Arc<dyn StateStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            caches: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Namespaces touched so far, world state first.
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.caches.keys().cloned().collect()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.caches.values().any(KVCache::is_dirty)
    }

    /// KVCache for `collection`, created on first use.
    pub fn cache(&mut self, collection: Option<&str>) -> &mut KVCache {
        let namespace = Namespace::from_collection(collection);
        let store = &self.store;
        let warn_unclosed = self.config.warn_on_unclosed_iterator;
        self.caches.entry(namespace).or_insert_with_key(|ns| {
            debug!(namespace = %ns, "creating namespace cache");
            KVCache::new(Partition::new(Arc::clone(store), ns.clone()))
                .warn_on_unclosed_iterator(warn_unclosed)
        })
    }

    /// Returns `None` if the key does not exist.
    pub async fn get(&mut self, key: &str, collection: Option<&str>) -> Result<Option<Datum>> {
        self.cache(collection).get(key).await
    }

    pub async fn put(&mut self, key: &str, value: Datum, collection: Option<&str>) -> Result<()> {
        self.cache(collection).put(key, value).await
    }

    pub async fn delete(&mut self, key: &str, collection: Option<&str>) -> Result<()> {
        self.cache(collection).delete(key).await
    }

    pub async fn range_scan(
        &mut self,
        start: &str,
        end: &str,
        collection: Option<&str>,
    ) -> Result<MergeIterator> {
        self.cache(collection).range_scan(start, end).await
    }

    pub async fn scan_by_partial_key<S: AsRef<str>>(
        &mut self,
        object_type: &str,
        attributes: &[S],
        collection: Option<&str>,
    ) -> Result<MergeIterator> {
        self.cache(collection)
            .scan_by_partial_key(object_type, attributes)
            .await
    }

    /// Flush every namespace's write buffer to the store.
    ///
    /// Under [`CommitPolicy::Continue`] every namespace is attempted and the
    /// first error is returned afterwards. Under [`CommitPolicy::FailFast`]
    /// the remaining namespaces are left untouched. There is no rollback of
    /// namespaces that did commit.
    pub async fn commit(&mut self) -> Result<()> {
        let policy = self.config.commit_policy;
        let mut first_error = None;
        let mut applied = 0;

        for (namespace, cache) in self.caches.iter_mut() {
            match cache.commit().await {
                Ok(n) => applied += n,
                Err(e) => {
                    error!(namespace = %namespace, error = %e, "namespace commit failed");
                    if policy == CommitPolicy::FailFast {
                        return Err(e);
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(namespaces = self.caches.len(), applied, "unit of work committed");
                Ok(())
            }
        }
    }
}

//! State store traits
//!
//! The cache never talks to a concrete database. Everything it needs from the
//! host is four primitives (point get, point put, point delete, ascending
//! range scan) scoped to a [`Namespace`].

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// An isolated key space in the underlying store.
///
/// `WorldState` sorts before every collection, which gives commit a stable
/// order across namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    /// The default, public key space.
    WorldState,
    /// A named private data collection.
    Collection(String),
}

impl Namespace {
    /// Map an optional collection name to a namespace.
    ///
    /// `None` and `""` both select the world state.
    pub fn from_collection(collection: Option<&str>) -> Self {
        match collection {
            Some(name) if !name.is_empty() => Namespace::Collection(name.to_string()),
            _ => Namespace::WorldState,
        }
    }

    /// Collection name, or `None` for the world state.
    pub fn collection(&self) -> Option<&str> {
        match self {
            Namespace::WorldState => None,
            Namespace::Collection(name) => Some(name),
        }
    }

    pub fn is_world_state(&self) -> bool {
        matches!(self, Namespace::WorldState)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace::WorldState
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::WorldState => write!(f, "<world-state>"),
            Namespace::Collection(name) => write!(f, "{}", name),
        }
    }
}

/// A raw key/value pair as returned by a store cursor.
pub type RawEntry = (String, Vec<u8>);

/// Live cursor over an ascending key range.
///
/// Cursors hold resources on the store side and must be closed on every exit
/// path.
#[async_trait]
pub trait StateCursor: Send {
    /// Next pair in ascending key order, or `None` once the range is exhausted.
    async fn next(&mut self) -> Result<Option<RawEntry>>;

    /// Release the cursor. Calling it more than once is allowed.
    async fn close(&mut self) -> Result<()>;
}

/// Underlying ordered key-value store.
///
/// `get` returns an empty buffer for a key that does not exist; there is no
/// separate "not found" signal.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, ns: &Namespace, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, ns: &Namespace, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, ns: &Namespace, key: &str) -> Result<()>;

    /// Open a cursor over `[start, end)`.
    async fn range(&self, ns: &Namespace, start: &str, end: &str) -> Result<Box<dyn StateCursor>>;
}

/// A store bound to one namespace.
///
/// Each KVCache owns exactly one partition, so the namespace is chosen once at
/// construction and never threaded through individual calls.
#[derive(Clone)]
pub struct Partition {
    store: Arc<dyn StateStore>,
    namespace: Namespace,
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl Partition {
    pub fn new(store: Arc<dyn StateStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.store.get(&self.namespace, key).await
    }

    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.put(&self.namespace, key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&self.namespace, key).await
    }

    pub async fn range(&self, start: &str, end: &str) -> Result<Box<dyn StateCursor>> {
        self.store.range(&self.namespace, start, end).await
    }
}

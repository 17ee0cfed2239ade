// txcache - transactional read/write cache over an ordered key-value store
// Buffers writes for one unit of work and flushes them on commit

#![warn(rust_2018_idioms)]

pub mod cache;
pub mod composite;
pub mod config;
pub mod storage;
pub mod telemetry;
pub mod value;

// Re-exports for convenience
pub use cache::{Db, KVCache, MergeIterator, ReadSlot, WriteSlot};
pub use config::{CacheConfig, CommitPolicy};
pub use storage::{Namespace, StateCursor, StateStore};
pub use value::Datum;

/// txcache error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Invalid value: {0}")]
        InvalidValue(String),

        #[error("Corrupted value for key {key:?}: {reason}")]
        Corruption { key: String, reason: String },

        #[error("Invalid composite key: {0}")]
        InvalidCompositeKey(String),

        #[error("Cursor already closed")]
        CursorClosed,

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Telemetry error: {0}")]
        Telemetry(String),

        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

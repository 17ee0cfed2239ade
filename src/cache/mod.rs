//! Transactional cache
//!
//! # Architecture
//!
//! ```text
//! Db (one per unit of work)
//!   └─→ KVCache (one per namespace, created on first touch)
//!        ├─→ read cache:   key → Absent | Present(datum)
//!        ├─→ write buffer: key → Deleted | Written(datum)
//!        └─→ MergeIterator (range scans: write buffer ∪ live store cursor)
//! ```
//!
//! Writes never reach the store before [`Db::commit`]. Reads see the write
//! buffer first, then the read cache, then the store.

pub mod db;
pub mod iter;
pub mod kvcache;

pub use db::Db;
pub use iter::MergeIterator;
pub use kvcache::{KVCache, ReadSlot, WriteSlot};

use crate::error::{Error, Result};
use crate::value::{self, Datum};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Read cache shared between a KVCache and the iterators it opens.
pub(crate) type SharedReadCache = Arc<Mutex<HashMap<String, ReadSlot>>>;

/// Decode bytes that came out of the store.
///
/// The store only ever holds values this cache wrote, so a parse failure means
/// the data is corrupt and is not retried.
pub(crate) fn decode_stored(key: &str, raw: &[u8]) -> Result<Datum> {
    let datum = value::decode(raw).map_err(|e| Error::Corruption {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    if datum.is_null() {
        return Err(Error::Corruption {
            key: key.to_string(),
            reason: "stored value is null".to_string(),
        });
    }
    Ok(datum)
}

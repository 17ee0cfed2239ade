//! Storage layer
//!
//! # Architecture
//!
//! The cache sits on top of a host-supplied store that exposes only narrow
//! primitives:
//!
//! ```text
//! StateStore (get / put / delete / range)
//!   └─→ Namespace (world state, or a named collection)
//!        └─→ StateCursor (ascending [start, end) scan, must be closed)
//! ```
//!
//! A [`Partition`] binds a store to one namespace; each KVCache owns one.
//! [`MemoryStore`] is the in-process implementation used by tests.

pub mod engine;
pub mod mock;

pub use engine::{Namespace, Partition, RawEntry, StateCursor, StateStore};
pub use mock::{MemoryStore, StoreStats};

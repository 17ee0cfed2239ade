//! Decoded state values and their store encoding.
//!
//! The store only ever sees raw bytes. The cache decodes those bytes into a
//! [`Datum`] on the way in and re-encodes on commit. The encoding is plain
//! JSON text, so anything written through the cache is readable by other
//! clients of the same store.
//!
//! A `Datum` is a [`serde_json::Value`]. Numbers keep their JSON form: `1`
//! stays `1` and 64-bit integers round-trip exactly. JSON has no NaN or
//! infinity, so converting a non-finite float yields `Datum::Null`, which
//! `put` rejects like any other null.
//!
//! ```rust
//! use txcache::{value, Datum};
//!
//! let datum = Datum::from("hello");
//! let raw = value::encode(&datum).unwrap();
//! assert_eq!(raw, b"\"hello\"");
//! assert_eq!(value::decode(&raw).unwrap(), datum);
//! ```

/// A decoded state value.
pub type Datum = serde_json::Value;

/// Serialize to the raw bytes written to the store.
pub fn encode(datum: &Datum) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(datum)
}

/// Parse raw store bytes.
///
/// Callers treat an empty buffer as "absent" before calling this; an empty
/// slice here is a parse error like any other malformed input.
pub fn decode(raw: &[u8]) -> serde_json::Result<Datum> {
    serde_json::from_slice(raw)
}

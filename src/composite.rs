//! Composite keys
//!
//! A composite key packs an object type and an ordered list of attributes into
//! one flat key, so that a range scan over a shared prefix behaves like a
//! secondary-index lookup:
//!
//! ```text
//! U+0000 objectType U+0000 attr1 U+0000 attr2 U+0000 ...
//! ```
//!
//! The leading U+0000 keeps composite keys apart from simple keys. U+0000 and
//! U+10FFFF are reserved, so neither may appear inside a component; that keeps
//! `prefix + U+10FFFF` strictly above every key sharing the prefix.

use crate::error::{Error, Result};

/// Marks a key as composite.
pub const COMPOSITE_KEY_NAMESPACE: char = '\u{0}';
/// Separates the components of a composite key.
pub const MIN_UNICODE_RUNE: char = '\u{0}';
/// Largest code point; used as the open upper bound of a prefix scan.
pub const MAX_UNICODE_RUNE: char = '\u{10FFFF}';

/// A composite key split into its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    pub object_type: String,
    pub attributes: Vec<String>,
}

impl CompositeKey {
    pub fn new<S: AsRef<str>>(object_type: &str, attributes: &[S]) -> Result<Self> {
        validate_component(object_type)?;
        let attributes = attributes
            .iter()
            .map(|attr| {
                let attr = attr.as_ref();
                validate_component(attr)?;
                Ok(attr.to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            object_type: object_type.to_string(),
            attributes,
        })
    }

    /// Flat key form.
    pub fn encode(&self) -> String {
        let mut key = String::with_capacity(
            2 + self.object_type.len() + self.attributes.iter().map(|a| a.len() + 1).sum::<usize>(),
        );
        key.push(COMPOSITE_KEY_NAMESPACE);
        key.push_str(&self.object_type);
        key.push(MIN_UNICODE_RUNE);
        for attr in &self.attributes {
            key.push_str(attr);
            key.push(MIN_UNICODE_RUNE);
        }
        key
    }

    /// Parse a flat key. `None` if the key is not composite.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(COMPOSITE_KEY_NAMESPACE)?;
        let mut parts: Vec<&str> = rest.split(MIN_UNICODE_RUNE).collect();
        // Well-formed keys end with a separator, leaving an empty tail.
        if parts.last() == Some(&"") {
            parts.pop();
        }
        let (object_type, attributes) = parts.split_first()?;
        if object_type.is_empty() {
            return None;
        }
        Some(Self {
            object_type: object_type.to_string(),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        })
    }

    /// Exclusive upper bound for a scan over every key with this prefix.
    pub fn prefix_end(&self) -> String {
        let mut end = self.encode();
        end.push(MAX_UNICODE_RUNE);
        end
    }
}

/// Build the flat composite key for `object_type` and `attributes`.
pub fn create_composite_key<S: AsRef<str>>(object_type: &str, attributes: &[S]) -> Result<String> {
    Ok(CompositeKey::new(object_type, attributes)?.encode())
}

/// Inverse of [`create_composite_key`].
pub fn split_composite_key(key: &str) -> Option<CompositeKey> {
    CompositeKey::parse(key)
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::InvalidCompositeKey(
            "object type or attribute must be a non-empty string".to_string(),
        ));
    }
    if let Some(c) = component
        .chars()
        .find(|c| *c == MIN_UNICODE_RUNE || *c == MAX_UNICODE_RUNE)
    {
        return Err(Error::InvalidCompositeKey(format!(
            "{:?} contains reserved code point U+{:04X}",
            component, c as u32
        )));
    }
    Ok(())
}

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix marking a metadata key whose values are binary.
pub const BINARY_SUFFIX: &str = "-bin";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata key is empty")]
    EmptyKey,
    #[error("invalid metadata key {0:?}: keys must match [0-9a-z_.-]+")]
    InvalidKey(String),
    #[error("invalid value for metadata key {key:?}: only printable ASCII is allowed")]
    InvalidValue { key: String },
    #[error("metadata key {0:?} does not end in \"-bin\"")]
    NotBinary(String),
    #[error("binary metadata value for {key:?} is not valid base64: {reason}")]
    InvalidBinary { key: String, reason: String },
}

/// Ordered header-like key/value pairs.
///
/// Keys may repeat; insertion order is preserved, which is also the order entries are
/// written to the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry, keeping any existing entries under the same key.
    pub fn append(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MetadataError> {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;
        if !is_binary_key(&key) && !value.bytes().all(is_printable_ascii) {
            return Err(MetadataError::InvalidValue { key });
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Replace every entry under `key` with a single value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MetadataError> {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;
        self.remove(&key);
        self.append(key, value)
    }

    /// Add a binary value; the key must end in `-bin`.
    pub fn append_bin(&mut self, key: impl Into<String>, value: &[u8]) -> Result<(), MetadataError> {
        let key = key.into();
        if !is_binary_key(&key) {
            return Err(MetadataError::NotBinary(key));
        }
        self.append(key, STANDARD_NO_PAD.encode(value))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Decode the first binary value under `key`.
    pub fn get_bin(&self, key: &str) -> Option<Result<Vec<u8>, MetadataError>> {
        if !is_binary_key(key) {
            return Some(Err(MetadataError::NotBinary(key.to_string())));
        }
        self.get(key).map(|raw| {
            // Peers may or may not pad; accept both.
            STANDARD_NO_PAD
                .decode(raw.trim_end_matches('='))
                .map_err(|e| MetadataError::InvalidBinary {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Remove every entry under `key`, returning how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Append every entry of `other`, preserving its order.
    pub fn extend(&mut self, other: &Metadata) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Set an entry without key validation. Used for pseudo-headers and the
    /// protocol-owned `grpc-*` keys.
    pub(crate) fn set_reserved(&mut self, key: &str, value: String) {
        self.remove(key);
        self.entries.push((key.to_string(), value));
    }
}

pub fn is_binary_key(key: &str) -> bool {
    key.ends_with(BINARY_SUFFIX)
}

fn is_printable_ascii(byte: u8) -> bool {
    (0x20..=0x7e).contains(&byte)
}

fn validate_key(key: &str) -> Result<(), MetadataError> {
    if key.is_empty() {
        return Err(MetadataError::EmptyKey);
    }
    let valid = key
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(MetadataError::InvalidKey(key.to_string()))
    }
}

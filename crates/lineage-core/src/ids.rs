//! Object identifiers and the deterministic bucketing rule.

use std::fmt;
use std::hash::Hasher;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use siphasher::sip::SipHasher13;

use crate::errors::{ErrorInfo, LineageError};
use crate::record::RecordKind;

/// Stable opaque identifier of a persisted object.
///
/// Identifiers have the form `<kind>-<32 lowercase hex digits>`. Entities derive
/// the hex part from their `(path, checksum)` identity so the same artifact
/// version always maps to the same id; every other kind draws 128 random bits,
/// which makes reuse after deletion practically impossible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Draws a fresh random identifier for the given kind.
    pub fn generate(kind: RecordKind) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("{}-{}", kind.as_str(), hex::encode(bytes)))
    }

    /// Derives the identifier of the entity `(path, checksum)`.
    pub fn for_entity(path: &str, checksum: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(checksum.as_bytes());
        let digest = hasher.finalize();
        Self(format!(
            "{}-{}",
            RecordKind::Entity.as_str(),
            hex::encode(&digest[..16])
        ))
    }

    /// Builds an identifier for singleton records such as the root.
    pub fn singleton(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Parses and validates an identifier produced by [`ObjectId::generate`]
    /// or [`ObjectId::for_entity`].
    pub fn parse(raw: &str) -> Result<Self, LineageError> {
        let (kind, hex) = raw.rsplit_once('-').ok_or_else(|| invalid_id(raw))?;
        if RecordKind::from_str_opt(kind).is_none()
            || hex.len() != 32
            || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid_id(raw));
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the record kind encoded in the identifier prefix, if any.
    pub fn kind(&self) -> Option<RecordKind> {
        self.0
            .rsplit_once('-')
            .and_then(|(kind, _)| RecordKind::from_str_opt(kind))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps a key onto one of `buckets` shards.
///
/// The rule hashes the key with SipHash-1-3 under fixed zero keys, so it is
/// stable across platforms and process runs. It must not change without a
/// schema migration because shard file names depend on it.
pub fn bucket_of(key: &str, buckets: u16) -> u16 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(key.as_bytes());
    (hasher.finish() % u64::from(buckets.max(1))) as u16
}

/// Renders a bucket number as the two-digit hex shard name.
pub fn bucket_name(bucket: u16) -> String {
    format!("{bucket:02x}")
}

/// Computes the lowercase hex SHA-256 digest of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn invalid_id(raw: &str) -> LineageError {
    LineageError::InvalidInput(
        ErrorInfo::new("invalid-object-id", "identifier is not well formed")
            .with_context("id", raw),
    )
}

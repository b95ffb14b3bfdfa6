use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::ids::ObjectId;
use lineage_core::record::{Record, RecordKind};
use serde_json::Value;
use tracing::trace;

use crate::canonical::{canonical_value_bytes, encode_error};

/// Reserved field carrying the record kind inside every encoded object.
pub const KIND_FIELD: &str = "@kind";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A decoded record whose concrete type is not known to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Kind tag read from the record.
    pub kind: RecordKind,
    /// Identifier read from the record.
    pub id: ObjectId,
    /// Remaining fields, without the kind tag.
    pub value: Value,
}

/// Converts records to and from their on-disk byte form.
///
/// Encoding is deterministic: the JSON is canonical and the gzip header
/// carries no timestamp or file name. Decoding accepts both compressed and
/// plain payloads regardless of the codec's own setting, so toggling
/// compression never strands existing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    compress: bool,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RecordCodec {
    /// Creates a codec; `compress` selects gzip output.
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    /// Whether encoded output is gzip-compressed.
    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Encodes a typed record.
    pub fn encode<T: Record>(&self, record: &T) -> Result<Vec<u8>, LineageError> {
        let value = serde_json::to_value(record).map_err(|err| {
            encode_error("record-encode", err).with_context("id", record.id())
        })?;
        self.encode_value(T::KIND, value)
            .map_err(|err| err.with_context("id", record.id()))
    }

    /// Encodes an untyped record body under the given kind.
    pub fn encode_value(&self, kind: RecordKind, value: Value) -> Result<Vec<u8>, LineageError> {
        let Value::Object(mut fields) = value else {
            return Err(encode_error("record-encode", "record must serialize to an object"));
        };
        fields.insert(KIND_FIELD.to_string(), Value::String(kind.as_str().to_string()));
        let json = canonical_value_bytes(Value::Object(fields))?;
        if !self.compress {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|err| encode_error("record-compress", err))?;
        encoder
            .finish()
            .map_err(|err| encode_error("record-compress", err))
    }

    /// Decodes a record, requiring it to be of kind `T::KIND`.
    pub fn decode<T: Record>(&self, bytes: &[u8]) -> Result<T, LineageError> {
        let raw = self.decode_any(bytes)?;
        if raw.kind != T::KIND {
            return Err(corrupt(
                "kind-mismatch",
                "record is of a different kind",
                Some(raw.id.as_str()),
            )
            .with_context("expected", T::KIND.as_str())
            .with_context("found", raw.kind.as_str()));
        }
        let id = raw.id;
        serde_json::from_value(raw.value).map_err(|err| {
            corrupt("record-shape", &err.to_string(), Some(id.as_str()))
        })
    }

    /// Decodes any record, returning its kind, id and body.
    pub fn decode_any(&self, bytes: &[u8]) -> Result<RawRecord, LineageError> {
        let json = inflate(bytes)?;
        let value: Value = serde_json::from_slice(&json)
            .map_err(|err| corrupt("record-json", &err.to_string(), None))?;
        let Value::Object(mut fields) = value else {
            return Err(corrupt("record-json", "record is not a JSON object", None));
        };
        let id = match fields.get("id") {
            Some(Value::String(id)) => ObjectId::singleton(id),
            _ => return Err(corrupt("record-id", "record has no string id", None)),
        };
        let kind = match fields.remove(KIND_FIELD) {
            Some(Value::String(tag)) => RecordKind::from_str_opt(&tag).ok_or_else(|| {
                corrupt("record-kind", "unknown record kind", Some(id.as_str()))
                    .with_context("kind", &tag)
            })?,
            _ => {
                return Err(corrupt(
                    "record-kind",
                    "record has no kind tag",
                    Some(id.as_str()),
                ))
            }
        };
        trace!(kind = kind.as_str(), id = %id, bytes = bytes.len(), "decoded record");
        Ok(RawRecord {
            kind,
            id,
            value: Value::Object(fields),
        })
    }
}

/// Whether the payload starts with the gzip magic bytes.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, LineageError> {
    if !is_compressed(bytes) {
        return Ok(bytes.to_vec());
    }
    let mut json = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|err| corrupt("record-gzip", &err.to_string(), None))?;
    Ok(json)
}

fn corrupt(code: &str, reason: &str, id: Option<&str>) -> LineageError {
    let mut info = ErrorInfo::new(code, "record could not be decoded").with_context("reason", reason);
    if let Some(id) = id {
        info = info.with_context("id", id);
    }
    LineageError::CorruptRecord(info)
}

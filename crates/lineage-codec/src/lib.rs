#![deny(missing_docs)]
#![doc = "Deterministic byte encoding of Lineage records: canonical JSON with optional gzip."]

pub mod canonical;
mod codec;

pub use canonical::{canonicalize, to_canonical_json_bytes};
pub use codec::{is_compressed, RawRecord, RecordCodec, KIND_FIELD};

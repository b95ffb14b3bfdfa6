#![deny(missing_docs)]
#![doc = "Core identifiers, error taxonomy, configuration and provenance records for Lineage."]

pub mod config;
pub mod errors;
pub mod ids;
pub mod model;
pub mod paths;
pub mod record;

pub use config::LineageConfig;
pub use errors::{ErrorInfo, LineageError};
pub use ids::{bucket_name, bucket_of, sha256_hex, ObjectId};
pub use model::{
    Activity, Agent, CommandParameter, CompositePlan, CompositeSpec, CompositeStep, Dataset,
    DatasetFile, DatasetMetadata, DatasetTag, Entity, EntityRef, ParamRef, ParameterKind,
    ParameterLink, ParameterMapping, Person, Plan, PlanSpec, StreamMapping,
};
pub use paths::normalize_path;
pub use record::{ExtraFields, IndexEntry, IndexKind, Record, RecordKind, INDEX_CATALOG};

/// Schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

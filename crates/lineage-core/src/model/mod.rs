//! Provenance records: entities, plans, composites, activities and datasets.

pub mod activity;
pub mod composite;
pub mod dataset;
pub mod entity;
pub mod plan;

pub use activity::{time_key, time_prefix, Activity, Agent, Person};
pub use composite::{
    CompositePlan, CompositeSpec, CompositeStep, ParamRef, ParameterLink, ParameterMapping,
};
pub use dataset::{Dataset, DatasetFile, DatasetMetadata, DatasetTag};
pub use entity::{Entity, EntityRef};
pub use plan::{CommandParameter, ParameterKind, Plan, PlanSpec, StreamMapping};

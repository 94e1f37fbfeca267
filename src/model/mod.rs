//! Pipeline data model
//!
//! A Pipeline is the unit of submission: an ordered set of typed components
//! plus the metadata blob uploaded alongside them. Components keep the
//! placement decision (node, platform, effort) and mirror the task state
//! reported by the workflow backend.

pub mod component;
pub mod metadata;
pub mod pipeline;

pub use component::{Component, ComponentState, ComponentType};
pub use metadata::{
    DatasetDescriptor, DatasetType, LayerSpec, MetadataError, ModelDescriptor, ModelParams,
    PipelineMetadata, VersionSchema,
};
pub use pipeline::{Pipeline, PipelineState};

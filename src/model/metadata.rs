//! Pipeline metadata - the JSON blob uploaded with every submission
//!
//! Metadata is read-only after load. It carries the dataset descriptor used
//! for memory sizing, the model descriptor used for effort estimation, and
//! the component name to stage-tag mapping. Stage and dataset tags are
//! sealed enums: an unknown tag is a load error, not a runtime branch.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::component::ComponentType;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to read metadata file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid metadata: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Component '{0}' has no type tag in metadata")]
    MissingComponentType(String),
}

/// Dataset family, deciding how the in-memory footprint is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Tabular,
    Image,
}

/// Schema of one dataset version (as stored or after preprocessing).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionSchema {
    #[serde(default)]
    pub n_samples: u64,

    /// Feature count, tabular datasets only
    pub n_features: Option<u64>,

    /// (height, width, channels), image datasets only
    pub input_shape: Option<[u64; 3]>,

    /// dtype name -> column count, used to size tabular samples
    #[serde(default)]
    pub data_types: HashMap<String, u64>,

    /// Whether values were already scaled to floats on disk
    #[serde(default)]
    pub normalized: bool,
}

impl VersionSchema {
    /// Flattened feature count: `n_features` for tabular schemas, the
    /// product of the input shape for image schemas.
    pub fn feature_count(&self) -> u64 {
        if let Some(n) = self.n_features {
            return n;
        }
        self.input_shape
            .map(|[h, w, c]| h * w * c)
            .unwrap_or_default()
    }
}

/// Descriptor of the dataset a pipeline consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,

    #[serde(rename = "type")]
    pub dataset_type: DatasetType,

    pub train_percentage: f64,
    pub test_percentage: f64,

    pub original: VersionSchema,
    pub preprocessed: VersionSchema,
}

/// One layer of a neural model, as exported by the authoring tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub input_shape: Vec<u64>,

    #[serde(default)]
    pub output_shape: Vec<u64>,

    pub kernel_size: Option<[u64; 2]>,
    pub pool_size: Option<[u64; 2]>,
    pub strides: Option<[u64; 2]>,
}

/// Model hyperparameters relevant to effort estimation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelParams {
    pub solver: Option<String>,
    pub n_iter: Option<u64>,
    pub max_depth: Option<u64>,
    pub n_estimators: Option<u64>,
    pub kernel: Option<String>,
    pub support_vectors: Option<u64>,
    pub n_epochs: Option<u64>,

    #[serde(default)]
    pub layers: Vec<LayerSpec>,
}

/// Descriptor of the model a pipeline trains.
///
/// The type stays an open string: pipelines with models the estimator does
/// not know are still placed, just with effort 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(rename = "type")]
    pub model_type: String,

    #[serde(default)]
    pub params: ModelParams,
}

/// The full metadata blob attached to a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Human name, used as the display-name prefix on the backend
    pub name: Option<String>,

    /// Component name -> stage tag
    pub components_type: HashMap<String, ComponentType>,

    pub dataset: DatasetDescriptor,
    pub model: ModelDescriptor,
}

impl PipelineMetadata {
    /// Load and parse a metadata file from disk.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let metadata: Self = serde_json::from_str(&content)?;
        Ok(metadata)
    }

    /// Resolve the stage tag for a component name.
    pub fn component_type(&self, name: &str) -> Result<ComponentType, MetadataError> {
        self.components_type
            .get(name)
            .copied()
            .ok_or_else(|| MetadataError::MissingComponentType(name.to_string()))
    }
}

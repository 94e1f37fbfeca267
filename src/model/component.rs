//! Component - a single step of a pipeline
//!
//! Each component corresponds to one uploaded source file and one task in
//! the backend workflow. Its state is driven purely by backend polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage a component implements within its pipeline.
///
/// The tag comes from the submitted metadata; unknown tags are rejected at
/// load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Preprocessing,
    Training,
    Evaluation,
}

/// Task state mirrored from the workflow backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ComponentState {
    /// Map a backend task state string onto the mirrored state.
    ///
    /// Returns `None` for states the controller does not track, leaving the
    /// previous state in place.
    pub fn from_backend(state: &str) -> Option<Self> {
        match state {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A single pipeline step and its placement.
#[derive(Debug, Clone, Serialize)]
pub struct Component {
    /// Canonical name, unique within the pipeline
    pub name: String,

    /// Source file the user uploaded for this step
    pub filename: String,

    /// Stage tag resolved from the metadata at load
    #[serde(rename = "type")]
    pub component_type: ComponentType,

    /// Backend task state
    pub state: ComponentState,

    /// Node the placer picked, set during placement
    pub node: Option<String>,

    /// Platform tag of that node (accelerator or architecture)
    pub platform: Option<String>,

    /// Scalar effort estimate used for scheduling
    pub effort: Option<u64>,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    /// Wall-clock seconds between start and end, rounded to 2 decimals
    pub duration: Option<f64>,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        filename: impl Into<String>,
        component_type: ComponentType,
    ) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            component_type,
            state: ComponentState::default(),
            node: None,
            platform: None,
            effort: None,
            start_time: None,
            end_time: None,
            duration: None,
        }
    }
}

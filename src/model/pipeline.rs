//! Pipeline - the unit of scheduling and placement
//!
//! A pipeline moves through QUEUED -> PLACED -> WAITING -> RUNNING and ends
//! in SUCCEEDED or FAILED. Terminal states are absorbing: once reached, no
//! backend poll can move the pipeline again.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{RunRecord, TaskRecord};

use super::component::{Component, ComponentState};
use super::metadata::PipelineMetadata;

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Queued,
    Placed,
    Waiting,
    Running,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A submitted pipeline and its components, in user-declared order.
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,

    /// Run id on the workflow backend; may arrive lazily after dispatch
    pub backend_run_id: Option<String>,

    pub state: PipelineState,

    /// Sum of component efforts, set after placement
    #[serde(skip_serializing)]
    pub total_effort: Option<u64>,

    /// Placement batch counter that admitted this pipeline
    #[serde(skip_serializing)]
    pub time_window: Option<u64>,

    pub submitted_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing)]
    pub last_update: Option<DateTime<Utc>>,

    /// Backend wall-clock seconds, rounded to 2 decimals
    pub duration: Option<f64>,

    /// Components in declaration order (= execution order)
    components: Vec<Component>,

    #[serde(skip_serializing)]
    metadata: PipelineMetadata,
}

impl Pipeline {
    pub fn new(id: impl Into<String>, name: impl Into<String>, metadata: PipelineMetadata) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            backend_run_id: None,
            state: PipelineState::Queued,
            total_effort: None,
            time_window: None,
            submitted_at: Utc::now(),
            scheduled_at: None,
            finished_at: None,
            last_update: None,
            duration: None,
            components: Vec::new(),
            metadata,
        }
    }

    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    pub fn add_component(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.name == name)
    }

    /// Nodes this pipeline was placed on, in component order.
    pub fn placed_nodes(&self) -> Vec<String> {
        self.components
            .iter()
            .filter_map(|c| c.node.clone())
            .collect()
    }

    /// Display-name prefix the backend derives from the pipeline name.
    pub fn display_prefix(&self) -> String {
        self.name.to_lowercase().replace('_', "-")
    }

    /// Apply run-level status from a backend poll.
    ///
    /// Terminal states are monotone: a SUCCEEDED or FAILED pipeline is
    /// never updated again.
    pub fn apply_backend_run(&mut self, run: &RunRecord) {
        if self.state.is_terminal() {
            return;
        }

        match run.state.as_str() {
            "SUCCEEDED" => self.state = PipelineState::Succeeded,
            "FAILED" => self.state = PipelineState::Failed,
            _ => {}
        }

        self.scheduled_at = run.scheduled_at;
        self.finished_at = run.finished_at;
        self.duration = duration_secs(run.scheduled_at, run.finished_at);
        self.last_update = Some(Utc::now());
    }

    /// Apply task-level details from a backend poll to the components.
    pub fn apply_task_details(&mut self, tasks: &[TaskRecord]) {
        for task in tasks {
            let Some(component) = self.component_mut(&task.display_name) else {
                continue;
            };

            component.start_time = task.start_time;
            component.end_time = task.end_time;
            component.duration = duration_secs(task.start_time, task.end_time);
            if let Some(state) = ComponentState::from_backend(&task.state) {
                component.state = state;
            }
        }
    }
}

/// Seconds between two backend timestamps, rounded to 2 decimals.
///
/// `None` when either end is unknown or the interval is negative.
fn duration_secs(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<f64> {
    let (start, end) = (start?, end?);
    let secs = (end - start).num_milliseconds() as f64 / 1000.0;
    if secs < 0.0 {
        return None;
    }
    Some((secs * 100.0).round() / 100.0)
}

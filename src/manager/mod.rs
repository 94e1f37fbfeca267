//! Pipeline Manager - submission queue, placement and reconciliation loops
//!
//! The manager owns every pipeline object and three collections: the FIFO
//! submission queue, the waiting list (in placement order) and the running
//! set. Two periodic jobs drive the lifecycle from one background task:
//!
//! - the placement loop drains the queue, asks the Decision Unit for an
//!   ordered batch of placements, builds each pipeline's backend artifact
//!   and appends it to the waiting list;
//! - the reconciliation loop polls the backend, releases resources for
//!   finished components, evicts terminal pipelines and admits waiting
//!   pipelines whose nodes are all free.
//!
//! Shared state sits behind one coarse mutex, held by each loop body for
//! its full duration and by submission handlers just long enough to
//! enqueue.

pub mod audit;

pub use audit::{AuditLog, TickKind};

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backend::{parse_run_id, BackendClient, RunRecord};
use crate::decision::DecisionUnit;
use crate::inventory::NodeInventory;
use crate::model::{Component, ComponentState, MetadataError, Pipeline, PipelineMetadata, PipelineState};
use crate::placer::Placement;
use crate::settings::{Settings, KFP_PREFIX, METADATA_FILENAME, PIPELINE_FILENAME};

#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build failed for pipeline {id}: {detail}")]
    BuildFailed { id: String, detail: String },

    #[error("Dispatch failed for pipeline {id}: {detail}")]
    DispatchFailed { id: String, detail: String },
}

#[derive(Default)]
struct ManagerState {
    pipelines: HashMap<String, Pipeline>,
    submission_queue: VecDeque<String>,
    waiting_list: Vec<String>,
    running: Vec<String>,
    time_window: u64,
}

/// Lifecycle controller for all submitted pipelines.
pub struct PipelineManager {
    pipelines_dir: PathBuf,
    kfp_url: String,
    enable_caching: bool,
    interpreter: String,
    decision: Arc<DecisionUnit>,
    inventory: Arc<NodeInventory>,
    backend: BackendClient,
    state: Mutex<ManagerState>,
    audit: std::sync::Mutex<AuditLog>,
}

impl PipelineManager {
    pub fn new(
        settings: &Settings,
        decision: Arc<DecisionUnit>,
        inventory: Arc<NodeInventory>,
        backend: BackendClient,
    ) -> Result<Self, ManagerError> {
        let audit = AuditLog::open(&settings.n_pipelines_csv)?;
        Ok(Self {
            pipelines_dir: settings.pipelines_dir.clone(),
            kfp_url: settings.kfp_url.clone(),
            enable_caching: settings.enable_caching,
            interpreter: "python3".to_string(),
            decision,
            inventory,
            backend,
            state: Mutex::new(ManagerState::default()),
            audit: std::sync::Mutex::new(audit),
        })
    }

    /// Override the interpreter used for the build and dispatch
    /// subprocesses.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Register a freshly uploaded pipeline and enqueue it for placement.
    ///
    /// `components` pairs each uploaded filename with its canonical
    /// component name, in the user-declared execution order.
    pub async fn add_pipeline(
        &self,
        pipeline_id: &str,
        name: &str,
        components: &[(String, String)],
    ) -> Result<(), ManagerError> {
        let metadata_path = self.pipelines_dir.join(pipeline_id).join(METADATA_FILENAME);
        let metadata = PipelineMetadata::load(&metadata_path)?;

        let mut pipeline = Pipeline::new(pipeline_id, name, metadata);
        for (filename, component_name) in components {
            let component_type = pipeline.metadata().component_type(component_name)?;
            pipeline.add_component(Component::new(component_name, filename, component_type));
        }

        let mut state = self.state.lock().await;
        state.pipelines.insert(pipeline_id.to_string(), pipeline);
        state.submission_queue.push_back(pipeline_id.to_string());
        info!(
            "Pipeline {} ({}) queued, {} in queue",
            pipeline_id,
            name,
            state.submission_queue.len()
        );
        Ok(())
    }

    /// Number of pipelines known to the manager.
    pub async fn pipeline_count(&self) -> usize {
        self.state.lock().await.pipelines.len()
    }

    pub async fn pipeline_state(&self, pipeline_id: &str) -> Option<PipelineState> {
        self.state
            .lock()
            .await
            .pipelines
            .get(pipeline_id)
            .map(|p| p.state)
    }

    // ========================================================================
    // Placement loop
    // ========================================================================

    /// Drain the submission queue, place the batch and build each placed
    /// pipeline. Runs every WAIT_INTERVAL.
    pub async fn process_pipelines(&self) {
        let mut state = self.state.lock().await;
        if state.submission_queue.is_empty() {
            return;
        }

        state.time_window += 1;
        let window = state.time_window;
        self.record_tick(TickKind::NewWindow, &state);

        let mut batch_ids = Vec::new();
        while let Some(id) = state.submission_queue.pop_front() {
            if let Some(pipeline) = state.pipelines.get_mut(&id) {
                pipeline.time_window = Some(window);
                batch_ids.push(id);
            }
        }
        debug!("Placement window {}: {} pipeline(s)", window, batch_ids.len());

        let batch: Vec<Pipeline> = batch_ids
            .iter()
            .filter_map(|id| state.pipelines.get(id).cloned())
            .collect();
        let placements = self.decision.get_placements(&batch).await;

        let mut placed_ids = Vec::new();
        for placement in &placements {
            placed_ids.push(placement.pipeline_id.clone());
            self.apply_placement(&mut state, placement).await;
        }

        // Pipelines the placer could not map never reach the waiting list.
        for id in &batch_ids {
            if !placed_ids.contains(id) {
                warn!("Pipeline {} was not placed, marking FAILED", id);
                if let Some(pipeline) = state.pipelines.get_mut(id) {
                    pipeline.state = PipelineState::Failed;
                }
            }
        }
    }

    /// Write one placement into its pipeline, build the backend artifact
    /// and append to the waiting list.
    async fn apply_placement(
        &self,
        state: &mut ManagerState,
        placement: &Placement,
    ) {
        let id = placement.pipeline_id.clone();
        let Some(pipeline) = state.pipelines.get_mut(&id) else {
            return;
        };

        pipeline.total_effort = Some(placement.total_effort);
        pipeline.state = PipelineState::Placed;
        for placed in &placement.mapping {
            if let Some(component) = pipeline.component_mut(&placed.component) {
                component.node = Some(placed.node.clone());
                component.platform = Some(placed.platform.clone());
                component.effort = placement.efforts.get(&placed.component).copied();
            }
        }

        match self.build_pipeline(&id, placement).await {
            Ok(()) => {
                if let Some(pipeline) = state.pipelines.get_mut(&id) {
                    pipeline.state = PipelineState::Waiting;
                }
                state.waiting_list.push(id.clone());
                info!("Pipeline {} built, waiting for nodes", id);
            }
            Err(e) => {
                error!("{}", e);
                if let Some(pipeline) = state.pipelines.get_mut(&id) {
                    pipeline.state = PipelineState::Failed;
                }
                self.decision.remove_pipeline(&id).await;
            }
        }
    }

    /// Compile the pipeline into a backend-executable artifact.
    ///
    /// The mapping argument is a JSON array of `[node, platform]` pairs in
    /// component order.
    async fn build_pipeline(
        &self,
        pipeline_id: &str,
        placement: &Placement,
    ) -> Result<(), ManagerError> {
        let mapping: Vec<[&str; 2]> = placement
            .mapping
            .iter()
            .map(|m| [m.node.as_str(), m.platform.as_str()])
            .collect();
        let mapping_json = serde_json::to_string(&mapping).unwrap_or_else(|_| "[]".to_string());

        let mut command = Command::new(&self.interpreter);
        command
            .arg(PIPELINE_FILENAME)
            .args(["-u", &self.kfp_url])
            .args(["-m", &mapping_json])
            .current_dir(self.pipelines_dir.join(pipeline_id));
        if self.enable_caching {
            command.arg("-c");
        }

        let output = command.output().await?;
        if !output.status.success() {
            return Err(ManagerError::BuildFailed {
                id: pipeline_id.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Reconciliation loop
    // ========================================================================

    /// Poll the backend, terminate finished pipelines and admit waiting
    /// ones. Runs every UPDATE_INTERVAL.
    pub async fn update_pipelines(&self) {
        let mut state = self.state.lock().await;

        // Phase 1: poll. A failed poll leaves all pipeline state untouched
        // until the next tick.
        match self.backend.list_runs().await {
            Ok(runs) => self.refresh_running(&mut state, &runs).await,
            Err(e) => warn!("Backend poll failed, skipping status refresh: {}", e),
        }

        // Phase 2: terminate.
        self.terminate_finished(&mut state).await;

        // Phase 3: admit waiting pipelines whose nodes are all free.
        self.admit_waiting(&mut state).await;

        self.record_tick(TickKind::Update, &state);
    }

    async fn refresh_running(&self, state: &mut ManagerState, runs: &HashMap<String, RunRecord>) {
        for id in state.running.clone() {
            let Some(pipeline) = state.pipelines.get_mut(&id) else {
                continue;
            };

            if pipeline.backend_run_id.is_none() {
                // The dispatch output did not carry the id; recover it from
                // the run display name.
                let prefix = pipeline.display_prefix();
                if let Some(run) = runs.values().find(|r| r.display_name.starts_with(&prefix)) {
                    pipeline.backend_run_id = Some(run.run_id.clone());
                }
            }
            let Some(run_id) = pipeline.backend_run_id.clone() else {
                debug!("Backend run id still unknown for pipeline {}", id);
                continue;
            };
            let Some(run) = runs.get(&run_id) else {
                continue;
            };

            pipeline.apply_task_details(&run.run_details.task_details);

            // Completed components release their ledger entry, and the node
            // itself once no other component of the pipeline needs it.
            let finished: Vec<(String, String)> = pipeline
                .components()
                .iter()
                .filter(|c| c.state == ComponentState::Succeeded)
                .filter_map(|c| c.node.clone().map(|n| (c.name.clone(), n)))
                .collect();
            for (component, node) in finished {
                self.decision.remove_assignment(&node, &id, &component).await;
                if !self.decision.is_node_needed(&node, &id).await {
                    self.inventory.release(std::slice::from_ref(&node), &id).await;
                }
            }

            if let Some(pipeline) = state.pipelines.get_mut(&id) {
                pipeline.apply_backend_run(run);
            }
        }
    }

    async fn terminate_finished(&self, state: &mut ManagerState) {
        for id in state.running.clone() {
            let terminal = state
                .pipelines
                .get(&id)
                .map(|p| p.state.is_terminal())
                .unwrap_or(false);
            if !terminal {
                continue;
            }

            info!("Pipeline {} reached terminal state, releasing resources", id);
            state.running.retain(|r| r != &id);
            self.decision.remove_pipeline(&id).await;
            self.inventory.release_owned(&id).await;
        }
    }

    async fn admit_waiting(&self, state: &mut ManagerState) {
        for id in state.waiting_list.clone() {
            let nodes = match state.pipelines.get(&id) {
                Some(pipeline) => pipeline.placed_nodes(),
                None => {
                    state.waiting_list.retain(|w| w != &id);
                    continue;
                }
            };

            if !self.inventory.available(&nodes).await {
                continue;
            }
            self.inventory.reserve(&nodes, &id).await;

            match self.dispatch_pipeline(&id).await {
                Ok(run_id) => {
                    if let Some(pipeline) = state.pipelines.get_mut(&id) {
                        pipeline.backend_run_id = run_id;
                        pipeline.state = PipelineState::Running;
                    }
                    state.waiting_list.retain(|w| w != &id);
                    state.running.push(id.clone());
                    info!("Pipeline {} dispatched", id);
                }
                Err(e) => {
                    error!("{}", e);
                    if let Some(pipeline) = state.pipelines.get_mut(&id) {
                        pipeline.state = PipelineState::Failed;
                    }
                    state.waiting_list.retain(|w| w != &id);
                    self.inventory.release(&nodes, &id).await;
                    self.decision.remove_pipeline(&id).await;
                }
            }
        }
    }

    /// Trigger the built artifact and extract the backend run id from its
    /// output. A missing id with a clean exit is not a failure; the id is
    /// resolved on a later tick by display-name prefix.
    async fn dispatch_pipeline(&self, pipeline_id: &str) -> Result<Option<String>, ManagerError> {
        let artifact = format!("{KFP_PREFIX}{PIPELINE_FILENAME}");
        let output = Command::new(&self.interpreter)
            .arg(&artifact)
            .current_dir(self.pipelines_dir.join(pipeline_id))
            .output()
            .await?;

        if !output.status.success() {
            return Err(ManagerError::DispatchFailed {
                id: pipeline_id.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let run_id = parse_run_id(&stdout);
        if run_id.is_none() {
            warn!(
                "Dispatch output for pipeline {} carried no run id",
                pipeline_id
            );
        }
        Ok(run_id)
    }

    // ========================================================================
    // Shutdown and bookkeeping
    // ========================================================================

    /// Persist every known pipeline to `<pipelines_dir>/pipelines.json`.
    pub async fn dump_pipelines(&self) -> Result<(), ManagerError> {
        let state = self.state.lock().await;
        let pipelines: Vec<&Pipeline> = state.pipelines.values().collect();
        let json = serde_json::to_string_pretty(&pipelines)
            .map_err(|e| ManagerError::Io(std::io::Error::other(e)))?;
        std::fs::write(self.pipelines_dir.join("pipelines.json"), json)?;
        info!("Dumped {} pipeline(s)", pipelines.len());
        Ok(())
    }

    fn record_tick(&self, kind: TickKind, state: &ManagerState) {
        if let Ok(mut audit) = self.audit.lock() {
            audit.record(kind, state.running.len(), state.waiting_list.len());
        }
    }
}

/// Run both periodic loops on one background task, so they can never
/// overlap each other or themselves. Overrunning ticks are skipped, not
/// queued. Returns the shutdown handle.
pub fn spawn_scheduler(
    manager: Arc<PipelineManager>,
    wait_interval_secs: u64,
    update_interval_secs: u64,
) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut placement_tick = interval(Duration::from_secs(wait_interval_secs.max(1)));
        placement_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut update_tick = interval(Duration::from_secs(update_interval_secs.max(1)));
        update_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler started: placement every {}s, reconciliation every {}s",
            wait_interval_secs, update_interval_secs
        );

        loop {
            tokio::select! {
                _ = placement_tick.tick() => manager.process_pipelines().await,
                _ = update_tick.tick() => manager.update_pipelines().await,
                _ = shutdown_rx.changed() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetCatalog;
    use crate::inventory::testing::{inventory_with, record};
    use crate::placer::CustomPlacer;
    use crate::settings::PlacerKind;
    use std::collections::HashMap as StdHashMap;
    use tempfile::TempDir;

    struct Fixture {
        manager: PipelineManager,
        dir: TempDir,
        inventory: Arc<NodeInventory>,
    }

    /// Manager over a stub cluster. Build and dispatch run through `sh`,
    /// so each test controls their exit codes and output via the script
    /// files it writes.
    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();

        let records = vec![
            record("low-1", "10.0.0.1", "low", 2, 4_000_000),
            record("med-1", "10.0.0.2", "med", 4, 8_000_000),
            record("hi-1", "10.0.0.3", "high-cpu", 16, 32_000_000),
        ];
        let free: StdHashMap<String, u64> =
            records.iter().map(|r| (r.ip.clone(), r.memory_kb)).collect();
        let inventory = Arc::new(inventory_with(records, free));
        let catalog = Arc::new(DatasetCatalog::new(dir.path()));
        let placer = Box::new(CustomPlacer::new(inventory.clone(), catalog));
        let decision = Arc::new(DecisionUnit::new(&inventory, placer).await);

        let settings = Settings {
            debug: true,
            kube_config: None,
            kfp_url: "http://127.0.0.1:1".to_string(),
            kfp_api_endpoint: "/pipeline/apis/v2beta1".to_string(),
            prometheus_url: "http://127.0.0.1:1".to_string(),
            enable_caching: false,
            pipelines_dir: dir.path().to_path_buf(),
            wait_interval: 10,
            update_interval: 5,
            node_exporter_port: 9100,
            kube_apiserver_port: 10250,
            datasets_path: dir.path().to_path_buf(),
            placer: PlacerKind::Custom,
            seed: 42,
            n_pipelines_csv: dir.path().join("n_pipelines.csv"),
        };
        let backend =
            BackendClient::new(&settings.kfp_url, &settings.kfp_api_endpoint).unwrap();

        let manager = PipelineManager::new(&settings, decision, inventory.clone(), backend)
            .unwrap()
            .with_interpreter("sh");
        Fixture {
            manager,
            dir,
            inventory,
        }
    }

    fn write_submission(dir: &std::path::Path, id: &str, build_script: &str, run_script: &str) {
        let pipeline_dir = dir.join(id);
        std::fs::create_dir_all(&pipeline_dir).unwrap();
        std::fs::write(
            pipeline_dir.join(METADATA_FILENAME),
            crate::placer::testing::tabular_metadata_json("svm", 1_000),
        )
        .unwrap();
        std::fs::write(pipeline_dir.join(PIPELINE_FILENAME), build_script).unwrap();
        std::fs::write(
            pipeline_dir.join(format!("{KFP_PREFIX}{PIPELINE_FILENAME}")),
            run_script,
        )
        .unwrap();
    }

    fn components() -> Vec<(String, String)> {
        vec![
            ("data_preprocessing.py".to_string(), "prep".to_string()),
            ("model_training.py".to_string(), "train".to_string()),
            ("model_evaluation.py".to_string(), "eval".to_string()),
        ]
    }

    const RUN_OK: &str = "echo 'Run ID: run-1'\n";

    #[tokio::test]
    async fn test_add_pipeline_loads_metadata() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);

        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();
        assert_eq!(f.manager.pipeline_count().await, 1);
        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Queued)
        );
    }

    #[tokio::test]
    async fn test_add_pipeline_rejects_untagged_component() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);

        let result = f
            .manager
            .add_pipeline(
                "p1",
                "svm-test",
                &[("deploy.py".to_string(), "deploy".to_string())],
            )
            .await;
        assert!(matches!(
            result,
            Err(ManagerError::Metadata(MetadataError::MissingComponentType(_)))
        ));
    }

    #[tokio::test]
    async fn test_resubmission_is_independent() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        write_submission(f.dir.path(), "p2", "", RUN_OK);

        f.manager.add_pipeline("p1", "same-name", &components()).await.unwrap();
        f.manager.add_pipeline("p2", "same-name", &components()).await.unwrap();
        assert_eq!(f.manager.pipeline_count().await, 2);
    }

    #[tokio::test]
    async fn test_placement_moves_pipeline_to_waiting() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();

        f.manager.process_pipelines().await;

        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Waiting)
        );
        let state = f.manager.state.lock().await;
        assert_eq!(state.waiting_list, vec!["p1".to_string()]);
        let pipeline = &state.pipelines["p1"];
        assert!(pipeline.total_effort.is_some());
        assert_eq!(pipeline.time_window, Some(1));
        assert!(pipeline.components().iter().all(|c| c.node.is_some()));
    }

    #[tokio::test]
    async fn test_build_failure_marks_failed() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "exit 1\n", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();

        f.manager.process_pipelines().await;

        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Failed)
        );
        let state = f.manager.state.lock().await;
        assert!(state.waiting_list.is_empty());
        drop(state);
        // Build failures also surrender their ledger entries.
        let assignments = f.manager.decision.assignments().await;
        assert!(assignments.values().all(|set| set.is_empty()));
    }

    #[tokio::test]
    async fn test_empty_pipeline_fails_before_waiting() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &[]).await.unwrap();

        f.manager.process_pipelines().await;

        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Failed)
        );
        let state = f.manager.state.lock().await;
        assert!(state.waiting_list.is_empty());
    }

    #[tokio::test]
    async fn test_admission_reserves_nodes_and_runs() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();
        f.manager.process_pipelines().await;

        // The backend poll fails (nothing listens on the stub URL);
        // admission must still run.
        f.manager.update_pipelines().await;

        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Running)
        );
        let state = f.manager.state.lock().await;
        assert_eq!(state.running, vec!["p1".to_string()]);
        assert!(state.waiting_list.is_empty());
        assert_eq!(
            state.pipelines["p1"].backend_run_id.as_deref(),
            Some("run-1")
        );

        let nodes = state.pipelines["p1"].placed_nodes();
        drop(state);
        assert!(!f.inventory.available(&nodes).await);
    }

    #[tokio::test]
    async fn test_dispatch_without_run_id_resolves_lazily() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", "echo submitted\n");
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();
        f.manager.process_pipelines().await;
        f.manager.update_pipelines().await;

        // A clean dispatch without an id line is not a failure.
        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Running)
        );
        let state = f.manager.state.lock().await;
        assert!(state.pipelines["p1"].backend_run_id.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_failure_releases_reservations() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", "exit 1\n");
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();
        f.manager.process_pipelines().await;

        let nodes = {
            let state = f.manager.state.lock().await;
            state.pipelines["p1"].placed_nodes()
        };

        f.manager.update_pipelines().await;

        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Failed)
        );
        let state = f.manager.state.lock().await;
        assert!(state.waiting_list.is_empty());
        assert!(state.running.is_empty());
        drop(state);
        assert!(f.inventory.available(&nodes).await);
        let assignments = f.manager.decision.assignments().await;
        assert!(assignments.values().all(|set| set.is_empty()));
    }

    #[tokio::test]
    async fn test_reserved_node_blocks_admission() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();
        f.manager.process_pipelines().await;

        // Another pipeline holds one of the placed nodes.
        let nodes = {
            let state = f.manager.state.lock().await;
            state.pipelines["p1"].placed_nodes()
        };
        f.inventory
            .reserve(std::slice::from_ref(&nodes[0]), "p0")
            .await;

        f.manager.update_pipelines().await;
        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Waiting)
        );

        // Once the blocker releases, the next tick admits.
        f.inventory
            .release(std::slice::from_ref(&nodes[0]), "p0")
            .await;
        f.manager.update_pipelines().await;
        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Running)
        );
    }

    fn run_record(run_id: &str, state: &str, tasks: Vec<(&str, &str)>) -> RunRecord {
        use crate::backend::{RunDetails, TaskRecord};
        RunRecord {
            run_id: run_id.to_string(),
            display_name: "svm-test-x".to_string(),
            state: state.to_string(),
            scheduled_at: Some(chrono::Utc::now()),
            finished_at: None,
            run_details: RunDetails {
                task_details: tasks
                    .into_iter()
                    .map(|(name, state)| TaskRecord {
                        display_name: name.to_string(),
                        state: state.to_string(),
                        start_time: None,
                        end_time: None,
                    })
                    .collect(),
            },
        }
    }

    #[tokio::test]
    async fn test_component_success_releases_node_when_unneeded() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();
        f.manager.process_pipelines().await;
        f.manager.update_pipelines().await;

        // Deterministic placement on the fixture cluster: prep and eval on
        // low-1, train on med-1.
        {
            let state = f.manager.state.lock().await;
            let nodes = state.pipelines["p1"].placed_nodes();
            assert_eq!(nodes, ["low-1", "med-1", "low-1"]);
        }

        // prep finishes, but eval still needs low-1: the node stays
        // reserved.
        let mut runs = HashMap::new();
        runs.insert(
            "run-1".to_string(),
            run_record("run-1", "RUNNING", vec![("prep", "SUCCEEDED")]),
        );
        {
            let mut state = f.manager.state.lock().await;
            f.manager.refresh_running(&mut state, &runs).await;
        }
        assert!(f.manager.decision.is_node_needed("low-1", "p1").await);
        let assignments = f.manager.decision.assignments().await;
        assert!(!assignments["low-1"].contains("p1/prep"));
        assert!(assignments["low-1"].contains("p1/eval"));
        assert!(!f.inventory.available(&["low-1".to_string()]).await);

        // eval finishes too: low-1 is released early while train still
        // runs on med-1.
        runs.insert(
            "run-1".to_string(),
            run_record(
                "run-1",
                "RUNNING",
                vec![("prep", "SUCCEEDED"), ("eval", "SUCCEEDED")],
            ),
        );
        {
            let mut state = f.manager.state.lock().await;
            f.manager.refresh_running(&mut state, &runs).await;
        }
        assert!(f.inventory.available(&["low-1".to_string()]).await);
        assert!(!f.inventory.available(&["med-1".to_string()]).await);
        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Running)
        );
    }

    #[tokio::test]
    async fn test_terminal_run_releases_everything() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();
        f.manager.process_pipelines().await;
        f.manager.update_pipelines().await;

        let mut runs = HashMap::new();
        runs.insert(
            "run-1".to_string(),
            run_record(
                "run-1",
                "SUCCEEDED",
                vec![
                    ("prep", "SUCCEEDED"),
                    ("train", "SUCCEEDED"),
                    ("eval", "SUCCEEDED"),
                ],
            ),
        );
        {
            let mut state = f.manager.state.lock().await;
            f.manager.refresh_running(&mut state, &runs).await;
            f.manager.terminate_finished(&mut state).await;
            assert!(state.running.is_empty());
        }

        assert_eq!(
            f.manager.pipeline_state("p1").await,
            Some(PipelineState::Succeeded)
        );
        let nodes: Vec<String> = ["low-1", "med-1", "hi-1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(f.inventory.available(&nodes).await);
        let assignments = f.manager.decision.assignments().await;
        assert!(assignments.values().all(|set| set.is_empty()));
    }

    #[tokio::test]
    async fn test_dump_pipelines_writes_json() {
        let f = fixture().await;
        write_submission(f.dir.path(), "p1", "", RUN_OK);
        f.manager.add_pipeline("p1", "svm-test", &components()).await.unwrap();

        f.manager.dump_pipelines().await.unwrap();

        let content =
            std::fs::read_to_string(f.dir.path().join("pipelines.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(parsed[0]["id"], "p1");
        assert_eq!(parsed[0]["state"], "QUEUED");
    }
}

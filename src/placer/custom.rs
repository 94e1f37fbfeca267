//! Custom placer - shortest-job-first ordering with pipeline affinity
//!
//! Scheduling: pipelines are ordered ascending by estimated total effort.
//! Placement: each component type has its own node selection; training and
//! evaluation consult the per-model heuristics table, and among fitting
//! candidates the placer prefers nodes that already host a component of
//! the same pipeline. When memory filtering empties the candidate set the
//! placer falls back to the least-loaded high-cpu node rather than failing
//! the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::catalog::{DatasetCatalog, DatasetVersion};
use crate::decision::Ledger;
use crate::estimator::{EffortEstimator, Phase, Workload};
use crate::inventory::{Node, NodeInventory, NodeQuery, NodeSortKey};
use crate::model::{ComponentType, DatasetType, Pipeline, PipelineMetadata};

use super::heuristics::{self, DEFAULT_HEURISTIC};
use super::{
    dataset_footprint_kb, has_sufficient_memory, ComponentPlacement, Placement, Placer,
    MEMORY_OVERHEAD,
};

/// Score bonus for accelerator-equipped nodes when placing neural models.
const ACCELERATOR_SCORE: i64 = 3;

pub struct CustomPlacer {
    inventory: Arc<NodeInventory>,
    catalog: Arc<DatasetCatalog>,
    estimator: EffortEstimator,
}

impl CustomPlacer {
    pub fn new(inventory: Arc<NodeInventory>, catalog: Arc<DatasetCatalog>) -> Self {
        Self {
            inventory,
            catalog,
            estimator: EffortEstimator::new(),
        }
    }

    // ========================================================================
    // Effort estimation
    // ========================================================================

    /// Per-component efforts plus the total, for one pipeline.
    fn pipeline_efforts(&self, pipeline: &Pipeline) -> (Vec<(String, u64)>, u64) {
        let metadata = pipeline.metadata();
        let mut efforts = Vec::new();
        let mut total = 0u64;

        for component in pipeline.components() {
            let effort = match component.component_type {
                ComponentType::Preprocessing => self.preprocessing_effort(metadata),
                ComponentType::Training => self.model_effort(
                    metadata,
                    metadata.dataset.train_percentage,
                    Phase::Training,
                ),
                ComponentType::Evaluation => self.model_effort(
                    metadata,
                    metadata.dataset.test_percentage,
                    Phase::Prediction,
                ),
            };
            total += effort;
            efforts.push((component.name.clone(), effort));
        }

        (efforts, total)
    }

    /// Preprocessing sweeps the raw dataset once: samples times features.
    fn preprocessing_effort(&self, metadata: &PipelineMetadata) -> u64 {
        let original = &metadata.dataset.original;
        original.n_samples * original.feature_count()
    }

    fn model_effort(&self, metadata: &PipelineMetadata, fraction: f64, phase: Phase) -> u64 {
        let schema = &metadata.dataset.preprocessed;
        let n_samples = (schema.n_samples as f64 * fraction) as u64;
        let n_features = match metadata.dataset.dataset_type {
            DatasetType::Tabular => schema.n_features.unwrap_or(0),
            DatasetType::Image => (schema.feature_count() as f64 * fraction) as u64,
        };

        let workload = Workload {
            n_samples,
            n_features,
            params: &metadata.model.params,
        };
        match self
            .estimator
            .estimate(&metadata.model.model_type, &workload, phase)
        {
            Ok(effort) => effort,
            Err(e) => {
                warn!("Effort estimation degraded to 0: {}", e);
                0
            }
        }
    }

    // ========================================================================
    // Node selection
    // ========================================================================

    /// Preprocessing must hold the larger of the raw and preprocessed
    /// footprints; any worker tier qualifies.
    async fn select_preprocessing_node(
        &self,
        metadata: &PipelineMetadata,
        ledger: &Ledger,
    ) -> Option<Node> {
        let size = dataset_footprint_kb(&self.catalog, &metadata.dataset);
        let query = NodeQuery::new()
            .worker_types(["low", "med", "high-cpu"])
            .sort_by(&[NodeSortKey::Memory]);
        let fitting: Vec<Node> = self
            .inventory
            .list(&query)
            .await
            .into_iter()
            .filter(|n| has_sufficient_memory(size, n, MEMORY_OVERHEAD))
            .collect();

        match least_loaded(&fitting, ledger) {
            Some(node) => Some(node),
            None => self.fallback_node(ledger).await,
        }
    }

    async fn select_training_node(
        &self,
        pipeline_id: &str,
        metadata: &PipelineMetadata,
        ledger: &Ledger,
    ) -> Option<Node> {
        let model = metadata.model.model_type.as_str();
        let size = self.scaled_footprint(metadata, metadata.dataset.train_percentage);
        let heuristic = heuristics::training(model).unwrap_or_else(|| {
            warn!("No training heuristic for model '{}', using default", model);
            DEFAULT_HEURISTIC
        });

        let query = NodeQuery::new()
            .worker_types(heuristic.worker_types.iter().copied())
            .sort_by(heuristic.sort);
        let candidates = self.inventory.list(&query).await;

        if heuristics::prefers_accelerator(model) {
            // Accelerators first, load as tie-breaker; no memory filter.
            let mut scored: Vec<(i64, usize, Node)> = candidates
                .into_iter()
                .map(|n| {
                    let bonus = if n.has_accelerator() { ACCELERATOR_SCORE } else { 0 };
                    let load = ledger.count(&n.name);
                    (bonus - load as i64, load, n)
                })
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            match scored.into_iter().next() {
                Some((_, _, node)) => Some(node),
                None => self.fallback_node(ledger).await,
            }
        } else {
            let fitting: Vec<Node> = candidates
                .into_iter()
                .filter(|n| has_sufficient_memory(size, n, MEMORY_OVERHEAD))
                .collect();
            self.select_with_affinity(&fitting, pipeline_id, ledger).await
        }
    }

    async fn select_evaluation_node(
        &self,
        pipeline_id: &str,
        metadata: &PipelineMetadata,
        ledger: &Ledger,
    ) -> Option<Node> {
        let model = metadata.model.model_type.as_str();
        let size = self.scaled_footprint(metadata, metadata.dataset.test_percentage);
        let heuristic = heuristics::evaluation(model).unwrap_or_else(|| {
            warn!("No evaluation heuristic for model '{}', using default", model);
            DEFAULT_HEURISTIC
        });

        let query = NodeQuery::new()
            .worker_types(heuristic.worker_types.iter().copied())
            .sort_by(heuristic.sort);
        let fitting: Vec<Node> = self
            .inventory
            .list(&query)
            .await
            .into_iter()
            .filter(|n| has_sufficient_memory(size, n, MEMORY_OVERHEAD))
            .collect();

        self.select_with_affinity(&fitting, pipeline_id, ledger).await
    }

    /// Among fitting candidates, prefer nodes already hosting a component
    /// of the same pipeline; fall back to the whole candidate set only
    /// when that intersection is empty.
    async fn select_with_affinity(
        &self,
        candidates: &[Node],
        pipeline_id: &str,
        ledger: &Ledger,
    ) -> Option<Node> {
        if candidates.is_empty() {
            return self.fallback_node(ledger).await;
        }

        let hosting = ledger.nodes_hosting(pipeline_id);
        let preferred: Vec<Node> = candidates
            .iter()
            .filter(|n| hosting.contains(&n.name))
            .cloned()
            .collect();

        if preferred.is_empty() {
            least_loaded(candidates, ledger)
        } else {
            least_loaded(&preferred, ledger)
        }
    }

    /// Last resort: the least-loaded high-cpu node, or failing that the
    /// least-loaded node of any tier. Never filtered by memory, so
    /// admission cannot deadlock on a saturated cluster.
    async fn fallback_node(&self, ledger: &Ledger) -> Option<Node> {
        let high = self
            .inventory
            .list(&NodeQuery::new().worker_types(["high-cpu"]))
            .await;
        if let Some(node) = least_loaded(&high, ledger) {
            return Some(node);
        }
        let all = self.inventory.list(&NodeQuery::new()).await;
        least_loaded(&all, ledger)
    }

    fn scaled_footprint(&self, metadata: &PipelineMetadata, fraction: f64) -> u64 {
        let size = self
            .catalog
            .size_in_memory(&metadata.dataset, DatasetVersion::Preprocessed);
        (size as f64 * fraction) as u64
    }

    async fn place_one(
        &self,
        pipeline: &Pipeline,
        ledger: &mut Ledger,
    ) -> Option<Vec<ComponentPlacement>> {
        let metadata = pipeline.metadata();
        let mut mapping: Vec<ComponentPlacement> = Vec::new();

        for component in pipeline.components() {
            let node = match component.component_type {
                ComponentType::Preprocessing => {
                    self.select_preprocessing_node(metadata, ledger).await
                }
                ComponentType::Training => {
                    self.select_training_node(&pipeline.id, metadata, ledger).await
                }
                ComponentType::Evaluation => {
                    self.select_evaluation_node(&pipeline.id, metadata, ledger).await
                }
            };

            let Some(node) = node else {
                // Roll back this pipeline's partial assignments.
                for placed in &mapping {
                    ledger.remove(&placed.node, &pipeline.id, &placed.component);
                }
                return None;
            };

            ledger.add(&node.name, &pipeline.id, &component.name);
            mapping.push(ComponentPlacement {
                component: component.name.clone(),
                node: node.name.clone(),
                platform: node.platform().to_string(),
            });
        }

        Some(mapping)
    }
}

/// Least-loaded candidate by current assignment count; first wins ties.
fn least_loaded(candidates: &[Node], ledger: &Ledger) -> Option<Node> {
    candidates
        .iter()
        .min_by_key(|n| ledger.count(&n.name))
        .cloned()
}

#[async_trait]
impl Placer for CustomPlacer {
    async fn place_pipelines(&self, pipelines: &[Pipeline], ledger: &mut Ledger) -> Vec<Placement> {
        // Scheduling: shortest job first over the estimated total efforts.
        let mut order: Vec<(usize, Vec<(String, u64)>, u64)> = pipelines
            .iter()
            .enumerate()
            .filter_map(|(i, pipeline)| {
                if pipeline.components().is_empty() {
                    warn!("Pipeline {} has no components, not placing", pipeline.id);
                    return None;
                }
                let (efforts, total) = self.pipeline_efforts(pipeline);
                Some((i, efforts, total))
            })
            .collect();
        order.sort_by_key(|(_, _, total)| *total);

        if let Err(e) = self.inventory.refresh().await {
            warn!("Inventory refresh failed, placing on prior node map: {}", e);
        }

        let mut placements = Vec::new();
        for (index, efforts, total) in order {
            let pipeline = &pipelines[index];
            match self.place_one(pipeline, ledger).await {
                Some(mapping) => {
                    debug!("Pipeline {} placed with total effort {}", pipeline.id, total);
                    placements.push(Placement {
                        pipeline_id: pipeline.id.clone(),
                        mapping,
                        efforts: efforts.into_iter().collect(),
                        total_effort: total,
                    });
                }
                None => warn!("No placement found for pipeline {}", pipeline.id),
            }
        }
        placements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placer::testing::{pipeline, tabular_metadata, three_tier_inventory};

    fn test_placer() -> (CustomPlacer, Arc<NodeInventory>) {
        let inventory = three_tier_inventory();
        let catalog = Arc::new(DatasetCatalog::new("/nonexistent"));
        (CustomPlacer::new(inventory.clone(), catalog), inventory)
    }

    #[tokio::test]
    async fn test_batch_is_ordered_shortest_job_first() {
        let (placer, _) = test_placer();
        let mut ledger = Ledger::new();

        // Effort scales with n_samples: big, small, middle.
        let pipelines = vec![
            pipeline("pA", "logistic_regression", 100_000),
            pipeline("pB", "logistic_regression", 1_000),
            pipeline("pC", "logistic_regression", 10_000),
        ];

        let placements = placer.place_pipelines(&pipelines, &mut ledger).await;
        let order: Vec<_> = placements.iter().map(|p| p.pipeline_id.as_str()).collect();
        assert_eq!(order, ["pB", "pC", "pA"]);

        let totals: Vec<_> = placements.iter().map(|p| p.total_effort).collect();
        assert!(totals.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_affinity_keeps_pipeline_on_one_node() {
        let (placer, _) = test_placer();
        let mut ledger = Ledger::new();

        let pipelines = vec![pipeline("p1", "logistic_regression", 1_000)];
        let placements = placer.place_pipelines(&pipelines, &mut ledger).await;

        let mapping = &placements[0].mapping;
        assert_eq!(mapping.len(), 3);
        // The tiny dataset fits everywhere; once prep lands on the first
        // candidate, train and eval must follow it.
        assert_eq!(mapping[0].node, mapping[1].node);
        assert_eq!(mapping[1].node, mapping[2].node);
        assert_eq!(ledger.count(&mapping[0].node), 3);
        assert!(ledger.is_consistent());
    }

    #[tokio::test]
    async fn test_oversized_dataset_falls_back_to_high_cpu() {
        let (placer, _) = test_placer();
        let mut ledger = Ledger::new();

        // 4e9 samples of 80 bytes: no node passes any fit test.
        let pipelines = vec![pipeline("p1", "svm", 4_000_000_000)];
        let placements = placer.place_pipelines(&pipelines, &mut ledger).await;

        assert_eq!(placements.len(), 1);
        for placed in &placements[0].mapping {
            assert_eq!(placed.node, "hi-1");
        }
        assert!(ledger.is_consistent());
    }

    #[tokio::test]
    async fn test_unknown_model_places_with_zero_effort() {
        let (placer, _) = test_placer();
        let mut ledger = Ledger::new();

        let pipelines = vec![pipeline("p1", "gradient_boosting", 1_000)];
        let placements = placer.place_pipelines(&pipelines, &mut ledger).await;

        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].efforts["train"], 0);
        assert_eq!(placements[0].efforts["eval"], 0);
        // preprocessing effort is model-independent
        assert!(placements[0].efforts["prep"] > 0);
    }

    #[tokio::test]
    async fn test_empty_pipeline_gets_no_placement() {
        let (placer, _) = test_placer();
        let mut ledger = Ledger::new();

        let empty = Pipeline::new("p0", "p0", tabular_metadata("svm", 10));
        let placements = placer.place_pipelines(&[empty], &mut ledger).await;
        assert!(placements.is_empty());
    }

    #[tokio::test]
    async fn test_neural_training_prefers_accelerators() {
        use crate::inventory::testing::{inventory_with, record};
        use std::collections::HashMap;

        let mut with_gpu = record("hi-gpu", "10.0.1.1", "high-cpu", 16, 32_000_000);
        with_gpu
            .labels
            .insert("accelerator_type".to_string(), "cuda".to_string());
        let records = vec![
            record("hi-plain", "10.0.1.2", "high-cpu", 16, 32_000_000),
            with_gpu,
        ];
        let free: HashMap<String, u64> =
            records.iter().map(|r| (r.ip.clone(), r.memory_kb)).collect();
        let inventory = Arc::new(inventory_with(records, free));
        let catalog = Arc::new(DatasetCatalog::new("/nonexistent"));
        let placer = CustomPlacer::new(inventory, catalog);
        let mut ledger = Ledger::new();

        let pipelines = vec![pipeline("p1", "nn", 1_000)];
        let placements = placer.place_pipelines(&pipelines, &mut ledger).await;
        let train_node = placements[0].node_of("train").unwrap();
        assert_eq!(train_node, "hi-gpu");
    }
}

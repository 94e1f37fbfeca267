//! FIFO random placer
//!
//! Pipelines keep their submission order; each component lands on a
//! uniformly random node among those passing the memory fit test. The RNG
//! is seeded from configuration so experiment runs are reproducible.

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::warn;

use crate::catalog::DatasetCatalog;
use crate::decision::Ledger;
use crate::inventory::{Node, NodeInventory, NodeQuery, NodeSortKey};
use crate::model::Pipeline;

use super::{
    dataset_footprint_kb, has_sufficient_memory, ComponentPlacement, Placement, Placer,
    MEMORY_OVERHEAD_STRICT,
};

pub struct FifoRandomPlacer {
    inventory: Arc<NodeInventory>,
    catalog: Arc<DatasetCatalog>,
    rng: Mutex<StdRng>,
}

impl FifoRandomPlacer {
    pub fn new(inventory: Arc<NodeInventory>, catalog: Arc<DatasetCatalog>, seed: u64) -> Self {
        Self {
            inventory,
            catalog,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

/// Uniform pick among the nodes that fit the footprint.
pub(super) fn random_fitting_node(
    nodes: &[Node],
    size_kb: u64,
    overhead: f64,
    rng: &mut StdRng,
) -> Option<Node> {
    let fitting: Vec<&Node> = nodes
        .iter()
        .filter(|n| has_sufficient_memory(size_kb, n, overhead))
        .collect();
    if fitting.is_empty() {
        return None;
    }
    let index = rng.random_range(0..fitting.len());
    Some(fitting[index].clone())
}

#[async_trait]
impl Placer for FifoRandomPlacer {
    async fn place_pipelines(&self, pipelines: &[Pipeline], ledger: &mut Ledger) -> Vec<Placement> {
        if let Err(e) = self.inventory.refresh().await {
            warn!("Inventory refresh failed, placing on prior node map: {}", e);
        }
        let query = NodeQuery::new().sort_by(&[NodeSortKey::Name]);
        let nodes = self.inventory.list(&query).await;

        let mut rng = self.rng.lock().await;
        let mut placements = Vec::new();

        'pipelines: for pipeline in pipelines {
            if pipeline.components().is_empty() {
                warn!("Pipeline {} has no components, not placing", pipeline.id);
                continue;
            }

            let size = dataset_footprint_kb(&self.catalog, &pipeline.metadata().dataset);
            let mut mapping: Vec<ComponentPlacement> = Vec::new();

            for component in pipeline.components() {
                let Some(node) =
                    random_fitting_node(&nodes, size, MEMORY_OVERHEAD_STRICT, &mut rng)
                else {
                    warn!(
                        "No node fits component {} of pipeline {}",
                        component.name, pipeline.id
                    );
                    for placed in &mapping {
                        ledger.remove(&placed.node, &pipeline.id, &placed.component);
                    }
                    continue 'pipelines;
                };

                ledger.add(&node.name, &pipeline.id, &component.name);
                mapping.push(ComponentPlacement {
                    component: component.name.clone(),
                    node: node.name.clone(),
                    platform: node.platform().to_string(),
                });
            }

            placements.push(Placement {
                pipeline_id: pipeline.id.clone(),
                mapping,
                efforts: Default::default(),
                total_effort: 0,
            });
        }

        placements
    }
}

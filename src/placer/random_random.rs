//! Fully random placer
//!
//! Shuffles the batch order, then drops each component on a random node
//! passing the memory fit test. Used as the experimental baseline against
//! the custom strategy.

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tracing::warn;

use crate::catalog::DatasetCatalog;
use crate::decision::Ledger;
use crate::inventory::{NodeInventory, NodeQuery, NodeSortKey};
use crate::model::Pipeline;

use super::fifo_random::random_fitting_node;
use super::{dataset_footprint_kb, ComponentPlacement, Placement, Placer, MEMORY_OVERHEAD};

pub struct RandomRandomPlacer {
    inventory: Arc<NodeInventory>,
    catalog: Arc<DatasetCatalog>,
    rng: Mutex<StdRng>,
}

impl RandomRandomPlacer {
    pub fn new(inventory: Arc<NodeInventory>, catalog: Arc<DatasetCatalog>, seed: u64) -> Self {
        Self {
            inventory,
            catalog,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl Placer for RandomRandomPlacer {
    async fn place_pipelines(&self, pipelines: &[Pipeline], ledger: &mut Ledger) -> Vec<Placement> {
        if let Err(e) = self.inventory.refresh().await {
            warn!("Inventory refresh failed, placing on prior node map: {}", e);
        }
        let query = NodeQuery::new().sort_by(&[NodeSortKey::Name]);
        let nodes = self.inventory.list(&query).await;

        let mut rng = self.rng.lock().await;

        // Random execution order.
        let mut order: Vec<usize> = (0..pipelines.len()).collect();
        order.shuffle(&mut *rng);

        let mut placements = Vec::new();
        'pipelines: for index in order {
            let pipeline = &pipelines[index];
            if pipeline.components().is_empty() {
                warn!("Pipeline {} has no components, not placing", pipeline.id);
                continue;
            }

            let size = dataset_footprint_kb(&self.catalog, &pipeline.metadata().dataset);
            let mut mapping: Vec<ComponentPlacement> = Vec::new();

            for component in pipeline.components() {
                let Some(node) = random_fitting_node(&nodes, size, MEMORY_OVERHEAD, &mut rng)
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

//! FIFO round-robin placer
//!
//! Pipelines keep their submission order; components cycle through the
//! node list, skipping nodes that fail the memory fit test. A component
//! that fits nowhere leaves its pipeline unplaced.

use std::sync::Arc;

use async_trait::async_trait;
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

pub struct FifoRoundRobinPlacer {
    inventory: Arc<NodeInventory>,
    catalog: Arc<DatasetCatalog>,
    cursor: Mutex<usize>,
}

impl FifoRoundRobinPlacer {
    pub fn new(inventory: Arc<NodeInventory>, catalog: Arc<DatasetCatalog>) -> Self {
        Self {
            inventory,
            catalog,
            cursor: Mutex::new(0),
        }
    }

    /// Next node in the cycle with enough memory, advancing the cursor
    /// past it. `None` after one full revolution without a fit.
    fn next_fitting(&self, nodes: &[Node], cursor: &mut usize, size_kb: u64) -> Option<Node> {
        for _ in 0..nodes.len() {
            let node = &nodes[*cursor % nodes.len()];
            *cursor = (*cursor + 1) % nodes.len();
            if has_sufficient_memory(size_kb, node, MEMORY_OVERHEAD_STRICT) {
                return Some(node.clone());
            }
        }
        None
    }
}

#[async_trait]
impl Placer for FifoRoundRobinPlacer {
    async fn place_pipelines(&self, pipelines: &[Pipeline], ledger: &mut Ledger) -> Vec<Placement> {
        if let Err(e) = self.inventory.refresh().await {
            warn!("Inventory refresh failed, placing on prior node map: {}", e);
        }
        let query = NodeQuery::new().sort_by(&[NodeSortKey::Name]);
        let nodes = self.inventory.list(&query).await;
        if nodes.is_empty() {
            warn!("No worker nodes in inventory, nothing placed");
            return Vec::new();
        }

        let mut cursor = self.cursor.lock().await;
        let mut placements = Vec::new();

        'pipelines: for pipeline in pipelines {
            if pipeline.components().is_empty() {
                warn!("Pipeline {} has no components, not placing", pipeline.id);
                continue;
            }

            let size = dataset_footprint_kb(&self.catalog, &pipeline.metadata().dataset);
            let mut mapping: Vec<ComponentPlacement> = Vec::new();

            for component in pipeline.components() {
                let Some(node) = self.next_fitting(&nodes, &mut cursor, size) else {
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

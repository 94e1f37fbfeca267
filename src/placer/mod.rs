//! Placer strategies - ordering and component-to-node mapping
//!
//! A placer receives a batch of freshly drained pipelines plus the shared
//! assignment ledger, and returns one `Placement` per pipeline it could
//! map. The placer records every assignment in the ledger as it decides;
//! it never touches the reservation map, which belongs to the Node
//! Inventory.
//!
//! Pipelines the strategy cannot map (no components, or no node fits) get
//! no placement; the pipeline manager fails them before they can reach the
//! waiting list.

pub mod custom;
pub mod fifo_random;
pub mod fifo_round_robin;
pub mod heuristics;
pub mod random_random;

pub use custom::CustomPlacer;
pub use fifo_random::FifoRandomPlacer;
pub use fifo_round_robin::FifoRoundRobinPlacer;
pub use random_random::RandomRandomPlacer;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{DatasetCatalog, DatasetVersion};
use crate::decision::Ledger;
use crate::inventory::{Node, NodeInventory};
use crate::model::{DatasetDescriptor, Pipeline};
use crate::settings::PlacerKind;

/// Memory headroom factor for placement fit checks.
pub const MEMORY_OVERHEAD: f64 = 2.0;

/// Tighter headroom factor used by the FIFO strategies.
pub const MEMORY_OVERHEAD_STRICT: f64 = 1.5;

/// One component's node decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentPlacement {
    pub component: String,
    pub node: String,
    pub platform: String,
}

/// Placement of one pipeline: the mapping in component order plus the
/// effort figures that drove the scheduling decision.
#[derive(Debug, Clone)]
pub struct Placement {
    pub pipeline_id: String,
    pub mapping: Vec<ComponentPlacement>,
    pub efforts: HashMap<String, u64>,
    pub total_effort: u64,
}

impl Placement {
    pub fn node_of(&self, component: &str) -> Option<&str> {
        self.mapping
            .iter()
            .find(|m| m.component == component)
            .map(|m| m.node.as_str())
    }
}

/// A placement strategy.
#[async_trait]
pub trait Placer: Send + Sync {
    /// Order and map a batch of pipelines, recording assignments in the
    /// ledger. The returned order is the order pipelines should enter the
    /// waiting list.
    async fn place_pipelines(&self, pipelines: &[Pipeline], ledger: &mut Ledger) -> Vec<Placement>;
}

/// Build the placer selected by configuration. Called once at startup.
pub fn build_placer(
    kind: PlacerKind,
    inventory: Arc<NodeInventory>,
    catalog: Arc<DatasetCatalog>,
    seed: u64,
) -> Box<dyn Placer> {
    match kind {
        PlacerKind::Custom => Box::new(CustomPlacer::new(inventory, catalog)),
        PlacerKind::FifoRoundRobin => Box::new(FifoRoundRobinPlacer::new(inventory, catalog)),
        PlacerKind::FifoRandom => Box::new(FifoRandomPlacer::new(inventory, catalog, seed)),
        PlacerKind::RandomRandom => Box::new(RandomRandomPlacer::new(inventory, catalog, seed)),
    }
}

/// Memory fit test shared by all strategies: the node's free memory must
/// exceed the footprint scaled by the overhead factor.
pub(crate) fn has_sufficient_memory(size_kb: u64, node: &Node, overhead: f64) -> bool {
    node.free_memory_kb() > size_kb as f64 * overhead
}

/// Footprint a component must fit: the larger of the original and
/// preprocessed in-memory estimates.
pub(crate) fn dataset_footprint_kb(catalog: &DatasetCatalog, dataset: &DatasetDescriptor) -> u64 {
    catalog
        .size_in_memory(dataset, DatasetVersion::Original)
        .max(catalog.size_in_memory(dataset, DatasetVersion::Preprocessed))
}

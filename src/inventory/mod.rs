//! Node Inventory - worker discovery, live usage and reservations
//!
//! The inventory keeps two maps: the node map (capacity and live memory
//! usage, rebuilt on every refresh) and the occupation map (which pipeline
//! currently reserves which node). A node holds at most one reservation at
//! a time, and only the reserving pipeline may release it.

pub mod metrics;
pub mod node;
pub mod source;

pub use metrics::{MetricsSource, PrometheusMetrics};
pub use node::{Node, NodeQuery, NodeSortKey};
pub use source::{InventoryError, InventorySource, KubeInventorySource, NodeRecord};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Worker inventory and reservation mediator.
pub struct NodeInventory {
    source: Arc<dyn InventorySource>,
    metrics: Arc<dyn MetricsSource>,
    nodes: RwLock<HashMap<String, Node>>,
    occupation: Mutex<HashMap<String, Option<String>>>,
}

impl NodeInventory {
    pub fn new(source: Arc<dyn InventorySource>, metrics: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            metrics,
            nodes: RwLock::new(HashMap::new()),
            occupation: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild the node map from the cluster inventory.
    ///
    /// Only ready worker nodes are admitted. A failed listing leaves the
    /// prior map intact; a failed metric query yields 0.0 usage for that
    /// node only.
    pub async fn refresh(&self) -> Result<(), InventoryError> {
        let records = self.source.list_nodes().await?;

        let mut fresh = HashMap::new();
        for record in records {
            if !record.worker || !record.ready {
                continue;
            }

            let memory_usage = self.memory_usage(&record.ip, record.memory_kb).await;
            let node = Node {
                name: record.name.clone(),
                ip: record.ip,
                worker_type: record
                    .labels
                    .get("worker_type")
                    .cloned()
                    .unwrap_or_default(),
                architecture: record.architecture,
                accelerator: record
                    .labels
                    .get("accelerator_type")
                    .cloned()
                    .unwrap_or_else(|| "none".to_string()),
                cpu_cores: record.cpu_cores,
                n_cpu_flags: record
                    .labels
                    .get("n_cpu_flags")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                memory_kb: record.memory_kb,
                memory_usage,
            };
            fresh.insert(node.name.clone(), node);
        }

        debug!("Inventory refreshed: {} worker node(s)", fresh.len());

        // Swap the map atomically, then make sure every admitted node has
        // an occupation entry. Existing reservations are retained.
        {
            let mut occupation = self.occupation.lock().await;
            for name in fresh.keys() {
                occupation.entry(name.clone()).or_insert(None);
            }
        }
        *self.nodes.write().await = fresh;

        Ok(())
    }

    /// Derive the memory usage fraction for one node.
    ///
    /// Memory held by backend-managed containers is subtracted from the
    /// usage so that the fraction reflects what is available for new
    /// placements. A failed metric fetch is optimistic: 0.0.
    async fn memory_usage(&self, ip: &str, total_kb: u64) -> f64 {
        if total_kb == 0 {
            return 0.0;
        }

        let free = self.metrics.free_memory_avg_kb(ip).await;
        let backend = self.metrics.backend_memory_avg_kb(ip).await;

        match (free, backend) {
            (Ok(free_kb), Ok(backend_kb)) => {
                let total = total_kb as f64;
                let used = total - free_kb as f64 - backend_kb as f64;
                (used / total * 100.0).round() / 100.0
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Metric fetch failed for node {}: {}", ip, e);
                0.0
            }
        }
    }

    /// List nodes matching a query, in the query's order.
    pub async fn list(&self, query: &NodeQuery) -> Vec<Node> {
        let nodes = self.nodes.read().await;
        let mut matched: Vec<Node> = nodes.values().filter(|n| query.matches(n)).cloned().collect();
        query.order(&mut matched);
        matched
    }

    pub async fn by_name(&self, name: &str) -> Option<Node> {
        self.nodes.read().await.get(name).cloned()
    }

    /// Platform tag of a node, used when tagging built container images.
    pub async fn platform_of(&self, name: &str) -> Option<String> {
        self.nodes
            .read()
            .await
            .get(name)
            .map(|n| n.platform().to_string())
    }

    /// True iff every listed node is currently unreserved.
    pub async fn available(&self, names: &[String]) -> bool {
        let occupation = self.occupation.lock().await;
        names
            .iter()
            .all(|n| matches!(occupation.get(n), Some(None)))
    }

    /// Reserve nodes for a pipeline. Callers must check `available` first;
    /// reservation overwrites unconditionally.
    pub async fn reserve(&self, names: &[String], pipeline_id: &str) {
        let mut occupation = self.occupation.lock().await;
        for name in names {
            occupation.insert(name.clone(), Some(pipeline_id.to_string()));
        }
    }

    /// Release nodes held by a pipeline. A node is only released when the
    /// current occupant matches; releasing someone else's reservation is a
    /// no-op.
    pub async fn release(&self, names: &[String], pipeline_id: &str) {
        let mut occupation = self.occupation.lock().await;
        for name in names {
            if let Some(occupant) = occupation.get_mut(name) {
                if occupant.as_deref() == Some(pipeline_id) {
                    *occupant = None;
                }
            }
        }
    }

    /// Release every node still reserved by a pipeline.
    pub async fn release_owned(&self, pipeline_id: &str) {
        let mut occupation = self.occupation.lock().await;
        for occupant in occupation.values_mut() {
            if occupant.as_deref() == Some(pipeline_id) {
                *occupant = None;
            }
        }
    }

    /// Snapshot of the occupation map.
    pub async fn occupation(&self) -> HashMap<String, Option<String>> {
        self.occupation.lock().await.clone()
    }
}

//! Decision Unit - owns the assignment ledger, delegates to the placer
//!
//! The ledger records which components currently sit on which node. A node
//! may host components of several pipelines at once in the ledger; only the
//! reservation map in the Node Inventory is exclusive. Entries are added
//! during placement and removed when a component succeeds or its pipeline
//! reaches a terminal state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::inventory::{NodeInventory, NodeQuery};
use crate::model::Pipeline;
use crate::placer::{Placement, Placer};

/// Assignment ledger: node -> set of "pipelineId/componentName" entries,
/// with cardinality counts kept in lockstep.
#[derive(Debug, Default)]
pub struct Ledger {
    assignments: HashMap<String, HashSet<String>>,
    counts: HashMap<String, usize>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a node is tracked, with no assignments.
    pub fn init_node(&mut self, node: &str) {
        self.assignments.entry(node.to_string()).or_default();
        self.counts.entry(node.to_string()).or_insert(0);
    }

    /// Record that a component was placed on a node. Re-adding the same
    /// (pipeline, component) pair is a no-op.
    pub fn add(&mut self, node: &str, pipeline_id: &str, component: &str) {
        let entry = format!("{pipeline_id}/{component}");
        let inserted = self
            .assignments
            .entry(node.to_string())
            .or_default()
            .insert(entry);
        if inserted {
            *self.counts.entry(node.to_string()).or_insert(0) += 1;
        }
    }

    /// Remove an assignment; absent entries are a no-op.
    pub fn remove(&mut self, node: &str, pipeline_id: &str, component: &str) {
        let entry = format!("{pipeline_id}/{component}");
        if let Some(set) = self.assignments.get_mut(node) {
            if set.remove(&entry) {
                if let Some(count) = self.counts.get_mut(node) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    /// Remove every assignment of a pipeline, across all nodes.
    pub fn remove_pipeline(&mut self, pipeline_id: &str) {
        let prefix = format!("{pipeline_id}/");
        for (node, set) in self.assignments.iter_mut() {
            let before = set.len();
            set.retain(|entry| !entry.starts_with(&prefix));
            let removed = before - set.len();
            if removed > 0 {
                if let Some(count) = self.counts.get_mut(node) {
                    *count = count.saturating_sub(removed);
                }
            }
        }
    }

    /// True iff the node still hosts an assignment of this pipeline.
    pub fn is_node_needed(&self, node: &str, pipeline_id: &str) -> bool {
        let prefix = format!("{pipeline_id}/");
        self.assignments
            .get(node)
            .map(|set| set.iter().any(|entry| entry.starts_with(&prefix)))
            .unwrap_or(false)
    }

    /// Number of assignments currently on a node.
    pub fn count(&self, node: &str) -> usize {
        self.counts.get(node).copied().unwrap_or(0)
    }

    /// Nodes that currently host at least one component of a pipeline.
    pub fn nodes_hosting(&self, pipeline_id: &str) -> HashSet<String> {
        let prefix = format!("{pipeline_id}/");
        self.assignments
            .iter()
            .filter(|(_, set)| set.iter().any(|entry| entry.starts_with(&prefix)))
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Snapshot of the raw assignment sets.
    pub fn assignments(&self) -> &HashMap<String, HashSet<String>> {
        &self.assignments
    }

    /// Counts match set sizes on every node.
    pub fn is_consistent(&self) -> bool {
        self.assignments
            .iter()
            .all(|(node, set)| self.count(node) == set.len())
            && self.counts.keys().all(|n| self.assignments.contains_key(n))
    }
}

/// Owner of the ledger and the active placement strategy.
///
/// The strategy is selected once at startup; there is no hot-swap.
pub struct DecisionUnit {
    placer: Box<dyn Placer>,
    ledger: Mutex<Ledger>,
}

impl DecisionUnit {
    /// Initialize the ledger with one empty entry per known worker node.
    /// The inventory is refreshed first so the ledger covers the live set.
    pub async fn new(inventory: &Arc<NodeInventory>, placer: Box<dyn Placer>) -> Self {
        if let Err(e) = inventory.refresh().await {
            tracing::warn!("Initial inventory refresh failed: {}", e);
        }

        let mut ledger = Ledger::new();
        for node in inventory.list(&NodeQuery::new()).await {
            ledger.init_node(&node.name);
        }
        debug!("Ledger initialized for {} node(s)", ledger.assignments.len());

        Self {
            placer,
            ledger: Mutex::new(ledger),
        }
    }

    /// Order and place a batch of pipelines. Pure delegation to the active
    /// placer, which mutates the ledger as it assigns components.
    pub async fn get_placements(&self, pipelines: &[Pipeline]) -> Vec<Placement> {
        let mut ledger = self.ledger.lock().await;
        self.placer.place_pipelines(pipelines, &mut ledger).await
    }

    pub async fn remove_assignment(&self, node: &str, pipeline_id: &str, component: &str) {
        self.ledger.lock().await.remove(node, pipeline_id, component);
    }

    /// Remove every remaining assignment of a pipeline.
    pub async fn remove_pipeline(&self, pipeline_id: &str) {
        self.ledger.lock().await.remove_pipeline(pipeline_id);
    }

    pub async fn is_node_needed(&self, node: &str, pipeline_id: &str) -> bool {
        self.ledger.lock().await.is_node_needed(node, pipeline_id)
    }

    /// Snapshot of the assignment sets, for logging and inspection.
    pub async fn assignments(&self) -> HashMap<String, HashSet<String>> {
        self.ledger.lock().await.assignments().clone()
    }
}

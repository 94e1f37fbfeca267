//! Worker node model and query helpers

use serde::{Deserialize, Serialize};

/// A worker node admitted into the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub ip: String,

    /// Coarse worker class label ("low", "med", "high-cpu", ...)
    pub worker_type: String,

    /// CPU architecture label (e.g. "amd64", "arm64")
    pub architecture: String,

    /// Accelerator label, "none" when the node has no accelerator
    pub accelerator: String,

    pub cpu_cores: u32,
    pub n_cpu_flags: u32,

    /// Allocatable memory in KB
    pub memory_kb: u64,

    /// Fraction of memory in use, refreshed from the metrics store
    pub memory_usage: f64,
}

impl Node {
    pub fn has_accelerator(&self) -> bool {
        self.accelerator != "none"
    }

    /// Platform tag used for container image selection: the accelerator
    /// when present, the architecture otherwise.
    pub fn platform(&self) -> &str {
        if self.has_accelerator() {
            &self.accelerator
        } else {
            &self.architecture
        }
    }

    /// Memory not yet in use, in KB.
    pub fn free_memory_kb(&self) -> f64 {
        self.memory_kb as f64 * (1.0 - self.memory_usage)
    }
}

/// Sortable node attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSortKey {
    CpuCores,
    Memory,
    Name,
}

/// Filter and ordering for inventory listings.
///
/// Filters are set-membership tests; an unset filter admits every node.
/// Sort keys apply lexicographically in the order listed.
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    pub worker_types: Option<Vec<String>>,
    pub architectures: Option<Vec<String>>,
    pub sort: Vec<NodeSortKey>,
    pub descending: bool,
}

impl NodeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn architectures<I, S>(mut self, archs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.architectures = Some(archs.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort_by(mut self, keys: &[NodeSortKey]) -> Self {
        self.sort = keys.to_vec();
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        if let Some(types) = &self.worker_types {
            if !types.iter().any(|t| t == &node.worker_type) {
                return false;
            }
        }
        if let Some(archs) = &self.architectures {
            if !archs.iter().any(|a| a == &node.architecture) {
                return false;
            }
        }
        true
    }

    pub fn order(&self, nodes: &mut [Node]) {
        if self.sort.is_empty() {
            return;
        }
        nodes.sort_by(|a, b| {
            let mut ordering = std::cmp::Ordering::Equal;
            for key in &self.sort {
                ordering = match key {
                    NodeSortKey::CpuCores => a.cpu_cores.cmp(&b.cpu_cores),
                    NodeSortKey::Memory => a.memory_kb.cmp(&b.memory_kb),
                    NodeSortKey::Name => a.name.cmp(&b.name),
                };
                if ordering != std::cmp::Ordering::Equal {
                    break;
                }
            }
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_node(name: &str, worker_type: &str, cpu: u32, memory_kb: u64) -> Node {
        Node {
            name: name.to_string(),
            ip: "10.0.0.1".to_string(),
            worker_type: worker_type.to_string(),
            architecture: "amd64".to_string(),
            accelerator: "none".to_string(),
            cpu_cores: cpu,
            n_cpu_flags: 0,
            memory_kb,
            memory_usage: 0.0,
        }
    }

    #[test]
    fn test_platform_prefers_accelerator() {
        let mut node = make_node("n1", "high-cpu", 8, 16_000_000);
        assert_eq!(node.platform(), "amd64");

        node.accelerator = "cuda".to_string();
        assert_eq!(node.platform(), "cuda");
    }

    #[test]
    fn test_free_memory() {
        let mut node = make_node("n1", "med", 4, 1000);
        node.memory_usage = 0.25;
        assert_eq!(node.free_memory_kb(), 750.0);
    }

    #[test]
    fn test_query_filters() {
        let query = NodeQuery::new().worker_types(["low", "med"]);
        assert!(query.matches(&make_node("n1", "med", 4, 1000)));
        assert!(!query.matches(&make_node("n2", "high-cpu", 4, 1000)));

        let by_arch = NodeQuery::new().architectures(["arm64"]);
        assert!(!by_arch.matches(&make_node("n3", "med", 4, 1000)));
    }

    #[test]
    fn test_query_sorting_lexicographic() {
        let mut nodes = vec![
            make_node("b", "med", 8, 1000),
            make_node("a", "med", 4, 2000),
            make_node("c", "med", 4, 1000),
        ];
        let query = NodeQuery::new().sort_by(&[NodeSortKey::CpuCores, NodeSortKey::Memory]);
        query.order(&mut nodes);

        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn test_query_sort_descending() {
        let mut nodes = vec![make_node("a", "med", 2, 0), make_node("b", "med", 8, 0)];
        let query = NodeQuery::new().sort_by(&[NodeSortKey::CpuCores]).descending();
        query.order(&mut nodes);
        assert_eq!(nodes[0].name, "b");
    }
}

//! Cluster inventory source
//!
//! Read-only view onto the orchestration cluster's node objects. The
//! controller only needs a thin slice of each node: identity, worker and
//! readiness flags, allocatable capacity and a few labels. The `kube`
//! listing is fetched straight from the apiserver REST endpoint.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Annotation marking k3s agent (worker) nodes.
const WORKER_ANNOTATION: &str = "k3s.io/node-args";
const WORKER_MARKER: &str = "agent";

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Failed to read kubeconfig: {0}")]
    Kubeconfig(#[from] std::io::Error),

    #[error("Invalid kubeconfig: {0}")]
    KubeconfigParse(#[from] serde_yaml::Error),

    #[error("Kubeconfig has no cluster entry")]
    MissingCluster,

    #[error("Failed to build inventory client: {0}")]
    Client(reqwest::Error),

    #[error("Inventory listing failed: {0}")]
    Listing(#[from] reqwest::Error),

    #[error("Metric query failed: {0}")]
    Metric(String),
}

/// Raw facts about one cluster node, before admission filtering.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub name: String,
    pub ip: String,
    pub worker: bool,
    pub ready: bool,
    pub architecture: String,
    pub cpu_cores: u32,
    pub memory_kb: u64,
    pub labels: HashMap<String, String>,
}

/// Source of cluster node listings.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, InventoryError>;
}

// ============================================================================
// Kubernetes apiserver implementation
// ============================================================================

/// Inventory source backed by the Kubernetes node API.
pub struct KubeInventorySource {
    http: reqwest::Client,
    nodes_url: String,
    token: Option<String>,
}

impl KubeInventorySource {
    /// Build a source from a kubeconfig file (debug / out-of-cluster mode).
    pub fn from_kubeconfig(path: &Path) -> Result<Self, InventoryError> {
        let content = std::fs::read_to_string(path)?;
        let config: Kubeconfig = serde_yaml::from_str(&content)?;

        let server = config
            .clusters
            .first()
            .map(|c| c.cluster.server.clone())
            .ok_or(InventoryError::MissingCluster)?;
        let token = config.users.first().and_then(|u| u.user.token.clone());

        Self::build(&server, token)
    }

    /// Build a source from the in-cluster service account.
    pub fn in_cluster() -> Result<Self, InventoryError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").unwrap_or_else(|_| "kubernetes.default.svc".to_string());
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN)
            .ok()
            .map(|t| t.trim().to_string());

        Self::build(&format!("https://{host}:{port}"), token)
    }

    fn build(server: &str, token: Option<String>) -> Result<Self, InventoryError> {
        // The apiserver serves a cluster-internal certificate that is not
        // in the system trust store.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(InventoryError::Client)?;

        Ok(Self {
            http,
            nodes_url: format!("{}/api/v1/nodes", server.trim_end_matches('/')),
            token,
        })
    }
}

#[async_trait]
impl InventorySource for KubeInventorySource {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, InventoryError> {
        let mut request = self.http.get(&self.nodes_url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let listing: NodeList = request.send().await?.error_for_status()?.json().await?;
        Ok(listing.items.iter().map(NodeRecord::from_kube).collect())
    }
}

impl NodeRecord {
    fn from_kube(item: &KubeNode) -> Self {
        let worker = item
            .metadata
            .annotations
            .get(WORKER_ANNOTATION)
            .map(|args| args.contains(WORKER_MARKER))
            .unwrap_or(false);

        let ready = item
            .status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True");

        let ip = item
            .status
            .addresses
            .first()
            .map(|a| a.address.clone())
            .unwrap_or_default();

        Self {
            name: item.metadata.name.clone(),
            ip,
            worker,
            ready,
            architecture: item.status.node_info.architecture.clone(),
            cpu_cores: item
                .status
                .allocatable
                .get("cpu")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            memory_kb: parse_memory_kb(item.status.allocatable.get("memory")),
            labels: item.metadata.labels.clone(),
        }
    }
}

/// Parse an allocatable memory quantity ("16384Ki") into KB.
fn parse_memory_kb(quantity: Option<&String>) -> u64 {
    let Some(quantity) = quantity else {
        return 0;
    };
    quantity
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .unwrap_or(0)
}

// ============================================================================
// Wire types (thin slices of the Kubernetes objects)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<KubeNode>,
}

#[derive(Debug, Deserialize)]
struct KubeNode {
    metadata: KubeMetadata,
    status: KubeNodeStatus,
}

#[derive(Debug, Default, Deserialize)]
struct KubeMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct KubeNodeStatus {
    #[serde(default)]
    conditions: Vec<KubeCondition>,
    #[serde(default)]
    addresses: Vec<KubeAddress>,
    #[serde(default)]
    allocatable: HashMap<String, String>,
    #[serde(default, rename = "nodeInfo")]
    node_info: KubeNodeInfo,
}

#[derive(Debug, Deserialize)]
struct KubeCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct KubeAddress {
    address: String,
}

#[derive(Debug, Default, Deserialize)]
struct KubeNodeInfo {
    #[serde(default)]
    architecture: String,
}

#[derive(Debug, Default, Deserialize)]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<KubeconfigCluster>,
    #[serde(default)]
    users: Vec<KubeconfigUser>,
}

#[derive(Debug, Deserialize)]
struct KubeconfigCluster {
    cluster: KubeconfigClusterDetails,
}

#[derive(Debug, Deserialize)]
struct KubeconfigClusterDetails {
    server: String,
}

#[derive(Debug, Deserialize)]
struct KubeconfigUser {
    user: KubeconfigUserDetails,
}

#[derive(Debug, Default, Deserialize)]
struct KubeconfigUserDetails {
    token: Option<String>,
}

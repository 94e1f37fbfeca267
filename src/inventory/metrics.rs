//! Metrics source - Prometheus queries for live node memory
//!
//! Two 5-minute averages are fetched per node: available memory from the
//! node exporter and memory already attributable to backend-managed
//! containers. Both are in KB. An empty query result is 0.

use async_trait::async_trait;
use serde::Deserialize;

use super::source::InventoryError;

/// Source of live memory metrics for worker nodes.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Average free memory over 5 minutes, in KB.
    async fn free_memory_avg_kb(&self, node_ip: &str) -> Result<u64, InventoryError>;

    /// Average memory used by backend containers over 5 minutes, in KB.
    async fn backend_memory_avg_kb(&self, node_ip: &str) -> Result<u64, InventoryError>;
}

/// Metrics source backed by a Prometheus query endpoint.
pub struct PrometheusMetrics {
    http: reqwest::Client,
    url: String,
    node_exporter_port: u16,
    apiserver_port: u16,
}

impl PrometheusMetrics {
    pub fn new(url: impl Into<String>, node_exporter_port: u16, apiserver_port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
            node_exporter_port,
            apiserver_port,
        }
    }

    async fn query(&self, query: String) -> Result<u64, InventoryError> {
        let response: PromResponse = self
            .http
            .get(&self.url)
            .query(&[("query", query)])
            .send()
            .await?
            .json()
            .await?;

        // Empty result set means the series does not exist (yet).
        let Some(sample) = response.data.result.first() else {
            return Ok(0);
        };
        let value = sample
            .value
            .get(1)
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(value as u64)
    }
}

#[async_trait]
impl MetricsSource for PrometheusMetrics {
    async fn free_memory_avg_kb(&self, node_ip: &str) -> Result<u64, InventoryError> {
        let instance = format!("{}:{}", node_ip, self.node_exporter_port);
        let query = format!(
            "round(avg_over_time(node_memory_MemAvailable_bytes{{instance=\"{instance}\"}}[5m:]) / 1024)"
        );
        self.query(query).await
    }

    async fn backend_memory_avg_kb(&self, node_ip: &str) -> Result<u64, InventoryError> {
        let instance = format!("{}:{}", node_ip, self.apiserver_port);
        let query = format!(
            "round(avg_over_time(sum by (instance) (container_memory_usage_bytes{{namespace=\"kubeflow\", instance=\"{instance}\", container!=\"\"}})[5m:]) / 1024)"
        );
        self.query(query).await
    }
}

#[derive(Debug, Default, Deserialize)]
struct PromResponse {
    #[serde(default)]
    data: PromData,
}

#[derive(Debug, Default, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromSample>,
}

#[derive(Debug, Deserialize)]
struct PromSample {
    /// `[timestamp, value-as-string]`
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prom_response_parsing() {
        let json = r#"{
            "status": "success",
            "data": {"resultType": "vector", "result": [
                {"metric": {}, "value": [1717236000.0, "4194304"]}
            ]}
        }"#;
        let response: PromResponse = serde_json::from_str(json).unwrap();
        let value = response.data.result[0].value[1].as_str().unwrap();
        assert_eq!(value.parse::<f64>().unwrap() as u64, 4194304);
    }

    #[test]
    fn test_empty_result_parses() {
        let json = r#"{"status": "success", "data": {"resultType": "vector", "result": []}}"#;
        let response: PromResponse = serde_json::from_str(json).unwrap();
        assert!(response.data.result.is_empty());
    }
}

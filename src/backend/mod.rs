//! Workflow backend client
//!
//! The backend that actually executes built workflows is an opaque
//! collaborator: runs are triggered through a subprocess and observed
//! through its HTTP run-listing API. This module holds the wire types for
//! that API and the polling client.
//!
//! Backend timestamps are ISO-8601 UTC; the epoch (1970-01-01T00:00:00Z)
//! is the backend's sentinel for "not yet known" and is normalized to
//! `None` during deserialization.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Timeout for one poll of the run-listing endpoint.
const POLL_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to build backend client: {0}")]
    Client(reqwest::Error),

    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// One task of a run, matching a pipeline component by display name.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    pub display_name: String,

    #[serde(default)]
    pub state: String,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunDetails {
    #[serde(default)]
    pub task_details: Vec<TaskRecord>,
}

/// One run as reported by the backend listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRecord {
    pub run_id: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub state: String,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub run_details: RunDetails,
}

#[derive(Debug, Default, Deserialize)]
struct RunsResponse {
    #[serde(default)]
    runs: Vec<RunRecord>,
}

/// Polling client for the backend run API.
pub struct BackendClient {
    http: reqwest::Client,
    runs_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, api_endpoint: &str) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(POLL_TIMEOUT)
            .build()
            .map_err(BackendError::Client)?;

        Ok(Self {
            http,
            runs_url: format!("{}{}/runs", base_url.trim_end_matches('/'), api_endpoint),
        })
    }

    /// Fetch the full list of runs, keyed by run id.
    pub async fn list_runs(&self) -> Result<HashMap<String, RunRecord>, BackendError> {
        let response: RunsResponse = self
            .http
            .get(&self.runs_url)
            .send()
            .await?
            .json()
            .await?;

        Ok(response
            .runs
            .into_iter()
            .map(|run| (run.run_id.clone(), run))
            .collect())
    }
}

/// Extract the run id from the dispatch subprocess output.
///
/// The dispatch script prints a line of the form `Run ID: <id>`; the
/// trailing token after the last marker is the identifier.
pub fn parse_run_id(stdout: &str) -> Option<String> {
    let (_, tail) = stdout.rsplit_once("Run ID:")?;
    let id = tail.split_whitespace().next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Deserialize a backend timestamp, mapping the epoch sentinel and
/// unparseable values to `None`.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    let utc = parsed.with_timezone(&Utc);
    if utc <= DateTime::<Utc>::UNIX_EPOCH {
        None
    } else {
        Some(utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_id() {
        let stdout = "Building...\nExperiment link\nRun ID: 717ae34c-9314-4305-b831-f04a8702207e\n";
        assert_eq!(
            parse_run_id(stdout).as_deref(),
            Some("717ae34c-9314-4305-b831-f04a8702207e")
        );
    }

    #[test]
    fn test_parse_run_id_missing() {
        assert!(parse_run_id("no identifier here").is_none());
        assert!(parse_run_id("Run ID:   \n").is_none());
    }

    #[test]
    fn test_epoch_timestamp_is_null() {
        assert!(parse_timestamp("1970-01-01T00:00:00Z").is_none());
        assert!(parse_timestamp("2024-06-01T10:00:00Z").is_some());
        assert!(parse_timestamp("not-a-date").is_none());
    }

    #[test]
    fn test_run_record_deserialization() {
        let json = r#"{
            "runs": [{
                "run_id": "abc",
                "display_name": "adult-income-lr-x7",
                "state": "RUNNING",
                "scheduled_at": "2024-06-01T10:00:00Z",
                "finished_at": "1970-01-01T00:00:00Z",
                "run_details": {
                    "task_details": [
                        {"display_name": "data-preprocessing", "state": "SUCCEEDED",
                         "start_time": "2024-06-01T10:00:05Z", "end_time": "2024-06-01T10:01:05Z"}
                    ]
                }
            }]
        }"#;

        let response: RunsResponse = serde_json::from_str(json).unwrap();
        let run = &response.runs[0];
        assert!(run.scheduled_at.is_some());
        assert!(run.finished_at.is_none());
        assert_eq!(run.run_details.task_details.len(), 1);
    }
}

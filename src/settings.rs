//! Environment configuration
//!
//! All knobs come from the environment (optionally via a dotenv file),
//! mirroring how the controller is deployed: one container, one env block.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Name of the build script inside each pipeline directory.
pub const PIPELINE_FILENAME: &str = "pipeline.py";

/// Prefix of the backend-executable artifact the build step produces.
pub const KFP_PREFIX: &str = "kfp_";

/// Name of the metadata blob inside each pipeline directory.
pub const METADATA_FILENAME: &str = "metadata.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    #[error("Unknown placer strategy: {0}")]
    UnknownPlacer(String),

    #[error("Placer strategy '{0}' is not implemented")]
    UnimplementedPlacer(&'static str),
}

/// Placement strategy selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacerKind {
    Custom,
    FifoRandom,
    FifoRoundRobin,
    RandomRandom,
}

impl FromStr for PlacerKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(Self::Custom),
            "fifo_random" => Ok(Self::FifoRandom),
            "fifo_round_robin" => Ok(Self::FifoRoundRobin),
            "random_random" => Ok(Self::RandomRandom),
            // Registered upstream but never given semantics; rejecting it
            // here keeps the failure at load time.
            "fifo_greedy" => Err(SettingsError::UnimplementedPlacer("fifo_greedy")),
            other => Err(SettingsError::UnknownPlacer(other.to_string())),
        }
    }
}

/// Controller configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub kube_config: Option<PathBuf>,
    pub kfp_url: String,
    pub kfp_api_endpoint: String,
    pub prometheus_url: String,
    pub enable_caching: bool,
    pub pipelines_dir: PathBuf,
    pub wait_interval: u64,
    pub update_interval: u64,
    pub node_exporter_port: u16,
    pub kube_apiserver_port: u16,
    pub datasets_path: PathBuf,
    pub placer: PlacerKind,
    pub seed: u64,
    pub n_pipelines_csv: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            debug: env_bool("DEBUG"),
            kube_config: std::env::var("KUBE_CONFIG").ok().map(PathBuf::from),
            kfp_url: env_required("KFP_URL")?,
            kfp_api_endpoint: env_or("KFP_API_ENDPOINT", "/pipeline/apis/v2beta1"),
            prometheus_url: env_required("PROMETHEUS_URL")?,
            enable_caching: env_bool("ENABLE_CACHING"),
            pipelines_dir: PathBuf::from(env_or("PIPELINES_DIR", "./pipelines")),
            wait_interval: env_parsed("WAIT_INTERVAL", 10)?,
            update_interval: env_parsed("UPDATE_INTERVAL", 5)?,
            node_exporter_port: env_parsed("NODE_EXPORTER_PORT", 9100)?,
            kube_apiserver_port: env_parsed("KUBE_APISERVER_PORT", 10250)?,
            datasets_path: PathBuf::from(env_required("DATASETS_PATH")?),
            placer: env_required("PLACER")?.parse()?,
            seed: env_parsed("SEED", 42)?,
            n_pipelines_csv: PathBuf::from(env_or("N_PIPELINES_CSV", "./n_pipelines.csv")),
        })
    }
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_required(name: &'static str) -> Result<String, SettingsError> {
    std::env::var(name).map_err(|_| SettingsError::Missing(name))
}

fn env_parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, SettingsError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| SettingsError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

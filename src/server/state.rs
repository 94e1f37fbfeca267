//! Shared application state for the submission API

use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::DatasetCatalog;
use crate::manager::PipelineManager;

/// State handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PipelineManager>,
    pub catalog: Arc<DatasetCatalog>,
    pub pipelines_dir: PathBuf,
}

impl AppState {
    pub fn new(
        manager: Arc<PipelineManager>,
        catalog: Arc<DatasetCatalog>,
        pipelines_dir: PathBuf,
    ) -> Self {
        Self {
            manager,
            catalog,
            pipelines_dir,
        }
    }
}

//! Dataset Catalog - on-disk sizes and in-memory footprint estimates
//!
//! The catalog tracks the top-level folders of the datasets root. Sizes are
//! recomputed only when a folder's modification time moves forward. The
//! in-memory footprint is estimated from the dataset's schema metadata, not
//! measured.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::model::{DatasetDescriptor, DatasetType};

/// Expansion factor for image datasets stored as uint8 but loaded as
/// float64.
const UINT8_TO_FLOAT64: u64 = 8;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to scan datasets directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Which version of a dataset a footprint refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetVersion {
    Original,
    Preprocessed,
}

#[derive(Debug, Clone)]
struct DatasetEntry {
    size_kb: u64,
    modified_at: SystemTime,
}

/// Registry of dataset folders under a single root.
pub struct DatasetCatalog {
    root: PathBuf,
    datasets: DashMap<String, DatasetEntry>,
}

impl DatasetCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            datasets: DashMap::new(),
        }
    }

    /// Walk the datasets root (single level) and update the registry for
    /// new or modified entries. Hidden entries are skipped.
    pub fn refresh(&self) -> Result<(), CatalogError> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            let modified_at = entry.metadata()?.modified()?;
            let known = self
                .datasets
                .get(&name)
                .map(|e| e.modified_at >= modified_at)
                .unwrap_or(false);
            if known {
                continue;
            }

            let size_kb = folder_size_kb(&entry.path())?;
            debug!("Dataset '{}' indexed at {} KB", name, size_kb);
            self.datasets.insert(
                name,
                DatasetEntry {
                    size_kb,
                    modified_at,
                },
            );
        }
        Ok(())
    }

    /// On-disk size of a dataset in KB, `None` when unknown.
    pub fn size_on_disk(&self, name: &str) -> Option<u64> {
        self.datasets.get(name).map(|e| e.size_kb)
    }

    /// Estimate the in-memory footprint of one dataset version, in KB.
    ///
    /// Image datasets start from the on-disk size and expand by 8x unless
    /// the version is already normalized. Tabular datasets are sized from
    /// the schema: bytes per sample times sample count.
    pub fn size_in_memory(&self, descriptor: &DatasetDescriptor, version: DatasetVersion) -> u64 {
        let schema = match version {
            DatasetVersion::Original => &descriptor.original,
            DatasetVersion::Preprocessed => &descriptor.preprocessed,
        };

        match descriptor.dataset_type {
            DatasetType::Image => {
                let size = self.size_on_disk(&descriptor.name).unwrap_or(0);
                if schema.normalized {
                    size
                } else {
                    size * UINT8_TO_FLOAT64
                }
            }
            DatasetType::Tabular => {
                let sample_bytes: u64 = schema
                    .data_types
                    .iter()
                    .map(|(dtype, count)| dtype_itemsize(dtype) * count)
                    .sum();
                sample_bytes * schema.n_samples / 1024
            }
        }
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Recursive size of a directory tree in KB.
fn folder_size_kb(path: &Path) -> std::io::Result<u64> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_file() {
        return Ok(metadata.len() / 1024);
    }

    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        total += folder_size_kb(&entry?.path())?;
    }
    Ok(total)
}

/// Byte width of a numpy dtype name.
fn dtype_itemsize(dtype: &str) -> u64 {
    match dtype {
        "float64" | "int64" | "uint64" | "complex64" | "datetime64" => 8,
        "float32" | "int32" | "uint32" => 4,
        "float16" | "int16" | "uint16" => 2,
        "int8" | "uint8" | "bool" => 1,
        // object columns hold pointers
        "object" => 8,
        _ => 8,
    }
}

//! Per-model placement heuristics
//!
//! Worker-tier candidate sets and sort keys for training and evaluation
//! components, keyed by model type. Heavier models climb the tiers;
//! evaluation is biased one tier lower than training.

use crate::inventory::NodeSortKey;

/// Candidate filter and ordering for one model family.
#[derive(Debug, Clone, Copy)]
pub struct ModelHeuristic {
    pub worker_types: &'static [&'static str],
    pub sort: &'static [NodeSortKey],
}

const BY_CPU_THEN_MEMORY: &[NodeSortKey] = &[NodeSortKey::CpuCores, NodeSortKey::Memory];

const LIGHT_TRAINING: ModelHeuristic = ModelHeuristic {
    worker_types: &["low", "med"],
    sort: BY_CPU_THEN_MEMORY,
};

const MID_TRAINING: ModelHeuristic = ModelHeuristic {
    worker_types: &["med"],
    sort: BY_CPU_THEN_MEMORY,
};

const HEAVY_TRAINING: ModelHeuristic = ModelHeuristic {
    worker_types: &["high-cpu"],
    sort: &[],
};

const LIGHT_EVALUATION: ModelHeuristic = ModelHeuristic {
    worker_types: &["low", "med"],
    sort: BY_CPU_THEN_MEMORY,
};

const HEAVY_EVALUATION: ModelHeuristic = ModelHeuristic {
    worker_types: &["med", "high-cpu"],
    sort: BY_CPU_THEN_MEMORY,
};

/// Default when the model type is unknown: mid-tier nodes.
pub const DEFAULT_HEURISTIC: ModelHeuristic = MID_TRAINING;

/// Heuristic for a training component, `None` for unknown models.
pub fn training(model: &str) -> Option<ModelHeuristic> {
    match model {
        "linear_regression" | "logistic_regression" | "decision_tree" => Some(LIGHT_TRAINING),
        "random_forest" | "svm" => Some(MID_TRAINING),
        "nn" | "cnn" => Some(HEAVY_TRAINING),
        "pca" | "tsne" => Some(MID_TRAINING),
        _ => None,
    }
}

/// Heuristic for an evaluation component, `None` for unknown models.
pub fn evaluation(model: &str) -> Option<ModelHeuristic> {
    match model {
        "linear_regression" | "logistic_regression" | "decision_tree" => Some(LIGHT_EVALUATION),
        "random_forest" | "svm" => Some(LIGHT_EVALUATION),
        "nn" | "cnn" => Some(HEAVY_EVALUATION),
        "pca" | "tsne" => Some(LIGHT_EVALUATION),
        _ => None,
    }
}

/// Whether a model's training placement is driven by accelerator scoring
/// instead of memory filtering.
pub fn prefers_accelerator(model: &str) -> bool {
    matches!(model, "nn" | "cnn")
}

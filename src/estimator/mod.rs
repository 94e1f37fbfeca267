//! Effort Estimator - scalar cost proxies for model workloads
//!
//! The estimates are coarse operation counts used only to order pipelines;
//! they are not wall-clock predictions. Each model kind has a training and
//! a prediction formula over the sample count, feature count and the
//! model's hyperparameters.

use std::str::FromStr;

use thiserror::Error;

use crate::model::{LayerSpec, ModelParams};

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Unknown ML model: {0}")]
    UnknownModel(String),

    #[error("Unknown solver for linear regression: {0}")]
    UnknownSolver(String),

    #[error("Model '{0}' has no prediction phase")]
    NoPredictionPhase(&'static str),
}

/// Model families the estimator knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    LinearRegression,
    LogisticRegression,
    DecisionTree,
    RandomForest,
    Svm,
    Nn,
    Cnn,
    Pca,
    Tsne,
}

impl FromStr for ModelKind {
    type Err = EstimatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear_regression" => Ok(Self::LinearRegression),
            "logistic_regression" => Ok(Self::LogisticRegression),
            "decision_tree" => Ok(Self::DecisionTree),
            "random_forest" => Ok(Self::RandomForest),
            "svm" => Ok(Self::Svm),
            "nn" => Ok(Self::Nn),
            "cnn" => Ok(Self::Cnn),
            "pca" => Ok(Self::Pca),
            "tsne" => Ok(Self::Tsne),
            other => Err(EstimatorError::UnknownModel(other.to_string())),
        }
    }
}

/// Estimation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Training,
    Prediction,
}

/// Workload seen by one component: dataset dimensions plus the model's
/// hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct Workload<'a> {
    pub n_samples: u64,
    pub n_features: u64,
    pub params: &'a ModelParams,
}

/// Stateless dispatch over the model formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffortEstimator;

impl EffortEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Estimate the cost of one phase of a model workload.
    pub fn estimate(
        &self,
        model: &str,
        workload: &Workload<'_>,
        phase: Phase,
    ) -> Result<u64, EstimatorError> {
        let kind = ModelKind::from_str(model)?;
        if workload.n_samples == 0 {
            return Ok(0);
        }

        match phase {
            Phase::Training => Ok(self.train_cost(kind, workload)?),
            Phase::Prediction => self.prediction_cost(kind, workload),
        }
    }

    fn train_cost(&self, kind: ModelKind, w: &Workload<'_>) -> Result<u64, EstimatorError> {
        let (n, f) = (w.n_samples, w.n_features);
        let cost = match kind {
            ModelKind::LinearRegression => match w.params.solver.as_deref().unwrap_or("ols") {
                "ols" => n * f * f + f * f * f,
                "sgd" => w.params.n_iter.unwrap_or(1000) * n * f,
                other => return Err(EstimatorError::UnknownSolver(other.to_string())),
            },
            ModelKind::LogisticRegression => n * f * w.params.n_iter.unwrap_or(100),
            ModelKind::DecisionTree => f * n * log2_floor(n),
            ModelKind::RandomForest => {
                w.params.n_estimators.unwrap_or(100) * f * n * log2_floor(n)
            }
            ModelKind::Svm => {
                let n_iter = w.params.n_iter.unwrap_or(100);
                if is_linear_kernel(w.params) {
                    n * f * n_iter
                } else {
                    n * n * f * n_iter
                }
            }
            ModelKind::Nn | ModelKind::Cnn => {
                let macs = layer_macs(&w.params.layers);
                // forward plus a 2x backward pass, 2 FLOPs per MAC
                2 * macs * 3 * w.params.n_epochs.unwrap_or(1) * n
            }
            ModelKind::Pca => n * f * f + f * f * f,
            ModelKind::Tsne => n * n * f,
        };
        Ok(cost)
    }

    fn prediction_cost(&self, kind: ModelKind, w: &Workload<'_>) -> Result<u64, EstimatorError> {
        let (n, f) = (w.n_samples, w.n_features);
        let cost = match kind {
            ModelKind::LinearRegression | ModelKind::LogisticRegression => n * f,
            ModelKind::DecisionTree => n * w.params.max_depth.unwrap_or_else(|| log2_floor(n)),
            ModelKind::RandomForest => {
                let per_tree = n * w.params.max_depth.unwrap_or_else(|| log2_floor(n));
                per_tree * w.params.n_estimators.unwrap_or(100)
            }
            ModelKind::Svm => {
                if is_linear_kernel(w.params) {
                    n * f
                } else {
                    n * w.params.support_vectors.unwrap_or(n) * f
                }
            }
            ModelKind::Nn | ModelKind::Cnn => 2 * layer_macs(&w.params.layers) * n,
            ModelKind::Pca => return Err(EstimatorError::NoPredictionPhase("pca")),
            ModelKind::Tsne => return Err(EstimatorError::NoPredictionPhase("tsne")),
        };
        Ok(cost)
    }
}

/// Multiply-accumulate count over a network's layers.
///
/// Layer kinds outside the Dense/Conv2D/MaxPooling2D set contribute 0.
fn layer_macs(layers: &[LayerSpec]) -> u64 {
    let mut macs = 0.0f64;
    for layer in layers {
        match layer.kind.as_str() {
            "Dense" => {
                let n = layer.input_shape.first().copied().unwrap_or(0) as f64;
                let m = layer.output_shape.first().copied().unwrap_or(0) as f64;
                macs += n * m + m;
            }
            "Conv2D" => {
                let Some([k_w, k_h]) = layer.kernel_size else {
                    continue;
                };
                let c_in = layer.input_shape.get(2).copied().unwrap_or(0) as f64;
                let (w_out, h_out, c_out) = output_dims(&layer.output_shape);
                let stride = layer.strides.map(|s| s[0]).unwrap_or(1).max(1) as f64;
                macs += (k_w * k_h) as f64 * c_in * w_out * h_out * c_out / (stride * stride);
            }
            "MaxPooling2D" => {
                let Some([k_w, k_h]) = layer.pool_size else {
                    continue;
                };
                let c_in = layer.input_shape.get(2).copied().unwrap_or(0) as f64;
                let (w_out, h_out, _) = output_dims(&layer.output_shape);
                macs += (k_w * k_h) as f64 * c_in * w_out * h_out;
            }
            _ => {}
        }
    }
    macs as u64
}

fn output_dims(shape: &[u64]) -> (f64, f64, f64) {
    (
        shape.first().copied().unwrap_or(0) as f64,
        shape.get(1).copied().unwrap_or(0) as f64,
        shape.get(2).copied().unwrap_or(0) as f64,
    )
}

fn is_linear_kernel(params: &ModelParams) -> bool {
    params.kernel.as_deref().unwrap_or("linear") == "linear"
}

fn log2_floor(n: u64) -> u64 {
    if n <= 1 {
        return 0;
    }
    (n as f64).log2().floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(n: u64, f: u64, params: &ModelParams) -> Workload<'_> {
        Workload {
            n_samples: n,
            n_features: f,
            params,
        }
    }

    #[test]
    fn test_unknown_model_is_error() {
        let params = ModelParams::default();
        let est = EffortEstimator::new();
        assert!(matches!(
            est.estimate("gradient_boosting", &workload(10, 2, &params), Phase::Training),
            Err(EstimatorError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_zero_samples_is_zero_effort() {
        let params = ModelParams::default();
        let est = EffortEstimator::new();
        assert_eq!(
            est.estimate("svm", &workload(0, 100, &params), Phase::Training)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_linear_regression_solvers() {
        let est = EffortEstimator::new();

        let ols = ModelParams::default();
        assert_eq!(
            est.estimate("linear_regression", &workload(100, 10, &ols), Phase::Training)
                .unwrap(),
            100 * 100 + 1000
        );

        let sgd = ModelParams {
            solver: Some("sgd".to_string()),
            n_iter: Some(50),
            ..Default::default()
        };
        assert_eq!(
            est.estimate("linear_regression", &workload(100, 10, &sgd), Phase::Training)
                .unwrap(),
            50 * 100 * 10
        );

        let bad = ModelParams {
            solver: Some("newton".to_string()),
            ..Default::default()
        };
        assert!(est
            .estimate("linear_regression", &workload(100, 10, &bad), Phase::Training)
            .is_err());
    }

    #[test]
    fn test_logistic_regression_defaults() {
        let est = EffortEstimator::new();
        let params = ModelParams::default();
        assert_eq!(
            est.estimate("logistic_regression", &workload(200, 5, &params), Phase::Training)
                .unwrap(),
            200 * 5 * 100
        );
        assert_eq!(
            est.estimate("logistic_regression", &workload(200, 5, &params), Phase::Prediction)
                .unwrap(),
            200 * 5
        );
    }

    #[test]
    fn test_decision_tree_depth_fallback() {
        let est = EffortEstimator::new();
        let params = ModelParams::default();
        // log2(1024) = 10
        assert_eq!(
            est.estimate("decision_tree", &workload(1024, 4, &params), Phase::Training)
                .unwrap(),
            4 * 1024 * 10
        );
        assert_eq!(
            est.estimate("decision_tree", &workload(1024, 4, &params), Phase::Prediction)
                .unwrap(),
            1024 * 10
        );

        let bounded = ModelParams {
            max_depth: Some(6),
            ..Default::default()
        };
        assert_eq!(
            est.estimate("decision_tree", &workload(1024, 4, &bounded), Phase::Prediction)
                .unwrap(),
            1024 * 6
        );
    }

    #[test]
    fn test_random_forest_scales_tree_cost() {
        let est = EffortEstimator::new();
        let params = ModelParams {
            n_estimators: Some(10),
            ..Default::default()
        };
        assert_eq!(
            est.estimate("random_forest", &workload(1024, 4, &params), Phase::Training)
                .unwrap(),
            10 * 4 * 1024 * 10
        );
    }

    #[test]
    fn test_svm_kernels() {
        let est = EffortEstimator::new();
        let linear = ModelParams {
            n_iter: Some(10),
            ..Default::default()
        };
        assert_eq!(
            est.estimate("svm", &workload(100, 8, &linear), Phase::Training)
                .unwrap(),
            100 * 8 * 10
        );

        let rbf = ModelParams {
            kernel: Some("rbf".to_string()),
            n_iter: Some(10),
            ..Default::default()
        };
        assert_eq!(
            est.estimate("svm", &workload(100, 8, &rbf), Phase::Training)
                .unwrap(),
            100 * 100 * 8 * 10
        );

        // support vectors default to n_samples for non-linear prediction
        assert_eq!(
            est.estimate("svm", &workload(100, 8, &rbf), Phase::Prediction)
                .unwrap(),
            100 * 100 * 8
        );
    }

    #[test]
    fn test_nn_layer_macs() {
        let est = EffortEstimator::new();
        let params = ModelParams {
            n_epochs: Some(2),
            layers: vec![
                LayerSpec {
                    kind: "Dense".to_string(),
                    input_shape: vec![784],
                    output_shape: vec![128],
                    kernel_size: None,
                    pool_size: None,
                    strides: None,
                },
                LayerSpec {
                    kind: "Dropout".to_string(),
                    input_shape: vec![128],
                    output_shape: vec![128],
                    kernel_size: None,
                    pool_size: None,
                    strides: None,
                },
            ],
            ..Default::default()
        };

        let macs = 784 * 128 + 128;
        assert_eq!(
            est.estimate("nn", &workload(10, 784, &params), Phase::Training)
                .unwrap(),
            2 * macs * 3 * 2 * 10
        );
        assert_eq!(
            est.estimate("nn", &workload(10, 784, &params), Phase::Prediction)
                .unwrap(),
            2 * macs * 10
        );
    }

    #[test]
    fn test_cnn_conv_and_pool_macs() {
        let est = EffortEstimator::new();
        let params = ModelParams {
            n_epochs: Some(1),
            layers: vec![
                LayerSpec {
                    kind: "Conv2D".to_string(),
                    input_shape: vec![32, 32, 3],
                    output_shape: vec![30, 30, 16],
                    kernel_size: Some([3, 3]),
                    pool_size: None,
                    strides: Some([1, 1]),
                },
                LayerSpec {
                    kind: "MaxPooling2D".to_string(),
                    input_shape: vec![30, 30, 16],
                    output_shape: vec![15, 15, 16],
                    kernel_size: None,
                    pool_size: Some([2, 2]),
                    strides: None,
                },
            ],
            ..Default::default()
        };

        let conv = 3 * 3 * 3 * 30 * 30 * 16;
        let pool = 2 * 2 * 16 * 15 * 15;
        assert_eq!(
            est.estimate("cnn", &workload(1, 3072, &params), Phase::Training)
                .unwrap(),
            2 * (conv + pool) * 3
        );
    }

    #[test]
    fn test_train_only_models() {
        let est = EffortEstimator::new();
        let params = ModelParams::default();
        assert_eq!(
            est.estimate("pca", &workload(100, 10, &params), Phase::Training)
                .unwrap(),
            100 * 100 + 1000
        );
        assert!(matches!(
            est.estimate("tsne", &workload(100, 10, &params), Phase::Prediction),
            Err(EstimatorError::NoPredictionPhase(_))
        ));
    }
}

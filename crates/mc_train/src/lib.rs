//! TrainingBackend trait, model types, structured hyperparameters and
//! holdout evaluation.
//!
//! Backends know nothing about jobs or the registry. Feature building
//! happens before a backend is called; persistence happens after.

pub mod evaluate;
pub mod params;

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use params::{CatBoostParams, HyperParameters, ParamError, RidgeParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    RidgeClassifier,
    CatBoost,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RidgeClassifier => "RidgeClassifier",
            Self::CatBoost => "CatBoost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RidgeClassifier" => Some(Self::RidgeClassifier),
            "CatBoost" => Some(Self::CatBoost),
            _ => None,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque numeric training results (accuracy, roc_auc, row counts, ...).
pub type Metrics = BTreeMap<String, f64>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("features have {rows} rows but labels have {labels}")]
    ShapeMismatch { rows: usize, labels: usize },
    #[error("training set needs both classes, found only {0}")]
    SingleClass(u8),
    #[error("training set contains non-finite values")]
    NonFinite,
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("backend does not support {0}")]
    Unsupported(ModelType),
    #[error("model serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TrainError>;

/// Encoded features with binary targets (1.0 = Radiant win).
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: Array2<f64>,
    pub labels: Array1<f64>,
}

impl TrainingSet {
    pub fn new(features: Array2<f64>, labels: Array1<f64>) -> Self {
        Self { features, labels }
    }

    pub fn rows(&self) -> usize {
        self.features.nrows()
    }

    /// Checks shared by every backend before fitting.
    pub fn check(&self) -> Result<()> {
        if self.features.nrows() == 0 {
            return Err(TrainError::EmptyTrainingSet);
        }
        if self.features.nrows() != self.labels.len() {
            return Err(TrainError::ShapeMismatch {
                rows: self.features.nrows(),
                labels: self.labels.len(),
            });
        }
        if self.features.iter().any(|v| !v.is_finite()) {
            return Err(TrainError::NonFinite);
        }
        let positives = self.labels.iter().filter(|&&y| y > 0.5).count();
        if positives == 0 {
            return Err(TrainError::SingleClass(0));
        }
        if positives == self.labels.len() {
            return Err(TrainError::SingleClass(1));
        }
        Ok(())
    }
}

/// A fitted classifier, usable only for prediction.
pub trait FittedModel: Send + Sync + fmt::Debug {
    fn model_type(&self) -> ModelType;

    /// Probability of the positive class for every row.
    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64>;

    /// Bytes accepted by [`TrainingBackend::restore`].
    fn to_bytes(&self) -> Result<Vec<u8>>;
}

pub struct TrainOutput {
    pub model: Box<dyn FittedModel>,
    pub metrics: Metrics,
}

/// The pluggable training backend. Training is CPU bound and may be slow;
/// callers run it off the async executor.
pub trait TrainingBackend: Send + Sync {
    /// Human-readable backend name (e.g. "native", "mock").
    fn name(&self) -> &str;

    fn train(&self, params: &HyperParameters, data: &TrainingSet) -> Result<TrainOutput>;

    /// Share of rows `train` holds out for scoring via [`evaluate::split`].
    /// Callers fit feature encodings on [`evaluate::training_rows`] only, so
    /// held-out rows never inform the features they are scored with.
    fn validation_fraction(&self) -> Option<f64> {
        None
    }

    /// Rebuild a fitted model from bytes produced by [`FittedModel::to_bytes`].
    fn restore(&self, model_type: ModelType, bytes: &[u8]) -> Result<Box<dyn FittedModel>>;
}

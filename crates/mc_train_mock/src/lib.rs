//! Deterministic mock backend for tests and CI.
//!
//! Produces models that return a fixed probability for every row, or a
//! pseudo-random one keyed on the row's values when row order matters.
//! Training can be slowed down or forced to fail, for every model type or
//! just one, to exercise the job lifecycle.

use std::time::Duration;

use mc_train::{
    FittedModel, HyperParameters, Metrics, ModelType, Result, TrainError, TrainOutput,
    TrainingBackend, TrainingSet,
};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

pub struct MockBackend {
    probability: f64,
    per_row: bool,
    delay: Duration,
    failure: Option<Failure>,
}

struct Failure {
    only: Option<ModelType>,
    message: String,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            probability: 0.75,
            per_row: false,
            delay: Duration::ZERO,
            failure: None,
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Block the training thread this long before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Each row gets a probability derived from its feature values, so
    /// distinct rows almost always score differently.
    pub fn per_row(mut self) -> Self {
        self.per_row = true;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(Failure {
            only: None,
            message: message.into(),
        });
        self
    }

    /// Fail only jobs for `model_type`; other types train normally.
    pub fn failing_for(mut self, model_type: ModelType, message: &str) -> Self {
        self.failure = Some(Failure {
            only: Some(model_type),
            message: message.into(),
        });
        self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn train(&self, params: &HyperParameters, data: &TrainingSet) -> Result<TrainOutput> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(failure) = &self.failure {
            if failure.only.map_or(true, |t| t == params.model_type()) {
                return Err(TrainError::Other(failure.message.clone()));
            }
        }
        data.check()?;

        let model = MockModel {
            model_type: params.model_type(),
            probability: self.probability,
            per_row: self.per_row,
        };
        let mut metrics = Metrics::new();
        metrics.insert("accuracy".into(), 1.0);
        metrics.insert("train_rows".into(), data.rows() as f64);
        tracing::debug!(model_type = %model.model_type, "mock model trained");

        Ok(TrainOutput {
            model: Box::new(model),
            metrics,
        })
    }

    fn restore(&self, model_type: ModelType, bytes: &[u8]) -> Result<Box<dyn FittedModel>> {
        let model: MockModel = serde_json::from_slice(bytes)?;
        if model.model_type != model_type {
            return Err(TrainError::Other(format!(
                "stored model is {}, expected {model_type}",
                model.model_type
            )));
        }
        Ok(Box::new(model))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockModel {
    model_type: ModelType,
    probability: f64,
    #[serde(default)]
    per_row: bool,
}

/// FNV-1a over the bit patterns of the row, scaled into [0, 1).
fn row_probability(row: ArrayView1<'_, f64>) -> f64 {
    let hash = row.iter().fold(0xcbf2_9ce4_8422_2325_u64, |h, v| {
        (h ^ v.to_bits()).wrapping_mul(0x0000_0100_0000_01b3)
    });
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

impl FittedModel for MockModel {
    fn model_type(&self) -> ModelType {
        self.model_type
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
        if self.per_row {
            features.rows().into_iter().map(row_probability).collect()
        } else {
            vec![self.probability; features.nrows()]
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn data() -> TrainingSet {
        TrainingSet::new(Array2::zeros((4, 2)), array![0.0, 1.0, 0.0, 1.0])
    }

    #[test]
    fn trains_constant_model() {
        let backend = MockBackend::new().with_probability(0.3);
        let out = backend
            .train(&HyperParameters::defaults(ModelType::CatBoost), &data())
            .unwrap();
        assert_eq!(out.model.model_type(), ModelType::CatBoost);
        assert_eq!(out.model.predict_proba(Array2::zeros((3, 2)).view()), vec![0.3; 3]);
        assert_eq!(out.metrics["train_rows"], 4.0);
    }

    #[test]
    fn failing_backend() {
        let backend = MockBackend::new().failing("boom");
        let err = backend
            .train(&HyperParameters::defaults(ModelType::RidgeClassifier), &data())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn failure_can_target_one_model_type() {
        let backend = MockBackend::new().failing_for(ModelType::CatBoost, "no trees today");
        let err = backend
            .train(&HyperParameters::defaults(ModelType::CatBoost), &data())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "no trees today");
        assert!(backend
            .train(&HyperParameters::defaults(ModelType::RidgeClassifier), &data())
            .is_ok());
    }

    #[test]
    fn per_row_model_depends_on_row_values() {
        let backend = MockBackend::new().per_row();
        let out = backend
            .train(&HyperParameters::defaults(ModelType::RidgeClassifier), &data())
            .unwrap();
        let x = array![[1.0, 2.0], [3.0, 4.0], [1.0, 2.0]];
        let probs = out.model.predict_proba(x.view());
        assert_eq!(probs[0], probs[2]);
        assert_ne!(probs[0], probs[1]);
        assert!(probs.iter().all(|p| (0.0..1.0).contains(p)));

        let restored = backend
            .restore(ModelType::RidgeClassifier, &out.model.to_bytes().unwrap())
            .unwrap();
        assert_eq!(restored.predict_proba(x.view()), probs);
    }

    #[test]
    fn restore_round_trip() {
        let backend = MockBackend::new();
        let out = backend
            .train(&HyperParameters::defaults(ModelType::RidgeClassifier), &data())
            .unwrap();
        let bytes = out.model.to_bytes().unwrap();
        let restored = backend.restore(ModelType::RidgeClassifier, &bytes).unwrap();
        assert_eq!(restored.predict_proba(Array2::zeros((1, 2)).view()), vec![0.75]);
        assert!(backend.restore(ModelType::CatBoost, &bytes).is_err());
    }
}

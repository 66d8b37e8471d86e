//! In-process training backend. Ridge fits through `linfa-elasticnet`,
//! boosted trees through `gbdt`; this crate only adapts encoded features to
//! those libraries and scores the result on a holdout.
//!
//! Both models serialize to JSON so the registry can persist them as blobs.

pub mod boosting;
pub mod ridge;

use mc_train::evaluate;
use mc_train::{
    FittedModel, HyperParameters, ModelType, Result, TrainOutput, TrainingBackend, TrainingSet,
};

pub use boosting::BoostedTrees;
pub use ridge::RidgeModel;

pub struct NativeBackend {
    validation_fraction: f64,
}

impl NativeBackend {
    pub fn new(validation_fraction: f64) -> Self {
        Self {
            validation_fraction,
        }
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl TrainingBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn train(&self, params: &HyperParameters, data: &TrainingSet) -> Result<TrainOutput> {
        tracing::info!(
            model_type = %params.model_type(),
            rows = data.rows(),
            features = data.features.ncols(),
            "native training started"
        );
        let output = match params {
            HyperParameters::Ridge(p) => evaluate::fit_and_evaluate(data, self.validation_fraction, |set| {
                Ok(Box::new(ridge::fit(set, p)?) as Box<dyn FittedModel>)
            })?,
            HyperParameters::CatBoost(p) => {
                evaluate::fit_and_evaluate(data, self.validation_fraction, |set| {
                    Ok(Box::new(boosting::fit(set, p)?) as Box<dyn FittedModel>)
                })?
            }
        };
        tracing::debug!(metrics = ?output.metrics, "native training finished");
        Ok(output)
    }

    fn validation_fraction(&self) -> Option<f64> {
        Some(self.validation_fraction)
    }

    fn restore(&self, model_type: ModelType, bytes: &[u8]) -> Result<Box<dyn FittedModel>> {
        Ok(match model_type {
            ModelType::RidgeClassifier => Box::new(serde_json::from_slice::<RidgeModel>(bytes)?),
            ModelType::CatBoost => Box::new(serde_json::from_slice::<BoostedTrees>(bytes)?),
        })
    }
}

//! Ridge classifier: least squares on ±1 targets with an L2 penalty.
//!
//! Fitting goes through `linfa-elasticnet` with the L1 share set to zero.
//! Its objective is `1/(2n)·‖y − Xw‖² + penalty/2·‖w‖²`, so `penalty = alpha/n`
//! reproduces the usual `‖y − Xw‖² + alpha·‖w‖²` ridge formulation.

use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use mc_train::{FittedModel, ModelType, Result, RidgeParams, TrainError, TrainingSet};
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: u32 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    weights: Array1<f64>,
    intercept: f64,
}

impl RidgeModel {
    /// Signed distance from the decision boundary; positive favours class 1.
    fn decision(&self, features: ArrayView2<'_, f64>) -> Array1<f64> {
        features.dot(&self.weights) + self.intercept
    }
}

pub fn fit(data: &TrainingSet, params: &RidgeParams) -> Result<RidgeModel> {
    data.check()?;

    let signed: Array1<f64> = data.labels.mapv(|y| if y > 0.5 { 1.0 } else { -1.0 });
    let dataset = Dataset::new(data.features.clone(), signed);

    let net = ElasticNet::<f64>::params()
        .penalty(params.alpha / data.rows() as f64)
        .l1_ratio(0.0)
        .with_intercept(params.fit_intercept)
        .max_iterations(MAX_ITERATIONS)
        .fit(&dataset)
        .map_err(|e| TrainError::Numerical(format!("ridge fit failed: {e}")))?;

    tracing::debug!(
        duality_gap = net.duality_gap(),
        steps = net.n_steps(),
        "ridge converged"
    );

    let model = RidgeModel {
        weights: net.hyperplane().to_owned(),
        intercept: net.intercept(),
    };
    if !model.intercept.is_finite() || model.weights.iter().any(|w| !w.is_finite()) {
        return Err(TrainError::Numerical("ridge produced non-finite weights".into()));
    }
    Ok(model)
}

impl FittedModel for RidgeModel {
    fn model_type(&self) -> ModelType {
        ModelType::RidgeClassifier
    }

    /// The decision value estimates `2p - 1`; mapped back and clipped to [0, 1].
    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
        self.decision(features)
            .iter()
            .map(|d| ((d + 1.0) / 2.0).clamp(0.0, 1.0))
            .collect()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn constant_columns_are_harmless() {
        let data = TrainingSet::new(
            array![[0.0, 7.0], [1.0, 7.0], [2.0, 7.0], [3.0, 7.0]],
            array![0.0, 0.0, 1.0, 1.0],
        );
        let model = fit(&data, &RidgeParams::default()).unwrap();
        let probs = model.predict_proba(data.features.view());
        assert!(probs[0] < 0.5 && probs[3] > 0.5, "{probs:?}");
        assert!(model.weights[1].abs() < 1e-9);
    }

    #[test]
    fn stronger_penalty_shrinks_weights() {
        let data = TrainingSet::new(
            array![[0.0], [1.0], [2.0], [3.0]],
            array![0.0, 0.0, 1.0, 1.0],
        );
        let weak = fit(&data, &RidgeParams { alpha: 0.01, fit_intercept: true }).unwrap();
        let strong = fit(&data, &RidgeParams { alpha: 100.0, fit_intercept: true }).unwrap();
        assert!(strong.weights[0].abs() < weak.weights[0].abs());
    }

    #[test]
    fn small_penalty_approaches_least_squares() {
        // x = 0..3 against ±1 targets: slope 0.8, intercept -1.2
        let data = TrainingSet::new(
            array![[0.0], [1.0], [2.0], [3.0]],
            array![0.0, 0.0, 1.0, 1.0],
        );
        let model = fit(&data, &RidgeParams { alpha: 1e-6, fit_intercept: true }).unwrap();
        assert!((model.weights[0] - 0.8).abs() < 1e-3, "{model:?}");
        assert!((model.intercept - (-1.2)).abs() < 1e-3, "{model:?}");
    }

    #[test]
    fn probabilities_are_clipped() {
        let model = RidgeModel {
            weights: array![1.0],
            intercept: 0.0,
        };
        let probs = model.predict_proba(array![[-5.0], [0.0], [5.0]].view());
        assert_eq!(probs, vec![0.0, 0.5, 1.0]);
    }
}

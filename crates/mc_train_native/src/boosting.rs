//! Gradient-boosted decision trees for the `CatBoost` model type, fitted by
//! the `gbdt` crate with its binomial log-likelihood loss.
//!
//! `gbdt` wants `f32` features and ±1 labels; its trees carry no L2 term on
//! leaf values, so `l2_leaf_reg` sets the minimum leaf size instead.

use std::fmt;

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use mc_train::{CatBoostParams, FittedModel, ModelType, Result, TrainError, TrainingSet};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct BoostedTrees {
    iterations: u32,
    depth: u32,
    gbdt: GBDT,
}

impl fmt::Debug for BoostedTrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoostedTrees")
            .field("iterations", &self.iterations)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

fn config(params: &CatBoostParams, features: usize) -> Config {
    let mut cfg = Config::new();
    cfg.set_feature_size(features);
    cfg.set_max_depth(params.depth);
    cfg.set_iterations(params.iterations as usize);
    cfg.set_shrinkage(params.learning_rate as f32);
    cfg.set_min_leaf_size(1 + params.l2_leaf_reg.floor() as usize);
    cfg.set_loss("LogLikelyhood");
    cfg.set_data_sample_ratio(1.0);
    cfg.set_feature_sample_ratio(1.0);
    cfg.set_training_optimization_level(2);
    cfg.set_debug(false);
    cfg
}

fn rows<'a>(features: &'a ArrayView2<'_, f64>) -> impl Iterator<Item = Vec<f32>> + 'a {
    features
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|&v| v as f32).collect())
}

pub fn fit(data: &TrainingSet, params: &CatBoostParams) -> Result<BoostedTrees> {
    data.check()?;

    let mut train: DataVec = rows(&data.features.view())
        .zip(data.labels.iter())
        .map(|(x, &y)| Data::new_training_data(x, 1.0, if y > 0.5 { 1.0 } else { -1.0 }, None))
        .collect();

    let mut gbdt = GBDT::new(&config(params, data.features.ncols()));
    gbdt.fit(&mut train);

    let model = BoostedTrees {
        iterations: params.iterations,
        depth: params.depth,
        gbdt,
    };
    if model
        .predict_proba(data.features.view())
        .iter()
        .any(|p| !p.is_finite())
    {
        return Err(TrainError::Numerical("boosting produced non-finite scores".into()));
    }
    Ok(model)
}

impl FittedModel for BoostedTrees {
    fn model_type(&self) -> ModelType {
        ModelType::CatBoost
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
        let test: DataVec = rows(&features).map(|x| Data::new_test_data(x, None)).collect();
        self.gbdt
            .predict(&test)
            .into_iter()
            .map(|p| f64::from(p).clamp(0.0, 1.0))
            .collect()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

//! Deterministic holdout split and binary classification metrics.

use ndarray::Axis;

use crate::{FittedModel, Metrics, Result, TrainError, TrainOutput, TrainingSet};

/// Below this many rows the whole set is used for both fitting and scoring.
pub const MIN_HOLDOUT_ROWS: usize = 10;

pub struct Holdout {
    pub train: TrainingSet,
    pub validation: Option<TrainingSet>,
}

/// Every k-th row (k = round(1 / fraction)) goes to validation, or None
/// when the set is too small or the fraction is out of range.
fn holdout_stride(rows: usize, validation_fraction: f64) -> Option<usize> {
    if rows < MIN_HOLDOUT_ROWS || !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return None;
    }
    Some(((1.0 / validation_fraction).round() as usize).max(2))
}

/// Indices of the rows [`split`] keeps for training, in order.
pub fn training_rows(rows: usize, validation_fraction: f64) -> Vec<usize> {
    match holdout_stride(rows, validation_fraction) {
        Some(k) => (0..rows).filter(|i| i % k != k - 1).collect(),
        None => (0..rows).collect(),
    }
}

pub fn split(data: &TrainingSet, validation_fraction: f64) -> Holdout {
    let n = data.rows();
    let Some(k) = holdout_stride(n, validation_fraction) else {
        return Holdout {
            train: data.clone(),
            validation: None,
        };
    };

    let (valid_idx, train_idx): (Vec<usize>, Vec<usize>) = (0..n).partition(|i| i % k == k - 1);

    let pick = |idx: &[usize]| {
        TrainingSet::new(
            data.features.select(Axis(0), idx),
            data.labels.select(Axis(0), idx),
        )
    };
    Holdout {
        train: pick(&train_idx),
        validation: Some(pick(&valid_idx)),
    }
}

/// Fit on the training part of a holdout split and score on the validation
/// part. Falls back to the full set when the training part alone is unusable.
pub fn fit_and_evaluate<F>(data: &TrainingSet, validation_fraction: f64, fit: F) -> Result<TrainOutput>
where
    F: Fn(&TrainingSet) -> Result<Box<dyn FittedModel>>,
{
    data.check()?;

    let holdout = match split(data, validation_fraction) {
        h if h.train.check().is_ok() => h,
        _ => Holdout {
            train: data.clone(),
            validation: None,
        },
    };

    let model = fit(&holdout.train)?;
    let scored = holdout.validation.as_ref().unwrap_or(&holdout.train);
    let probs = model.predict_proba(scored.features.view());
    if probs.iter().any(|p| !p.is_finite()) {
        return Err(TrainError::Numerical("model produced non-finite probabilities".into()));
    }

    let labels = scored.labels.to_vec();
    let mut metrics = binary_metrics(&labels, &probs);
    metrics.insert("train_rows".into(), holdout.train.rows() as f64);
    metrics.insert(
        "validation_rows".into(),
        holdout.validation.as_ref().map_or(0.0, |v| v.rows() as f64),
    );
    Ok(TrainOutput { model, metrics })
}

/// accuracy, f1 and log_loss always; roc_auc when both classes are present.
pub fn binary_metrics(labels: &[f64], probs: &[f64]) -> Metrics {
    let mut metrics = Metrics::new();
    let n = labels.len().min(probs.len());
    if n == 0 {
        return metrics;
    }

    let (mut tp, mut fp, mut fneg, mut correct) = (0usize, 0usize, 0usize, 0usize);
    let mut log_loss = 0.0;
    for (&y, &p) in labels.iter().zip(probs) {
        let truth = y > 0.5;
        let guess = p > 0.5;
        match (truth, guess) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fneg += 1,
            (false, false) => {}
        }
        if truth == guess {
            correct += 1;
        }
        let p = p.clamp(1e-15, 1.0 - 1e-15);
        log_loss -= if truth { p.ln() } else { (1.0 - p).ln() };
    }

    let f1 = if tp == 0 {
        0.0
    } else {
        2.0 * tp as f64 / (2 * tp + fp + fneg) as f64
    };

    metrics.insert("accuracy".into(), correct as f64 / n as f64);
    metrics.insert("f1".into(), f1);
    metrics.insert("log_loss".into(), log_loss / n as f64);
    if let Some(auc) = roc_auc(&labels[..n], &probs[..n]) {
        metrics.insert("roc_auc".into(), auc);
    }
    metrics
}

/// Mann-Whitney formulation with average ranks for ties.
pub fn roc_auc(labels: &[f64], probs: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|&&y| y > 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[a].total_cmp(&probs[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probs[order[j + 1]] == probs[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] > 0.5 {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let pos = positives as f64;
    Some((rank_sum - pos * (pos + 1.0) / 2.0) / (pos * negatives as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelType;
    use ndarray::{Array1, Array2, ArrayView2};

    #[derive(Debug)]
    struct FirstColumn;

    impl FittedModel for FirstColumn {
        fn model_type(&self) -> ModelType {
            ModelType::RidgeClassifier
        }

        fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
            features.column(0).to_vec()
        }

        fn to_bytes(&self) -> Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn dataset(n: usize) -> TrainingSet {
        let labels: Array1<f64> = (0..n).map(|i| (i % 2) as f64).collect();
        let features = Array2::from_shape_fn((n, 1), |(i, _)| if i % 2 == 1 { 0.9 } else { 0.1 });
        TrainingSet::new(features, labels)
    }

    #[test]
    fn split_takes_every_fifth_row() {
        let h = split(&dataset(20), 0.2);
        assert_eq!(h.train.rows(), 16);
        assert_eq!(h.validation.unwrap().rows(), 4);
    }

    #[test]
    fn training_rows_agree_with_split() {
        let data = TrainingSet::new(
            Array2::from_shape_fn((23, 1), |(i, _)| i as f64),
            (0..23).map(|i| (i % 2) as f64).collect(),
        );
        let rows = training_rows(23, 0.2);
        let h = split(&data, 0.2);
        let picked: Vec<f64> = rows.iter().map(|&i| i as f64).collect();
        assert_eq!(h.train.features.column(0).to_vec(), picked);
        assert!(!rows.contains(&4) && !rows.contains(&9));

        assert_eq!(training_rows(6, 0.2), (0..6).collect::<Vec<_>>());
        assert_eq!(training_rows(30, 0.0).len(), 30);
    }

    #[test]
    fn small_sets_are_not_split() {
        let h = split(&dataset(6), 0.2);
        assert_eq!(h.train.rows(), 6);
        assert!(h.validation.is_none());
    }

    #[test]
    fn perfect_classifier_metrics() {
        let out = fit_and_evaluate(&dataset(20), 0.2, |_| Ok(Box::new(FirstColumn))).unwrap();
        assert_eq!(out.metrics["accuracy"], 1.0);
        assert_eq!(out.metrics["f1"], 1.0);
        assert_eq!(out.metrics["roc_auc"], 1.0);
        assert_eq!(out.metrics["train_rows"], 16.0);
        assert_eq!(out.metrics["validation_rows"], 4.0);
    }

    #[test]
    fn auc_handles_ties_and_single_class() {
        assert_eq!(roc_auc(&[0.0, 1.0], &[0.5, 0.5]), Some(0.5));
        assert_eq!(roc_auc(&[1.0, 1.0], &[0.2, 0.8]), None);
        let auc = roc_auc(&[0.0, 0.0, 1.0, 1.0], &[0.1, 0.6, 0.4, 0.9]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn fit_errors_propagate() {
        let err = fit_and_evaluate(&dataset(20), 0.2, |_| Err(TrainError::Other("boom".into())));
        assert!(matches!(err, Err(TrainError::Other(_))));
    }
}

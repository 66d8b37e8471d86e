//! Prediction dispatcher: runs inference against the active model.
//!
//! Every call takes one snapshot of the active record before doing anything
//! else and uses only that snapshot, so an activation that lands mid-request
//! never mixes two models.

use std::sync::Arc;

use mc_features::{parse_batch, FeatureError, RosterEntry};
use mc_trainer::{ModelRecord, ModelRegistry, Result, ServiceError};
use serde::{Deserialize, Serialize};

/// Classification threshold on P(Radiant win).
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_label: u8,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchPrediction {
    pub predicted_labels: Vec<u8>,
    pub probabilities: Vec<f64>,
}

pub struct PredictionDispatcher {
    registry: Arc<ModelRegistry>,
}

impl PredictionDispatcher {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    async fn active(&self) -> Result<Arc<ModelRecord>> {
        self.registry
            .get_active()
            .await
            .ok_or(ServiceError::NoActiveModel)
    }

    pub async fn predict_single(
        &self,
        radiant: &[RosterEntry],
        dire: &[RosterEntry],
    ) -> Result<Prediction> {
        let model = self.active().await?;
        let features = model
            .artifact
            .encoder
            .encode_match(radiant, dire)
            .map_err(validation)?;

        let probability = model
            .artifact
            .model
            .predict_proba(features.view())
            .first()
            .copied()
            .ok_or_else(|| ServiceError::Validation("model returned no prediction".into()))?;

        tracing::debug!(model_id = %model.model_id, probability, "single prediction");
        Ok(Prediction {
            predicted_label: label(probability),
            probability,
        })
    }

    /// One prediction per uploaded row, in upload order.
    pub async fn predict_batch(&self, csv: &[u8]) -> Result<BatchPrediction> {
        let model = self.active().await?;
        let rows = parse_batch(csv).map_err(validation)?;
        let features = model.artifact.encoder.encode_records(&rows);
        let probabilities = model.artifact.model.predict_proba(features.view());

        tracing::debug!(model_id = %model.model_id, rows = rows.len(), "batch prediction");
        Ok(BatchPrediction {
            predicted_labels: probabilities.iter().map(|&p| label(p)).collect(),
            probabilities,
        })
    }
}

fn label(probability: f64) -> u8 {
    u8::from(probability > DECISION_THRESHOLD)
}

fn validation(e: FeatureError) -> ServiceError {
    ServiceError::Validation(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::Utc;
    use mc_features::{Dataset, FeatureEncoder};
    use mc_train::{HyperParameters, ModelType, TrainingBackend, TrainingSet};
    use mc_train_mock::MockBackend;
    use mc_trainer::ModelArtifact;
    use ndarray::{array, Array2};

    const SEED_CSV: &str = include_str!("../../../seed/matches.csv");

    const BATCH: &str = "kills,deaths,assists,gold_per_min,xp_per_min,hero_damage,hero_healing,net_worth,level,duration,hero_name,isRadiant
10,2,8,600,650,25000,0,20000,22,2400,Axe,True
1,9,3,300,320,8000,500,7000,14,2400,Lion,false
4,4,4,450,450,15000,100,12000,18,1800,Unknown Hero,1
";

    async fn registry_with(id: &str, probability: f64) -> Arc<ModelRegistry> {
        registry_from(id, MockBackend::new().with_probability(probability)).await
    }

    async fn registry_from(id: &str, backend: MockBackend) -> Arc<ModelRegistry> {
        let dataset = Dataset::from_reader(SEED_CSV.as_bytes()).unwrap();
        let params = HyperParameters::defaults(ModelType::CatBoost);
        let out = backend
            .train(&params, &TrainingSet::new(Array2::zeros((2, 1)), array![0.0, 1.0]))
            .unwrap();

        let registry = Arc::new(ModelRegistry::in_memory());
        registry
            .insert(Arc::new(mc_trainer::ModelRecord {
                model_id: id.into(),
                model_type: ModelType::CatBoost,
                hyperparameters: params,
                metrics: out.metrics,
                created_at: Utc::now(),
                artifact: ModelArtifact {
                    encoder: Arc::new(FeatureEncoder::fit(&dataset).unwrap()),
                    model: Arc::from(out.model),
                },
            }))
            .await;
        registry
    }

    fn roster(first_account: i64) -> Vec<RosterEntry> {
        ["Axe", "Lion", "Zeus", "Sven", "Riki"]
            .iter()
            .enumerate()
            .map(|(i, hero)| RosterEntry {
                account_id: first_account + i as i64,
                hero_name: hero.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn no_active_model_is_checked_first() {
        let registry = registry_with("m1", 0.8).await;
        let dispatcher = PredictionDispatcher::new(registry);

        // Invalid input still reports the missing active model.
        let err = dispatcher.predict_single(&[], &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoActiveModel));
        let err = dispatcher.predict_batch(b"garbage").await.unwrap_err();
        assert!(matches!(err, ServiceError::NoActiveModel));
    }

    #[tokio::test]
    async fn single_prediction() {
        let registry = registry_with("m1", 0.8).await;
        registry.activate("m1").await.unwrap();
        let dispatcher = PredictionDispatcher::new(registry);

        let p = dispatcher
            .predict_single(&roster(100000), &roster(999000))
            .await
            .unwrap();
        assert_eq!(p, Prediction { predicted_label: 1, probability: 0.8 });

        let err = dispatcher
            .predict_single(&roster(1)[..4], &roster(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref m) if m.contains("radiant_team")));
    }

    #[tokio::test]
    async fn batch_prediction_matches_rows() {
        let registry = registry_with("m1", 0.3).await;
        registry.activate("m1").await.unwrap();
        let dispatcher = PredictionDispatcher::new(registry);

        let out = dispatcher.predict_batch(BATCH.as_bytes()).await.unwrap();
        assert_eq!(out.predicted_labels, vec![0, 0, 0]);
        assert_eq!(out.probabilities, vec![0.3, 0.3, 0.3]);
    }

    #[tokio::test]
    async fn batch_rows_keep_their_order() {
        let registry = registry_from("m1", MockBackend::new().per_row()).await;
        registry.activate("m1").await.unwrap();
        let dispatcher = PredictionDispatcher::new(registry);

        let mut lines = SEED_CSV.lines();
        let header = lines.next().unwrap();
        let rows: Vec<&str> = lines.take(37).collect();
        let batch = format!("{header}\n{}", rows.join("\n"));
        let out = dispatcher.predict_batch(batch.as_bytes()).await.unwrap();
        assert_eq!(out.probabilities.len(), 37);
        assert_eq!(out.predicted_labels.len(), 37);

        for (i, row) in rows.iter().enumerate() {
            let single = dispatcher
                .predict_batch(format!("{header}\n{row}").as_bytes())
                .await
                .unwrap();
            assert_eq!(single.probabilities, vec![out.probabilities[i]], "row {i}");
            assert_eq!(single.predicted_labels, vec![out.predicted_labels[i]], "row {i}");
        }

        let distinct: BTreeSet<u64> = out.probabilities.iter().map(|p| p.to_bits()).collect();
        assert!(distinct.len() > 1);
    }

    #[tokio::test]
    async fn batch_validation_errors() {
        let registry = registry_with("m1", 0.3).await;
        registry.activate("m1").await.unwrap();
        let dispatcher = PredictionDispatcher::new(registry);

        let header_only = BATCH.lines().next().unwrap();
        let err = dispatcher.predict_batch(header_only.as_bytes()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = dispatcher.predict_batch(b"kills,deaths\n1,2\n").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref m) if m.contains("gold_per_min")));
    }

    #[test]
    fn threshold_is_strict() {
        assert_eq!(label(0.5), 0);
        assert_eq!(label(0.5000001), 1);
    }
}

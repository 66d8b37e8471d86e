//! Model registry: completed models in insertion order plus a single active
//! pointer.
//!
//! Records are immutable once inserted and handed out as `Arc` snapshots,
//! so a reader holding the active record keeps a consistent metadata and
//! artifact pair even if the pointer moves on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mc_features::FeatureEncoder;
use mc_storage::{ModelRow, Store};
use mc_train::{FittedModel, HyperParameters, Metrics, ModelType, TrainingBackend};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::{Result, ServiceError};

/// Everything prediction needs: the encoding the model was trained with and
/// the fitted classifier.
#[derive(Clone)]
pub struct ModelArtifact {
    pub encoder: Arc<FeatureEncoder>,
    pub model: Arc<dyn FittedModel>,
}

impl fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("model_type", &self.model.model_type())
            .field("known_accounts", &self.encoder.known_accounts())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub model_id: String,
    pub model_type: ModelType,
    pub hyperparameters: HyperParameters,
    pub metrics: Metrics,
    pub created_at: DateTime<Utc>,
    pub artifact: ModelArtifact,
}

/// Model metadata as returned to API callers. Never includes the artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub model_type: ModelType,
    pub hyperparameters: serde_json::Value,
    pub metrics: Metrics,
    pub created_at: DateTime<Utc>,
}

impl ModelRecord {
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            model_id: self.model_id.clone(),
            model_type: self.model_type,
            hyperparameters: self.hyperparameters.to_json(),
            metrics: self.metrics.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    models: HashMap<String, Arc<ModelRecord>>,
    order: Vec<String>,
    active: Option<Arc<ModelRecord>>,
}

pub struct ModelRegistry {
    state: RwLock<RegistryState>,
    store: Option<Arc<Store>>,
}

impl ModelRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            store: Some(store),
        }
    }

    /// A registry that keeps nothing across restarts.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            store: None,
        }
    }

    /// Serialize the artifact and write its blobs and row. Runs on the
    /// blocking pool and takes no registry lock.
    pub async fn persist(&self, record: &Arc<ModelRecord>) -> Result<()> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        let record = record.clone();
        tokio::task::spawn_blocking(move || write_record(&store, &record))
            .await
            .map_err(|e| ServiceError::Storage(format!("model write task failed: {e}")))?
    }

    /// In-memory insert of a record already written by
    /// [`ModelRegistry::persist`]. Re-inserting an id
    /// replaces its record in place, keeping its list position; if that id is
    /// active the active snapshot is replaced as well.
    pub async fn insert(&self, record: Arc<ModelRecord>) {
        let mut state = self.state.write().await;
        let id = record.model_id.clone();
        if state.models.insert(id.clone(), record.clone()).is_none() {
            state.order.push(id.clone());
        }
        if state.active.as_ref().is_some_and(|a| a.model_id == id) {
            state.active = Some(record);
        }
        tracing::info!(model_id = %id, models = state.order.len(), "model registered");
    }

    pub async fn list_models(&self) -> Vec<String> {
        self.state.read().await.order.clone()
    }

    pub async fn get(&self, model_id: &str) -> Option<Arc<ModelRecord>> {
        self.state.read().await.models.get(model_id).cloned()
    }

    pub async fn get_info(&self, model_id: &str) -> Result<ModelInfo> {
        self.get(model_id)
            .await
            .map(|r| r.info())
            .ok_or_else(|| ServiceError::ModelNotFound(model_id.to_string()))
    }

    pub async fn activate(&self, model_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| ServiceError::ModelNotFound(model_id.to_string()))?;
        let previous = state.active.replace(record);
        tracing::info!(
            model_id,
            previous = previous.as_ref().map(|p| p.model_id.as_str()).unwrap_or("none"),
            "model activated"
        );
        Ok(())
    }

    pub async fn get_active(&self) -> Option<Arc<ModelRecord>> {
        self.state.read().await.active.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.order.len()
    }

    /// Reload persisted models in their original order. Rows that cannot be
    /// restored by `backend` are skipped with a warning. The active pointer
    /// is left unset.
    pub async fn load(&self, backend: &dyn TrainingBackend) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let rows = store.load_models()?;
        let mut state = self.state.write().await;
        for row in rows {
            let id = row.model_id.clone();
            match restore(store, backend, row) {
                Ok(record) => {
                    if state.models.insert(id.clone(), Arc::new(record)).is_none() {
                        state.order.push(id);
                    }
                }
                Err(e) => tracing::warn!(model_id = %id, error = %e, "skipping persisted model"),
            }
        }

        tracing::info!(models = state.order.len(), "model registry loaded");
        Ok(state.order.len())
    }
}

fn write_record(store: &Store, record: &ModelRecord) -> Result<()> {
    let encoder = serde_json::to_vec(record.artifact.encoder.as_ref())
        .map_err(|e| ServiceError::Storage(format!("encoder serialization: {e}")))?;
    let model = record
        .artifact
        .model
        .to_bytes()
        .map_err(|e| ServiceError::Storage(e.to_string()))?;

    let row = ModelRow {
        model_id: record.model_id.clone(),
        model_type: record.model_type.as_str().to_string(),
        hyperparameters: record.hyperparameters.to_json().to_string(),
        metrics: serde_json::to_string(&record.metrics)
            .map_err(|e| ServiceError::Storage(e.to_string()))?,
        encoder_hash: store.put_blob(&encoder)?,
        model_hash: store.put_blob(&model)?,
        created_at_ms: record.created_at.timestamp_millis(),
    };
    store.save_model(&row)?;
    Ok(())
}

fn restore(store: &Store, backend: &dyn TrainingBackend, row: ModelRow) -> Result<ModelRecord> {
    let model_type = ModelType::parse(&row.model_type)
        .ok_or_else(|| ServiceError::Storage(format!("unknown model type '{}'", row.model_type)))?;
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&row.hyperparameters).map_err(|e| corrupt("hyperparameters", e))?;
    let hyperparameters =
        HyperParameters::from_json(model_type, &raw).map_err(|e| corrupt("hyperparameters", e))?;
    let metrics: Metrics = serde_json::from_str(&row.metrics).map_err(|e| corrupt("metrics", e))?;
    let encoder: FeatureEncoder = serde_json::from_slice(&store.get_blob(&row.encoder_hash)?)
        .map_err(|e| corrupt("encoder", e))?;
    let model = backend
        .restore(model_type, &store.get_blob(&row.model_hash)?)
        .map_err(|e| corrupt("model", e))?;
    let created_at = DateTime::from_timestamp_millis(row.created_at_ms)
        .ok_or_else(|| ServiceError::Storage("created_at out of range".into()))?;

    Ok(ModelRecord {
        model_id: row.model_id,
        model_type,
        hyperparameters,
        metrics,
        created_at,
        artifact: ModelArtifact {
            encoder: Arc::new(encoder),
            model: Arc::from(model),
        },
    })
}

fn corrupt(what: &str, e: impl fmt::Display) -> ServiceError {
    ServiceError::Storage(format!("{what}: {e}"))
}

//! Training jobs: submission, background execution and status tracking.
//!
//! Lock order is always jobs table, then registry. Storage writes never run
//! under either lock. A finishing job persists its model and its final row
//! first, then inserts the model and flips the job to `Success` under one
//! jobs write lock, so a poller never sees `Success` without a model or a
//! registered model whose job still reads `Running`.
//!
//! A job's row is only written by the task that owns the job while it is
//! non-terminal, and the terminal row lands before the in-memory flip that
//! allows a resubmission. Rows for one id therefore reach the store in order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mc_features::{Dataset, FeatureEncoder};
use mc_storage::{JobRow, Store};
use mc_train::{evaluate, HyperParameters, Metrics, ModelType, TrainingBackend, TrainingSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};

use crate::registry::{ModelArtifact, ModelRecord, ModelRegistry};
use crate::{Result, ServiceError};

pub const MAX_JOB_ID_LEN: usize = 128;

const INTERRUPTED: &str = "interrupted by service restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Queued" => Some(Self::Queued),
            "Running" => Some(Self::Running),
            "Success" => Some(Self::Success),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub job_id: String,
    pub model_type: ModelType,
    pub hyperparameters: HyperParameters,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What status polls return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrainingJob {
    fn new(job_id: String, hyperparameters: HyperParameters) -> Self {
        Self {
            job_id,
            model_type: hyperparameters.model_type(),
            hyperparameters,
            status: JobStatus::Queued,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            status: self.status,
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn fail(&mut self, message: String) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message);
        self.finished_at = Some(Utc::now());
    }

    fn to_row(&self) -> JobRow {
        JobRow {
            job_id: self.job_id.clone(),
            model_type: self.model_type.as_str().to_string(),
            hyperparameters: self.hyperparameters.to_json().to_string(),
            status: self.status.as_str().to_string(),
            error_message: self.error_message.clone(),
            created_at_ms: self.created_at.timestamp_millis(),
            started_at_ms: self.started_at.map(|t| t.timestamp_millis()),
            finished_at_ms: self.finished_at.map(|t| t.timestamp_millis()),
        }
    }

    fn from_row(row: JobRow) -> std::result::Result<Self, String> {
        let model_type = ModelType::parse(&row.model_type)
            .ok_or_else(|| format!("unknown model type '{}'", row.model_type))?;
        let raw: serde_json::Map<String, Value> =
            serde_json::from_str(&row.hyperparameters).map_err(|e| e.to_string())?;
        let hyperparameters =
            HyperParameters::from_json(model_type, &raw).map_err(|e| e.to_string())?;
        let status =
            JobStatus::parse(&row.status).ok_or_else(|| format!("unknown status '{}'", row.status))?;
        let ts = |ms: i64| DateTime::from_timestamp_millis(ms).ok_or("timestamp out of range");

        Ok(Self {
            job_id: row.job_id,
            model_type,
            hyperparameters,
            status,
            error_message: row.error_message,
            created_at: ts(row.created_at_ms)?,
            started_at: row.started_at_ms.map(ts).transpose()?,
            finished_at: row.finished_at_ms.map(ts).transpose()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub max_concurrent_jobs: usize,
    /// Upper bound on feature building plus training. None waits forever.
    pub job_timeout: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: None,
        }
    }
}

pub struct JobManager {
    jobs: RwLock<HashMap<String, TrainingJob>>,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn TrainingBackend>,
    dataset: Arc<Dataset>,
    store: Option<Arc<Store>>,
    permits: Arc<Semaphore>,
    job_timeout: Option<Duration>,
}

impl JobManager {
    pub fn new(
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn TrainingBackend>,
        dataset: Arc<Dataset>,
        store: Option<Arc<Store>>,
        config: JobConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            registry,
            backend,
            dataset,
            store,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            job_timeout: config.job_timeout,
        })
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Validate and enqueue a training job, then return without waiting for it.
    ///
    /// `hyperparameters` must be a JSON object or null. Resubmitting an id
    /// whose job finished replaces that job record.
    pub async fn submit_fit(
        self: &Arc<Self>,
        job_id: &str,
        model_type: &str,
        hyperparameters: &Value,
    ) -> Result<JobSnapshot> {
        validate_job_id(job_id)?;
        let model_type = ModelType::parse(model_type).ok_or_else(|| {
            ServiceError::Validation(format!(
                "unknown model_type '{model_type}': expected RidgeClassifier or CatBoost"
            ))
        })?;
        let empty = serde_json::Map::new();
        let raw = match hyperparameters {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(ServiceError::Validation(
                    "hyperparameters must be a JSON object".into(),
                ))
            }
        };
        let params = HyperParameters::from_json(model_type, raw)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let job = TrainingJob::new(job_id.to_string(), params);
        {
            let mut jobs = self.jobs.write().await;
            if let Some(existing) = jobs.get(job_id) {
                if !existing.status.is_terminal() {
                    return Err(ServiceError::DuplicateJob(job_id.to_string()));
                }
                tracing::info!(job_id, previous = %existing.status, "resubmitting finished job");
            }
            jobs.insert(job_id.to_string(), job.clone());
        }
        self.persist(vec![job.to_row()]).await;
        let snapshot = job.snapshot();

        tracing::info!(job_id, model_type = %model_type, "training job queued");
        tokio::spawn(self.clone().execute(job_id.to_string()));
        Ok(snapshot)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobSnapshot> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(TrainingJob::snapshot)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))
    }

    /// Number of known jobs per status.
    pub async fn status_counts(&self) -> BTreeMap<String, usize> {
        let jobs = self.jobs.read().await;
        let mut counts = BTreeMap::new();
        for job in jobs.values() {
            *counts.entry(job.status.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Reload persisted jobs. Jobs that were queued or running when the
    /// previous process stopped are marked failed. Returns how many were.
    pub async fn recover(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut recovered = Vec::new();
        let mut failed_rows = Vec::new();
        for row in store.load_jobs()? {
            let id = row.job_id.clone();
            let mut job = match TrainingJob::from_row(row) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "skipping unreadable job record");
                    continue;
                }
            };
            if !job.status.is_terminal() {
                job.fail(INTERRUPTED.into());
                failed_rows.push(job.to_row());
            }
            recovered.push(job);
        }
        let interrupted = failed_rows.len();
        self.persist(failed_rows).await;

        let mut jobs = self.jobs.write().await;
        for job in recovered {
            jobs.insert(job.job_id.clone(), job);
        }
        if interrupted > 0 {
            tracing::warn!(interrupted, "marked interrupted jobs as failed");
        }
        tracing::info!(jobs = jobs.len(), "job table recovered");
        Ok(interrupted)
    }

    /// The execution unit for one job.
    async fn execute(self: Arc<Self>, job_id: String) {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.finish(&job_id, Err("job queue is closed".into())).await;
                return;
            }
        };

        let (params, row) = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&job_id) else {
                return;
            };
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            (job.hyperparameters.clone(), job.to_row())
        };
        self.persist(vec![row]).await;
        tracing::info!(job_id = %job_id, "training started");

        let backend = self.backend.clone();
        let dataset = self.dataset.clone();
        let handle =
            tokio::task::spawn_blocking(move || build_and_train(backend.as_ref(), &dataset, &params));

        let outcome = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => flatten(joined),
                // The blocking thread runs to completion; its result is dropped.
                Err(_) => Err(format!(
                    "training exceeded the time limit of {}s",
                    limit.as_secs_f64()
                )),
            },
            None => flatten(handle.await),
        };

        self.finish(&job_id, outcome).await;
    }

    async fn finish(&self, job_id: &str, outcome: std::result::Result<Trained, String>) {
        let Some(mut job) = self.jobs.read().await.get(job_id).cloned() else {
            return;
        };

        let registered = match outcome {
            Ok(trained) => {
                let record = Arc::new(ModelRecord {
                    model_id: job_id.to_string(),
                    model_type: trained.artifact.model.model_type(),
                    hyperparameters: trained.hyperparameters,
                    metrics: trained.metrics,
                    created_at: Utc::now(),
                    artifact: trained.artifact,
                });
                match self.registry.persist(&record).await {
                    Ok(()) => Ok(record),
                    Err(e) => Err(format!("failed to register model: {e}")),
                }
            }
            Err(message) => Err(message),
        };

        match &registered {
            Ok(_) => {
                job.status = JobStatus::Success;
                job.finished_at = Some(Utc::now());
            }
            Err(message) => job.fail(message.clone()),
        }
        self.persist(vec![job.to_row()]).await;

        let mut jobs = self.jobs.write().await;
        match registered {
            Ok(record) => {
                self.registry.insert(record).await;
                tracing::info!(job_id, "training job succeeded");
            }
            Err(message) => tracing::warn!(job_id, error = %message, "training job failed"),
        }
        jobs.insert(job_id.to_string(), job);
    }

    /// Job rows are an audit trail; a failed write is logged, not fatal.
    async fn persist(&self, rows: Vec<JobRow>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        if rows.is_empty() {
            return;
        }
        let written = tokio::task::spawn_blocking(move || {
            for row in &rows {
                if let Err(e) = store.save_job(row) {
                    tracing::warn!(job_id = %row.job_id, error = %e, "failed to persist job");
                }
            }
        })
        .await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "job write task failed");
        }
    }
}

fn validate_job_id(job_id: &str) -> Result<()> {
    if job_id.trim().is_empty() {
        return Err(ServiceError::Validation("model_id must not be empty".into()));
    }
    if job_id.chars().count() > MAX_JOB_ID_LEN {
        return Err(ServiceError::Validation(format!(
            "model_id must be at most {MAX_JOB_ID_LEN} characters"
        )));
    }
    Ok(())
}

struct Trained {
    artifact: ModelArtifact,
    hyperparameters: HyperParameters,
    metrics: Metrics,
}

/// Runs on the blocking pool. The encoder only sees the rows the backend
/// trains on; its held-out rows are encoded with it but never fitted.
fn build_and_train(
    backend: &dyn TrainingBackend,
    dataset: &Dataset,
    params: &HyperParameters,
) -> std::result::Result<Trained, String> {
    let subset;
    let fit_rows = match backend.validation_fraction() {
        Some(fraction) => {
            subset = dataset.subset(&evaluate::training_rows(dataset.len(), fraction));
            &subset
        }
        None => dataset,
    };
    let encoder =
        FeatureEncoder::fit(fit_rows).map_err(|e| format!("feature building failed: {e}"))?;
    let features = encoder.encode_records(dataset.records().iter().map(|r| &r.player));
    let set = TrainingSet::new(features, dataset.labels());

    let output = backend
        .train(params, &set)
        .map_err(|e| format!("training failed: {e}"))?;

    Ok(Trained {
        artifact: ModelArtifact {
            encoder: Arc::new(encoder),
            model: Arc::from(output.model),
        },
        hyperparameters: params.clone(),
        metrics: output.metrics,
    })
}

fn flatten(
    joined: std::result::Result<std::result::Result<Trained, String>, tokio::task::JoinError>,
) -> std::result::Result<Trained, String> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err("training panicked".into()),
        Err(e) => Err(format!("training task aborted: {e}")),
    }
}

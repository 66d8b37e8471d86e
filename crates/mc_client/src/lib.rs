//! Typed HTTP client for the model service.
//!
//! Mirrors the server routes one method per endpoint. Status polling lives
//! here ([`ModelsClient::wait_for_fit`]); the server never blocks on a job.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use mc_features::RosterEntry;
use mc_predict::{BatchPrediction, Prediction};
use mc_train::ModelType;
use mc_trainer::{JobSnapshot, JobStatus};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{kind} ({status}): {message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },
    #[error("job '{model_id}' still {status} after {waited:?}")]
    Timeout {
        model_id: String,
        status: JobStatus,
        waited: Duration,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Deserialize)]
pub struct FitAccepted {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub model_type: ModelType,
    pub hyperparameters: Value,
    pub metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    radiant_team: &'a [RosterEntry],
    dire_team: &'a [RosterEntry],
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

fn build_client() -> Result<Client> {
    Ok(Client::builder().timeout(DEFAULT_TIMEOUT).build()?)
}

/// Decode a success body, or turn an error body into [`ClientError::Api`].
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let text = resp.text().await.unwrap_or_default();
    let (kind, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.message),
        Err(_) => ("HttpError".to_string(), text),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        kind,
        message,
    })
}

pub struct ModelsClient {
    client: Client,
    base_url: String,
}

impl ModelsClient {
    /// `server` is the scheme, host and port, e.g. `http://127.0.0.1:8000`.
    pub fn new(server: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: format!("{}/api/v1/models", server.trim_end_matches('/')),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    pub async fn fit(
        &self,
        model_id: &str,
        model_type: &str,
        hyperparameters: Value,
    ) -> Result<FitAccepted> {
        tracing::debug!(model_id, model_type, "submitting fit");
        let body = json!({
            "model_id": model_id,
            "model_type": model_type,
            "hyperparameters": hyperparameters,
        });
        decode(self.client.post(self.url("fit")).json(&body).send().await?).await
    }

    pub async fn fit_status(&self, model_id: &str) -> Result<JobSnapshot> {
        let resp = self
            .client
            .get(self.url("fit/status"))
            .query(&[("model_id", model_id)])
            .send()
            .await?;
        decode(resp).await
    }

    /// Poll until the job reaches a terminal status or `max_wait` elapses.
    pub async fn wait_for_fit(
        &self,
        model_id: &str,
        interval: Duration,
        max_wait: Duration,
    ) -> Result<JobSnapshot> {
        let started = Instant::now();
        loop {
            let snapshot = self.fit_status(model_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            if started.elapsed() >= max_wait {
                return Err(ClientError::Timeout {
                    model_id: model_id.to_string(),
                    status: snapshot.status,
                    waited: started.elapsed(),
                });
            }
            tracing::debug!(model_id, status = %snapshot.status, "fit still in progress");
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Models {
            models: Vec<String>,
        }
        let models: Models = decode(self.client.get(self.url("list")).send().await?).await?;
        Ok(models.models)
    }

    pub async fn model_info(&self, model_id: &str) -> Result<ModelInfo> {
        let resp = self
            .client
            .get(self.url("model_info"))
            .query(&[("model_id", model_id)])
            .send()
            .await?;
        decode(resp).await
    }

    /// Returns the id the server activated.
    pub async fn activate(&self, model_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Activated {
            activated: String,
        }
        let resp = self
            .client
            .put(self.url("activate"))
            .query(&[("model_id", model_id)])
            .send()
            .await?;
        let body: Activated = decode(resp).await?;
        Ok(body.activated)
    }

    pub async fn predict(&self, radiant: &[RosterEntry], dire: &[RosterEntry]) -> Result<Prediction> {
        #[derive(Deserialize)]
        struct Wrapped {
            prediction: Prediction,
        }
        let body = PredictRequest {
            radiant_team: radiant,
            dire_team: dire,
        };
        let resp = self.client.post(self.url("predict")).json(&body).send().await?;
        let wrapped: Wrapped = decode(resp).await?;
        Ok(wrapped.prediction)
    }

    /// Upload a CSV of player rows as the `request` form field; one
    /// prediction per row.
    pub async fn predict_csv(&self, csv: impl Into<Vec<u8>>) -> Result<BatchPrediction> {
        #[derive(Deserialize)]
        struct Wrapped {
            predictions: BatchPrediction,
        }
        let bytes: Vec<u8> = csv.into();
        let part = Part::bytes(bytes)
            .file_name("batch.csv")
            .mime_str("text/csv")?;
        let resp = self
            .client
            .post(self.url("predict_csv"))
            .multipart(Form::new().part("request", part))
            .send()
            .await?;
        let wrapped: Wrapped = decode(resp).await?;
        Ok(wrapped.predictions)
    }
}

pub struct DataClient {
    client: Client,
    base_url: String,
}

impl DataClient {
    pub fn new(server: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: format!("{}/api/v1/data", server.trim_end_matches('/')),
        })
    }

    pub async fn account_ids(&self) -> Result<Vec<i64>> {
        #[derive(Deserialize)]
        struct AccountIds {
            account_ids: Vec<i64>,
        }
        let url = format!("{}/account_ids", self.base_url);
        let body: AccountIds = decode(self.client.get(url).send().await?).await?;
        Ok(body.account_ids)
    }
}

//! Axum API for the model service.
//!
//! Endpoints:
//! - POST /api/v1/models/fit
//! - GET  /api/v1/models/fit/status?model_id=
//! - GET  /api/v1/models/list
//! - GET  /api/v1/models/model_info?model_id=
//! - PUT  /api/v1/models/activate?model_id=
//! - POST /api/v1/models/predict
//! - POST /api/v1/models/predict_csv (raw CSV body, or multipart field `request`)
//! - GET  /api/v1/data/account_ids
//! - GET  /status

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mc_features::RosterEntry;
use mc_predict::{BatchPrediction, Prediction, PredictionDispatcher};
use mc_trainer::{JobManager, JobSnapshot, JobStatus, ModelInfo, ModelRegistry, ServiceError};

/// Upper bound on CSV uploads.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Form field carrying the CSV in a multipart upload.
pub const UPLOAD_FIELD: &str = "request";

/// Shared application state for all API handlers.
pub struct AppState {
    pub jobs: Arc<JobManager>,
    pub registry: Arc<ModelRegistry>,
    pub dispatcher: PredictionDispatcher,
    pub account_ids: Vec<i64>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let models = Router::new()
        .route("/fit", post(handle_fit))
        .route("/fit/status", get(handle_fit_status))
        .route("/list", get(handle_list))
        .route("/model_info", get(handle_model_info))
        .route("/activate", put(handle_activate))
        .route("/predict", post(handle_predict))
        .route(
            "/predict_csv",
            post(handle_predict_csv).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        );

    Router::new()
        .nest("/api/v1/models", models)
        .route("/api/v1/data/account_ids", get(handle_account_ids))
        .route("/status", get(handle_status))
        .with_state(state)
}

// ---------- Errors ----------

/// A [`ServiceError`] rendered as `{"error": "<Kind>", "message": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::DuplicateJob(_) | ServiceError::NoActiveModel => StatusCode::CONFLICT,
            ServiceError::JobNotFound(_) | ServiceError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------- Data types ----------

#[derive(Deserialize)]
struct FitRequest {
    model_id: String,
    model_type: String,
    #[serde(default)]
    hyperparameters: Value,
}

#[derive(Serialize, Deserialize)]
struct FitResponse {
    job_id: String,
    status: JobStatus,
}

/// `model_id` and `job_id` name the same thing.
#[derive(Deserialize)]
struct IdParams {
    model_id: Option<String>,
    job_id: Option<String>,
}

impl IdParams {
    fn id(self) -> Result<String, ApiError> {
        self.model_id.or(self.job_id).ok_or_else(|| {
            ApiError(ServiceError::Validation(
                "model_id query parameter is required".into(),
            ))
        })
    }
}

#[derive(Serialize, Deserialize)]
struct ModelsResponse {
    models: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ActivateResponse {
    activated: String,
}

#[derive(Deserialize)]
struct PredictRequest {
    radiant_team: Vec<RosterEntry>,
    dire_team: Vec<RosterEntry>,
}

#[derive(Serialize, Deserialize)]
struct PredictResponse {
    prediction: Prediction,
}

#[derive(Serialize, Deserialize)]
struct PredictCsvResponse {
    predictions: BatchPrediction,
}

#[derive(Serialize, Deserialize)]
struct AccountIdsResponse {
    account_ids: Vec<i64>,
}

#[derive(Serialize, Deserialize)]
struct StatusResponse {
    status: String,
    backend: String,
    active_model: Option<String>,
    models: usize,
    jobs: BTreeMap<String, usize>,
}

// ---------- Handlers ----------

async fn handle_fit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FitRequest>,
) -> Result<(StatusCode, Json<FitResponse>), ApiError> {
    let job = state
        .jobs
        .submit_fit(&req.model_id, &req.model_type, &req.hyperparameters)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(FitResponse {
            job_id: job.job_id,
            status: job.status,
        }),
    ))
}

async fn handle_fit_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> ApiResult<JobSnapshot> {
    Ok(Json(state.jobs.get_status(&params.id()?).await?))
}

async fn handle_list(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.registry.list_models().await,
    })
}

async fn handle_model_info(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> ApiResult<ModelInfo> {
    Ok(Json(state.registry.get_info(&params.id()?).await?))
}

async fn handle_activate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> ApiResult<ActivateResponse> {
    let id = params.id()?;
    state.registry.activate(&id).await?;
    Ok(Json(ActivateResponse { activated: id }))
}

async fn handle_predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> ApiResult<PredictResponse> {
    let prediction = state
        .dispatcher
        .predict_single(&req.radiant_team, &req.dire_team)
        .await?;
    Ok(Json(PredictResponse { prediction }))
}

async fn handle_predict_csv(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<PredictCsvResponse>, Response> {
    let csv = csv_upload(request).await?;
    let predictions = state
        .dispatcher
        .predict_batch(&csv)
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(PredictCsvResponse { predictions }))
}

/// Multipart forms carry the CSV in the [`UPLOAD_FIELD`] field; any other
/// content type is taken as the CSV itself.
async fn csv_upload(request: Request) -> Result<Bytes, Response> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"));
    if !is_multipart {
        return Bytes::from_request(request, &())
            .await
            .map_err(IntoResponse::into_response);
    }

    let mut form = Multipart::from_request(request, &())
        .await
        .map_err(IntoResponse::into_response)?;
    while let Some(field) = form.next_field().await.map_err(IntoResponse::into_response)? {
        if field.name() == Some(UPLOAD_FIELD) {
            return field.bytes().await.map_err(IntoResponse::into_response);
        }
    }
    Err(ApiError(ServiceError::Validation(format!(
        "multipart upload has no '{UPLOAD_FIELD}' field"
    )))
    .into_response())
}

async fn handle_account_ids(State(state): State<Arc<AppState>>) -> Json<AccountIdsResponse> {
    Json(AccountIdsResponse {
        account_ids: state.account_ids.clone(),
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".into(),
        backend: state.jobs.backend_name().to_string(),
        active_model: state.registry.get_active().await.map(|m| m.model_id.clone()),
        models: state.registry.len().await,
        jobs: state.jobs.status_counts().await,
    })
}

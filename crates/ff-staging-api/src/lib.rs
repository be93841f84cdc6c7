use anyhow::{anyhow, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use ff_core::config::{self, PipelineConfig, StagingConfig};
use ff_core::submission::{
    BulkOutcome, BulkSubmitRequest, RecordType, StagingCounts, SubmitAck, SubmitRequest,
};
use ff_core::{db, http, logging, server, AppError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod auth;
mod gateway;
mod models;
mod promotion;

pub use gateway::StagingGateway;
pub use models::{
    AutoChecks, PlantedPole, PromotionStats, StagingRecord, StagingStatus, VerificationStatus,
    VerifyAction,
};
pub use promotion::PromotionService;

const SERVICE_NAME: &str = "ff-staging-api";

#[derive(Clone)]
pub struct AppState {
    pool: Pool<Sqlite>,
    gateway: Arc<StagingGateway>,
    promotion: Arc<PromotionService>,
    api_keys: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(pool: Pool<Sqlite>, api_keys: Vec<String>, staging: StagingConfig) -> Self {
        let gateway = Arc::new(StagingGateway::new(pool.clone(), staging.clone()));
        let promotion = Arc::new(PromotionService::new(pool.clone(), staging));
        Self {
            pool,
            gateway,
            promotion,
            api_keys: Arc::new(api_keys),
        }
    }

    pub fn gateway(&self) -> Arc<StagingGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn promotion(&self) -> Arc<PromotionService> {
        Arc::clone(&self.promotion)
    }

    pub(crate) fn api_keys(&self) -> &[String] {
        &self.api_keys
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(issues) => {
                let details = serde_json::to_value(&issues).unwrap_or(Value::Null);
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    "submission failed validation",
                )
                .with_details(details)
            }
            AppError::Duplicate(message) => {
                ApiError::new(StatusCode::CONFLICT, "DUPLICATE_ENTRY", message)
            }
            AppError::BatchTooLarge { limit, actual } => ApiError::new(
                StatusCode::BAD_REQUEST,
                "BATCH_TOO_LARGE",
                format!("batch of {actual} items exceeds the {limit} item cap"),
            )
            .with_details(serde_json::json!({ "limit": limit, "actual": actual })),
            AppError::NotFound(message) => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
            }
            AppError::InvalidTransition { from, to } => ApiError::new(
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("cannot move from {from} to {to}"),
            ),
            AppError::Database(message) | AppError::Storage(message) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", message)
            }
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                other.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(payload)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Serialize)]
struct HealthStatus {
    status: String,
}

pub struct StagingApiConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub api_keys: Vec<String>,
    pub pipeline: PipelineConfig,
}

pub fn load_config() -> Result<StagingApiConfig> {
    let addr = config::socket_addr_from_env("STAGING_API_ADDR", "0.0.0.0:8082")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let api_keys: Vec<String> = config::required_env("FIELD_API_KEYS")?
        .split(',')
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect();
    if api_keys.is_empty() {
        return Err(anyhow!("FIELD_API_KEYS must contain at least one key"));
    }

    let pipeline = PipelineConfig::from_env();
    pipeline.validate().map_err(|err| anyhow!(err))?;

    Ok(StagingApiConfig {
        addr,
        database_url,
        api_keys,
        pipeline,
    })
}

pub async fn migrate(pool: &Pool<Sqlite>) -> ff_core::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/submit/pole", post(submit_pole))
        .route("/v1/submit/sow", post(submit_sow))
        .route("/v1/submit/bulk", post(submit_bulk))
        .route("/v1/submissions/{id}/status", get(submission_status))
        .route("/v1/submissions/{id}/verify", post(verify_submission))
        .route("/v1/verify/bulk", post(bulk_verify_submissions))
        .route("/v1/staging/summary", get(staging_summary))
        .route("/v1/production/stats", get(production_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_field_device,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .with_state(state)
}

pub async fn run(config: StagingApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    let pool = db::connect(&config.database_url, config.pipeline.database.max_connections).await?;
    migrate(&pool).await?;

    let state = AppState::new(pool, config.api_keys, config.pipeline.staging.clone());

    // Auto-approved submissions are promoted by a background drain, the
    // at-least-once consumer of the promotion job queue.
    let promotion = state.promotion();
    let poll = Duration::from_secs(config.pipeline.staging.promotion_poll_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        loop {
            ticker.tick().await;
            if let Err(err) = promotion.process_promotion_queue().await {
                tracing::warn!(error = %err, "promotion queue drain failed");
            }
        }
    });

    let router = http::apply_standard_layers(router(state), SERVICE_NAME);
    server::serve(config.addr, router).await
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_ready(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthStatus { status: "ok".into() })),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthStatus {
                status: "unavailable".into(),
            }),
        ),
    }
}

async fn submit_pole(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitAck>)> {
    let ack = state.gateway.submit(RecordType::Pole, request).await?;
    Ok((StatusCode::CREATED, Json(ack)))
}

async fn submit_sow(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitAck>)> {
    let ack = state.gateway.submit(RecordType::Sow, request).await?;
    Ok((StatusCode::CREATED, Json(ack)))
}

async fn submit_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkSubmitRequest>,
) -> ApiResult<(StatusCode, Json<BulkOutcome>)> {
    let outcome = state
        .gateway
        .submit_bulk(request.submissions, &request.metadata.device_id)
        .await?;
    Ok((StatusCode::MULTI_STATUS, Json(outcome)))
}

async fn submission_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StagingRecord>> {
    match state.gateway.get(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("submission {id} not found"),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    action: VerifyAction,
    verified_by: String,
    #[serde(default)]
    notes: Option<String>,
}

async fn verify_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<StatusCode> {
    state
        .promotion
        .verify(
            &id,
            request.action,
            &request.verified_by,
            request.notes.as_deref(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct BulkVerifyRequest {
    submission_ids: Vec<String>,
    action: VerifyAction,
    verified_by: String,
    #[serde(default)]
    notes: Option<String>,
}

async fn bulk_verify_submissions(
    State(state): State<AppState>,
    Json(request): Json<BulkVerifyRequest>,
) -> ApiResult<StatusCode> {
    state
        .promotion
        .bulk_verify(
            &request.submission_ids,
            request.action,
            &request.verified_by,
            request.notes.as_deref(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn staging_summary(State(state): State<AppState>) -> ApiResult<Json<StagingCounts>> {
    Ok(Json(state.gateway.staging_summary().await?))
}

async fn production_stats(State(state): State<AppState>) -> ApiResult<Json<PromotionStats>> {
    Ok(Json(state.promotion.stats().await?))
}

#[cfg(test)]
mod contract_tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const TEST_KEY: &str = "field-test-key";

    async fn test_router() -> Router {
        let pool = db::connect_in_memory().await.unwrap();
        migrate(&pool).await.unwrap();
        let state = AppState::new(
            pool,
            vec![TEST_KEY.to_string()],
            PipelineConfig::default().staging,
        );
        router(state)
    }

    fn pole_request_body(submission_id: &str, pole_number: &str) -> Vec<u8> {
        let request = crate::gateway::tests::submit_request(
            submission_id,
            crate::gateway::tests::pole_payload(pole_number),
        );
        serde_json::to_vec(&request).unwrap()
    }

    fn authed_post(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-api-key", TEST_KEY)
            .header("x-device-id", "device-01")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn submit_requires_api_key() {
        let router = test_router().await;

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/submit/pole")
                    .header("content-type", "application/json")
                    .header("x-device-id", "device-01")
                    .body(Body::from(pole_request_body("sub-1", "LAW.P.B167")))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_requires_device_id() {
        let router = test_router().await;

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/submit/pole")
                    .header("content-type", "application/json")
                    .header("x-api-key", TEST_KEY)
                    .body(Body::from(pole_request_body("sub-1", "LAW.P.B167")))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pole_submission_returns_created_ack() {
        let router = test_router().await;

        let response = router
            .oneshot(authed_post(
                "/v1/submit/pole",
                pole_request_body("sub-1", "LAW.P.B167"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let ack: SubmitAck = serde_json::from_slice(&body).unwrap();
        assert_eq!(ack.submission_id, "sub-1");
        assert!(!ack.requires_manual_review);
    }

    #[tokio::test]
    async fn invalid_submission_returns_field_errors() {
        let router = test_router().await;

        let response = router
            .oneshot(authed_post(
                "/v1/submit/pole",
                pole_request_body("sub-1", "bad-number"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["code"], "VALIDATION_ERROR");
        assert!(error["details"].as_array().is_some());
    }

    #[tokio::test]
    async fn bulk_submission_is_multi_status() {
        let router = test_router().await;

        let body = serde_json::json!({
            "submissions": [
                {
                    "submission_id": "sub-1",
                    "record_type": "pole",
                    "data": crate::gateway::tests::pole_payload("LAW.P.B001")
                },
                {
                    "submission_id": "sub-2",
                    "record_type": "pole",
                    "data": { "pole_number": "LAW.P.B002" }
                }
            ],
            "metadata": { "device_id": "device-01" }
        });

        let response = router
            .oneshot(authed_post(
                "/v1/submit/bulk",
                serde_json::to_vec(&body).unwrap(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let outcome: BulkOutcome = serde_json::from_slice(&body).unwrap();
        assert_eq!(outcome.successful.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
    }

    #[tokio::test]
    async fn unknown_submission_status_is_not_found() {
        let router = test_router().await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/submissions/missing/status")
                    .header("x-api-key", TEST_KEY)
                    .header("x-device-id", "device-01")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_is_open() {
        let router = test_router().await;

        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}

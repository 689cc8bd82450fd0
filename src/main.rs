mod category;
mod chat;
mod condition;
mod config;
mod http;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod router;
mod store;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use category::Classifier;
use chat::{ChatEntry, ChatHistory, ChatReply, ChatService};
use condition::match_condition;
use config::Settings;
use llm::LlmClient;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, BulkClassifyRequest, BulkClassifyResponse, ChatRequest, ClassifyRequest,
    ClassifyResponse, JobView, JobsResponse, WatchResponse,
};
use crate::http::HttpTimeouts;
use pipeline::{
    ApiCallError, FallbackSource, JobMonitor, PipelineApi, PollSource, Retention, SseSource,
    decode_message,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use store::{KvStore, MemoryStore, RedisStore, StoreError};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const BULK_CLASSIFY_MAX: usize = 500;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "storeops.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = Settings::from_env();

    let classifier = match &settings.category_rules_path {
        Some(path) => {
            let classifier = Classifier::from_yaml_file(path)?;
            info!(
                target = "storeops.api",
                path = %path.display(),
                rules = classifier.rule_count(),
                "category rules loaded"
            );
            classifier
        }
        None => Classifier::builtin().clone(),
    };

    let api = PipelineApi::new(&settings.pipeline_api_url, settings.http);
    let source = FallbackSource::new(
        Arc::new(SseSource::new(api.clone(), settings.http)),
        Arc::new(PollSource::new(api.clone(), settings.poll_interval)),
        settings.push_retry,
    );
    let (monitor, _sweeper) = JobMonitor::spawn(Arc::new(source), api, Retention::default());

    let store: Arc<dyn KvStore> = match &settings.redis_url {
        Some(url) => Arc::new(RedisStore::open(url, settings.chat_history_ttl_secs)?),
        None => {
            warn!(target = "storeops.api", "REDIS_URL not set, chat history kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let history = ChatHistory::new(store, settings.chat_history_limit);
    let llm = Arc::new(LlmClient::new(settings.llm.clone(), settings.http));
    let classifier = Arc::new(classifier);
    let chat = ChatService::new(history, llm, monitor.clone(), classifier.clone());

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        classifier,
        monitor,
        chat,
        prometheus_handle,
        metrics_key: settings.metrics_key.clone(),
    };
    let app = build_router(state, settings.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], settings.port).into();
    info!(target = "storeops.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    classifier: Arc<Classifier>,
    monitor: JobMonitor,
    chat: ChatService,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn build_router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .nest(
            "/categories",
            Router::new()
                .route("/classify", post(classify))
                .route("/classify/bulk", post(classify_bulk)),
        )
        .route("/jobs", get(list_jobs))
        .nest(
            "/jobs",
            Router::new()
                .route("/{id}", get(get_job))
                .route("/{id}/watch", post(watch_job))
                .route("/{id}/cancel", post(cancel_job))
                .route("/{id}/events", post(inject_event)),
        )
        .route("/chat", post(chat_message))
        .route("/chat/{session}/history", get(chat_history))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "storeops-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret.as_str() {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

fn classify_one(classifier: &Classifier, request: &ClassifyRequest) -> ClassifyResponse {
    let category = classifier.classify(request.product_type.as_deref());
    metrics::classification(&category.id, &category == classifier.default_category());
    ClassifyResponse {
        category,
        condition: request
            .condition
            .as_deref()
            .map(|text| match_condition(Some(text))),
    }
}

/// Map a product type (and optionally a condition note) to eBay ids.
///
/// - Method: `POST`
/// - Path: `/categories/classify`
/// - Body: `ClassifyRequest`
async fn classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Json<ClassifyResponse> {
    metrics::inc_requests("/categories/classify");
    Json(classify_one(&state.classifier, &request))
}

/// Classify many products in one call. Results keep the request order.
async fn classify_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkClassifyRequest>,
) -> Result<Json<BulkClassifyResponse>, AppError> {
    metrics::inc_requests("/categories/classify/bulk");
    if request.items.len() > BULK_CLASSIFY_MAX {
        return Err(AppError::invalid_input(
            "too_many_items",
            format!("at most {BULK_CLASSIFY_MAX} items per call"),
        ));
    }
    let results = request
        .items
        .iter()
        .map(|item| classify_one(&state.classifier, item))
        .collect();
    Ok(Json(BulkClassifyResponse { results }))
}

async fn list_jobs(State(state): State<AppState>) -> Json<JobsResponse> {
    metrics::inc_requests("/jobs");
    let jobs = state
        .monitor
        .jobs()
        .await
        .into_iter()
        .map(JobView::from)
        .collect();
    Json(JobsResponse { jobs })
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, AppError> {
    metrics::inc_requests("/jobs/{id}");
    state
        .monitor
        .job(&id)
        .await
        .map(|job| Json(JobView::from(job)))
        .ok_or_else(|| AppError::not_found("job_not_found", id))
}

async fn watch_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<WatchResponse>), AppError> {
    metrics::inc_requests("/jobs/{id}/watch");
    let id = valid_job_id(id)?;
    let started = state.monitor.watch(&id).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(WatchResponse {
            job_id: id,
            already_watching: !started,
        }),
    ))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    metrics::inc_requests("/jobs/{id}/cancel");
    let id = valid_job_id(id)?;
    state.monitor.cancel(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Feed one raw channel payload into the reconciler, for hosts that own the
/// event transport themselves.
async fn inject_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<StatusCode, AppError> {
    metrics::inc_requests("/jobs/{id}/events");
    let Some(message) = decode_message(&body) else {
        return Err(AppError::invalid_input(
            "invalid_event",
            "payload is neither a step event nor a snapshot",
        ));
    };
    if message.job_id() != id {
        return Err(AppError::invalid_input(
            "job_id_mismatch",
            format!("event names job {}", message.job_id()),
        ));
    }
    state.monitor.ingest(message).await;
    Ok(StatusCode::ACCEPTED)
}

async fn chat_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    metrics::inc_requests("/chat");
    if request.message.trim().is_empty() {
        return Err(AppError::invalid_input("empty_message", "message is required"));
    }
    let session_id = request
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    Ok(Json(state.chat.handle(&session_id, &request.message).await))
}

async fn chat_history(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Vec<ChatEntry>>, AppError> {
    metrics::inc_requests("/chat/{session}/history");
    let entries = state.chat.history().load(&session).await?;
    Ok(Json(entries))
}

fn valid_job_id(id: String) -> Result<String, AppError> {
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(AppError::invalid_input("invalid_job_id", "job id is empty"));
    }
    Ok(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    InvalidInput,
    NotFound,
    Upstream,
    Internal,
}

#[derive(Debug)]
struct AppError {
    kind: ErrorKind,
    error: &'static str,
    detail: String,
}

impl AppError {
    fn new(kind: ErrorKind, error: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            error,
            detail: detail.into(),
        }
    }

    fn invalid_input(error: &'static str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, error, detail)
    }

    fn not_found(error: &'static str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, error, detail)
    }
}

impl From<ApiCallError> for AppError {
    fn from(value: ApiCallError) -> Self {
        match value {
            ApiCallError::Status(404) => Self::not_found("job_not_found", value.to_string()),
            ApiCallError::Deserialize(_) => {
                Self::new(ErrorKind::Internal, "pipeline_response", value.to_string())
            }
            other => Self::new(ErrorKind::Upstream, "pipeline_unavailable", other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::new(ErrorKind::Upstream, "store_unavailable", value.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(target = "storeops.api", error = self.error, detail = %self.detail, "request failed");
        }
        let payload = ApiError {
            error: self.error.to_string(),
            detail: Some(self.detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

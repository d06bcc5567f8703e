//! HTTP endpoint layer.
//!
//! A thin JSON API over the reconciliation engine and the job monitor, for
//! callers that drive reconciliation from a web backend and poll job status
//! from a browser.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/kb/reconcile` | Reconcile a user's knowledge base and start/resume indexing |
//! | `GET`  | `/jobs/{id}` | One status fetch for an indexing job |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/jobs/{id}` never blocks on the job: clients poll it on their own cadence
//! (every 2 seconds in the chat UI).
//!
//! # Error Contract
//!
//! ```json
//! { "errorKind": "INDEXING_CONFLICT_UNRESOLVED", "message": "..." }
//! ```
//!
//! `errorKind` is the engine's error kind, or `BAD_REQUEST` / `NOT_FOUND` /
//! `INTERNAL` for failures outside the engine. Request and response bodies
//! use camelCase field names.
//!
//! # State
//!
//! When `[db]` is configured, `/kb/reconcile` loads the user's stored
//! snapshot, uses its last job id as the resume hint when the request does
//! not carry one, and saves the updated snapshot afterwards.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{ErrorKind, ReconcileError};
use crate::gateway::{HttpGateway, ResourceGateway};
use crate::models::{JobStatus, ReconcileRequest, ReconcileSummary, UserKbState};
use crate::monitor::JobMonitor;
use crate::reconcile::Reconciler;
use crate::state_store::StateStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    gateway: Arc<dyn ResourceGateway>,
    store: Option<StateStore>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        gateway: Arc<dyn ResourceGateway>,
        store: Option<StateStore>,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
        }
    }
}

/// Starts the HTTP server against the real platform.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let gateway: Arc<dyn ResourceGateway> = Arc::new(HttpGateway::from_config(&config.platform)?);
    let store = match &config.db {
        Some(db) => Some(StateStore::open(db).await?),
        None => None,
    };
    let state = AppState::new(Arc::new(config.clone()), gateway, store);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("kbsync server listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// The application router, with CORS open to all origins.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/kb/reconcile", post(handle_reconcile))
        .route("/jobs/{id}", get(handle_job_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_kind: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error_kind: self.kind,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        kind: "BAD_REQUEST".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        kind: "INTERNAL".to_string(),
        message: format!("{:#}", err),
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        let status = match err.kind {
            ErrorKind::ConfigMissing => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::IndexingConflictUnresolved => StatusCode::CONFLICT,
            ErrorKind::IndexingTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        AppError {
            status,
            kind: err.kind.as_str().to_string(),
            message: err.message,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /kb/reconcile ============

async fn handle_reconcile(
    State(state): State<AppState>,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileSummary>, AppError> {
    for (field, value) in [
        ("userId", &req.user_id),
        ("kbName", &req.kb_name),
        ("desiredItemPath", &req.desired_item_path),
        ("bucketName", &req.bucket_name),
    ] {
        if value.trim().is_empty() {
            return Err(bad_request(format!("{} must not be empty", field)));
        }
    }

    let reconciler = Reconciler::new(state.gateway.as_ref(), &state.config.provisioning);

    let outcome = match &state.store {
        Some(store) => {
            let mut snapshot: UserKbState = store
                .load_or_new(&req.user_id, &req.kb_name)
                .await
                .map_err(internal)?;
            if req.resume_job_id.is_some() {
                snapshot.last_indexing_job_id = req.resume_job_id.clone();
            }
            let (outcome, next) = reconciler
                .reconcile_state(&snapshot, &req.desired_item_path, &req.bucket_name)
                .await?;
            store.save(&next).await.map_err(internal)?;
            outcome
        }
        None => reconciler.reconcile(&req).await?,
    };

    Ok(Json(ReconcileSummary::from(&outcome)))
}

// ============ GET /jobs/{id} ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResponse {
    job_id: String,
    status: JobStatus,
    progress: Option<f64>,
    error: Option<String>,
}

async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let monitor = JobMonitor::new(state.gateway.as_ref());
    let job = monitor.status(&id).await.map_err(|e| {
        if e.is_not_found() {
            AppError {
                status: StatusCode::NOT_FOUND,
                kind: "NOT_FOUND".to_string(),
                message: e.upstream_message(),
            }
        } else {
            ReconcileError::upstream(ErrorKind::UpstreamError, &e).into()
        }
    })?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        progress: job.progress,
        error: job.error,
    }))
}

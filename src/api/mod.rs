//! HTTP API for session control, health checks, and monitoring
//!
//! Sessions map one-to-one to open supply dialogs: the front end opens a
//! session, pushes selection changes, confirms, and closes the session when
//! the dialog goes away. Everything stateful happens inside the flow
//! engine; the handlers here only translate HTTP into engine calls.

use crate::config::ApiConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::flow::{FlowEngine, SessionSummary};
use crate::position::{AssetSelection, ChainRef, PositionForm, TokenRef};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FlowEngine>,
    pub started_at: DateTime<Utc>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, engine: Arc<FlowEngine>) -> OrchestratorResult<()> {
    let state = AppState {
        engine,
        started_at: Utc::now(),
    };

    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API server error: {}", e)))?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/sessions", get(list_sessions).post(open_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/source", put(update_source))
        .route("/sessions/:id/confirm", post(confirm_session))
        .route("/sessions/:id/close", post(close_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - reject traffic once the session table is full
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.engine.session_count();
    let capacity = state.engine.capacity();
    let ready = sessions < capacity;

    let body = Json(ReadinessResponse {
        ready,
        sessions,
        capacity,
    });

    if ready {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

/// Get orchestrator status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.engine.instance_id().to_string(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds().max(0) as u64,
        sessions: state.engine.session_count(),
        open_sessions: state.engine.open_count(),
        states: state.engine.state_counts().await,
    })
}

/// List all sessions, including recently closed ones
async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.session_summaries().await)
}

/// Open a session for a new supply dialog
async fn open_session(
    State(state): State<AppState>,
    Json(req): Json<OpenSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let form = PositionForm::new(req.source, req.destination);
    let session_id = state.engine.open_session(form).await?;
    Ok((StatusCode::CREATED, Json(OpenSessionResponse { session_id })))
}

/// Get one session
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    Ok(Json(state.engine.session_summary(id).await?))
}

/// Update the source selection
async fn update_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSourceRequest>,
) -> Result<Json<SessionSummary>, ApiError> {
    state
        .engine
        .update_source(id, req.token, req.chain, req.amount)
        .await?;
    Ok(Json(state.engine.session_summary(id).await?))
}

/// Trigger the supply action
async fn confirm_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    state.engine.confirm(id).await?;
    Ok(Json(state.engine.session_summary(id).await?))
}

/// Close the dialog behind a session
async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    state.engine.close_session(id).await?;
    Ok(Json(state.engine.session_summary(id).await?))
}

/// Error wrapper translating engine errors into HTTP responses
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            OrchestratorError::SessionClosed { .. }
            | OrchestratorError::SupplyNotReady { .. }
            | OrchestratorError::SupplyAlreadyDispatched
            | OrchestratorError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OrchestratorError::SessionLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
            e if e.is_caller_fault() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

// Request types

#[derive(Deserialize)]
struct OpenSessionRequest {
    #[serde(default)]
    source: AssetSelection,
    destination: AssetSelection,
}

#[derive(Deserialize)]
struct UpdateSourceRequest {
    token: Option<TokenRef>,
    chain: Option<ChainRef>,
    amount: Option<String>,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    sessions: usize,
    capacity: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    instance_id: String,
    uptime_seconds: u64,
    /// Resident sessions, including closed ones not yet swept.
    sessions: usize,
    /// Sessions whose dialog is still open.
    open_sessions: usize,
    states: HashMap<&'static str, usize>,
}

#[derive(Serialize)]
struct OpenSessionResponse {
    session_id: Uuid,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

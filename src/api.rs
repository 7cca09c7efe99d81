//! REST API server for the finance SQL agent
//!
//! Frames the `answer` contract over HTTP. Authentication and user-id
//! extraction happen in front of this service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::agent::{CancellationToken, Supervisor};
use crate::audit::RunLog;
use crate::models::{AgentStatus, Message, UserId};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: UserId,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub run_id: Uuid,
    pub answer: String,
    pub status: AgentStatus,
    pub attempts: u32,
    pub warning: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Arc<Supervisor>,
    pub run_log: RunLog,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if !req.messages.iter().any(|m| matches!(m, Message::User(_))) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No user message found".into())),
        );
    }

    info!(user_id = %req.user_id, turns = req.messages.len(), "Chat request received");

    // The run lives in its own task. If the client goes away this handler is
    // dropped, the guard fires and the run stops after its current step.
    let token = CancellationToken::new();
    let guard = token.drop_guard();
    let supervisor = state.supervisor.clone();
    let user_id = req.user_id;
    let handle = tokio::spawn(async move { supervisor.run(req.messages, user_id, &token).await });

    let run = match handle.await {
        Ok(run) => run,
        Err(e) => {
            error!(user_id = %user_id, "Agent task failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Agent run failed".into())),
            );
        }
    };
    guard.disarm();

    let reply = ChatReply {
        run_id: run.run_id,
        answer: run.answer,
        status: run.status,
        attempts: run.attempts,
        warning: run.warning,
    };
    (StatusCode::OK, Json(ApiResponse::success(reply)))
}

/// =============================
/// Run Inspection
/// =============================

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.run_log.get(run_id).await {
        Ok(Some(run)) => (StatusCode::OK, Json(ApiResponse::success(run))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Run {} not found", run_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn list_user_runs(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.run_log.list_for_user(UserId(user_id)).await {
        Ok(ids) => (StatusCode::OK, Json(ApiResponse::success(ids))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Stored runs grouped by the SQL they last executed, most frequent first.
async fn query_fingerprints(State(state): State<ApiState>) -> Json<ApiResponse> {
    let fingerprints: Vec<serde_json::Value> = state
        .run_log
        .fingerprint_counts()
        .await
        .into_iter()
        .map(|(fingerprint, runs)| serde_json::json!({"fingerprint": fingerprint, "runs": runs}))
        .collect();

    Json(ApiResponse::success(serde_json::json!({
        "total_runs": state.run_log.len().await,
        "fingerprints": fingerprints,
    })))
}

/// =============================
/// Router
/// =============================

/// Routes for `supervisor`. Runs are recorded in the supervisor's run log,
/// or in a fresh one when it has none.
pub fn create_router(supervisor: Supervisor) -> Router {
    let (supervisor, run_log) = match supervisor.run_log().cloned() {
        Some(log) => (supervisor, log),
        None => {
            let log = RunLog::new();
            (supervisor.with_run_log(log.clone()), log)
        }
    };

    let state = ApiState {
        supervisor: Arc::new(supervisor),
        run_log,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/users/:user_id/runs", get(list_user_runs))
        .route("/api/fingerprints", get(query_fingerprints))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(supervisor: Supervisor, port: u16) -> crate::Result<()> {
    let router = create_router(supervisor);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

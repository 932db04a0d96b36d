//! REST API for short-term memory
//!
//! Thin request/response mapping over `ShortTermMemory`. Store and
//! summarizer outages surface as 503 so callers can tell transient
//! infrastructure failure apart from bad input or bugs.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::MemoryError;
use crate::models::{Message, SessionConfig};
use crate::service::AppContext;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AddMessagesRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
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

type ApiResult = (StatusCode, Json<ApiResponse>);

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<AppContext>,
}

/// =============================
/// Error Mapping
/// =============================

pub fn status_for(err: &MemoryError) -> StatusCode {
    match err {
        MemoryError::StoreUnavailable(_) | MemoryError::SummarizerUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        MemoryError::VersionConflict { .. } => StatusCode::CONFLICT,
        MemoryError::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
        MemoryError::CorruptRecord { .. } | MemoryError::SerializationError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn failure(err: MemoryError) -> ApiResult {
    let status = status_for(&err);
    let message = if status == StatusCode::SERVICE_UNAVAILABLE {
        format!("Temporarily unavailable: {}", err)
    } else {
        err.to_string()
    };
    warn!(%status, "request failed: {}", err);
    (status, Json(ApiResponse::error(message)))
}

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// STM Endpoints
/// =============================

async fn add_messages(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(req): Json<AddMessagesRequest>,
) -> ApiResult {
    match state.ctx.memory.append(&session_id, req.messages).await {
        Ok(stored) => ok(serde_json::json!({
            "session_id": session_id,
            "added": stored.len(),
            "messages": stored,
        })),
        Err(e) => failure(e),
    }
}

async fn get_context(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    match state.ctx.memory.context(&session_id).await {
        Ok(context) => ok(context),
        Err(e) => failure(e),
    }
}

async fn get_messages(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    match state.ctx.memory.list(&session_id, query.limit).await {
        Ok(messages) => ok(serde_json::json!({
            "session_id": session_id,
            "messages": messages,
        })),
        Err(e) => failure(e),
    }
}

async fn delete_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    match state.ctx.memory.delete_session(&session_id).await {
        Ok(()) => ok(serde_json::json!({
            "session_id": session_id,
            "deleted": true,
        })),
        Err(e) => failure(e),
    }
}

async fn update_config(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(req): Json<SessionConfig>,
) -> ApiResult {
    match state.ctx.memory.set_config(&session_id, req).await {
        Ok(config) => ok(serde_json::json!({
            "session_id": session_id,
            "config": config,
        })),
        Err(e) => failure(e),
    }
}

async fn get_config(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    match state.ctx.memory.config(&session_id).await {
        Ok(config) => ok(serde_json::json!({
            "session_id": session_id,
            "config": config,
        })),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let state = ApiState { ctx };

    let stm = Router::new()
        .route("/:session_id", axum::routing::delete(delete_session))
        .route("/:session_id/messages", post(add_messages).get(get_messages))
        .route("/:session_id/context", get(get_context))
        .route("/:session_id/config", get(get_config).put(update_config));

    Router::new()
        .route("/health", get(health))
        .nest("/stm", stm)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    ctx: Arc<AppContext>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(ctx);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

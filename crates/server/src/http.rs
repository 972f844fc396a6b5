//! HTTP endpoints
//!
//! Operational surface next to the websocket: health, readiness, and session
//! inspection.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::websocket::WebSocketHandler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // WebSocket
        .route("/ws", get(WebSocketHandler::handle))
        // Session inspection
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id", delete(delete_session))
        // Health checks
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// List sessions
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.list();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

/// Get session info
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let session = state.sessions.get(&id).ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "closed": session.is_closed(),
        "activated": session.is_activated(),
        "phase": format!("{:?}", session.phase()),
        "history_entries": session.history().len(),
    })))
}

/// Delete session
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.sessions.destroy(&id).await;
    StatusCode::NO_CONTENT
}

/// Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "sessions": state.sessions.count(),
        "modules": state.module_status(),
    }))
}

use std::sync::Arc;

use aci_core::AciLockState;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/gatekeeper/state", get(lock_state))
        .route("/api/gatekeeper/config", get(config))
        .route("/api/gatekeeper/unlock", post(unlock))
        .route("/api/gatekeeper/lock", post(lock))
}

async fn lock_state(State(state): State<Arc<AppState>>) -> Json<AciLockState> {
    Json(state.gatekeeper.state().await)
}

async fn config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let authority = &state.config.authority;
    Json(json!({
        "aci_id": state.config.aci_id,
        "flygate_base_url": authority.base_url,
        "poll_interval_ms": authority.poll_interval_ms,
        "duty_ttl_max_seconds": authority.duty_ttl_max_seconds,
        "request_timeout_ms": authority.request_timeout_ms,
        "enabled": state.gatekeeper.is_enabled(),
        "polling": state.gatekeeper.is_running().await,
    }))
}

async fn unlock(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.gatekeeper.manual_unlock().await;
    Json(json!({ "status": "OK", "state": snapshot }))
}

#[derive(Deserialize)]
struct LockRequest {
    reason: Option<String>,
}

/// Body is optional; when present it may carry `{"reason": "..."}`.
async fn lock(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let reason = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<LockRequest>(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid lock request: {e}")))?
            .reason
            .filter(|r| !r.is_empty())
    };

    let snapshot = state.gatekeeper.manual_lock(reason.as_deref()).await;
    Ok(Json(json!({ "status": "OK", "state": snapshot })))
}

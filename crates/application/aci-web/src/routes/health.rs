use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::AppState;

pub const SERVICE_NAME: &str = "FlyGate ACI Console";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/aci/health", get(health))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().timestamp_millis(),
        "ready": true,
    }))
}

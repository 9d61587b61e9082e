//! Device session endpoints under `/api/aci`.

use std::sync::Arc;

use aci_core::{DeviceSessionState, HandshakePayload};
use aci_crypto::{parse_public_key_base64, parse_public_key_pem};
use aci_session::{Capabilities, IssuedNonce, TrustedDevice, UpsertOutcome};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::routes::json_body;
use crate::AppState;

pub fn router(enable_simulation: bool) -> Router<Arc<AppState>> {
    let router = Router::new()
        .route("/api/aci/status", get(status))
        .route("/api/aci/capabilities", get(capabilities))
        .route("/api/aci/devices", get(devices))
        .route("/api/aci/devices/register", post(register_device))
        .route("/api/aci/nonce", get(nonce))
        .route("/api/aci/handshake", post(handshake))
        .route("/api/aci/usb/attached/:device_id", post(usb_attached))
        .route("/api/aci/usb/detached", post(usb_detached));

    if !enable_simulation {
        return router;
    }
    router
        .route("/api/aci/simulate/attach/:device_id", post(simulate_attach))
        .route("/api/aci/simulate/detach", post(simulate_detach))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<DeviceSessionState> {
    Json(state.session.status().await)
}

async fn capabilities(State(state): State<Arc<AppState>>) -> Json<Capabilities> {
    Json(state.session.capabilities().await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceView {
    device_id: String,
    device_name: String,
    has_public_key: bool,
    public_key_base64: Option<String>,
}

impl From<TrustedDevice> for DeviceView {
    fn from(device: TrustedDevice) -> Self {
        Self {
            has_public_key: device.verification_key.is_some(),
            public_key_base64: device.public_key_base64(),
            device_id: device.device_id,
            device_name: device.device_name,
        }
    }
}

async fn devices(State(state): State<Arc<AppState>>) -> Json<Value> {
    let devices: Vec<DeviceView> =
        state.registry.list().await.into_iter().map(Into::into).collect();
    Json(json!({ "devices": devices }))
}

#[derive(Deserialize)]
struct NonceQuery {
    device_id: Option<String>,
}

async fn nonce(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NonceQuery>,
) -> Result<Json<IssuedNonce>, ApiError> {
    let device_id = query.device_id.as_deref().filter(|id| !id.is_empty());
    if device_id.is_none() && !state.config.session.allow_unbound_nonce {
        return Err(ApiError::bad_request("Missing device_id query parameter"));
    }
    Ok(Json(state.session.issue_nonce(device_id).await?))
}

#[derive(Deserialize)]
struct HandshakeRequest {
    payload: Option<HandshakePayload>,
    signature_b64: Option<String>,
}

async fn handshake(
    State(state): State<Arc<AppState>>,
    body: Result<Json<HandshakeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request = json_body(body)?;
    let (Some(payload), Some(signature)) = (
        request.payload,
        request.signature_b64.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing payload or signature_b64"));
    };

    let accepted = state.session.verify_handshake(&payload, &signature).await?;
    let session = state.session.status().await;

    Ok(Json(json!({
        "status": "OK",
        "dutyState": session.duty_state,
        "activeAppIds": session.active_app_ids,
        "deviceId": accepted.device_id,
        "deviceName": accepted.device_name,
    })))
}

async fn usb_attached(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .session
        .on_device_attached(&device_id)
        .await
        .map_err(ApiError::not_found)?;

    Ok(Json(json!({
        "status": "OK",
        "message": format!("Device {device_id} attached, awaiting handshake"),
        "state": state.session.status().await,
    })))
}

async fn usb_detached(State(state): State<Arc<AppState>>) -> Json<Value> {
    let session = state.session.on_device_detached().await;
    Json(json!({
        "status": "OK",
        "message": "Device detached",
        "state": session,
    }))
}

async fn simulate_attach(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .session
        .simulate_attach(&device_id)
        .await
        .map_err(ApiError::not_found)?;

    Ok(Json(json!({
        "status": "OK",
        "message": format!("Simulated attach of {device_id}"),
        "state": session,
    })))
}

async fn simulate_detach(State(state): State<Arc<AppState>>) -> Json<Value> {
    let session = state.session.simulate_detach().await;
    Json(json!({
        "status": "OK",
        "message": "Simulated detach",
        "state": session,
    }))
}

#[derive(Deserialize)]
struct RegisterRequest {
    #[serde(alias = "deviceId")]
    device_id: Option<String>,
    #[serde(alias = "deviceName")]
    device_name: Option<String>,
    public_key_pem: Option<String>,
    public_key_base64: Option<String>,
    public_key_jwk: Option<Value>,
}

async fn register_device(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request = json_body(body)?;
    let (Some(device_id), Some(device_name)) = (
        request.device_id.filter(|s| !s.is_empty()),
        request.device_name.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing device_id or device_name"));
    };

    let parsed = if let Some(pem) = request.public_key_pem.as_deref() {
        parse_public_key_pem(pem)
    } else if let Some(encoded) = request.public_key_base64.as_deref() {
        parse_public_key_base64(encoded)
    } else if request.public_key_jwk.is_some() {
        return Err(ApiError::bad_request(
            "JWK format not supported. Provide public_key_pem or public_key_base64",
        ));
    } else {
        return Err(ApiError::bad_request(
            "Missing public key. Provide public_key_pem (PEM) or public_key_base64 (raw or DER)",
        ));
    };
    let key = parsed.map_err(|e| ApiError::bad_request(e.to_string()))?;

    let outcome = state.registry.upsert(&device_id, &device_name, Some(key)).await;
    let verb = match outcome {
        UpsertOutcome::Inserted => "registered",
        UpsertOutcome::Updated => "updated",
    };

    Ok(Json(json!({
        "status": "OK",
        "message": format!("Device {device_name} {verb}."),
        "device_id": device_id,
    })))
}

//! Companion-device side of the handshake.
//!
//! Key files hold the 32-byte Ed25519 seed as one line of standard base64.

use std::path::{Path, PathBuf};

use aci_core::HandshakePayload;
use aci_crypto::{encode_public_key, sign_canonical, SigningKey};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Subcommand;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// Generate an Ed25519 key pair
    Keygen {
        /// Write the private seed here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Register a device's public key with a console
    Register {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,

        #[arg(long)]
        device_id: String,

        #[arg(long)]
        device_name: String,

        /// Private key file from `aci device keygen`
        #[arg(short, long)]
        key: PathBuf,
    },

    /// Fetch a nonce, sign it and complete the handshake
    Handshake {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,

        #[arg(long)]
        device_id: String,

        #[arg(short, long)]
        key: PathBuf,
    },
}

pub async fn run(command: DeviceCommands) -> Result<()> {
    match command {
        DeviceCommands::Keygen { output } => keygen(output.as_deref()),
        DeviceCommands::Register { server, device_id, device_name, key } => {
            register(&server, &device_id, &device_name, &key).await
        }
        DeviceCommands::Handshake { server, device_id, key } => {
            handshake(&server, &device_id, &key).await
        }
    }
}

fn keygen(output: Option<&Path>) -> Result<()> {
    let key = SigningKey::generate(&mut OsRng);
    let seed = STANDARD.encode(key.to_bytes());

    match output {
        Some(path) => {
            std::fs::write(path, format!("{seed}\n"))
                .with_context(|| format!("writing {}", path.display()))?;
            println!("private key: {}", path.display());
        }
        None => println!("private key: {seed}"),
    }
    println!("public_key_base64: {}", encode_public_key(&key.verifying_key()));
    Ok(())
}

fn read_key(path: &Path) -> Result<SigningKey> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let bytes = STANDARD.decode(raw.trim()).context("key file is not base64")?;
    let seed: [u8; 32] = match bytes.try_into() {
        Ok(seed) => seed,
        Err(bytes) => bail!("key file holds {} bytes, expected 32", bytes.len()),
    };
    Ok(SigningKey::from_bytes(&seed))
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}{}", server.trim_end_matches('/'), path)
}

/// Body of a 2xx response, or the console's error message.
async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("no error message");
        bail!("{status}: {message}");
    }
    Ok(body)
}

async fn register(server: &str, device_id: &str, device_name: &str, key_path: &Path) -> Result<()> {
    let key = read_key(key_path)?;
    let response = reqwest::Client::new()
        .post(endpoint(server, "/api/aci/devices/register"))
        .json(&json!({
            "device_id": device_id,
            "device_name": device_name,
            "public_key_base64": encode_public_key(&key.verifying_key()),
        }))
        .send()
        .await
        .context("contacting console")?;

    let body = read_json(response).await?;
    println!("{}", body["message"].as_str().unwrap_or("registered"));
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedNonce {
    nonce: String,
    ttl_seconds: i64,
}

async fn handshake(server: &str, device_id: &str, key_path: &Path) -> Result<()> {
    let key = read_key(key_path)?;
    let client = reqwest::Client::new();

    let response = client
        .get(endpoint(server, "/api/aci/nonce"))
        .query(&[("device_id", device_id)])
        .send()
        .await
        .context("requesting nonce")?;
    let issued: IssuedNonce = serde_json::from_value(read_json(response).await?)?;
    tracing::info!(ttl_seconds = issued.ttl_seconds, "nonce received");

    let payload = HandshakePayload {
        nonce: issued.nonce,
        timestamp_seconds: chrono::Utc::now().timestamp(),
        device_id: device_id.to_string(),
    };
    let signature = sign_canonical(&key, &payload)?;

    let response = client
        .post(endpoint(server, "/api/aci/handshake"))
        .json(&json!({ "payload": payload, "signature_b64": signature }))
        .send()
        .await
        .context("sending handshake")?;
    let body = read_json(response).await?;

    println!(
        "{} ({}) -> {}",
        body["deviceName"].as_str().unwrap_or(device_id),
        body["deviceId"].as_str().unwrap_or(device_id),
        body["dutyState"].as_str().unwrap_or("?"),
    );
    Ok(())
}

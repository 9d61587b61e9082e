//! Lock state observer.
//!
//! Connects to `/ws`, prints each frame, and reconnects with a fixed backoff.
//! While disconnected the lock state is reported as unknown.

use std::time::Duration;

use aci_core::AciLockState;
use anyhow::Result;
use futures::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    data: AciLockState,
}

pub async fn run(url: &str) -> Result<()> {
    loop {
        match tokio_tungstenite::connect_async(url).await {
            Ok((mut socket, _)) => {
                tracing::info!(url, "observer connected");
                while let Some(message) = socket.next().await {
                    match message {
                        Ok(Message::Text(text)) => print_frame(&text),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("observer stream error: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => tracing::debug!("connect failed: {}", e),
        }

        println!("{}  lock_state=unknown (disconnected)", now());
        tracing::info!("reconnecting in {}s", RECONNECT_DELAY.as_secs());
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn print_frame(text: &str) {
    match serde_json::from_str::<Frame>(text) {
        Ok(frame) => println!("{}  {}", now(), describe(&frame)),
        Err(e) => tracing::warn!("unreadable frame: {}", e),
    }
}

fn describe(frame: &Frame) -> String {
    let state = &frame.data;
    let mut line = format!(
        "[{}] {} lock_state={} flygate={}",
        frame.kind,
        state.aci_id,
        state.lock_state,
        if state.authority.reachable { "reachable" } else { "unreachable" },
    );
    if let Some(error) = &state.last_error {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line
}

fn now() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_state_change_frames() {
        let text = r#"{"type":"state_change","data":{"aci_id":"aci-1","lock_state":"LOCKED",
            "last_verified_at":null,"last_error":"TTL expired",
            "flygate":{"reachable":true,"last_seen_at":null}}}"#;
        let frame: Frame = serde_json::from_str(text).unwrap();
        assert_eq!(
            describe(&frame),
            "[state_change] aci-1 lock_state=LOCKED flygate=reachable error=\"TTL expired\""
        );
    }
}

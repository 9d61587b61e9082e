//! Realtime Broadcaster
//!
//! Fans gatekeeper transitions out to connected observers. Each observer gets
//! a bounded queue of pre-encoded JSON text frames; the snapshot is queued
//! before the observer is registered, so it always arrives first.

use std::collections::HashMap;
use std::sync::Arc;

use aci_core::AciLockState;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::gatekeeper::GateSignal;

/// Frames buffered per observer before new ones are dropped for it.
pub const OBSERVER_BUFFER: usize = 32;

/// Wire frame: `{"type": "snapshot" | "state_change", "data": AciLockState}`.
#[derive(Debug, Serialize)]
pub struct ObserverMessage<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: &'a AciLockState,
}

impl<'a> ObserverMessage<'a> {
    pub fn snapshot(data: &'a AciLockState) -> Self {
        Self { kind: "snapshot", data }
    }

    pub fn state_change(data: &'a AciLockState) -> Self {
        Self { kind: "state_change", data }
    }

    fn encode(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!("failed to encode observer message: {}", e);
                None
            }
        }
    }
}

/// Handle returned to a new observer.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub messages: mpsc::Receiver<String>,
}

#[derive(Debug)]
struct Inner {
    snapshot: AciLockState,
    observers: HashMap<Uuid, mpsc::Sender<String>>,
}

#[derive(Debug)]
pub struct Broadcaster {
    inner: Mutex<Inner>,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(initial: AciLockState) -> Self {
        Self::with_buffer(initial, OBSERVER_BUFFER)
    }

    pub fn with_buffer(initial: AciLockState, buffer: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot: initial,
                observers: HashMap::new(),
            }),
            buffer: buffer.max(1),
        }
    }

    /// Register an observer with the current snapshot already queued.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        let mut inner = self.inner.lock().await;
        if let Some(frame) = ObserverMessage::snapshot(&inner.snapshot).encode() {
            let _ = tx.try_send(frame);
        }
        inner.observers.insert(id, tx);
        tracing::debug!(observer = %id, observers = inner.observers.len(), "observer connected");

        Subscription { id, messages: rx }
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        let mut inner = self.inner.lock().await;
        if inner.observers.remove(&id).is_some() {
            let remaining = inner.observers.len();
            tracing::debug!(observer = %id, observers = remaining, "observer disconnected");
        }
    }

    /// Send a `state_change` frame to every observer. Closed observers are
    /// dropped; full ones miss this frame. Returns how many received it.
    pub async fn publish(&self, state: AciLockState) -> usize {
        let mut inner = self.inner.lock().await;
        inner.snapshot = state;

        let Some(frame) = ObserverMessage::state_change(&inner.snapshot).encode() else {
            return 0;
        };

        let mut delivered = 0;
        inner.observers.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(observer = %id, "observer lagging, frame dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Update the snapshot without notifying anyone.
    pub async fn refresh(&self, state: AciLockState) {
        self.inner.lock().await.snapshot = state;
    }

    pub async fn snapshot(&self) -> AciLockState {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.lock().await.observers.len()
    }

    /// Consume gatekeeper signals until the gatekeeper is dropped.
    pub async fn run(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<GateSignal>) {
        while let Some(signal) = signals.recv().await {
            match signal {
                GateSignal::StateChanged(state) => {
                    let delivered = self.publish(state).await;
                    tracing::debug!(delivered, "state change broadcast");
                }
                GateSignal::Refreshed(state) => self.refresh(state).await,
            }
        }
    }

    /// Spawn `run` on the current runtime.
    pub fn spawn(
        self: &Arc<Self>,
        signals: mpsc::UnboundedReceiver<GateSignal>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(signals))
    }
}

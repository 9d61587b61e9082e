//! Trust Registry
//!
//! Pre-provisioned device identities. Devices are seeded at startup and may be
//! upserted later; nothing is ever removed.

use aci_config::DeviceSeed;
use aci_crypto::{encode_public_key, parse_public_key, CryptoError, VerifyingKey};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid key for device {device_id}: {source}")]
    InvalidKey {
        device_id: String,
        #[source]
        source: CryptoError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedDevice {
    pub device_id: String,
    pub device_name: String,
    pub verification_key: Option<VerifyingKey>,
}

impl TrustedDevice {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            verification_key: None,
        }
    }

    pub fn with_key(mut self, key: VerifyingKey) -> Self {
        self.verification_key = Some(key);
        self
    }

    pub fn public_key_base64(&self) -> Option<String> {
        self.verification_key.as_ref().map(encode_public_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Device table behind a single guard. Insertion order is preserved.
#[derive(Debug, Default)]
pub struct TrustRegistry {
    devices: Mutex<Vec<TrustedDevice>>,
}

impl TrustRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from devices; a later duplicate id overwrites an earlier one.
    pub fn with_devices(devices: impl IntoIterator<Item = TrustedDevice>) -> Self {
        let mut table: Vec<TrustedDevice> = Vec::new();
        for device in devices {
            match table.iter_mut().find(|d| d.device_id == device.device_id) {
                Some(existing) => *existing = device,
                None => table.push(device),
            }
        }
        Self { devices: Mutex::new(table) }
    }

    /// Build from configuration seeds, parsing any key material.
    pub fn from_seeds(seeds: &[DeviceSeed]) -> Result<Self, RegistryError> {
        let mut devices = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let mut device = TrustedDevice::new(&seed.device_id, &seed.device_name);
            if let Some(material) = &seed.public_key {
                let key = parse_public_key(material).map_err(|source| RegistryError::InvalidKey {
                    device_id: seed.device_id.clone(),
                    source,
                })?;
                device = device.with_key(key);
            }
            devices.push(device);
        }
        Ok(Self::with_devices(devices))
    }

    pub async fn lookup(&self, device_id: &str) -> Option<TrustedDevice> {
        let devices = self.devices.lock().await;
        devices.iter().find(|d| d.device_id == device_id).cloned()
    }

    /// Overwrite name and key of an existing device, or append a new one.
    pub async fn upsert(
        &self,
        device_id: &str,
        device_name: &str,
        verification_key: Option<VerifyingKey>,
    ) -> UpsertOutcome {
        let mut devices = self.devices.lock().await;
        let outcome = match devices.iter_mut().find(|d| d.device_id == device_id) {
            Some(existing) => {
                existing.device_name = device_name.to_string();
                existing.verification_key = verification_key;
                UpsertOutcome::Updated
            }
            None => {
                devices.push(TrustedDevice {
                    device_id: device_id.to_string(),
                    device_name: device_name.to_string(),
                    verification_key,
                });
                UpsertOutcome::Inserted
            }
        };
        tracing::info!(device_id, ?outcome, "trusted device registered");
        outcome
    }

    pub async fn list(&self) -> Vec<TrustedDevice> {
        self.devices.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.devices.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.lock().await.is_empty()
    }
}

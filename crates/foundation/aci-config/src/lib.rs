//! ACI Config
//!
//! Resolution order (later wins):
//!   1. Built-in defaults
//!   2. YAML file at `$ACI_CONFIG`, else `<config_dir>/aci/config.yaml` if present
//!   3. Environment variables (`ACI_ID`, `FLYGATE_BASE_URL`, ...)
//!
//! A missing shared secret is not an error: the gatekeeper then stays LOCKED.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_CONFIG_PATH: &str = "ACI_CONFIG";

/// Upper bound for nonce TTL and the duty TTL ceiling: one day.
pub const MAX_TTL_SECONDS: i64 = 86_400;

/// Result type for aci-config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid authority URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------
//  Model
// ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AciConfig {
    /// This console's identifier, echoed back in duty assertions.
    pub aci_id: String,
    pub server: ServerConfig,
    pub authority: AuthorityConfig,
    pub session: SessionConfig,
    /// Trusted devices seeded at startup.
    pub devices: Vec<DeviceSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub shared_secret: Option<String>,
    pub poll_interval_ms: u64,
    /// Ceiling on assertion age, applied on top of the assertion's own TTL.
    pub duty_ttl_max_seconds: i64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub nonce_ttl_seconds: i64,
    pub allow_unbound_nonce: bool,
    pub require_device_key: bool,
    pub enable_simulation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSeed {
    pub device_id: String,
    pub device_name: String,
    /// PEM or base64 public key.
    #[serde(default)]
    pub public_key: Option<String>,
}

impl Default for AciConfig {
    fn default() -> Self {
        Self {
            aci_id: "aci-pi4-001".to_string(),
            server: ServerConfig::default(),
            authority: AuthorityConfig::default(),
            session: SessionConfig::default(),
            devices: default_devices(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".to_string() }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: "http://flygate.local:5000".to_string(),
            shared_secret: None,
            poll_interval_ms: 2000,
            duty_ttl_max_seconds: 60,
            request_timeout_ms: 5000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_seconds: 30,
            allow_unbound_nonce: false,
            require_device_key: false,
            enable_simulation: false,
        }
    }
}

impl fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("base_url", &self.base_url)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("duty_ttl_max_seconds", &self.duty_ttl_max_seconds)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl AuthorityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn has_secret(&self) -> bool {
        self.shared_secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

fn default_devices() -> Vec<DeviceSeed> {
    vec![
        DeviceSeed {
            device_id: "FlyGateAgent-iPad-0001".to_string(),
            device_name: "Pilot iPad (FlyGate)".to_string(),
            public_key: None,
        },
        DeviceSeed {
            device_id: "FlyGateAgent-iPad-0002".to_string(),
            device_name: "Co-Pilot iPad (FlyGate)".to_string(),
            public_key: None,
        },
    ]
}

// ---------------------------------------------------------------
//  Loading
// ---------------------------------------------------------------

impl AciConfig {
    /// Defaults, then file, then process environment; validated.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ACI_ID") {
            self.aci_id = v;
        }
        if let Some(v) = lookup("ACI_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("FLYGATE_BASE_URL") {
            self.authority.base_url = v;
        }
        if let Some(v) = lookup("FLYGATE_ACI_SHARED_SECRET") {
            self.authority.shared_secret = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("POLL_INTERVAL_MS") {
            self.authority.poll_interval_ms = parse_env("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("DUTY_TTL_MAX_SECONDS") {
            self.authority.duty_ttl_max_seconds = parse_env("DUTY_TTL_MAX_SECONDS", &v)?;
        }
        if let Some(v) = lookup("FLYGATE_TIMEOUT_MS") {
            self.authority.request_timeout_ms = parse_env("FLYGATE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ACI_NONCE_TTL_SECONDS") {
            self.session.nonce_ttl_seconds = parse_env("ACI_NONCE_TTL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("ACI_ALLOW_UNBOUND_NONCE") {
            self.session.allow_unbound_nonce = parse_bool("ACI_ALLOW_UNBOUND_NONCE", &v)?;
        }
        if let Some(v) = lookup("ACI_REQUIRE_DEVICE_KEY") {
            self.session.require_device_key = parse_bool("ACI_REQUIRE_DEVICE_KEY", &v)?;
        }
        if let Some(v) = lookup("ACI_ENABLE_SIMULATION") {
            self.session.enable_simulation = parse_bool("ACI_ENABLE_SIMULATION", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.aci_id.trim().is_empty() {
            return Err(ConfigError::Invalid("aci_id must not be empty".into()));
        }
        if self.authority.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be positive".into()));
        }
        if self.authority.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("authority timeout must be positive".into()));
        }
        if !(1..=MAX_TTL_SECONDS).contains(&self.authority.duty_ttl_max_seconds) {
            return Err(ConfigError::Invalid(format!(
                "duty TTL ceiling must be between 1 and {MAX_TTL_SECONDS} seconds"
            )));
        }
        if !(1..=MAX_TTL_SECONDS).contains(&self.session.nonce_ttl_seconds) {
            return Err(ConfigError::Invalid(format!(
                "nonce TTL must be between 1 and {MAX_TTL_SECONDS} seconds"
            )));
        }

        let url = url::Url::parse(&self.authority.base_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.authority.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.authority.base_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.device_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device_id {}",
                    device.device_id
                )));
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("aci").join("config.yaml"))
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_fail_closed() {
        let config = AciConfig::default();
        assert!(!config.authority.has_secret());
        assert_eq!(config.session.nonce_ttl_seconds, 30);
        assert!(!config.session.allow_unbound_nonce);
        assert_eq!(config.devices.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AciConfig::default();
        config
            .apply_env(env(&[
                ("ACI_ID", "aci-test"),
                ("FLYGATE_ACI_SHARED_SECRET", "s3cret"),
                ("POLL_INTERVAL_MS", "250"),
                ("ACI_ENABLE_SIMULATION", "true"),
            ]))
            .unwrap();
        assert_eq!(config.aci_id, "aci-test");
        assert!(config.authority.has_secret());
        assert_eq!(config.authority.poll_interval(), Duration::from_millis(250));
        assert!(config.session.enable_simulation);
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let mut config = AciConfig::default();
        config.apply_env(env(&[("FLYGATE_ACI_SHARED_SECRET", "")])).unwrap();
        assert!(!config.authority.has_secret());
    }

    #[test]
    fn bad_number_is_reported() {
        let mut config = AciConfig::default();
        let err = config.apply_env(env(&[("POLL_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "POLL_INTERVAL_MS", .. }));
    }

    #[test]
    fn yaml_partial_file_keeps_defaults() {
        let config = AciConfig::from_yaml_str(
            "aci_id: aci-yaml\n\
             authority:\n  poll_interval_ms: 500\n\
             devices:\n  - device_id: D1\n    device_name: Test iPad\n",
        )
        .unwrap();
        assert_eq!(config.aci_id, "aci-yaml");
        assert_eq!(config.authority.poll_interval_ms, 500);
        assert_eq!(config.authority.request_timeout_ms, 5000);
        assert_eq!(config.devices.len(), 1);
        assert!(config.devices[0].public_key.is_none());
    }

    #[test]
    fn validate_rejects_bad_url_and_zero_interval() {
        let mut config = AciConfig::default();
        config.authority.base_url = "ftp://flygate".into();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));

        let mut config = AciConfig::default();
        config.authority.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_huge_ttls() {
        for var in ["ACI_NONCE_TTL_SECONDS", "DUTY_TTL_MAX_SECONDS"] {
            let mut config = AciConfig::default();
            config.apply_env(env(&[(var, "10000000000000000")])).unwrap();
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{var}");
        }

        let mut config = AciConfig::default();
        config.session.nonce_ttl_seconds = MAX_TTL_SECONDS;
        config.authority.duty_ttl_max_seconds = MAX_TTL_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_devices() {
        let mut config = AciConfig::default();
        let dup = config.devices[0].clone();
        config.devices.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let mut config = AciConfig::default();
        config.authority.shared_secret = Some("hunter2".into());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}

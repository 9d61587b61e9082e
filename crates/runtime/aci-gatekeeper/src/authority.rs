//! Duty Authority Client
//!
//! FlyGate answers `GET {base}/api/duty?nonce=..&aci_id=..` with a signed
//! `DutyAssertion`. Anything other than a 2xx JSON assertion is a transport
//! failure from the gatekeeper's point of view.

use std::time::Duration;

use aci_core::DutyAssertion;
use async_trait::async_trait;
use url::Url;

use crate::Result;

pub const DUTY_PATH: [&str; 2] = ["api", "duty"];

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthorityError {
    #[error("{0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Malformed assertion: {0}")]
    Malformed(String),

    #[error("Invalid authority URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Source of duty assertions.
#[async_trait]
pub trait DutyAuthority: Send + Sync {
    async fn fetch_assertion(&self, nonce: &str, aci_id: &str) -> Result<DutyAssertion>;
}

/// FlyGate over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpAuthority {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let invalid = |reason: String| AuthorityError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };

        let mut endpoint = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| invalid("cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(DUTY_PATH);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Request URL for one poll.
    pub fn duty_url(&self, nonce: &str, aci_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("nonce", nonce)
            .append_pair("aci_id", aci_id);
        url
    }
}

#[async_trait]
impl DutyAuthority for HttpAuthority {
    async fn fetch_assertion(&self, nonce: &str, aci_id: &str) -> Result<DutyAssertion> {
        let url = self.duty_url(nonce, aci_id);
        tracing::debug!(%url, "polling duty authority");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::Status(status.as_u16()));
        }

        response
            .json::<DutyAssertion>()
            .await
            .map_err(|e| AuthorityError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duty_url_carries_nonce_and_aci_id() {
        let authority =
            HttpAuthority::new("http://flygate.local:5000", Duration::from_secs(5)).unwrap();
        let url = authority.duty_url("abc", "aci-pi4-001");
        assert_eq!(
            url.as_str(),
            "http://flygate.local:5000/api/duty?nonce=abc&aci_id=aci-pi4-001"
        );
    }

    #[test]
    fn base_path_is_kept() {
        let authority =
            HttpAuthority::new("https://gw.example/flygate/", Duration::from_secs(5)).unwrap();
        assert_eq!(authority.endpoint().path(), "/flygate/api/duty");
    }

    #[test]
    fn garbage_base_url_is_rejected() {
        assert!(matches!(
            HttpAuthority::new("not a url", Duration::from_secs(5)),
            Err(AuthorityError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let authority =
            HttpAuthority::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = authority.fetch_assertion("n", "a").await.unwrap_err();
        assert!(matches!(err, AuthorityError::Transport(_)));
    }
}

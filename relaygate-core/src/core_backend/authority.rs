//! Remote authority client
//!
//! A remote authority answers "may this identity access the relay?" with an
//! HTTP status: 200 grants, anything else denies.

use crate::core_identity::Identity;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Remote authority errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid backend configuration: {0}")]
    Config(String),

    #[error("Backend transport error: {0}")]
    Transport(String),
}

/// Something that can be asked about an identity
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// HTTP status returned for `identity`
    async fn check(&self, identity: &Identity) -> Result<u16, BackendError>;
}

/// HTTP authority queried with `GET {base_url}{identity}`
#[derive(Debug, Clone)]
pub struct HttpRemoteAuthority {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteAuthority {
    /// Create a client with a per-request `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BackendError::Config(format!("not an http(s) url: {}", base_url)));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// URL queried for `identity`
    pub fn url_for(&self, identity: &Identity) -> String {
        format!("{}{}", self.base_url, identity)
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn check(&self, identity: &Identity) -> Result<u16, BackendError> {
        let response = self
            .client
            .get(self.url_for(identity))
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_identity::Keys;

    #[test]
    fn test_url_concatenation() {
        let authority =
            HttpRemoteAuthority::new("https://example.com/access/", Duration::from_secs(1))
                .unwrap();
        let id = Keys::generate().identity().clone();
        assert_eq!(authority.url_for(&id), format!("https://example.com/access/{}", id));
    }

    #[test]
    fn test_rejects_non_http_url() {
        let err = HttpRemoteAuthority::new("ftp://example.com/", Duration::from_secs(1));
        assert!(matches!(err, Err(BackendError::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // Port 9 on localhost is the discard service and is normally closed
        let authority =
            HttpRemoteAuthority::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let result = authority.check(Keys::generate().identity()).await;
        assert!(matches!(result, Err(BackendError::Transport(_))));
    }
}

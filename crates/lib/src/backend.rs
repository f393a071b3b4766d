//! HTTP client for the backend's non-supervisory routes.
//! Used by the host UI after launch, never by the launch sequence itself.

use crate::probe::STATUS_PATH;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shown when the backend cannot report its version.
pub const UNKNOWN_VERSION: &str = "unknown";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
}

/// Body of `GET /api/agent/versions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub current_version: String,
    #[serde(default)]
    pub available_versions: Vec<String>,
}

/// Client bound to one backend instance.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    /// Client for the backend listening on loopback `port`.
    pub fn new(port: u16) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{}", port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /status — Ok when the backend answers with a non-error status.
    pub async fn status(&self) -> Result<(), BackendError> {
        let url = format!("{}{}", self.base_url, STATUS_PATH);
        let res = self.client.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        let status = res.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(BackendError::Api(status.to_string()));
        }
        Ok(())
    }

    /// GET /api/agent/versions.
    pub async fn versions(&self) -> Result<VersionsResponse, BackendError> {
        let url = format!("{}/api/agent/versions", self.base_url);
        let res = self.client.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        Ok(res.json().await?)
    }

    /// Current agent version, or [`UNKNOWN_VERSION`] if the query fails.
    pub async fn current_version(&self) -> String {
        match self.versions().await {
            Ok(v) => v.current_version,
            Err(e) => {
                log::warn!("version query against {} failed: {}", self.base_url, e);
                UNKNOWN_VERSION.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_response_tolerates_missing_list() {
        let v: VersionsResponse = serde_json::from_str(r#"{"current_version":"1.2.0"}"#).unwrap();
        assert_eq!(v.current_version, "1.2.0");
        assert!(v.available_versions.is_empty());
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            BackendClient::with_base_url("http://127.0.0.1:9/").base_url(),
            "http://127.0.0.1:9"
        );
        assert_eq!(BackendClient::new(4000).base_url(), "http://127.0.0.1:4000");
    }

    #[tokio::test]
    async fn unreachable_backend_reports_unknown_version() {
        let port = crate::port::allocate().expect("allocate");
        let client = BackendClient::new(port);
        assert_eq!(client.current_version().await, UNKNOWN_VERSION);
        assert!(client.status().await.is_err());
    }
}

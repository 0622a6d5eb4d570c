//! JSON-over-HTTP binding of [`RemoteStore`].

use async_trait::async_trait;
use quire_core::{AuditEntry, ContentDocument, VersionEntry};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::protocol::{
    AuditsResponse, ErrorBody, ReadResponse, RollbackBody, RollbackResponse, SaveBody,
    SaveResponse, VersionsResponse, ROLLBACK_ACTION,
};
use super::{RemoteError, RemoteStore, SaveReceipt, SaveRequest};

/// HTTP remote configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpRemoteConfig {
    /// Content endpoint, e.g. `https://example.com/api/content`
    pub endpoint: String,
    /// Sent as `Authorization: Bearer ...` when set
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-request timeout (default: 10s)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl HttpRemoteConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

pub struct HttpRemote {
    client: Client,
    config: HttpRemoteConfig,
}

impl HttpRemote {
    pub fn new(config: HttpRemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let fallback = status.canonical_reason().unwrap_or("request failed").to_string();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) if !body.error.is_empty() => body.error,
            _ => fallback,
        };
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn read_document(&self) -> Result<ContentDocument, RemoteError> {
        let body: ReadResponse = self.send_json(self.client.get(self.endpoint())).await?;
        Ok(body.data)
    }

    async fn save_document(&self, request: SaveRequest) -> Result<SaveReceipt, RemoteError> {
        let body = SaveBody {
            data: &request.document,
            session_id: request.session_id,
        };
        let response: SaveResponse = self
            .send_json(self.client.put(self.endpoint()).json(&body))
            .await?;

        Ok(SaveReceipt {
            saved_at: response.saved_at,
            changed_sections: response.changed_sections,
        })
    }

    async fn read_versions(&self, limit: usize) -> Result<Vec<VersionEntry>, RemoteError> {
        let limit = limit.to_string();
        let request = self
            .client
            .get(self.endpoint())
            .query(&[("versions", "1"), ("limit", limit.as_str())]);
        let body: VersionsResponse = self.send_json(request).await?;
        Ok(body.versions)
    }

    async fn read_audits(&self, limit: usize) -> Result<Vec<AuditEntry>, RemoteError> {
        let limit = limit.to_string();
        let request = self
            .client
            .get(self.endpoint())
            .query(&[("audits", "1"), ("limit", limit.as_str())]);
        let body: AuditsResponse = self.send_json(request).await?;
        Ok(body.audits)
    }

    async fn rollback(&self, version_id: &str) -> Result<(), RemoteError> {
        let body = RollbackBody {
            action: ROLLBACK_ACTION,
            version_id,
        };
        let response = self
            .send(self.client.post(self.endpoint()).json(&body))
            .await?;

        // Any 2xx without an `error` field counts as applied; the caller
        // re-reads the document either way.
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::debug!("Rollback body unreadable, treating as applied: {e}");
                return Ok(());
            }
        };
        match serde_json::from_slice::<RollbackResponse>(&bytes) {
            Ok(RollbackResponse {
                error: Some(error), ..
            }) => Err(RemoteError::Rejected(error)),
            Ok(_) => Ok(()),
            Err(e) if !bytes.is_empty() => {
                log::debug!("Rollback body is not JSON, treating as applied: {e}");
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }
}

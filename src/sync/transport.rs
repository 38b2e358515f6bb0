//! How the sync client reaches the server.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::document::Scope;
use crate::error::SyncError;
use crate::protocol::{
    PutSettingsBody, PutSettingsResponse, SettingsResponse, SyncRequest, SyncResponse,
};

/// One request/response exchange with the settings server.
///
/// Timeouts are the transport's business and surface as
/// `SyncError::Transport` like any other failure.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// `POST /api/sync`
    async fn send(&self, request: &SyncRequest) -> Result<SyncResponse, SyncError>;

    /// `GET /api/settings`
    async fn fetch_settings(&self) -> Result<SettingsResponse, SyncError>;

    /// `PUT /api/settings/{scope}`
    async fn put_settings(
        &self,
        scope: Scope,
        body: &PutSettingsBody,
    ) -> Result<PutSettingsResponse, SyncError>;
}

/// HTTP transport with bearer-token authentication.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    server: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        server: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            server: server.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }
}

/// Map a non-success status onto the error taxonomy.
fn check_status(resp: Response, scope: Scope) -> Result<Response, SyncError> {
    match resp.status() {
        status if status.is_success() => Ok(resp),
        StatusCode::UNAUTHORIZED => Err(SyncError::Unauthenticated),
        StatusCode::FORBIDDEN => Err(SyncError::Unauthorized(scope)),
        status => Err(SyncError::Transport(format!("HTTP {}", status))),
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn send(&self, request: &SyncRequest) -> Result<SyncResponse, SyncError> {
        let url = self.url("/api/sync");
        debug!("POST {}", url);
        let resp = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        // Only the global scope is role-gated.
        let resp = check_status(resp, Scope::Global)?;
        Ok(resp.json().await?)
    }

    async fn fetch_settings(&self) -> Result<SettingsResponse, SyncError> {
        let url = self.url("/api/settings");
        debug!("GET {}", url);
        let resp = self.authorize(self.client.get(&url)).send().await?;
        let resp = check_status(resp, Scope::Global)?;
        Ok(resp.json().await?)
    }

    async fn put_settings(
        &self,
        scope: Scope,
        body: &PutSettingsBody,
    ) -> Result<PutSettingsResponse, SyncError> {
        let url = self.url(&format!("/api/settings/{}", scope));
        debug!("PUT {}", url);
        let resp = self
            .authorize(self.client.put(&url))
            .json(body)
            .send()
            .await?;
        let resp = check_status(resp, scope)?;
        Ok(resp.json().await?)
    }
}

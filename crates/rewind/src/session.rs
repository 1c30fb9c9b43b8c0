use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode, header};
use tracing::{debug, warn};

use crate::credentials::CredentialSource;
use crate::{Result, RewindError};

/// Upper bound of a playlist request unless [`HttpSession::with_timeout`] says otherwise.
pub const DEFAULT_PLAYLIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP context of a mission: client, Referer and cookie source.
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    referer: Option<String>,
    credentials: Arc<dyn CredentialSource>,
    timeout: Duration,
}

impl HttpSession {
    pub fn new(
        client: Client,
        referer: Option<String>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            client,
            referer,
            credentials,
            timeout: DEFAULT_PLAYLIST_TIMEOUT,
        }
    }

    /// Timeout applied to [`fetch_text`](Self::fetch_text).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_rotating(&self) -> bool {
        self.credentials.is_rotating()
    }

    /// GET request carrying the current cookies and Referer.
    pub fn get(&self, url: &str) -> RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(referer) = self.credentials.current_url().or_else(|| self.referer.clone()) {
            request = request.header(header::REFERER, referer);
        }
        if let Some(cookies) = self.credentials.cookie_header() {
            request = request.header(header::COOKIE, cookies);
        }
        request
    }

    /// Re-extract cookies. Failures are logged; the old cookies stay in use.
    pub async fn refresh_credentials(&self) {
        if let Err(e) = self.credentials.refresh().await {
            warn!(error = %e, "Failed to refresh credentials");
        }
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.get(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(RewindError::http_status(
                response.status(),
                url,
                "playlist fetch",
            ));
        }
        Ok(response.text().await?)
    }

    pub async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Bytes> {
        let response = self.get(url).timeout(timeout).send().await?;
        if !response.status().is_success() {
            return Err(RewindError::http_status(
                response.status(),
                url,
                "resource fetch",
            ));
        }
        Ok(response.bytes().await?)
    }

    /// Liveness check: the URL answers a GET with exactly HTTP 200.
    pub async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.get(url).timeout(timeout).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!(url, "Probe succeeded");
                true
            }
            Ok(response) => {
                debug!(url, status = %response.status(), "Probe rejected");
                false
            }
            Err(e) => {
                debug!(url, error = %e, "Probe failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("referer", &self.referer)
            .field("timeout", &self.timeout)
            .field("rotating", &self.credentials.is_rotating())
            .finish()
    }
}

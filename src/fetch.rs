//! Network fetch of remote audio payloads.

use crate::error::FetchError;
use async_trait::async_trait;
use bytes::Bytes;

/// Fetches a whole payload from a remote locator.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError>;
}

/// [`Fetcher`] over HTTP(S).
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, token: Option<String>) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        tracing::debug!("Fetching {}", locator);

        let mut request = self.client.get(locator);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        // Read the body in full; a truncated body surfaces as an error here.
        response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}

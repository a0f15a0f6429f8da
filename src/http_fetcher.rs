use crate::{AuthState, PageRenderer, SnapshotError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

const ALLOWED_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Direct HTTP strategy: one GET, redirects followed, HTML only.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, SnapshotError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SnapshotError::Transport(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    fn map_error(&self, err: reqwest::Error) -> SnapshotError {
        if err.is_timeout() {
            return SnapshotError::Timeout(self.timeout);
        }
        if let Some(status) = err.status() {
            return SnapshotError::HttpStatus(status.as_u16());
        }
        SnapshotError::Transport(err.to_string())
    }
}

pub fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    ALLOWED_CONTENT_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(mime))
}

#[async_trait]
impl PageRenderer for HttpFetcher {
    async fn fetch(&self, url: &str, _auth: &AuthState) -> Result<String, SnapshotError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_html_content_type(&content_type) {
            let shown = if content_type.is_empty() {
                "missing".to_string()
            } else {
                content_type
            };
            return Err(SnapshotError::UnsupportedContentType(shown));
        }

        let body = response.text().await.map_err(|e| self.map_error(e))?;
        debug!(url = %url, bytes = body.len(), "Fetched page over HTTP");
        Ok(body)
    }
}

//! Snapshot orchestration
//!
//! `SnapshotService` decides which strategy acquires a page, falls back to the
//! browser when the direct fetch fails, then sanitizes the markup and writes
//! the artifact under the snapshot root.

use crate::metrics;
use crate::{
    build_provenance_comment, extract_host, sanitize_filename, sanitize_html, AuthState,
    BrowserRenderer, Config, HttpFetcher, PageRenderer, RenderStrategy, SnapshotError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Number of hex digits of the content hash kept in artifact names.
const FILENAME_HASH_LEN: usize = 10;

/// A single capture request as accepted at the edges.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotRequest {
    pub url: String,
    #[serde(default)]
    pub force_browser: bool,
}

/// Where a successful capture ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    pub original_url: String,
    /// Absolute path of the artifact on disk
    pub archived_path: PathBuf,
    /// Public URL under the configured base
    pub archived_url: String,
    /// Root-relative URL served by this process
    pub relative_url: String,
    pub captured_at: DateTime<Utc>,
}

/// Capture orchestrator.
///
/// # Examples
///
/// ```rust,no_run
/// use page_snapshot::{Config, SnapshotService};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = SnapshotService::new(Arc::new(Config::default()))?;
///     let snapshot = service.create_snapshot("https://example.com", false).await?;
///     println!("Archived to {}", snapshot.archived_url);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SnapshotService {
    snapshot_root: PathBuf,
    base_url: String,
    http: Arc<dyn PageRenderer>,
    browser: Option<Arc<dyn PageRenderer>>,
    js_heavy_hosts: HashSet<String>,
    session_dir: Option<PathBuf>,
    fallback_on_unsupported: bool,
}

impl SnapshotService {
    /// Build the service with the reqwest and chromiumoxide strategies.
    pub fn new(config: Arc<Config>) -> Result<Self, SnapshotError> {
        let http: Arc<dyn PageRenderer> = Arc::new(HttpFetcher::new(config.request_timeout)?);
        let browser: Arc<dyn PageRenderer> = Arc::new(BrowserRenderer::new(config.clone()));
        Self::with_renderers(&config, http, Some(browser))
    }

    /// Build the service around arbitrary strategies.
    ///
    /// Passing `None` for `browser` leaves the service HTTP-only; captures
    /// that need a browser then fail with [`SnapshotError::NotConfigured`].
    pub fn with_renderers(
        config: &Config,
        http: Arc<dyn PageRenderer>,
        browser: Option<Arc<dyn PageRenderer>>,
    ) -> Result<Self, SnapshotError> {
        std::fs::create_dir_all(&config.snapshot_root).map_err(|e| {
            SnapshotError::Storage(format!(
                "cannot create snapshot root {}: {e}",
                config.snapshot_root.display()
            ))
        })?;
        let snapshot_root = std::fs::canonicalize(&config.snapshot_root)?;

        Ok(Self {
            snapshot_root,
            base_url: config.snapshot_base_url.trim_end_matches('/').to_string(),
            http,
            browser,
            js_heavy_hosts: config.js_heavy_host_set(),
            session_dir: config.session_dir.clone(),
            fallback_on_unsupported: config.fallback_on_unsupported_content,
        })
    }

    /// Drop the browser strategy.
    pub fn without_browser(mut self) -> Self {
        self.browser = None;
        self
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    pub fn snapshot_root(&self) -> &Path {
        &self.snapshot_root
    }

    /// Pick the primary strategy for `url`.
    pub fn select_strategy(&self, url: &str, force_browser: bool) -> RenderStrategy {
        let js_heavy = extract_host(url).is_some_and(|host| self.js_heavy_hosts.contains(&host));
        if force_browser || js_heavy {
            RenderStrategy::Browser
        } else {
            RenderStrategy::Http
        }
    }

    pub async fn capture(&self, request: &SnapshotRequest) -> Result<SnapshotMetadata, SnapshotError> {
        self.create_snapshot(&request.url, request.force_browser).await
    }

    /// Capture `url` and store the sanitized artifact.
    pub async fn create_snapshot(
        &self,
        url: &str,
        force_browser: bool,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        let captured_at = Utc::now();
        let strategy = self.select_strategy(url, force_browser);
        debug!(url = %url, strategy = ?strategy, "Selected capture strategy");

        let result = match self.acquire(url, strategy).await {
            Ok(html) => self.store(url, &html, captured_at).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(snapshot) => info!(url = %url, path = %snapshot.archived_path.display(), "Snapshot stored"),
            Err(e) => {
                metrics::record_failure(e);
                warn!(url = %url, kind = e.kind(), "Snapshot failed: {}", e);
            }
        }
        result
    }

    async fn acquire(&self, url: &str, strategy: RenderStrategy) -> Result<String, SnapshotError> {
        let mut http_error = None;

        if strategy == RenderStrategy::Http {
            match self
                .attempt(RenderStrategy::Http, self.http.as_ref(), url, &AuthState::none())
                .await
            {
                Ok(html) => return Ok(html),
                Err(e) if e.is_unsupported() && !self.fallback_on_unsupported => return Err(e),
                Err(e) => {
                    info!(url = %url, "HTTP capture failed ({}), trying browser", e);
                    http_error = Some(e);
                }
            }
        }

        let Some(browser) = &self.browser else {
            return Err(http_error.unwrap_or(SnapshotError::NotConfigured));
        };

        if http_error.is_some() {
            metrics::record_fallback();
        }
        let auth = self.auth_for(url).await;
        self.attempt(RenderStrategy::Browser, browser.as_ref(), url, &auth)
            .await
    }

    async fn attempt(
        &self,
        strategy: RenderStrategy,
        renderer: &dyn PageRenderer,
        url: &str,
        auth: &AuthState,
    ) -> Result<String, SnapshotError> {
        let started = Instant::now();
        let result = renderer.fetch(url, auth).await;
        metrics::record_attempt(strategy, &result, started.elapsed());
        result
    }

    /// Stored session for the host of `url`, if the session tool saved one.
    pub async fn auth_for(&self, url: &str) -> AuthState {
        let (Some(dir), Some(host)) = (&self.session_dir, extract_host(url)) else {
            return AuthState::none();
        };

        let path = dir.join(format!("{}.json", sanitize_filename(&host)));
        match tokio::fs::try_exists(&path).await {
            Ok(true) => {
                debug!(url = %url, session = %path.display(), "Using stored session");
                AuthState::with_storage_state(path)
            }
            _ => AuthState::none(),
        }
    }

    async fn store(
        &self,
        url: &str,
        html: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        let filename = build_filename(url, captured_at);
        let archived_path = self.snapshot_root.join(&filename);

        let sanitized = sanitize_html(html, url);
        let document = format!("{}\n{}", build_provenance_comment(url, captured_at), sanitized);

        tokio::fs::write(&archived_path, document).await.map_err(|e| {
            SnapshotError::Storage(format!("{}: {e}", archived_path.display()))
        })?;

        Ok(SnapshotMetadata {
            original_url: url.to_string(),
            archived_path,
            archived_url: format!("{}/{}", self.base_url, filename),
            relative_url: format!("/snapshots/{filename}"),
            captured_at,
        })
    }
}

/// `{YYYYmmddHHMMSS}_{hash}.html`, hashing the URL with the capture instant.
pub fn build_filename(url: &str, captured_at: DateTime<Utc>) -> String {
    let epoch = format!(
        "{}.{:06}",
        captured_at.timestamp(),
        captured_at.timestamp_subsec_micros()
    );

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(epoch.as_bytes());
    let digest = hasher.finalize();

    let mut hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hash.truncate(FILENAME_HASH_LEN);

    format!("{}_{}.html", captured_at.format("%Y%m%d%H%M%S"), hash)
}

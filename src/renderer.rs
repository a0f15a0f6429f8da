//! The fetch capability shared by both capture strategies
//!
//! A strategy turns a URL into raw HTML. The orchestrator holds one instance
//! of each and decides which one runs through [`RenderStrategy`].

use crate::SnapshotError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The closed set of ways a page can be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    /// Plain GET of the document
    Http,
    /// Full browser rendering with lazy-load scrolling
    Browser,
}

impl RenderStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStrategy::Http => "http",
            RenderStrategy::Browser => "browser",
        }
    }
}

/// A content provider for one capture strategy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Fetch `url` and return its raw markup.
    async fn fetch(&self, url: &str, auth: &AuthState) -> Result<String, SnapshotError>;
}

/// Authentication material handed to a render.
///
/// Strategies that cannot use it ignore it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    /// Storage-state JSON file produced by the session capture tool
    pub storage_state: Option<PathBuf>,
    /// Cookies applied on top of the storage state
    pub cookies: Vec<StoredCookie>,
}

impl AuthState {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_storage_state(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_state: Some(path.into()),
            cookies: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.storage_state.is_none() && self.cookies.is_empty()
    }
}

/// Persisted browser session: cookies plus per-origin localStorage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

impl StorageState {
    pub async fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SnapshotError::Rendering(format!(
                "failed to read storage state {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SnapshotError::Rendering(format!(
                "invalid storage state {}: {e}",
                path.display()
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Seconds since the epoch; negative means a session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub same_site: Option<String>,
    /// Used instead of `domain` when the cookie was scoped to a URL
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

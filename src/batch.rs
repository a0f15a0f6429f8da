use crate::metrics;
use crate::{validate_url, CaptureStatus, HistoryEntry, HistoryStore, SnapshotService};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Per-URL outcome reported to API and CLI callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponseItem {
    pub original_url: String,
    pub archived_url: Option<String>,
    pub archived_relative_url: Option<String>,
    pub status: CaptureStatus,
    pub error: Option<String>,
}

impl SnapshotResponseItem {
    pub fn is_success(&self) -> bool {
        self.status == CaptureStatus::Success
    }
}

impl From<&HistoryEntry> for SnapshotResponseItem {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            original_url: entry.original_url.clone(),
            archived_url: entry.archived_url.clone(),
            archived_relative_url: entry.archived_relative_url.clone(),
            status: entry.status,
            error: entry.error.clone(),
        }
    }
}

/// Capture every URL concurrently and record one history entry per URL.
///
/// Results come back in input order. A failing URL never affects the others,
/// and a history write failure is logged and counted without failing the batch.
pub async fn capture_batch(
    service: &SnapshotService,
    store: &HistoryStore,
    urls: &[String],
    force_browser: bool,
) -> Vec<SnapshotResponseItem> {
    info!("Capturing {} URLs (force_browser: {})", urls.len(), force_browser);

    let captures = urls.iter().map(|url| async move {
        let url = url.trim();
        if let Err(e) = validate_url(url) {
            metrics::record_failure(&e);
            return HistoryEntry::failure(url, e.to_string());
        }

        match service.create_snapshot(url, force_browser).await {
            Ok(snapshot) => HistoryEntry::success(&snapshot),
            Err(e) => HistoryEntry::failure(url, e.to_string()),
        }
    });
    let entries = join_all(captures).await;

    match store.append(&entries).await {
        Ok(()) => metrics::record_history_appended(entries.len()),
        Err(e) => {
            metrics::record_history_dropped(entries.len());
            error!("Failed to record {} history entries: {}", entries.len(), e);
        }
    }

    let succeeded = entries.iter().filter(|e| e.is_success()).count();
    info!("Batch finished: {}/{} captured", succeeded, entries.len());

    entries.iter().map(SnapshotResponseItem::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, MockPageRenderer, SnapshotError};
    use std::sync::Arc;

    #[tokio::test]
    async fn invalid_urls_fail_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            snapshot_root: dir.path().join("snapshots"),
            session_dir: None,
            ..Default::default()
        };
        let mut http = MockPageRenderer::new();
        http.expect_fetch().never();
        let service = SnapshotService::with_renderers(&config, Arc::new(http), None).unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl")).unwrap();

        let urls = vec!["ftp://example.com/".to_string(), "nope".to_string()];
        let items = capture_batch(&service, &store, &urls, false).await;

        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.status == CaptureStatus::Failed));
        assert_eq!(items[0].original_url, "ftp://example.com/");
        assert!(items[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Invalid URL"));
        assert_eq!(store.list_recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            snapshot_root: dir.path().join("snapshots"),
            ..Default::default()
        };
        let service =
            SnapshotService::with_renderers(&config, Arc::new(MockPageRenderer::new()), None)
                .unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl")).unwrap();

        assert!(capture_batch(&service, &store, &[], false).await.is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn history_write_failure_keeps_results() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            snapshot_root: dir.path().join("snapshots"),
            session_dir: None,
            ..Default::default()
        };
        let service =
            SnapshotService::with_renderers(&config, Arc::new(MockPageRenderer::new()), None)
                .unwrap();
        // A directory in place of the log makes every append fail.
        let log_dir = dir.path().join("history.jsonl");
        std::fs::create_dir(&log_dir).unwrap();
        let store = HistoryStore::new(&log_dir).unwrap();

        let urls = vec!["nope".to_string()];
        let items = capture_batch(&service, &store, &urls, false).await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, CaptureStatus::Failed);
        assert!(store.append(&[HistoryEntry::failure("nope", "x")]).await.is_err());
    }

    #[test]
    fn response_item_mirrors_entry() {
        let entry = HistoryEntry::failure("https://a.test/", SnapshotError::NotConfigured.to_string());
        let item = SnapshotResponseItem::from(&entry);
        assert!(!item.is_success());
        assert_eq!(item.error.as_deref(), Some("Browser renderer is not configured"));
        assert!(item.archived_url.is_none());
    }
}

//! Append-only JSON-lines audit log of capture attempts
//!
//! One `HistoryStore` owns one log file. Every operation takes the store's
//! lock and runs its file I/O on the blocking pool, so readers and writers of
//! the same file never overlap and request handlers never block on disk.

use crate::{format_timestamp, HistoryError, SnapshotMetadata};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Success,
    Failed,
}

/// One line of the audit log.
///
/// Build entries through [`HistoryEntry::success`] or [`HistoryEntry::failure`]
/// so that the archived locations and the error are never both populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub original_url: String,
    pub archived_url: Option<String>,
    pub archived_relative_url: Option<String>,
    pub status: CaptureStatus,
    pub error: Option<String>,
    pub captured_at: String,
}

impl HistoryEntry {
    pub fn success(metadata: &SnapshotMetadata) -> Self {
        Self {
            id: new_entry_id(),
            original_url: metadata.original_url.clone(),
            archived_url: Some(metadata.archived_url.clone()),
            archived_relative_url: Some(metadata.relative_url.clone()),
            status: CaptureStatus::Success,
            error: None,
            captured_at: format_timestamp(metadata.captured_at),
        }
    }

    pub fn failure(original_url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: new_entry_id(),
            original_url: original_url.into(),
            archived_url: None,
            archived_relative_url: None,
            status: CaptureStatus::Failed,
            error: Some(error.into()),
            captured_at: format_timestamp(Utc::now()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CaptureStatus::Success
    }
}

pub fn new_entry_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Shape accepted when reading; older logs may lack `id`, `status` or
/// `captured_at`.
#[derive(Debug, Deserialize)]
struct StoredRecord {
    #[serde(default)]
    id: Option<String>,
    original_url: String,
    #[serde(default)]
    archived_url: Option<String>,
    #[serde(default)]
    archived_relative_url: Option<String>,
    #[serde(default)]
    status: Option<CaptureStatus>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    captured_at: Option<String>,
}

/// Error text for failed records that never stored one.
pub const UNKNOWN_ERROR: &str = "unknown error";

impl From<StoredRecord> for HistoryEntry {
    fn from(record: StoredRecord) -> Self {
        let status = record.status.unwrap_or({
            if record.archived_url.is_some() && record.error.is_none() {
                CaptureStatus::Success
            } else {
                CaptureStatus::Failed
            }
        });
        let (archived_url, archived_relative_url, error) = match status {
            CaptureStatus::Success => (record.archived_url, record.archived_relative_url, None),
            CaptureStatus::Failed => (
                None,
                None,
                Some(record.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string())),
            ),
        };

        Self {
            id: record
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_entry_id),
            original_url: record.original_url,
            archived_url,
            archived_relative_url,
            status,
            error,
            captured_at: record.captured_at.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: Option<String>,
}

pub struct HistoryStore {
    path: Arc<PathBuf>,
    lock: Mutex<()>,
}

impl HistoryStore {
    /// Open a store for `path`, creating its parent directory.
    ///
    /// Keep a single instance per path per process; the lock lives in the
    /// instance, not in the file.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path: Arc::new(path),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries as one contiguous write. Empty input is a no-op.
    pub async fn append(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut payload = String::new();
        for entry in entries {
            payload.push_str(&serde_json::to_string(entry)?);
            payload.push('\n');
        }

        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_sync(&path, payload.as_bytes())).await??;

        debug!("Appended {} history entries", entries.len());
        Ok(())
    }

    /// Up to `limit` most recently appended entries, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let entries = tokio::task::spawn_blocking(move || read_recent_sync(&path, limit)).await??;
        Ok(entries)
    }

    /// Remove every entry whose id is in `ids` and return how many went away.
    pub async fn delete<I, S>(&self, ids: I) -> Result<usize, HistoryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: HashSet<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let removed = tokio::task::spawn_blocking(move || delete_sync(&path, &ids)).await??;

        debug!("Deleted {} history entries", removed);
        Ok(removed)
    }
}

fn append_sync(path: &Path, payload: &[u8]) -> Result<(), HistoryError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(payload)?;
    file.flush()?;
    Ok(())
}

fn read_recent_sync(path: &Path, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    // Bytes, not `String`: a line with invalid UTF-8 is malformed, not fatal.
    let content = fs::read(path)?;
    let mut records = Vec::new();
    for (index, line) in content.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<StoredRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed history line {}: {}", index + 1, e),
        }
    }

    let start = records.len().saturating_sub(limit);
    Ok(records
        .into_iter()
        .skip(start)
        .rev()
        .map(HistoryEntry::from)
        .collect())
}

fn delete_sync(path: &Path, ids: &HashSet<String>) -> Result<usize, HistoryError> {
    if !path.exists() {
        return Ok(0);
    }

    let content = fs::read(path)?;
    let mut kept = Vec::with_capacity(content.len());
    let mut removed = 0;

    for line in content.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let matched = serde_json::from_slice::<IdOnly>(line)
            .ok()
            .and_then(|record| record.id)
            .is_some_and(|id| ids.contains(&id));
        if matched {
            removed += 1;
            continue;
        }
        kept.extend_from_slice(line);
        kept.push(b'\n');
    }

    if removed == 0 {
        return Ok(0);
    }

    // Write the survivors beside the log and swap them in atomically.
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&kept)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| HistoryError::Io(e.error))?;

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, url: &str) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            ..HistoryEntry::failure(url, "boom")
        }
    }

    #[tokio::test]
    async fn list_on_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("nested/history.jsonl")).unwrap();
        assert!(store.list_recent(10).await.unwrap().is_empty());
        assert_eq!(store.delete(["x"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_empty_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl")).unwrap();
        store.append(&[]).await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn serialized_line_has_exact_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl")).unwrap();
        store.append(&[entry("a", "https://a.test/")]).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "archived_relative_url",
                "archived_url",
                "captured_at",
                "error",
                "id",
                "original_url",
                "status"
            ]
        );
        assert_eq!(value["status"], "failed");
        assert!(value["archived_url"].is_null());
    }

    #[tokio::test]
    async fn legacy_records_are_backfilled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(&path, "{\"original_url\":\"https://old.test/\"}\n").unwrap();

        let store = HistoryStore::new(&path).unwrap();
        let entries = store.list_recent(5).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].id.is_empty());
        assert_eq!(entries[0].status, CaptureStatus::Failed);
        assert_eq!(entries[0].error.as_deref(), Some(UNKNOWN_ERROR));
        assert_eq!(entries[0].captured_at, "");

        // Backfilled ids are not written back.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("\"id\""));
    }

    #[tokio::test]
    async fn delete_keeps_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = HistoryStore::new(&path).unwrap();
        store.append(&[entry("a", "https://a.test/")]).await.unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"not json\n").unwrap();
        }

        assert_eq!(store.delete(["a"]).await.unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json\n");
    }

    #[tokio::test]
    async fn legacy_status_is_inferred_from_archived_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"original_url\":\"https://ok.test/\",\"archived_url\":\"http://x/snapshots/a.html\",",
                "\"archived_relative_url\":\"/snapshots/a.html\"}\n",
                "{\"original_url\":\"https://bad.test/\",\"error\":\"HTTP fetch failed with status 500\"}\n",
                "{\"original_url\":\"https://odd.test/\",\"status\":\"failed\",",
                "\"archived_url\":\"http://x/snapshots/b.html\"}\n",
            ),
        )
        .unwrap();

        let store = HistoryStore::new(&path).unwrap();
        let entries = store.list_recent(5).await.unwrap();
        assert_eq!(entries.len(), 3);

        let odd = &entries[0];
        assert_eq!(odd.status, CaptureStatus::Failed);
        assert!(odd.archived_url.is_none());
        assert_eq!(odd.error.as_deref(), Some(UNKNOWN_ERROR));

        let bad = &entries[1];
        assert_eq!(bad.status, CaptureStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("HTTP fetch failed with status 500"));

        let ok = &entries[2];
        assert_eq!(ok.status, CaptureStatus::Success);
        assert_eq!(ok.archived_url.as_deref(), Some("http://x/snapshots/a.html"));
        assert_eq!(ok.archived_relative_url.as_deref(), Some("/snapshots/a.html"));
        assert!(ok.error.is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_lines_are_skipped_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = HistoryStore::new(&path).unwrap();
        store.append(&[entry("a", "https://a.test/")]).await.unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"\xff\xfe garbage\n").unwrap();
        }
        store.append(&[entry("b", "https://b.test/")]).await.unwrap();

        let entries = store.list_recent(10).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);

        assert_eq!(store.delete(["a"]).await.unwrap(), 1);
        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(b"\xff\xfe garbage\n"));
        assert_eq!(store.list_recent(10).await.unwrap().len(), 1);
    }
}

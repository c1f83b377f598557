//! File-backed offline draft queue
//!
//! Pending drafts live in a single pretty-printed JSON file, read on open and rewritten
//! after every mutation. `sync_all` moves every pending draft to an outbox file next to
//! it (one JSON object per line), standing in for an upload. Both files are replaced
//! through a temp file and a rename, and a draft id already in the outbox is never
//! written twice, so a sync interrupted between the two files can simply be retried.

use async_trait::async_trait;
use map_facade_lib::services::{
    DraftKind, DraftStore, OfflineDraft, ServiceError, ServiceResult, SyncReport,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        ServiceError::new(e.to_string())
    }
}

pub struct FileDraftStore {
    /// Pending drafts
    path: PathBuf,
    /// Synced drafts, one per line
    outbox: PathBuf,
    pending: Mutex<Vec<OfflineDraft>>,
}

impl FileDraftStore {
    /// Default queue location for the current user.
    /// - On Windows: %APPDATA%/TrackRecorder/drafts.json
    /// - Else: $HOME/.config/track-recorder/drafts.json
    fn default_path() -> PathBuf {
        if cfg!(windows)
            && let Ok(appdata) = std::env::var("APPDATA")
        {
            return Path::new(&appdata).join("TrackRecorder").join("drafts.json");
        }

        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home)
                .join(".config")
                .join("track-recorder")
                .join("drafts.json");
        }

        Path::new(".").join("track-recorder-drafts.json")
    }

    pub fn open(path: Option<PathBuf>) -> StorageResult<Self> {
        let path = path.unwrap_or_else(Self::default_path);

        if let Some(parent) = path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return Err(StorageError::Io(format!(
                "Failed to create draft directory: {}",
                e
            )));
        }

        let mut pending = Vec::new();
        if path.exists() {
            let s = fs::read_to_string(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read draft file: {}", e)))?;
            if !s.trim().is_empty() {
                pending = serde_json::from_str(&s).map_err(|e| {
                    StorageError::Json(format!("Failed to parse draft file: {}", e))
                })?;
            }
        }

        let outbox = path.with_extension("outbox.jsonl");
        tracing::debug!(path = %path.display(), pending = pending.len(), "draft queue opened");
        Ok(FileDraftStore {
            path,
            outbox,
            pending: Mutex::new(pending),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outbox_path(&self) -> &Path {
        &self.outbox
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OfflineDraft>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush_locked(&self, pending: &[OfflineDraft]) -> StorageResult<()> {
        let s = serde_json::to_string_pretty(pending)
            .map_err(|e| StorageError::Json(e.to_string()))?;
        write_atomic(&self.path, s.as_bytes())
    }

    /// Add `drafts` to the outbox, skipping ids it already holds
    fn extend_outbox(&self, drafts: &[OfflineDraft]) -> StorageResult<()> {
        let mut contents = match fs::read_to_string(&self.outbox) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(StorageError::Io(format!("Failed to read outbox: {}", e))),
        };
        let mut sent = HashSet::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let draft: OfflineDraft = serde_json::from_str(line)
                .map_err(|e| StorageError::Json(format!("Failed to parse outbox: {}", e)))?;
            sent.insert(draft.id);
        }
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }

        let mut added = 0;
        for draft in drafts.iter().filter(|d| !sent.contains(&d.id)) {
            let line = serde_json::to_string(draft).map_err(|e| StorageError::Json(e.to_string()))?;
            contents.push_str(&line);
            contents.push('\n');
            added += 1;
        }
        if added == 0 {
            return Ok(());
        }
        write_atomic(&self.outbox, contents.as_bytes())
    }
}

/// Replace `path` with `bytes` through a temp file in the same directory
fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    fs::write(&temp_path, bytes).map_err(|e| StorageError::Io(format!("write failed: {}", e)))?;
    fs::rename(&temp_path, path).map_err(|e| StorageError::Io(format!("rename failed: {}", e)))
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn save_draft(
        &self,
        kind: DraftKind,
        payload: serde_json::Value,
    ) -> ServiceResult<String> {
        let draft = OfflineDraft::new(kind, payload);
        let id = draft.id.clone();
        let mut pending = self.lock();
        pending.push(draft);
        if let Err(e) = self.flush_locked(&pending) {
            pending.pop();
            return Err(e.into());
        }
        tracing::debug!(%id, kind = kind.as_str(), "draft queued");
        Ok(id)
    }

    async fn drafts(&self, kind: Option<DraftKind>) -> ServiceResult<Vec<OfflineDraft>> {
        Ok(self
            .lock()
            .iter()
            .filter(|d| kind.is_none_or(|k| d.kind == k))
            .cloned()
            .collect())
    }

    async fn sync_all(&self) -> ServiceResult<SyncReport> {
        let mut pending = self.lock();
        if pending.is_empty() {
            return Ok(SyncReport::default());
        }
        self.extend_outbox(&pending)?;
        let synced = pending.len();
        pending.clear();
        self.flush_locked(&pending)?;
        tracing::info!(synced, outbox = %self.outbox.display(), "drafts synced");
        Ok(SyncReport { synced, failed: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_drafts_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue").join("drafts.json");

        let store = FileDraftStore::open(Some(path.clone())).unwrap();
        let id = store.save_draft(DraftKind::Route, json!({"id": "t1"})).await.unwrap();
        store.save_draft(DraftKind::Post, json!({"title": "p"})).await.unwrap();
        drop(store);

        let store = FileDraftStore::open(Some(path)).unwrap();
        let routes = store.drafts(Some(DraftKind::Route)).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id, id);
        assert_eq!(store.drafts(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_moves_drafts_to_outbox() {
        let dir = tempdir().unwrap();
        let store = FileDraftStore::open(Some(dir.path().join("drafts.json"))).unwrap();
        store.save_draft(DraftKind::Route, json!({"id": "a"})).await.unwrap();
        store.save_draft(DraftKind::Route, json!({"id": "b"})).await.unwrap();

        let report = store.sync_all().await.unwrap();
        assert_eq!(report, SyncReport { synced: 2, failed: 0 });
        assert!(store.drafts(None).await.unwrap().is_empty());

        let outbox = fs::read_to_string(store.outbox_path()).unwrap();
        assert_eq!(outbox.lines().count(), 2);
        assert_eq!(store.sync_all().await.unwrap().synced, 0);
    }

    #[tokio::test]
    async fn test_interrupted_sync_does_not_duplicate_outbox() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drafts.json");
        let store = FileDraftStore::open(Some(path.clone())).unwrap();
        store.save_draft(DraftKind::Route, json!({"id": "a"})).await.unwrap();
        store.save_draft(DraftKind::Route, json!({"id": "b"})).await.unwrap();
        let queued = fs::read_to_string(&path).unwrap();
        store.sync_all().await.unwrap();
        drop(store);

        // the outbox was written but the queue still lists both drafts
        fs::write(&path, queued).unwrap();
        let store = FileDraftStore::open(Some(path)).unwrap();
        assert_eq!(store.drafts(None).await.unwrap().len(), 2);
        assert_eq!(store.sync_all().await.unwrap().synced, 2);

        let outbox = fs::read_to_string(store.outbox_path()).unwrap();
        assert_eq!(outbox.lines().count(), 2);
        assert!(store.drafts(None).await.unwrap().is_empty());
        assert!(!dir.path().join("drafts.json.tmp").exists());
    }

    #[test]
    fn test_corrupted_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drafts.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileDraftStore::open(Some(path)),
            Err(StorageError::Json(_))
        ));
    }
}

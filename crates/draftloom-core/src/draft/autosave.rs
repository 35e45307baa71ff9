//! Debounced auto-save
//!
//! Every edit writes an immediate local backup, then schedules a
//! debounced remote write (default 2 s window). Bursts of edits collapse
//! into one write; the most recent edit always wins. The previous
//! debounce timer is cancelled on every new edit.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::history::versions::DraftStore;

/// Synchronous local backup target
///
/// Written on every edit, ahead of the debounced remote write, so a
/// recovery path exists even while the remote write is pending or failed.
pub trait BackupStore: Send + Sync {
    fn write_backup(&self, draft_id: Uuid, code: &str) -> Result<()>;
    fn read_backup(&self, draft_id: Uuid) -> Result<Option<String>>;
}

/// File-based local backup, one file per draft
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn backup_path(&self, draft_id: Uuid) -> PathBuf {
        self.dir.join(format!("{draft_id}.draft.bak"))
    }
}

impl BackupStore for FileBackupStore {
    fn write_backup(&self, draft_id: Uuid, code: &str) -> Result<()> {
        std::fs::write(self.backup_path(draft_id), code)?;
        Ok(())
    }

    fn read_backup(&self, draft_id: Uuid) -> Result<Option<String>> {
        match std::fs::read_to_string(self.backup_path(draft_id)) {
            Ok(code) => Ok(Some(code)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Observable auto-save status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Error,
}

struct AutosaveInner {
    /// Bumped on every edit; a stale debounce timer sees a newer
    /// generation and gives up, so the most recent edit always wins
    generation: u64,
    pending: Option<AbortHandle>,
}

/// Debounced persistence of a draft's live code
pub struct Autosaver {
    draft_id: Uuid,
    backup: Arc<dyn BackupStore>,
    store: Arc<dyn DraftStore>,
    debounce: Duration,
    inner: Arc<Mutex<AutosaveInner>>,
    status_tx: watch::Sender<SaveStatus>,
    status_rx: watch::Receiver<SaveStatus>,
}

impl Autosaver {
    pub fn new(
        draft_id: Uuid,
        backup: Arc<dyn BackupStore>,
        store: Arc<dyn DraftStore>,
        debounce: Duration,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(SaveStatus::Idle);
        Self {
            draft_id,
            backup,
            store,
            debounce,
            inner: Arc::new(Mutex::new(AutosaveInner {
                generation: 0,
                pending: None,
            })),
            status_tx,
            status_rx,
        }
    }

    /// Subscribe to save status changes
    pub fn status(&self) -> watch::Receiver<SaveStatus> {
        self.status_rx.clone()
    }

    /// Read back the local backup, if one exists
    pub fn recover_backup(&self) -> Result<Option<String>> {
        self.backup.read_backup(self.draft_id)
    }

    /// Record an edit
    ///
    /// The local backup is written synchronously before this returns; the
    /// remote write is scheduled behind the debounce window, cancelling
    /// any previously scheduled write. Must be called from within a tokio
    /// runtime.
    pub fn note_edit(&self, code: &str) -> Result<()> {
        self.backup.write_backup(self.draft_id, code)?;

        let generation = {
            let mut inner = self.inner.lock().expect("autosave lock poisoned");
            inner.generation += 1;
            if let Some(previous) = inner.pending.take() {
                previous.abort();
            }
            inner.generation
        };

        let draft_id = self.draft_id;
        let store = self.store.clone();
        let status_tx = self.status_tx.clone();
        let inner = self.inner.clone();
        let debounce = self.debounce;
        let code = code.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            // A newer edit supersedes this write
            {
                let guard = inner.lock().expect("autosave lock poisoned");
                if guard.generation != generation {
                    return;
                }
            }

            status_tx.send_replace(SaveStatus::Saving);
            let result = persist(store.as_ref(), draft_id, &code).await;
            match result {
                Ok(()) => {
                    debug!(draft_id = %draft_id, "Draft auto-saved");
                    status_tx.send_replace(SaveStatus::Saved);
                }
                Err(e) => {
                    warn!(draft_id = %draft_id, error = %e, "Auto-save failed");
                    status_tx.send_replace(SaveStatus::Error);
                }
            }
        });

        if let Ok(mut inner) = self.inner.lock() {
            inner.pending = Some(task.abort_handle());
        }
        Ok(())
    }
}

async fn persist(store: &dyn DraftStore, draft_id: Uuid, code: &str) -> Result<()> {
    let mut metadata = store.get_draft_metadata(draft_id).await?;
    if !metadata.is_object() {
        metadata = serde_json::json!({});
    }
    if let Some(object) = metadata.as_object_mut() {
        object.insert(
            "current_code".to_string(),
            serde_json::Value::String(code.to_string()),
        );
        object.insert(
            "saved_at".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    store.update_draft_metadata(draft_id, metadata).await
}

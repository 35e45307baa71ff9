//! Persisted version log
//!
//! Append-only snapshots of a draft's code with strictly increasing
//! version numbers, stored through the opaque `DraftStore` collaborator.
//! Restoration is forward-creating: it overwrites the draft's live code
//! but never deletes later versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An immutable, versioned copy of a draft's code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub id: Uuid,
    pub draft_id: Uuid,
    /// Strictly increasing per draft, starting at 1
    pub version: i64,
    pub code: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// SHA-256 of the code for quick comparison
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl VersionSnapshot {
    pub fn new(
        draft_id: Uuid,
        version: i64,
        code: &str,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            draft_id,
            version,
            code: code.to_string(),
            description,
            metadata,
            content_hash: compute_content_hash(code),
            created_at: Utc::now(),
        }
    }
}

/// Compute SHA-256 hash of content
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// The persistence collaborator
///
/// An opaque document store; the core assumes nothing beyond these
/// operations.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn get_draft_metadata(&self, draft_id: Uuid) -> Result<serde_json::Value>;

    async fn update_draft_metadata(
        &self,
        draft_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<()>;

    /// Append a snapshot, returning the stored version number
    async fn append_version(&self, draft_id: Uuid, snapshot: &VersionSnapshot) -> Result<i64>;

    /// All snapshots for a draft, ordered by ascending version
    async fn list_versions(&self, draft_id: Uuid) -> Result<Vec<VersionSnapshot>>;
}

/// Per-draft view over the version log
pub struct VersionLog {
    store: Arc<dyn DraftStore>,
    draft_id: Uuid,
}

impl VersionLog {
    pub fn new(store: Arc<dyn DraftStore>, draft_id: Uuid) -> Self {
        Self { store, draft_id }
    }

    pub fn draft_id(&self) -> Uuid {
        self.draft_id
    }

    /// Append a new snapshot with the next version number
    ///
    /// The next number is max existing + 1, starting at 1.
    pub async fn save_version(
        &self,
        code: &str,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<VersionSnapshot> {
        let versions = self.store.list_versions(self.draft_id).await?;
        let next = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        let snapshot = VersionSnapshot::new(self.draft_id, next, code, description, metadata);
        let assigned = self.store.append_version(self.draft_id, &snapshot).await?;

        debug!(
            draft_id = %self.draft_id,
            version = assigned,
            hash = %snapshot.content_hash,
            "Code version saved"
        );

        Ok(snapshot)
    }

    /// All snapshots, ascending by version
    pub async fn list(&self) -> Result<Vec<VersionSnapshot>> {
        self.store.list_versions(self.draft_id).await
    }

    /// Fetch one snapshot by version number
    pub async fn get(&self, version: i64) -> Result<Option<VersionSnapshot>> {
        Ok(self
            .store
            .list_versions(self.draft_id)
            .await?
            .into_iter()
            .find(|snapshot| snapshot.version == version))
    }

    /// The highest version number, or 0 when no snapshot exists
    pub async fn latest_version(&self) -> Result<i64> {
        Ok(self
            .store
            .list_versions(self.draft_id)
            .await?
            .iter()
            .map(|snapshot| snapshot.version)
            .max()
            .unwrap_or(0))
    }

    /// Restore a snapshot into the draft's live code
    ///
    /// Overwrites the draft's current code and records a restoration
    /// timestamp. Forward-creating: later versions are left untouched.
    pub async fn restore_version(&self, version: i64) -> Result<VersionSnapshot> {
        let snapshot = self
            .get(version)
            .await?
            .ok_or(Error::VersionNotFound(version))?;

        let mut metadata = self.store.get_draft_metadata(self.draft_id).await?;
        if !metadata.is_object() {
            metadata = serde_json::json!({});
        }
        if let Some(object) = metadata.as_object_mut() {
            object.insert(
                "current_code".to_string(),
                serde_json::Value::String(snapshot.code.clone()),
            );
            object.insert(
                "restored_from_version".to_string(),
                serde_json::Value::from(version),
            );
            object.insert(
                "restored_at".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }
        self.store
            .update_draft_metadata(self.draft_id, metadata)
            .await?;

        info!(
            draft_id = %self.draft_id,
            version,
            "Draft restored from version snapshot"
        );

        Ok(snapshot)
    }
}

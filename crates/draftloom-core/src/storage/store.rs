//! SQLite-backed draft store
//!
//! Concrete implementation of the `DraftStore` collaborator over the
//! drafts and code_versions tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::history::versions::{DraftStore, VersionSnapshot};

/// Repository for draft and version persistence
#[derive(Debug, Clone)]
pub struct SqliteDraftStore {
    pool: SqlitePool,
}

/// Database row for a code version
#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    id: String,
    draft_id: String,
    version: i64,
    code: String,
    description: Option<String>,
    metadata: Option<String>,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl VersionRow {
    fn into_snapshot(self) -> Result<VersionSnapshot> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Other(format!("Invalid version id in database: {}", e)))?;
        let draft_id = Uuid::parse_str(&self.draft_id)
            .map_err(|e| Error::Other(format!("Invalid draft id in database: {}", e)))?;
        let metadata = match self.metadata {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| Error::Other(format!("Invalid version metadata: {}", e)))?,
            ),
            None => None,
        };

        Ok(VersionSnapshot {
            id,
            draft_id,
            version: self.version,
            code: self.code,
            description: self.description,
            metadata,
            content_hash: self.content_hash,
            created_at: self.created_at,
        })
    }
}

impl SqliteDraftStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a draft row if it does not exist, returning its id
    ///
    /// Looks the draft up by name first so CLI invocations can address
    /// drafts by a human-readable handle.
    pub async fn ensure_draft(&self, name: &str) -> Result<Uuid> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM drafts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        if let Some((id,)) = existing {
            return Uuid::parse_str(&id)
                .map_err(|e| Error::Other(format!("Invalid draft id in database: {}", e)));
        }

        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO drafts (id, name) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        debug!(draft_id = %id, name = %name, "Draft created");
        Ok(id)
    }

    /// List all drafts as (id, name) pairs
    pub async fn list_drafts(&self) -> Result<Vec<(Uuid, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, name FROM drafts ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::DatabaseError)?;

        rows.into_iter()
            .map(|(id, name)| {
                Uuid::parse_str(&id)
                    .map(|id| (id, name))
                    .map_err(|e| Error::Other(format!("Invalid draft id in database: {}", e)))
            })
            .collect()
    }
}

#[async_trait]
impl DraftStore for SqliteDraftStore {
    async fn get_draft_metadata(&self, draft_id: Uuid) -> Result<serde_json::Value> {
        let row: Option<(String,)> = sqlx::query_as("SELECT metadata FROM drafts WHERE id = ?")
            .bind(draft_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let (raw,) = row.ok_or_else(|| Error::DraftNotFound(draft_id.to_string()))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Other(format!("Invalid draft metadata: {}", e)))
    }

    async fn update_draft_metadata(
        &self,
        draft_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE drafts SET metadata = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(metadata.to_string())
        .bind(draft_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(Error::DraftNotFound(draft_id.to_string()));
        }
        Ok(())
    }

    async fn append_version(&self, draft_id: Uuid, snapshot: &VersionSnapshot) -> Result<i64> {
        let metadata = snapshot.metadata.as_ref().map(|m| m.to_string());

        sqlx::query(
            r#"
            INSERT INTO code_versions (id, draft_id, version, code, description, metadata, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.id.to_string())
        .bind(draft_id.to_string())
        .bind(snapshot.version)
        .bind(&snapshot.code)
        .bind(&snapshot.description)
        .bind(&metadata)
        .bind(&snapshot.content_hash)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(snapshot.version)
    }

    async fn list_versions(&self, draft_id: Uuid) -> Result<Vec<VersionSnapshot>> {
        let rows: Vec<VersionRow> = sqlx::query_as(
            r#"
            SELECT id, draft_id, version, code, description, metadata, content_hash, created_at
            FROM code_versions
            WHERE draft_id = ?
            ORDER BY version ASC
            "#,
        )
        .bind(draft_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(VersionRow::into_snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::VersionLog;
    use crate::storage::Database;
    use std::sync::Arc;

    async fn store() -> SqliteDraftStore {
        let db = Database::in_memory().await.expect("in-memory database");
        SqliteDraftStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_ensure_draft_is_stable() {
        let store = store().await;
        let first = store.ensure_draft("landing-page").await.unwrap();
        let second = store.ensure_draft("landing-page").await.unwrap();
        assert_eq!(first, second);

        let other = store.ensure_draft("pricing-page").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let store = store().await;
        let draft_id = store.ensure_draft("draft").await.unwrap();

        let metadata = store.get_draft_metadata(draft_id).await.unwrap();
        assert_eq!(metadata, serde_json::json!({}));

        store
            .update_draft_metadata(draft_id, serde_json::json!({"current_code": "x"}))
            .await
            .unwrap();

        let metadata = store.get_draft_metadata(draft_id).await.unwrap();
        assert_eq!(
            metadata.get("current_code").and_then(|v| v.as_str()),
            Some("x")
        );
    }

    #[tokio::test]
    async fn test_unknown_draft_errors() {
        let store = store().await;
        let result = store.get_draft_metadata(Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::DraftNotFound(_))));

        let result = store
            .update_draft_metadata(Uuid::new_v4(), serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(Error::DraftNotFound(_))));
    }

    #[tokio::test]
    async fn test_version_log_over_sqlite() {
        let store = Arc::new(store().await);
        let draft_id = store.ensure_draft("versioned").await.unwrap();
        let log = VersionLog::new(store.clone(), draft_id);

        log.save_version("v1", Some("first".to_string()), None)
            .await
            .unwrap();
        log.save_version("v2", None, Some(serde_json::json!({"source": "render"})))
            .await
            .unwrap();

        let versions = log.list().await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].description.as_deref(), Some("first"));
        assert_eq!(versions[1].version, 2);
        assert_eq!(
            versions[1]
                .metadata
                .as_ref()
                .and_then(|m| m.get("source"))
                .and_then(|v| v.as_str()),
            Some("render")
        );
    }

    #[tokio::test]
    async fn test_restore_via_sqlite_store() {
        let store = Arc::new(store().await);
        let draft_id = store.ensure_draft("restorable").await.unwrap();
        let log = VersionLog::new(store.clone(), draft_id);

        for i in 1..=3 {
            log.save_version(&format!("code {i}"), None, None)
                .await
                .unwrap();
        }

        log.restore_version(1).await.unwrap();

        let metadata = store.get_draft_metadata(draft_id).await.unwrap();
        assert_eq!(
            metadata.get("current_code").and_then(|v| v.as_str()),
            Some("code 1")
        );
        assert_eq!(log.latest_version().await.unwrap(), 3);
    }
}

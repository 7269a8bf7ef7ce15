//! Local log of resolved scans.
//!
//! Entries hold the credential kind and the outcome only. Card UIDs and
//! tokens are never written here.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanLogEntry {
    pub id: String,
    /// `nfc` or `qr`
    pub credential_kind: String,
    /// `AuthResult` kind label
    pub outcome: String,
    pub detail: Option<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct ScanLog {
    db: SqlitePool,
}

impl ScanLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        credential_kind: &str,
        outcome: &str,
        detail: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO scan_log (id, credential_kind, outcome, detail, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(credential_kind)
        .bind(outcome)
        .bind(detail)
        .bind(&now)
        .execute(&self.db)
        .await?;

        tracing::debug!(
            credential_kind = credential_kind,
            outcome = outcome,
            "Scan outcome recorded"
        );

        Ok(())
    }

    /// Most recent entries first
    pub async fn recent(&self, limit: i64) -> Result<Vec<ScanLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, ScanLogEntry>(
            "SELECT id, credential_kind, outcome, detail, created_at FROM scan_log ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.db)
        .await
    }
}

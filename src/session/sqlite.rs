use async_trait::async_trait;
use chrono::Utc;

use super::{KeyValueStore, SessionError};
use crate::db::DbPool;

const UPSERT: &str = r#"
    INSERT INTO session_kv (key, value, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#;

/// Durable store in the `session_kv` table
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM session_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM session_kv WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn apply_batch(&self, set: &[(&str, String)], remove: &[&str]) -> Result<(), SessionError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;
        for (key, value) in set {
            sqlx::query(UPSERT)
                .bind(*key)
                .bind(value)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }
        for key in remove {
            sqlx::query("DELETE FROM session_kv WHERE key = ?")
                .bind(*key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

//! SQLite persistence for caller-owned [`UserKbState`] snapshots.
//!
//! The reconciliation engine never touches this; the CLI and HTTP layer load
//! a snapshot before calling it and save the snapshot it hands back.
//!
//! # Retry Strategy
//!
//! SQLite reports contention as `SQLITE_BUSY` / "database is locked". Those
//! are retried with exponential backoff (100ms, 200ms, 400ms, ... capped at
//! 2^5 steps) up to [`MAX_RETRIES`] times. Every other error fails
//! immediately.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::time::Duration;

use crate::config::DbConfig;
use crate::db;
use crate::migrate;
use crate::models::UserKbState;

pub const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 100;

#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Connect and make sure the schema exists.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn load(&self, user_id: &str, kb_name: &str) -> Result<Option<UserKbState>> {
        let row = with_retry(|| {
            sqlx::query(
                "SELECT user_id, kb_name, kb_id, last_indexing_job_id, pending_files, indexed_files \
                 FROM user_kb_state WHERE user_id = ? AND kb_name = ?",
            )
            .bind(user_id)
            .bind(kb_name)
            .fetch_optional(&self.pool)
        })
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let pending: String = row.get("pending_files");
        let indexed: String = row.get("indexed_files");
        let pending_files = serde_json::from_str(&pending).with_context(|| {
            format!("Corrupt pending_files in snapshot for {}/{}", user_id, kb_name)
        })?;
        let indexed_files = serde_json::from_str(&indexed).with_context(|| {
            format!("Corrupt indexed_files in snapshot for {}/{}", user_id, kb_name)
        })?;
        Ok(Some(UserKbState {
            user_id: row.get("user_id"),
            kb_name: row.get("kb_name"),
            kb_id: row.get("kb_id"),
            last_indexing_job_id: row.get("last_indexing_job_id"),
            pending_files,
            indexed_files,
        }))
    }

    /// Load, or start a fresh snapshot for a user seen for the first time.
    pub async fn load_or_new(&self, user_id: &str, kb_name: &str) -> Result<UserKbState> {
        Ok(self
            .load(user_id, kb_name)
            .await?
            .unwrap_or_else(|| UserKbState::new(user_id, kb_name)))
    }

    pub async fn save(&self, state: &UserKbState) -> Result<()> {
        let pending = serde_json::to_string(&state.pending_files)?;
        let indexed = serde_json::to_string(&state.indexed_files)?;
        let now = chrono::Utc::now().timestamp();

        with_retry(|| {
            sqlx::query(
                r#"
                INSERT INTO user_kb_state
                    (user_id, kb_name, kb_id, last_indexing_job_id, pending_files, indexed_files, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, kb_name) DO UPDATE SET
                    kb_id = excluded.kb_id,
                    last_indexing_job_id = excluded.last_indexing_job_id,
                    pending_files = excluded.pending_files,
                    indexed_files = excluded.indexed_files,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&state.user_id)
            .bind(&state.kb_name)
            .bind(&state.kb_id)
            .bind(&state.last_indexing_job_id)
            .bind(&pending)
            .bind(&indexed)
            .bind(now)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

async fn with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < MAX_RETRIES => {
                // Exponential backoff: 100ms, 200ms, 400ms, ...
                let delay = Duration::from_millis(BASE_DELAY_MS << attempt.min(5));
                tracing::debug!(attempt, ?delay, error = %e, "state store busy; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> StateStore {
        StateStore::open(&DbConfig {
            path: tmp.path().join("data").join("kbsync.sqlite"),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn missing_row_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        assert!(store.load("u1", "kb-u1").await.unwrap().is_none());
        let fresh = store.load_or_new("u1", "kb-u1").await.unwrap();
        assert_eq!(fresh, UserKbState::new("u1", "kb-u1"));
    }

    #[tokio::test]
    async fn save_then_load_and_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        let mut state = UserKbState::new("u1", "kb-u1");
        state.kb_id = Some("kb-1".into());
        state.last_indexing_job_id = Some("job-1".into());
        state.pending_files = vec!["a.pdf".into()];
        store.save(&state).await.unwrap();
        assert_eq!(store.load("u1", "kb-u1").await.unwrap().unwrap(), state);

        let next = state.after_indexing_completed();
        store.save(&next).await.unwrap();
        let loaded = store.load("u1", "kb-u1").await.unwrap().unwrap();
        assert!(loaded.pending_files.is_empty());
        assert_eq!(loaded.indexed_files, vec!["a.pdf"]);
        store.close().await;
    }

    #[tokio::test]
    async fn corrupt_file_lists_fail_the_load() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        sqlx::query(
            "INSERT INTO user_kb_state (user_id, kb_name, pending_files, indexed_files, updated_at) \
             VALUES ('u1', 'kb-u1', '[\"a.pdf\",', '[]', 0)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.load("u1", "kb-u1").await.unwrap_err();
        assert!(format!("{:#}", err).contains("pending_files"), "{:#}", err);
        assert!(store.load_or_new("u1", "kb-u1").await.is_err());
        store.close().await;
    }
}

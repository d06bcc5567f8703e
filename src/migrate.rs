use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::DbConfig;
use crate::db;

pub async fn run_migrations(config: &DbConfig) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the state tables on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per (user, kb name); file lists are JSON arrays.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_kb_state (
            user_id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            kb_id TEXT,
            last_indexing_job_id TEXT,
            pending_files TEXT NOT NULL DEFAULT '[]',
            indexed_files TEXT NOT NULL DEFAULT '[]',
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, kb_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_kb_state_kb_id ON user_kb_state(kb_id)")
        .execute(pool)
        .await?;

    Ok(())
}

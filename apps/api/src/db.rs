use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

/// Creates the SQLite connection pool and makes sure the schema exists.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    info!("Connecting to SQLite at {database_url}...");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    init_schema(&pool).await?;

    info!("SQLite pool established");
    Ok(pool)
}

/// Idempotent schema bootstrap. Contact records are append-only: the core never
/// UPDATEs or DELETEs them.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            resume_path TEXT,
            created_at  TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contact_records (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id           TEXT NOT NULL REFERENCES users(id),
            channel           TEXT NOT NULL,
            dedup_key         TEXT NOT NULL,
            organization_name TEXT NOT NULL,
            contact_name      TEXT,
            contact_address   TEXT,
            job_title         TEXT,
            message_summary   TEXT NOT NULL,
            sent_at           TEXT NOT NULL,
            UNIQUE (user_id, channel, dedup_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS campaign_runs (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            channel     TEXT NOT NULL,
            status      TEXT NOT NULL,
            sent        INTEGER NOT NULL DEFAULT 0,
            skipped     INTEGER NOT NULL DEFAULT 0,
            failed      INTEGER NOT NULL DEFAULT 0,
            started_at  TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

//! SQLite persistence
//!
//! The job store is the single source of truth for download-job state in
//! the compatibility-shim tier. All mutations go through narrow UPDATE
//! helpers rather than full-record replacement so concurrent writers
//! (scheduler, transfer events, API calls) stay composable.

pub mod jobs;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating as needed) the database at `path` and provision the
    /// schema. Pass ":memory:" for tests.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // An in-memory database exists per connection; pooling more than
        // one would hand each caller a different empty database.
        let max_connections = if path == ":memory:" { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", path))?;

        let db = Self { pool };
        db.provision().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn provision(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS download_jobs (
                hash TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                original_link TEXT NOT NULL,
                resolved_link TEXT,
                save_path TEXT NOT NULL,
                total_size INTEGER NOT NULL DEFAULT 0,
                downloaded_size INTEGER NOT NULL DEFAULT 0,
                download_speed INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'queued',
                status_message TEXT,
                error_message TEXT,
                added_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                category TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                stall_requeued INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create download_jobs table")?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS categories (
                name TEXT PRIMARY KEY,
                save_path TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create categories table")?;

        Ok(())
    }
}

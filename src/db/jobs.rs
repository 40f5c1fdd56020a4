//! Download job records
//!
//! Jobs are keyed by `hash` (the sha1-style id the legacy protocol expects)
//! and move through queued -> checking -> downloading -> completed/error, with
//! paused reachable from any active state and stalled as a recoverable
//! dead-end. Progress updates are monotonic-safe: a later, smaller
//! total-size reading never overwrites a larger one, because a resumed
//! transfer reports only the bytes remaining in its own session.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Database;

/// Lifecycle state of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Checking,
    Downloading,
    Paused,
    Completed,
    Error,
    Stalled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Checking => "checking",
            JobState::Downloading => "downloading",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Error => "error",
            JobState::Stalled => "stalled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }

    /// Whether the job occupies a scheduler slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Checking | JobState::Downloading)
    }
}

impl std::str::FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "checking" => Ok(JobState::Checking),
            "downloading" => Ok(JobState::Downloading),
            "paused" => Ok(JobState::Paused),
            "completed" => Ok(JobState::Completed),
            "error" => Ok(JobState::Error),
            "stalled" => Ok(JobState::Stalled),
            _ => Err(anyhow!("Unknown job state: {}", s)),
        }
    }
}

/// One persisted download job.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DownloadJob {
    pub hash: String,
    pub name: String,
    pub original_link: String,
    pub resolved_link: Option<String>,
    pub save_path: String,
    pub total_size: i64,
    pub downloaded_size: i64,
    pub download_speed: i64,
    pub state: String,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub priority: i64,
    pub stall_requeued: i64,
}

impl DownloadJob {
    pub fn state(&self) -> JobState {
        self.state.parse().unwrap_or(JobState::Error)
    }

    /// The link the transfer should use: resolved when available.
    pub fn effective_link(&self) -> &str {
        self.resolved_link.as_deref().unwrap_or(&self.original_link)
    }
}

/// Accessor for the download_jobs table.
pub struct JobStore<'a> {
    db: &'a Database,
}

impl Database {
    pub fn jobs(&self) -> JobStore<'_> {
        JobStore { db: self }
    }
}

impl JobStore<'_> {
    /// Insert a new queued job. A duplicate hash is not an error: adding
    /// the same placeholder twice must stay idempotent-safe.
    pub async fn insert(
        &self,
        hash: &str,
        name: &str,
        original_link: &str,
        save_path: &str,
        category: Option<&str>,
        total_size: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO download_jobs
               (hash, name, original_link, save_path, category, total_size, state, added_at)
               VALUES (?, ?, ?, ?, ?, ?, 'queued', ?)"#,
        )
        .bind(hash)
        .bind(name)
        .bind(original_link)
        .bind(save_path)
        .bind(category)
        .bind(total_size)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .context("Failed to insert download job")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, hash: &str) -> Result<Option<DownloadJob>> {
        sqlx::query_as("SELECT * FROM download_jobs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to fetch download job")
    }

    pub async fn list(&self) -> Result<Vec<DownloadJob>> {
        sqlx::query_as("SELECT * FROM download_jobs ORDER BY added_at ASC")
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list download jobs")
    }

    /// Jobs currently occupying scheduler slots.
    pub async fn count_active(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM download_jobs WHERE state IN ('checking', 'downloading')",
        )
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    /// Next queued job: highest priority first, then insertion order.
    pub async fn next_queued(&self) -> Result<Option<DownloadJob>> {
        sqlx::query_as(
            r#"SELECT * FROM download_jobs WHERE state = 'queued'
               ORDER BY priority DESC, added_at ASC LIMIT 1"#,
        )
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to pick next queued job")
    }

    pub async fn set_state(&self, hash: &str, state: JobState) -> Result<()> {
        sqlx::query("UPDATE download_jobs SET state = ?, download_speed = 0 WHERE hash = ?")
            .bind(state.as_str())
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn set_status_message(&self, hash: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE download_jobs SET status_message = ? WHERE hash = ?")
            .bind(message)
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn set_resolved_link(&self, hash: &str, link: &str) -> Result<()> {
        sqlx::query("UPDATE download_jobs SET resolved_link = ? WHERE hash = ?")
            .bind(link)
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn set_name(&self, hash: &str, name: &str) -> Result<()> {
        sqlx::query("UPDATE download_jobs SET name = ? WHERE hash = ?")
            .bind(name)
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_started(&self, hash: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE download_jobs SET state = 'downloading', started_at = ? WHERE hash = ?"#,
        )
        .bind(Utc::now())
        .bind(hash)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Progress update from the transfer stream.
    ///
    /// `total_size` only ever grows: a resumed transfer advertises just its
    /// remaining bytes, and out-of-order delivery can surface a stale small
    /// reading after a larger one. Both are noise, not truth.
    pub async fn update_progress(
        &self,
        hash: &str,
        downloaded_size: i64,
        total_size: i64,
        download_speed: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE download_jobs
               SET downloaded_size = ?,
                   download_speed = ?,
                   total_size = CASE WHEN ? > total_size THEN ? ELSE total_size END
               WHERE hash = ?"#,
        )
        .bind(downloaded_size)
        .bind(download_speed)
        .bind(total_size)
        .bind(total_size)
        .bind(hash)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, hash: &str, final_size: i64) -> Result<()> {
        sqlx::query(
            r#"UPDATE download_jobs
               SET state = 'completed', completed_at = ?, download_speed = 0,
                   downloaded_size = ?, total_size = CASE WHEN ? > total_size THEN ? ELSE total_size END
               WHERE hash = ?"#,
        )
        .bind(Utc::now())
        .bind(final_size)
        .bind(final_size)
        .bind(final_size)
        .bind(hash)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_error(&self, hash: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE download_jobs
               SET state = 'error', error_message = ?, download_speed = 0
               WHERE hash = ?"#,
        )
        .bind(message)
        .bind(hash)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Record a stall. Returns whether an automatic requeue is allowed
    /// (each job gets exactly one).
    pub async fn mark_stalled(&self, hash: &str) -> Result<bool> {
        let job = self.get(hash).await?.ok_or_else(|| anyhow!("No job {}", hash))?;
        let can_requeue = job.stall_requeued == 0;

        if can_requeue {
            sqlx::query(
                r#"UPDATE download_jobs
                   SET state = 'queued', stall_requeued = 1, download_speed = 0,
                       status_message = 'stalled: requeued'
                   WHERE hash = ?"#,
            )
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        } else {
            sqlx::query(
                r#"UPDATE download_jobs
                   SET state = 'stalled', download_speed = 0,
                       error_message = 'stalled: no progress'
                   WHERE hash = ?"#,
            )
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        }
        Ok(can_requeue)
    }

    pub async fn delete(&self, hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM download_jobs WHERE hash = ?")
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

/// Accessor for the categories table.
pub struct CategoryStore<'a> {
    db: &'a Database,
}

impl Database {
    pub fn categories(&self) -> CategoryStore<'_> {
        CategoryStore { db: self }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Category {
    pub name: String,
    pub save_path: String,
}

impl CategoryStore<'_> {
    pub async fn upsert(&self, name: &str, save_path: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO categories (name, save_path) VALUES (?, ?)
               ON CONFLICT(name) DO UPDATE SET save_path = excluded.save_path"#,
        )
        .bind(name)
        .bind(save_path)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Category>> {
        sqlx::query_as("SELECT * FROM categories ORDER BY name ASC")
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list categories")
    }

    pub async fn get(&self, name: &str) -> Result<Option<Category>> {
        sqlx::query_as("SELECT * FROM categories WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to fetch category")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> Database {
        Database::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = db().await;
        let inserted = db
            .jobs()
            .insert("abc", "Movie.mkv", "https://host/file", "/downloads", None, 0)
            .await
            .unwrap();
        assert!(inserted);

        let job = db.jobs().get("abc").await.unwrap().unwrap();
        assert_eq!(job.name, "Movie.mkv");
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.effective_link(), "https://host/file");
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_ignored() {
        let db = db().await;
        assert!(db.jobs().insert("h", "a", "l", "/d", None, 0).await.unwrap());
        assert!(!db.jobs().insert("h", "b", "l2", "/d", None, 0).await.unwrap());

        let job = db.jobs().get("h").await.unwrap().unwrap();
        assert_eq!(job.name, "a");
    }

    #[tokio::test]
    async fn test_total_size_monotonic_ascending_then_regression() {
        let db = db().await;
        db.jobs().insert("h", "n", "l", "/d", None, 0).await.unwrap();

        // Sequence [0, 500, 300, 800]: the stored total must end at 800 and
        // never regress below an observed maximum along the way.
        for (total, expected) in [(0, 0), (500, 500), (300, 500), (800, 800)] {
            db.jobs().update_progress("h", 10, total, 1).await.unwrap();
            let job = db.jobs().get("h").await.unwrap().unwrap();
            assert_eq!(job.total_size, expected, "after reading {}", total);
        }
    }

    #[tokio::test]
    async fn test_total_size_resume_then_smaller_reading() {
        let db = db().await;
        db.jobs().insert("h", "n", "l", "/d", None, 0).await.unwrap();

        // Original run knows the full size; the resumed session only
        // reports the remainder.
        db.jobs().update_progress("h", 200, 1000, 1).await.unwrap();
        db.jobs().update_progress("h", 250, 800, 1).await.unwrap();
        let job = db.jobs().get("h").await.unwrap().unwrap();
        assert_eq!(job.total_size, 1000);
    }

    #[tokio::test]
    async fn test_next_queued_priority_then_insertion() {
        let db = db().await;
        db.jobs().insert("a", "n", "l", "/d", None, 0).await.unwrap();
        db.jobs().insert("b", "n", "l", "/d", None, 0).await.unwrap();
        sqlx::query("UPDATE download_jobs SET priority = 5 WHERE hash = 'b'")
            .execute(db.pool())
            .await
            .unwrap();

        let next = db.jobs().next_queued().await.unwrap().unwrap();
        assert_eq!(next.hash, "b");

        db.jobs().set_state("b", JobState::Downloading).await.unwrap();
        let next = db.jobs().next_queued().await.unwrap().unwrap();
        assert_eq!(next.hash, "a");
        assert_eq!(db.jobs().count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stall_requeues_once() {
        let db = db().await;
        db.jobs().insert("h", "n", "l", "/d", None, 0).await.unwrap();

        assert!(db.jobs().mark_stalled("h").await.unwrap());
        let job = db.jobs().get("h").await.unwrap().unwrap();
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.stall_requeued, 1);

        assert!(!db.jobs().mark_stalled("h").await.unwrap());
        let job = db.jobs().get("h").await.unwrap().unwrap();
        assert_eq!(job.state(), JobState::Stalled);
    }

    #[tokio::test]
    async fn test_mark_completed_snapshots_size() {
        let db = db().await;
        db.jobs().insert("h", "n", "l", "/d", None, 0).await.unwrap();
        db.jobs().mark_completed("h", 4242).await.unwrap();

        let job = db.jobs().get("h").await.unwrap().unwrap();
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.downloaded_size, 4242);
        assert_eq!(job.total_size, 4242);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_categories_roundtrip() {
        let db = db().await;
        db.categories().upsert("radarr", "/downloads/radarr").await.unwrap();
        db.categories().upsert("radarr", "/downloads/movies").await.unwrap();

        let all = db.categories().list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].save_path, "/downloads/movies");
    }
}

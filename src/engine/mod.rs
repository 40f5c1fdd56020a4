//! Download job engine (compatibility-shim tier)
//!
//! Drives persisted [`DownloadJob`]s through
//! queued -> checking -> downloading -> completed/error, with paused reachable
//! from any active state and an automatic single requeue on stall. The
//! engine performs the link-resolution pipeline itself and streams the file
//! through the wget transfer wrapper; all job-state mutations happen here,
//! fed by the transfer's event channel.
//!
//! Scheduling: `tick` fills free slots (checking + downloading count as
//! occupied) from the queue, highest priority first, then insertion order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::db::jobs::{DownloadJob, JobState};
use crate::downloader::transfer::{
    ActiveTransfer, TransferEvent, TransferOptions, WGET_EXIT_SERVER_ERROR, relocate, spawn_wget,
};
use crate::resolver::{BypassOutcome, LinkResolver};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent: usize,
    pub temp_dir: PathBuf,
    pub default_save_path: PathBuf,
    /// No byte progress for this long marks the job stalled.
    pub stall_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            temp_dir: PathBuf::from("./data/incomplete"),
            default_save_path: PathBuf::from("./data/downloads"),
            stall_timeout: Duration::from_secs(300),
        }
    }
}

pub struct DownloadEngine {
    db: Database,
    resolver: Arc<LinkResolver>,
    config: EngineConfig,
    client: reqwest::Client,
    /// Transfers in flight, keyed by job hash. Pause and delete reach the
    /// subprocess through this map.
    active: Mutex<HashMap<String, Arc<ActiveTransfer>>>,
}

impl DownloadEngine {
    pub fn new(db: Database, resolver: Arc<LinkResolver>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            db,
            resolver,
            config,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Fill free scheduler slots from the queue. Called periodically and
    /// after every add/resume.
    pub async fn tick(self: &Arc<Self>) {
        loop {
            let active = match self.db.jobs().count_active().await {
                Ok(n) => n as usize,
                Err(e) => {
                    warn!(error = %e, "Failed to count active jobs");
                    return;
                }
            };
            if active >= self.config.max_concurrent {
                return;
            }

            let job = match self.db.jobs().next_queued().await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "Failed to pick next job");
                    return;
                }
            };

            // Claim the slot before spawning so the next loop iteration
            // sees it occupied.
            if let Err(e) = self.db.jobs().set_state(&job.hash, JobState::Checking).await {
                warn!(error = %e, "Failed to claim job");
                return;
            }

            let engine = self.clone();
            tokio::spawn(async move {
                let hash = job.hash.clone();
                if let Err(e) = engine.process(job).await {
                    warn!(hash = %hash, error = %e, "Job processing failed");
                    let _ = engine.db.jobs().mark_error(&hash, &e.to_string()).await;
                }
                engine.active.lock().remove(&hash);
            });
        }
    }

    /// Run one claimed job to a terminal or parked state.
    async fn process(self: &Arc<Self>, job: DownloadJob) -> Result<()> {
        let hash = job.hash.clone();
        debug!(hash = %hash, name = %job.name, "Processing job");

        // Bypass is fatal here: without the real hoster link there is
        // nothing to download.
        let (link, outcome) = self.resolver.run_bypass(&job.original_link).await;
        if let BypassOutcome::FellBack(reason) = outcome {
            anyhow::bail!("link protection bypass failed: {}", reason);
        }

        // Liveness probe: a dead file is a hard stop, but plenty of hosts
        // don't implement HEAD, so only a clean 404 is trusted.
        match self.client.head(&link).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                anyhow::bail!("hoster reports the file is gone (404)");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(hash = %hash, error = %e, "HEAD probe failed, continuing anyway");
            }
        }

        let (link, debrided_by) = self.resolver.run_debrid(&link).await;
        if let Some(ref backend) = debrided_by {
            self.db
                .jobs()
                .set_status_message(&hash, &format!("debrided via {}", backend))
                .await?;
        }
        self.db.jobs().set_resolved_link(&hash, &link).await?;

        // Best-effort real-filename discovery; the submitted name is the
        // fallback.
        let name = match self.discover_filename(&link).await {
            Some(found) if found != job.name => {
                self.db.jobs().set_name(&hash, &found).await?;
                found
            }
            _ => job.name.clone(),
        };

        self.db.jobs().mark_started(&hash).await?;
        self.transfer_loop(&job, &link, &name).await
    }

    /// Streaming transfer with resume, stall detection and the
    /// range-rejection restart.
    async fn transfer_loop(self: &Arc<Self>, job: &DownloadJob, link: &str, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let temp_path = self.config.temp_dir.join(format!("{}.part", job.hash));
        let mut restarted = false;

        loop {
            // A leftover partial from a pause or stall is the resume point.
            let offset = tokio::fs::metadata(&temp_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);

            let (transfer, mut events) = spawn_wget(
                name.to_string(),
                TransferOptions {
                    url: link.to_string(),
                    temp_path: temp_path.clone(),
                    resume: offset > 0,
                },
            )?;
            self.active.lock().insert(job.hash.clone(), transfer.clone());

            let mut last_progress = tokio::time::Instant::now();
            loop {
                let stall_deadline = last_progress + self.config.stall_timeout;
                tokio::select! {
                    event = events.recv() => match event {
                        Some(TransferEvent::Progress { downloaded, total, speed_bps }) => {
                            last_progress = tokio::time::Instant::now();
                            // The session only counts its own bytes; the
                            // pre-resume offset is added back in, and the
                            // store refuses total regressions.
                            let stored_total = if total > 0 { (total + offset) as i64 } else { 0 };
                            self.db
                                .jobs()
                                .update_progress(
                                    &job.hash,
                                    (offset + downloaded) as i64,
                                    stored_total,
                                    speed_bps as i64,
                                )
                                .await
                                .ok();
                        }
                        Some(TransferEvent::Completed) => {
                            let dest = self.destination(job, name);
                            let size = relocate(&temp_path, &dest)
                                .await
                                .context("failed to place completed download")?;
                            self.db.jobs().mark_completed(&job.hash, size as i64).await?;
                            info!(hash = %job.hash, dest = %dest.display(), size, "Download complete");
                            return Ok(());
                        }
                        Some(TransferEvent::Failed { message, exit_code }) => {
                            // A server that refuses range requests fails the
                            // resume attempt; restart once from zero.
                            if exit_code == Some(WGET_EXIT_SERVER_ERROR)
                                && offset > 0
                                && !restarted
                            {
                                warn!(hash = %job.hash, "Server rejected range resume, restarting from zero");
                                let _ = tokio::fs::remove_file(&temp_path).await;
                                restarted = true;
                                break;
                            }
                            anyhow::bail!("{}", message);
                        }
                        Some(TransferEvent::Stopped) => {
                            // Pause or delete already set the job state.
                            debug!(hash = %job.hash, "Transfer stopped");
                            return Ok(());
                        }
                        None => {
                            anyhow::bail!("transfer event stream closed unexpectedly");
                        }
                    },
                    _ = tokio::time::sleep_until(stall_deadline) => {
                        warn!(hash = %job.hash, "No progress within stall timeout");
                        transfer.stop_keep_partial();
                        // Drain the Stopped event so the child is reaped.
                        while let Some(event) = events.recv().await {
                            if matches!(event, TransferEvent::Stopped) {
                                break;
                            }
                        }
                        let requeued = self.db.jobs().mark_stalled(&job.hash).await?;
                        if requeued {
                            info!(hash = %job.hash, "Stalled job requeued");
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    fn destination(&self, job: &DownloadJob, name: &str) -> PathBuf {
        let base = if job.save_path.is_empty() {
            self.config.default_save_path.clone()
        } else {
            PathBuf::from(&job.save_path)
        };
        base.join(sanitize_filename::sanitize(name))
    }

    /// Try to learn the real filename from the hoster: Content-Disposition
    /// first, then the final redirect target's path segment.
    async fn discover_filename(&self, link: &str) -> Option<String> {
        let response = self.client.head(link).send().await.ok()?;

        if let Some(disposition) = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            && let Some(name) = parse_content_disposition(disposition)
        {
            return Some(sanitize_filename::sanitize(name));
        }

        response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
            .filter(|s| !s.is_empty() && s.contains('.'))
            .map(|s| sanitize_filename::sanitize(s))
    }

    /// Pause a job: queued jobs park immediately, active jobs get their
    /// transfer killed with the partial file kept for resume.
    pub async fn pause(&self, hash: &str) -> Result<()> {
        let Some(job) = self.db.jobs().get(hash).await? else {
            return Ok(());
        };
        if job.state().is_terminal() {
            return Ok(());
        }

        self.db.jobs().set_state(hash, JobState::Paused).await?;
        if let Some(transfer) = self.active.lock().remove(hash) {
            transfer.stop_keep_partial();
        }
        Ok(())
    }

    /// Resume a paused (or stalled) job back into the queue.
    pub async fn resume(&self, hash: &str) -> Result<()> {
        let Some(job) = self.db.jobs().get(hash).await? else {
            return Ok(());
        };
        if matches!(job.state(), JobState::Paused | JobState::Stalled) {
            self.db.jobs().set_state(hash, JobState::Queued).await?;
        }
        Ok(())
    }

    /// Delete a job, its partial file, and optionally the completed
    /// payload.
    pub async fn delete(&self, hash: &str, delete_files: bool) -> Result<()> {
        if let Some(transfer) = self.active.lock().remove(hash) {
            transfer.stop();
        }

        if let Some(job) = self.db.jobs().get(hash).await? {
            let temp = self.config.temp_dir.join(format!("{}.part", hash));
            let _ = tokio::fs::remove_file(&temp).await;
            if delete_files {
                let dest = self.destination(&job, &job.name);
                let _ = tokio::fs::remove_file(&dest).await;
            }
        }

        self.db.jobs().delete(hash).await
    }
}

/// Extract the filename from a Content-Disposition header value.
fn parse_content_disposition(value: &str) -> Option<&str> {
    let marker = "filename=";
    let idx = value.find(marker)? + marker.len();
    let rest = value[idx..].trim();
    let name = rest
        .trim_start_matches('"')
        .split(['"', ';'])
        .next()?
        .trim();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_disposition() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="Movie.mkv""#),
            Some("Movie.mkv")
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=plain.bin"),
            Some("plain.bin")
        );
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="semi.mkv"; size=3"#),
            Some("semi.mkv")
        );
        assert_eq!(parse_content_disposition("inline"), None);
    }

    #[tokio::test]
    async fn test_pause_and_resume_queued_job() {
        let db = Database::connect(":memory:").await.unwrap();
        db.jobs()
            .insert("h", "n", "https://host/f", "/d", None, 0)
            .await
            .unwrap();

        let engine = DownloadEngine::new(
            db.clone(),
            Arc::new(LinkResolver::new(None, vec![])),
            EngineConfig::default(),
        );

        engine.pause("h").await.unwrap();
        assert_eq!(
            db.jobs().get("h").await.unwrap().unwrap().state(),
            JobState::Paused
        );

        engine.resume("h").await.unwrap();
        assert_eq!(
            db.jobs().get("h").await.unwrap().unwrap().state(),
            JobState::Queued
        );
    }

    #[tokio::test]
    async fn test_pause_ignores_terminal_jobs() {
        let db = Database::connect(":memory:").await.unwrap();
        db.jobs()
            .insert("h", "n", "https://host/f", "/d", None, 0)
            .await
            .unwrap();
        db.jobs().mark_completed("h", 10).await.unwrap();

        let engine = DownloadEngine::new(
            db.clone(),
            Arc::new(LinkResolver::new(None, vec![])),
            EngineConfig::default(),
        );
        engine.pause("h").await.unwrap();
        assert_eq!(
            db.jobs().get("h").await.unwrap().unwrap().state(),
            JobState::Completed
        );
    }

    #[tokio::test]
    async fn test_delete_removes_job() {
        let db = Database::connect(":memory:").await.unwrap();
        db.jobs()
            .insert("h", "n", "https://host/f", "/d", None, 0)
            .await
            .unwrap();

        let engine = DownloadEngine::new(
            db.clone(),
            Arc::new(LinkResolver::new(None, vec![])),
            EngineConfig::default(),
        );
        engine.delete("h", false).await.unwrap();
        assert!(db.jobs().get("h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_offset_accounting() {
        // Scenario: a job resumed with 1000 bytes already on disk and a
        // session reporting 200 downloaded must store 1200.
        let db = Database::connect(":memory:").await.unwrap();
        db.jobs()
            .insert("h", "n", "https://host/f", "/d", None, 0)
            .await
            .unwrap();

        let offset: u64 = 1000;
        let downloaded: u64 = 200;
        db.jobs()
            .update_progress("h", (offset + downloaded) as i64, 0, 50)
            .await
            .unwrap();

        let job = db.jobs().get("h").await.unwrap().unwrap();
        assert_eq!(job.downloaded_size, 1200);
    }
}

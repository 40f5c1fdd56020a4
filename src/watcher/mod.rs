//! Placeholder inbox watcher and dispatcher
//!
//! Radarr/Sonarr drop grabbed placeholder .torrent files into a blackhole
//! directory. Two observers race over it (a periodic scan and a
//! filesystem-notification stream) and both funnel into [`process_file`].
//! Correctness does not depend on observer ordering: the atomic rename into
//! `processing/` is the claim point, and whichever observer loses the race
//! simply finds the file gone and backs off.
//!
//! Disposition rules: a file the watcher could not process is never
//! deleted; every non-success path relocates it into `failed/` with a
//! reason suffix for operator inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::container;
use crate::downloader::{DownloadClient, dispatch_all};
use crate::resolver::{BypassOutcome, LinkResolver};

/// Reserved subdirectories, never treated as inbound work.
const PROCESSING_DIR: &str = "processing";
const FAILED_DIR: &str = "failed";
const PROCESSED_DIR: &str = "processed";

const PLACEHOLDER_EXT: &str = "torrent";

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Inbox root. Only files directly at this level are inbound.
    pub inbox: PathBuf,
    pub scan_interval: Duration,
    /// Keep successfully dispatched placeholders in `processed/` instead
    /// of deleting them. Debug aid.
    pub keep_processed: bool,
    /// Run the bypass stage at this tier. Off when the orchestrator
    /// already resolved links at indexing time.
    pub bypass_here: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox: PathBuf::from("./data/blackhole"),
            scan_interval: Duration::from_secs(30),
            keep_processed: false,
            bypass_here: true,
        }
    }
}

pub struct FolderWatcher {
    config: WatcherConfig,
    resolver: Arc<LinkResolver>,
    clients: Vec<Arc<dyn DownloadClient>>,
}

impl FolderWatcher {
    pub fn new(
        config: WatcherConfig,
        resolver: Arc<LinkResolver>,
        clients: Vec<Arc<dyn DownloadClient>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            resolver,
            clients,
        })
    }

    /// Provision the inbox and its reserved subdirectories, then start the
    /// periodic scan and the filesystem-notification stream.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        for dir in [
            self.config.inbox.clone(),
            self.config.inbox.join(PROCESSING_DIR),
            self.config.inbox.join(FAILED_DIR),
            self.config.inbox.join(PROCESSED_DIR),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        // Catch up on anything dropped while we were down.
        self.scan().await;

        let scanner = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scanner.config.scan_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                scanner.scan().await;
            }
        });

        let notified = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notified.watch_events().await {
                warn!(error = %e, "Filesystem watch ended; periodic scan continues");
            }
        });

        info!(inbox = %self.config.inbox.display(), "Folder watcher started");
        Ok(())
    }

    /// Enumerate root-level placeholder files and process each.
    pub async fn scan(self: &Arc<Self>) {
        let mut entries = match tokio::fs::read_dir(&self.config.inbox).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read inbox");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            // Subdirectories (including the reserved ones) are never
            // inbound work.
            if path.is_dir() || !is_placeholder(&path) {
                continue;
            }
            self.process_file(&path).await;
        }
    }

    /// Bridge filesystem notifications into the async world. The watcher
    /// thread sends paths; this task drains them.
    async fn watch_events(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let inbox = self.config.inbox.clone();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            if let Ok(event) = event
                && matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
        })
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(&inbox, RecursiveMode::NonRecursive)
            .context("Failed to watch inbox")?;

        // Keep the watcher alive for the lifetime of the loop.
        while let Some(path) = rx.recv().await {
            if path.is_dir() || !is_placeholder(&path) {
                continue;
            }
            // Give the writer a moment to finish; clients write the
            // placeholder in one go but not atomically.
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.process_file(&path).await;
        }

        drop(watcher);
        Ok(())
    }

    /// Drive one placeholder through claim -> decode -> resolve -> dispatch ->
    /// disposition.
    pub async fn process_file(self: &Arc<Self>, path: &Path) {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return;
        };

        // Claim by atomic rename. Losing the race (scan vs notification,
        // or two scans) surfaces as NotFound; stay silent then.
        let claimed = self.config.inbox.join(PROCESSING_DIR).join(&file_name);
        match tokio::fs::rename(path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %file_name, "Lost claim race, skipping");
                return;
            }
            Err(e) => {
                // Cannot safely proceed without the claim.
                warn!(file = %file_name, error = %e, "Failed to move file into processing");
                return;
            }
        }

        info!(file = %file_name, "Processing placeholder");
        match self.handle_claimed(&claimed).await {
            Ok(()) => {
                if self.config.keep_processed {
                    let archived = self.config.inbox.join(PROCESSED_DIR).join(&file_name);
                    if let Err(e) = tokio::fs::rename(&claimed, &archived).await {
                        warn!(file = %file_name, error = %e, "Failed to archive placeholder");
                    }
                } else if let Err(e) = tokio::fs::remove_file(&claimed).await {
                    warn!(file = %file_name, error = %e, "Failed to delete placeholder");
                }
            }
            Err(reason) => {
                self.fail_file(&claimed, &reason).await;
            }
        }
    }

    /// The fallible middle of the pipeline. The returned error string is
    /// the failure-reason suffix.
    async fn handle_claimed(self: &Arc<Self>, claimed: &Path) -> std::result::Result<(), String> {
        let bytes = tokio::fs::read(claimed)
            .await
            .map_err(|e| format!("unreadable-{}", e.kind()))?;

        let Some(payload) = container::decode(&bytes) else {
            return Err("no-link".to_string());
        };
        debug!(url = %payload.url, name = ?payload.name, "Decoded placeholder");

        let mut link = payload.url;
        if self.config.bypass_here {
            let (resolved, outcome) = self.resolver.run_bypass(&link).await;
            if let BypassOutcome::FellBack(reason) = outcome {
                // Unlike the search tier there is no fallback consumer
                // below us; an unresolved protection link is a dead job.
                warn!(error = %reason, "Bypass failed, parking placeholder");
                return Err("dlprotect-error".to_string());
            }
            link = resolved;
        }

        let (link, _) = self.resolver.run_debrid(&link).await;

        let accepted = dispatch_all(&self.clients, &link, payload.name.as_deref()).await;
        if accepted {
            Ok(())
        } else {
            Err("download-client-error".to_string())
        }
    }

    /// Relocate a claimed file into `failed/`, tagged with reason and
    /// timestamp.
    async fn fail_file(&self, claimed: &Path, reason: &str) {
        let stem = claimed
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "placeholder".to_string());
        let failed_name = format!(
            "{}-{}-{}.{}",
            stem,
            reason,
            Utc::now().format("%Y%m%d%H%M%S"),
            PLACEHOLDER_EXT
        );
        let failed = self.config.inbox.join(FAILED_DIR).join(failed_name);

        match tokio::fs::rename(claimed, &failed).await {
            Ok(()) => warn!(file = %failed.display(), reason, "Placeholder parked in failed/"),
            Err(e) => warn!(error = %e, reason, "Failed to park placeholder"),
        }
    }
}

fn is_placeholder(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(PLACEHOLDER_EXT))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingClient {
        accept: bool,
        calls: AtomicUsize,
        last_url: parking_lot::Mutex<Option<String>>,
    }

    impl RecordingClient {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                calls: AtomicUsize::new(0),
                last_url: parking_lot::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl DownloadClient for RecordingClient {
        fn name(&self) -> &str {
            "recording"
        }
        fn is_enabled(&self) -> bool {
            true
        }
        async fn test_connection(&self) -> Result<bool> {
            Ok(true)
        }
        async fn add_download(&self, url: &str, _filename: Option<&str>) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_url.lock() = Some(url.to_string());
            Ok(self.accept)
        }
    }

    fn watcher_with(
        inbox: PathBuf,
        client: Arc<RecordingClient>,
        keep_processed: bool,
    ) -> Arc<FolderWatcher> {
        FolderWatcher::new(
            WatcherConfig {
                inbox,
                scan_interval: Duration::from_secs(3600),
                keep_processed,
                bypass_here: true,
            },
            Arc::new(LinkResolver::new(None, vec![])),
            vec![client],
        )
    }

    async fn drop_placeholder(inbox: &Path, name: &str, url: &str) -> PathBuf {
        let data = container::encode(name, url, None);
        let path = inbox.join(format!("{}.torrent", name));
        tokio::fs::write(&path, data).await.unwrap();
        path
    }

    async fn provision(watcher: &Arc<FolderWatcher>) {
        for dir in [PROCESSING_DIR, FAILED_DIR, PROCESSED_DIR] {
            tokio::fs::create_dir_all(watcher.config.inbox.join(dir))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_dispatch_success_deletes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let client = RecordingClient::new(true);
        let watcher = watcher_with(dir.path().to_path_buf(), client.clone(), false);
        provision(&watcher).await;

        let path =
            drop_placeholder(dir.path(), "Movie.Title.mkv", "https://host.example/file").await;
        watcher.scan().await;

        assert!(!path.exists());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.last_url.lock().as_deref(),
            Some("https://host.example/file")
        );
        // Nothing parked anywhere.
        let mut failed = tokio::fs::read_dir(dir.path().join(FAILED_DIR)).await.unwrap();
        assert!(failed.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_failure_parks_in_failed() {
        let dir = tempfile::tempdir().unwrap();
        let client = RecordingClient::new(false);
        let watcher = watcher_with(dir.path().to_path_buf(), client.clone(), false);
        provision(&watcher).await;

        let path = drop_placeholder(dir.path(), "Movie", "https://host.example/file").await;
        watcher.scan().await;

        assert!(!path.exists());
        let mut failed = tokio::fs::read_dir(dir.path().join(FAILED_DIR)).await.unwrap();
        let entry = failed.next_entry().await.unwrap().expect("file parked");
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(name.contains("download-client-error"), "{}", name);
    }

    #[tokio::test]
    async fn test_undecodable_file_parks_with_no_link_reason() {
        let dir = tempfile::tempdir().unwrap();
        let client = RecordingClient::new(true);
        let watcher = watcher_with(dir.path().to_path_buf(), client.clone(), false);
        provision(&watcher).await;

        tokio::fs::write(dir.path().join("junk.torrent"), b"not bencode at all")
            .await
            .unwrap();
        watcher.scan().await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        let mut failed = tokio::fs::read_dir(dir.path().join(FAILED_DIR)).await.unwrap();
        let entry = failed.next_entry().await.unwrap().expect("file parked");
        assert!(
            entry
                .file_name()
                .to_string_lossy()
                .contains("no-link")
        );
    }

    #[tokio::test]
    async fn test_keep_processed_archives_instead_of_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let client = RecordingClient::new(true);
        let watcher = watcher_with(dir.path().to_path_buf(), client, true);
        provision(&watcher).await;

        drop_placeholder(dir.path(), "Kept", "https://host.example/kept").await;
        watcher.scan().await;

        let mut processed = tokio::fs::read_dir(dir.path().join(PROCESSED_DIR)).await.unwrap();
        assert!(processed.next_entry().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reserved_dirs_and_foreign_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let client = RecordingClient::new(true);
        let watcher = watcher_with(dir.path().to_path_buf(), client.clone(), false);
        provision(&watcher).await;

        // A placeholder inside a reserved dir and a non-placeholder at the
        // root must both be ignored.
        drop_placeholder(&dir.path().join(FAILED_DIR), "Old", "https://h/old").await;
        tokio::fs::write(dir.path().join("notes.txt"), b"hi").await.unwrap();
        watcher.scan().await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_protected_link_without_bypass_service_parks() {
        let dir = tempfile::tempdir().unwrap();
        let client = RecordingClient::new(true);
        let watcher = watcher_with(dir.path().to_path_buf(), client.clone(), false);
        provision(&watcher).await;

        drop_placeholder(dir.path(), "Prot", "https://dl-protect.link/abc").await;
        watcher.scan().await;

        // Bypass is fatal at this tier.
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        let mut failed = tokio::fs::read_dir(dir.path().join(FAILED_DIR)).await.unwrap();
        let entry = failed.next_entry().await.unwrap().expect("file parked");
        assert!(
            entry
                .file_name()
                .to_string_lossy()
                .contains("dlprotect-error")
        );
    }
}

//! Streaming transfer subprocess wrapper
//!
//! Shells out to wget (or curl) and turns its progress chatter into a typed
//! event stream consumed over a channel. The job state machine is the single
//! consumer authorized to act on those events; this module never touches
//! job state itself.
//!
//! Cancellation: `ActiveTransfer::stop` flips the stopped flag and wakes
//! the supervisor, which kills the child and removes the partial file. The
//! exit handler checks the flag first so a user-initiated stop never fires
//! the failure path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use super::TransferSnapshot;

/// wget exits with code 8 when the server refuses the request, which is how
/// a rejected range resume surfaces with `-c`.
pub const WGET_EXIT_SERVER_ERROR: i32 = 8;

/// Events emitted by a running transfer.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Progress sample. `downloaded` counts bytes of the current session
    /// only: a resumed wget reports just the remaining part.
    Progress {
        downloaded: u64,
        total: u64,
        speed_bps: u64,
    },
    /// Process exited cleanly; the payload is at the temp path.
    Completed,
    /// Process exited with an error.
    Failed { message: String, exit_code: Option<i32> },
    /// Process was killed by an explicit stop/pause.
    Stopped,
}

/// Shared state of one in-flight transfer.
pub struct ActiveTransfer {
    pub name: String,
    pub backend: &'static str,
    pub temp_path: PathBuf,
    downloaded: AtomicU64,
    total: AtomicU64,
    speed: AtomicU64,
    stopped: AtomicBool,
    keep_partial: AtomicBool,
    stop_signal: Notify,
}

impl ActiveTransfer {
    pub fn new(name: String, backend: &'static str, temp_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            name,
            backend,
            temp_path,
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            keep_partial: AtomicBool::new(false),
            stop_signal: Notify::new(),
        })
    }

    /// Request termination and removal of the partial file. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a stop issued while the
        // supervisor is between awaits is not lost.
        self.stop_signal.notify_one();
    }

    /// Request termination but keep the partial file on disk, so a later
    /// resume can append to it. This is the pause path.
    pub fn stop_keep_partial(&self) {
        self.keep_partial.store(true, Ordering::SeqCst);
        self.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn discard_partial(&self) -> bool {
        !self.keep_partial.load(Ordering::SeqCst)
    }

    /// Wait for a stop request. Used by transfer supervisors.
    pub(crate) async fn stop_signal_notified(&self) {
        self.stop_signal.notified().await;
    }

    pub(crate) fn record_sample(&self, downloaded: u64, total: u64, speed: u64) {
        self.downloaded.store(downloaded, Ordering::Relaxed);
        if total > 0 {
            self.total.store(total, Ordering::Relaxed);
        }
        self.speed.store(speed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let downloaded = self.downloaded.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        TransferSnapshot {
            name: self.name.clone(),
            backend: self.backend.to_string(),
            percent: if total > 0 {
                (downloaded as f32 / total as f32) * 100.0
            } else {
                0.0
            },
            downloaded_bytes: downloaded,
            total_bytes: total,
            speed_bps: self.speed.load(Ordering::Relaxed),
        }
    }
}

/// Parse a value with an optional K/M/G/T suffix into bytes.
fn parse_suffixed(value: &str) -> Option<u64> {
    let value = value.trim();
    let (number, multiplier) = match value.chars().last()? {
        'K' | 'k' => (&value[..value.len() - 1], 1024u64),
        'M' | 'm' => (&value[..value.len() - 1], 1024 * 1024),
        'G' | 'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        'T' | 't' => (&value[..value.len() - 1], 1024u64.pow(4)),
        _ => (value, 1),
    };
    let n: f64 = number.parse().ok()?;
    Some((n * multiplier as f64) as u64)
}

/// wget dot-style progress line: `  51200K .......... 47% 1.21M 2m30s`.
static WGET_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)K[\s.]+(\d+)%\s+([\d.]+[KMGT]?)").unwrap());

/// `Length: 1610612736 (1.5G)` header printed before the body starts.
static WGET_LENGTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"Length:\s*(\d+)").unwrap());

/// Parse one line of wget stderr into (downloaded, percent, speed).
pub fn parse_wget_progress(line: &str) -> Option<(u64, u32, u64)> {
    let caps = WGET_PROGRESS.captures(line)?;
    let downloaded_kb: u64 = caps[1].parse().ok()?;
    let percent: u32 = caps[2].parse().ok()?;
    let speed = parse_suffixed(&caps[3]).unwrap_or(0);
    Some((downloaded_kb * 1024, percent, speed))
}

/// Parse wget's `Length:` header line.
pub fn parse_wget_length(line: &str) -> Option<u64> {
    WGET_LENGTH.captures(line).and_then(|c| c[1].parse().ok())
}

/// Options for one subprocess transfer.
pub struct TransferOptions {
    pub url: String,
    pub temp_path: PathBuf,
    /// Resume with `-c` instead of truncating.
    pub resume: bool,
}

/// Spawn a wget transfer and stream its events.
///
/// Returns the shared transfer handle and the event receiver. The
/// supervisor task owns the child process; dropping the receiver does not
/// kill it, `ActiveTransfer::stop` does.
pub fn spawn_wget(
    name: String,
    options: TransferOptions,
) -> Result<(Arc<ActiveTransfer>, mpsc::Receiver<TransferEvent>)> {
    let transfer = ActiveTransfer::new(name, "wget", options.temp_path.clone());
    let (tx, rx) = mpsc::channel(64);

    let mut command = Command::new("wget");
    command
        .arg("--progress=dot:mega")
        .arg("--tries=1")
        .arg("--timeout=30")
        .arg("-O")
        .arg(&options.temp_path);
    if options.resume {
        command.arg("-c");
    }
    command
        .arg(&options.url)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().context("Failed to spawn wget")?;
    let stderr = child
        .stderr
        .take()
        .context("wget spawned without stderr pipe")?;

    let supervisor = transfer.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut total: u64 = 0;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(length) = parse_wget_length(&line) {
                                total = length;
                            }
                            if let Some((downloaded, _percent, speed)) = parse_wget_progress(&line) {
                                supervisor.record_sample(downloaded, total, speed);
                                let _ = tx
                                    .send(TransferEvent::Progress {
                                        downloaded,
                                        total,
                                        speed_bps: speed,
                                    })
                                    .await;
                            }
                        }
                        // stderr closed: fall through to waiting on exit.
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Failed reading wget output");
                            break;
                        }
                    }
                }
                _ = supervisor.stop_signal.notified() => {
                    debug!(name = %supervisor.name, "Stopping transfer");
                    let _ = child.kill().await;
                    if supervisor.discard_partial() {
                        let _ = tokio::fs::remove_file(&supervisor.temp_path).await;
                    }
                    let _ = tx.send(TransferEvent::Stopped).await;
                    return;
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = supervisor.stop_signal.notified() => {
                let _ = child.kill().await;
                if supervisor.discard_partial() {
                    let _ = tokio::fs::remove_file(&supervisor.temp_path).await;
                }
                let _ = tx.send(TransferEvent::Stopped).await;
                return;
            }
        };

        // The stopped flag wins over whatever the exit status says: a
        // killed child must not fire the failure path.
        if supervisor.is_stopped() {
            if supervisor.discard_partial() {
                let _ = tokio::fs::remove_file(&supervisor.temp_path).await;
            }
            let _ = tx.send(TransferEvent::Stopped).await;
            return;
        }

        match status {
            Ok(status) if status.success() => {
                let _ = tx.send(TransferEvent::Completed).await;
            }
            Ok(status) => {
                let _ = tx
                    .send(TransferEvent::Failed {
                        message: format!("wget exited with {}", status),
                        exit_code: status.code(),
                    })
                    .await;
            }
            Err(e) => {
                let _ = tx
                    .send(TransferEvent::Failed {
                        message: format!("wget wait failed: {}", e),
                        exit_code: None,
                    })
                    .await;
            }
        }
    });

    Ok((transfer, rx))
}

/// Move a finished payload into its destination, handling cross-filesystem
/// moves by copy+delete. The destination directory is created as needed.
pub async fn relocate(temp_path: &Path, dest_path: &Path) -> Result<u64> {
    if let Some(parent) = dest_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    match tokio::fs::rename(temp_path, dest_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) => {
            // EXDEV: temp dir and destination are on different filesystems.
            tokio::fs::copy(temp_path, dest_path)
                .await
                .with_context(|| format!("Failed to copy to {}", dest_path.display()))?;
            tokio::fs::remove_file(temp_path).await.ok();
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to move to {}", dest_path.display()));
        }
    }

    let meta = tokio::fs::metadata(dest_path).await?;
    Ok(meta.len())
}

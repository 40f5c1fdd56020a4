//! Direct-fetch download backends
//!
//! Two backends that skip external download managers entirely and stream
//! the file themselves through a subprocess (wget or curl). Both download
//! into a temp path and atomically relocate into the destination on
//! success, falling back to copy+delete across filesystems. In-flight
//! transfers are visible in the shared [`TransferRegistry`] and can be
//! stopped, which kills the subprocess and removes the partial file.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::transfer::{
    ActiveTransfer, TransferEvent, TransferOptions, relocate, spawn_wget,
};
use super::{DownloadClient, TransferRegistry};

/// Shared settings for both direct-fetch backends.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub enabled: bool,
    pub dest_dir: PathBuf,
    pub temp_dir: PathBuf,
}

/// Pick the destination filename: explicit name first, else the last path
/// segment of the URL, else a generated one. Always sanitized.
fn destination_name(url: &str, filename: Option<&str>) -> String {
    let raw = filename
        .map(|f| f.to_string())
        .or_else(|| {
            url::Url::parse(url).ok().and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
                    .filter(|s| !s.is_empty())
            })
        })
        .unwrap_or_else(|| format!("download-{}", uuid::Uuid::new_v4()));
    sanitize_filename::sanitize(raw)
}

/// Drive one spawned transfer to its end state.
async fn supervise(
    transfer: Arc<ActiveTransfer>,
    mut events: mpsc::Receiver<TransferEvent>,
    registry: Arc<TransferRegistry>,
    registry_id: String,
    dest_path: PathBuf,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransferEvent::Progress { .. } => {}
            TransferEvent::Completed => {
                match relocate(&transfer.temp_path, &dest_path).await {
                    Ok(size) => {
                        info!(dest = %dest_path.display(), size, "Direct fetch complete");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to place downloaded file");
                        let _ = tokio::fs::remove_file(&transfer.temp_path).await;
                    }
                }
                break;
            }
            TransferEvent::Failed { message, .. } => {
                warn!(name = %transfer.name, error = %message, "Direct fetch failed");
                let _ = tokio::fs::remove_file(&transfer.temp_path).await;
                break;
            }
            TransferEvent::Stopped => break,
        }
    }
    registry.remove(&registry_id);
}

/// wget-based backend.
pub struct WgetClient {
    config: FetchConfig,
    registry: Arc<TransferRegistry>,
}

impl WgetClient {
    pub fn new(config: FetchConfig, registry: Arc<TransferRegistry>) -> Self {
        Self { config, registry }
    }
}

#[async_trait]
impl DownloadClient for WgetClient {
    fn name(&self) -> &str {
        "wget"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> Result<bool> {
        let status = Command::new("wget")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("wget is not installed")?;
        Ok(status.success())
    }

    async fn add_download(&self, url: &str, filename: Option<&str>) -> Result<bool> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let name = destination_name(url, filename);
        let id = uuid::Uuid::new_v4().to_string();
        let temp_path = self.config.temp_dir.join(format!("{}.part", id));
        let dest_path = self.config.dest_dir.join(&name);

        let (transfer, events) = spawn_wget(
            name,
            TransferOptions {
                url: url.to_string(),
                temp_path,
                resume: false,
            },
        )?;

        self.registry.insert(id.clone(), transfer.clone());
        tokio::spawn(supervise(
            transfer,
            events,
            self.registry.clone(),
            id,
            dest_path,
        ));
        Ok(true)
    }
}

/// curl-based backend.
///
/// curl's progress meter rewrites a single line with carriage returns, so
/// instead of parsing it the supervisor samples the temp file size once a
/// second.
pub struct CurlClient {
    config: FetchConfig,
    registry: Arc<TransferRegistry>,
}

impl CurlClient {
    pub fn new(config: FetchConfig, registry: Arc<TransferRegistry>) -> Self {
        Self { config, registry }
    }

    fn spawn_curl(
        name: String,
        url: String,
        temp_path: PathBuf,
    ) -> Result<(Arc<ActiveTransfer>, mpsc::Receiver<TransferEvent>)> {
        let transfer = ActiveTransfer::new(name, "curl", temp_path.clone());
        let (tx, rx) = mpsc::channel(64);

        let mut child = Command::new("curl")
            .arg("-L")
            .arg("-f")
            .arg("--silent")
            .arg("--show-error")
            .arg("--max-time")
            .arg("86400")
            .arg("-o")
            .arg(&temp_path)
            .arg(&url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn curl")?;

        let supervisor = transfer.clone();
        tokio::spawn(async move {
            let mut sampler = tokio::time::interval(Duration::from_secs(1));
            let mut last_size: u64 = 0;
            loop {
                tokio::select! {
                    status = child.wait() => {
                        if supervisor.is_stopped() {
                            let _ = tokio::fs::remove_file(&supervisor.temp_path).await;
                            let _ = tx.send(TransferEvent::Stopped).await;
                        } else {
                            match status {
                                Ok(s) if s.success() => {
                                    let _ = tx.send(TransferEvent::Completed).await;
                                }
                                Ok(s) => {
                                    let _ = tx.send(TransferEvent::Failed {
                                        message: format!("curl exited with {}", s),
                                        exit_code: s.code(),
                                    }).await;
                                }
                                Err(e) => {
                                    let _ = tx.send(TransferEvent::Failed {
                                        message: format!("curl wait failed: {}", e),
                                        exit_code: None,
                                    }).await;
                                }
                            }
                        }
                        return;
                    }
                    _ = supervisor.stop_signal_notified() => {
                        let _ = child.kill().await;
                        let _ = tokio::fs::remove_file(&supervisor.temp_path).await;
                        let _ = tx.send(TransferEvent::Stopped).await;
                        return;
                    }
                    _ = sampler.tick() => {
                        if let Ok(meta) = tokio::fs::metadata(&supervisor.temp_path).await {
                            let size = meta.len();
                            let speed = size.saturating_sub(last_size);
                            last_size = size;
                            supervisor.record_sample(size, 0, speed);
                            let _ = tx.send(TransferEvent::Progress {
                                downloaded: size,
                                total: 0,
                                speed_bps: speed,
                            }).await;
                        }
                    }
                }
            }
        });

        Ok((transfer, rx))
    }
}

#[async_trait]
impl DownloadClient for CurlClient {
    fn name(&self) -> &str {
        "curl"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> Result<bool> {
        let status = Command::new("curl")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("curl is not installed")?;
        Ok(status.success())
    }

    async fn add_download(&self, url: &str, filename: Option<&str>) -> Result<bool> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let name = destination_name(url, filename);
        let id = uuid::Uuid::new_v4().to_string();
        let temp_path = self.config.temp_dir.join(format!("{}.part", id));
        let dest_path = self.config.dest_dir.join(&name);

        let (transfer, events) = Self::spawn_curl(name, url.to_string(), temp_path)?;

        self.registry.insert(id.clone(), transfer.clone());
        tokio::spawn(supervise(
            transfer,
            events,
            self.registry.clone(),
            id,
            dest_path,
        ));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_name_prefers_explicit() {
        assert_eq!(
            destination_name("https://h/file.bin", Some("Movie.mkv")),
            "Movie.mkv"
        );
    }

    #[test]
    fn test_destination_name_from_url() {
        assert_eq!(
            destination_name("https://host.example/path/file.bin", None),
            "file.bin"
        );
    }

    #[test]
    fn test_destination_name_sanitizes() {
        let name = destination_name("https://h/x", Some("a/../../etc/passwd"));
        assert!(!name.contains('/'));
        assert!(!name.contains(".."));
    }

    #[test]
    fn test_destination_name_fallback_generated() {
        let name = destination_name("not a url", None);
        assert!(name.starts_with("download-"));
    }
}

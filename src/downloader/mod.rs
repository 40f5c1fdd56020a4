//! Download-client backends
//!
//! The watcher hands a resolved URL to every enabled backend and counts the
//! job dispatched when at least one accepts it. Backends are independent: a
//! backend error is caught and logged, never propagated, and `add_download`
//! must stay safe to call twice with the same arguments (the dispatcher
//! retries without prior dedup; a duplicate job in the external client is
//! acceptable, corrupted state is not).

pub mod aria2;
pub mod fetch;
pub mod jdownloader;
pub mod synology;
pub mod transfer;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

/// One download-client backend.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Backend name for logging and the progress API.
    fn name(&self) -> &str;

    /// Whether the backend is switched on in configuration.
    fn is_enabled(&self) -> bool;

    /// Probe the client.
    async fn test_connection(&self) -> Result<bool>;

    /// Submit a URL for download. Returns whether the client accepted it.
    async fn add_download(&self, url: &str, filename: Option<&str>) -> Result<bool>;
}

/// Dispatch a URL to every enabled backend.
///
/// Success is at least one acceptance; failures are logged per backend.
pub async fn dispatch_all(
    clients: &[Arc<dyn DownloadClient>],
    url: &str,
    filename: Option<&str>,
) -> bool {
    let enabled: Vec<_> = clients.iter().filter(|c| c.is_enabled()).collect();
    if enabled.is_empty() {
        warn!("No download client enabled; nothing to dispatch to");
        return false;
    }

    let mut accepted = false;
    for client in enabled {
        match client.add_download(url, filename).await {
            Ok(true) => {
                info!(backend = client.name(), "Download accepted");
                accepted = true;
            }
            Ok(false) => {
                warn!(backend = client.name(), "Download rejected");
            }
            Err(e) => {
                warn!(backend = client.name(), error = %e, "Download client error");
            }
        }
    }
    accepted
}

/// Live progress snapshot of one direct-fetch transfer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferSnapshot {
    pub name: String,
    pub backend: String,
    pub percent: f32,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bps: u64,
}

/// In-memory registry of in-flight direct-fetch transfers, pollable by a
/// UI. Entries are inserted when a transfer starts and removed when it
/// finishes or is stopped.
#[derive(Default)]
pub struct TransferRegistry {
    entries: RwLock<HashMap<String, Arc<transfer::ActiveTransfer>>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: String, transfer: Arc<transfer::ActiveTransfer>) {
        self.entries.write().insert(id, transfer);
    }

    pub fn remove(&self, id: &str) {
        self.entries.write().remove(id);
    }

    /// Snapshot every live transfer.
    pub fn snapshot(&self) -> Vec<TransferSnapshot> {
        self.entries
            .read()
            .values()
            .map(|t| t.snapshot())
            .collect()
    }

    /// Stop one transfer: the subprocess is killed and its partial temp
    /// file removed. Returns whether the id was known.
    pub fn stop(&self, id: &str) -> bool {
        let transfer = self.entries.write().remove(id);
        match transfer {
            Some(t) => {
                t.stop();
                true
            }
            None => false,
        }
    }
}

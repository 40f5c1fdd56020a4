//! JDownloader backend
//!
//! Two transports for the same client: the direct HTTP API a JDownloader
//! instance serves on the local network, and the MyJDownloader cloud relay
//! which addresses a named device through the vendor's servers. The mode is
//! configurable as local-only, remote-only, or auto (try local first, fall
//! back to the relay).

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::DownloadClient;

const RELAY_URL: &str = "https://api.jdownloader.org";

/// Transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JdMode {
    LocalOnly,
    RemoteOnly,
    #[default]
    Auto,
}

impl std::str::FromStr for JdMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(JdMode::LocalOnly),
            "remote" | "cloud" => Ok(JdMode::RemoteOnly),
            "auto" => Ok(JdMode::Auto),
            _ => Err(anyhow!("Unknown JDownloader mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JdConfig {
    pub enabled: bool,
    pub mode: JdMode,
    /// Local API base, e.g. "http://192.168.1.10:3128".
    pub local_url: Option<String>,
    /// MyJDownloader credentials for the relay transport.
    pub email: Option<String>,
    pub password: Option<String>,
    /// Target device name as registered with MyJDownloader.
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    sessiontoken: String,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    list: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct Device {
    id: String,
    name: String,
}

pub struct JdClient {
    config: JdConfig,
    client: reqwest::Client,
    session: Mutex<Option<String>>,
}

impl JdClient {
    pub fn new(config: JdConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            session: Mutex::new(None),
        }
    }

    fn add_links_body(url: &str, filename: Option<&str>) -> serde_json::Value {
        serde_json::json!([{
            "links": url,
            "autostart": true,
            "packageName": filename,
        }])
    }

    /// Submit through the same-network API.
    async fn add_local(&self, url: &str, filename: Option<&str>) -> Result<bool> {
        let base = self
            .config
            .local_url
            .as_deref()
            .ok_or_else(|| anyhow!("No local JDownloader URL configured"))?;

        let response = self
            .client
            .post(format!(
                "{}/linkgrabberv2/addLinks",
                base.trim_end_matches('/')
            ))
            .json(&Self::add_links_body(url, filename))
            .send()
            .await
            .context("Local JDownloader request failed")?;

        Ok(response.status().is_success())
    }

    async fn relay_session(&self) -> Result<String> {
        let mut guard = self.session.lock().await;
        if let Some(ref token) = *guard {
            return Ok(token.clone());
        }

        let (email, password) = match (&self.config.email, &self.config.password) {
            (Some(e), Some(p)) => (e, p),
            _ => return Err(anyhow!("MyJDownloader credentials not configured")),
        };

        let response: ConnectResponse = self
            .client
            .post(format!("{}/my/connect", RELAY_URL))
            .form(&[("email", email.as_str()), ("password", password.as_str())])
            .send()
            .await
            .context("MyJDownloader connect failed")?
            .error_for_status()
            .context("MyJDownloader rejected the credentials")?
            .json()
            .await?;

        *guard = Some(response.sessiontoken.clone());
        Ok(response.sessiontoken)
    }

    /// Resolve the configured device name to its id.
    async fn relay_device(&self, token: &str) -> Result<String> {
        let wanted = self
            .config
            .device_name
            .as_deref()
            .ok_or_else(|| anyhow!("No MyJDownloader device name configured"))?;

        let devices: DeviceList = self
            .client
            .get(format!(
                "{}/my/listdevices?sessiontoken={}",
                RELAY_URL,
                urlencoding::encode(token)
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        devices
            .list
            .into_iter()
            .find(|d| d.name == wanted)
            .map(|d| d.id)
            .ok_or_else(|| anyhow!("Device '{}' is not connected to MyJDownloader", wanted))
    }

    /// Submit through the cloud relay.
    async fn add_remote(&self, url: &str, filename: Option<&str>) -> Result<bool> {
        let token = self.relay_session().await?;
        let device = self.relay_device(&token).await?;

        let response = self
            .client
            .post(format!(
                "{}/t_{}_{}/linkgrabberv2/addLinks",
                RELAY_URL, token, device
            ))
            .json(&Self::add_links_body(url, filename))
            .send()
            .await
            .context("MyJDownloader relay call failed")?;

        if response.status().as_u16() == 403 {
            // Stale session; drop it so the next attempt reconnects.
            *self.session.lock().await = None;
            return Err(anyhow!("MyJDownloader session expired"));
        }

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl DownloadClient for JdClient {
    fn name(&self) -> &str {
        "jdownloader"
    }

    fn is_enabled(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.config.mode {
            JdMode::LocalOnly => self.config.local_url.is_some(),
            JdMode::RemoteOnly => self.config.email.is_some(),
            JdMode::Auto => self.config.local_url.is_some() || self.config.email.is_some(),
        }
    }

    async fn test_connection(&self) -> Result<bool> {
        match self.config.mode {
            JdMode::LocalOnly => self.add_local_probe().await,
            JdMode::RemoteOnly => Ok(self.relay_session().await.is_ok()),
            JdMode::Auto => {
                if self.add_local_probe().await.unwrap_or(false) {
                    return Ok(true);
                }
                Ok(self.relay_session().await.is_ok())
            }
        }
    }

    async fn add_download(&self, url: &str, filename: Option<&str>) -> Result<bool> {
        match self.config.mode {
            JdMode::LocalOnly => self.add_local(url, filename).await,
            JdMode::RemoteOnly => self.add_remote(url, filename).await,
            JdMode::Auto => match self.add_local(url, filename).await {
                Ok(true) => Ok(true),
                Ok(false) | Err(_) => {
                    warn!("Local JDownloader unreachable, falling back to MyJDownloader relay");
                    self.add_remote(url, filename).await
                }
            },
        }
    }
}

impl JdClient {
    /// Cheap liveness probe against the local API.
    async fn add_local_probe(&self) -> Result<bool> {
        let base = self
            .config
            .local_url
            .as_deref()
            .ok_or_else(|| anyhow!("No local JDownloader URL configured"))?;

        let response = self
            .client
            .get(format!("{}/jd/version", base.trim_end_matches('/')))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(r) => Ok(r.status().is_success()),
            Err(e) => {
                debug!(error = %e, "Local JDownloader probe failed");
                Ok(false)
            }
        }
    }
}

//! Synology Download Station backend
//!
//! DSM web API: session-token login against `auth.cgi`, then task creation
//! as a multipart form POST against `task.cgi`. The station answers
//! `{success, error: {code}}`; codes are mapped to readable messages
//! because the raw numbers are useless in logs.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::DownloadClient;

#[derive(Debug, Clone)]
pub struct SynologyConfig {
    pub enabled: bool,
    /// DSM base URL, e.g. "http://nas.local:5000".
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct DsmResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<DsmError>,
}

#[derive(Debug, Deserialize)]
struct DsmError {
    code: i32,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: String,
}

/// Map Download Station error codes onto human messages.
fn error_message(code: i32) -> &'static str {
    match code {
        100 => "unknown error",
        101 => "invalid parameter",
        102 => "requested API does not exist",
        103 => "requested method does not exist",
        105 => "session has no permission",
        106 => "session timed out",
        107 => "session interrupted by duplicate login",
        400 => "file upload failed",
        401 => "max number of tasks reached",
        402 => "destination denied",
        403 => "destination does not exist",
        404 => "invalid task id",
        405 => "invalid task action",
        406 => "no default destination configured",
        407 => "setting destination failed",
        408 => "file does not exist",
        _ => "unrecognized error code",
    }
}

pub struct SynologyClient {
    config: SynologyConfig,
    client: reqwest::Client,
    /// Session token, reacquired on demand.
    sid: Mutex<Option<String>>,
}

impl SynologyClient {
    pub fn new(config: SynologyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            sid: Mutex::new(None),
        }
    }

    async fn login(&self) -> Result<String> {
        let url = format!(
            "{}/webapi/auth.cgi?api=SYNO.API.Auth&version=3&method=login&account={}&passwd={}&session=DownloadStation&format=sid",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(&self.config.username),
            urlencoding::encode(&self.config.password),
        );

        let response: DsmResponse<LoginData> = self
            .client
            .get(&url)
            .send()
            .await
            .context("Download Station login request failed")?
            .json()
            .await
            .context("Failed to parse Download Station login response")?;

        if !response.success {
            let code = response.error.map(|e| e.code).unwrap_or(100);
            return Err(anyhow!(
                "Download Station login failed: {} ({})",
                error_message(code),
                code
            ));
        }

        let sid = response
            .data
            .ok_or_else(|| anyhow!("Login succeeded without a session id"))?
            .sid;
        debug!("Download Station session opened");
        Ok(sid)
    }

    async fn session(&self) -> Result<String> {
        let mut guard = self.sid.lock().await;
        if let Some(ref sid) = *guard {
            return Ok(sid.clone());
        }
        let sid = self.login().await?;
        *guard = Some(sid.clone());
        Ok(sid)
    }

    async fn create_task(&self, sid: &str, url: &str) -> Result<DsmResponse<serde_json::Value>> {
        let endpoint = format!(
            "{}/webapi/DownloadStation/task.cgi",
            self.config.url.trim_end_matches('/')
        );

        let form = reqwest::multipart::Form::new()
            .text("api", "SYNO.DownloadStation.Task")
            .text("version", "1")
            .text("method", "create")
            .text("uri", url.to_string())
            .text("_sid", sid.to_string());

        self.client
            .post(&endpoint)
            .multipart(form)
            .send()
            .await
            .context("Download Station task request failed")?
            .json()
            .await
            .context("Failed to parse Download Station task response")
    }
}

#[async_trait]
impl DownloadClient for SynologyClient {
    fn name(&self) -> &str {
        "synology"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(self.login().await.is_ok())
    }

    async fn add_download(&self, url: &str, _filename: Option<&str>) -> Result<bool> {
        let sid = self.session().await?;
        let response = self.create_task(&sid, url).await?;

        if response.success {
            return Ok(true);
        }

        let code = response.error.map(|e| e.code).unwrap_or(100);
        // Session errors get one silent retry with a fresh login; the
        // station expires tokens aggressively.
        if matches!(code, 105 | 106 | 107) {
            warn!(code, "Download Station session expired, re-authenticating");
            *self.sid.lock().await = None;
            let sid = self.session().await?;
            let retry = self.create_task(&sid, url).await?;
            if retry.success {
                return Ok(true);
            }
            let code = retry.error.map(|e| e.code).unwrap_or(100);
            return Err(anyhow!(
                "Download Station rejected the task: {} ({})",
                error_message(code),
                code
            ));
        }

        Err(anyhow!(
            "Download Station rejected the task: {} ({})",
            error_message(code),
            code
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(error_message(401), "max number of tasks reached");
        assert_eq!(error_message(406), "no default destination configured");
        assert_eq!(error_message(-1), "unrecognized error code");
    }
}

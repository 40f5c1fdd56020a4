//! Real-Debrid backend
//!
//! API reference: https://api.real-debrid.com/ (bearer-token REST, form
//! POST for unrestriction).

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::DebridClient;

const BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    #[serde(rename = "type")]
    account_type: String,
}

pub struct RealDebridClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    enabled: bool,
}

impl RealDebridClient {
    pub fn new(api_token: Option<String>, enabled: bool) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: BASE_URL.to_string(),
            api_token: api_token.unwrap_or_default(),
            enabled,
        }
    }
}

#[async_trait]
impl DebridClient for RealDebridClient {
    fn name(&self) -> &str {
        "realdebrid"
    }

    fn is_configured(&self) -> bool {
        !self.api_token.is_empty()
    }

    fn is_enabled(&self) -> bool {
        self.enabled && self.is_configured()
    }

    async fn test_connection(&self) -> Result<bool> {
        let response: UserResponse = self
            .client
            .get(format!("{}/user", self.base_url))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Real-Debrid request failed")?
            .error_for_status()
            .context("Real-Debrid rejected the token")?
            .json()
            .await?;
        Ok(response.account_type == "premium")
    }

    async fn debrid_link(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/unrestrict/link", self.base_url))
            .bearer_auth(&self.api_token)
            .form(&[("link", url)])
            .send()
            .await
            .context("Real-Debrid unrestrict failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Real-Debrid HTTP {}: {}", status, body));
        }

        let unrestricted: UnrestrictResponse = response
            .json()
            .await
            .context("Failed to parse Real-Debrid response")?;
        debug!(link = %unrestricted.download, "Real-Debrid unrestricted link");
        Ok(unrestricted.download)
    }
}

//! AllDebrid backend
//!
//! API reference: https://docs.alldebrid.com/. All calls are GET with an
//! `agent` + `apikey` query pair and return `{status, data|error}`.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::DebridClient;

const BASE_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "ddlarr";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct UnlockData {
    link: String,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: UserInfo,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(rename = "isPremium")]
    is_premium: bool,
}

pub struct AllDebridClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    enabled: bool,
}

impl AllDebridClient {
    pub fn new(api_key: Option<String>, enabled: bool) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: BASE_URL.to_string(),
            api_key: api_key.unwrap_or_default(),
            enabled,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let mut url = format!(
            "{}/{}?agent={}&apikey={}",
            self.base_url, path, AGENT, self.api_key
        );
        for (k, v) in params {
            url.push_str(&format!("&{}={}", k, urlencoding::encode(v)));
        }

        let response: ApiResponse<T> = self
            .client
            .get(&url)
            .send()
            .await
            .context("AllDebrid request failed")?
            .json()
            .await
            .context("Failed to parse AllDebrid response")?;

        if response.status != "success" {
            let err = response
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(anyhow!("AllDebrid error: {}", err));
        }

        response
            .data
            .ok_or_else(|| anyhow!("AllDebrid returned success without data"))
    }
}

#[async_trait]
impl DebridClient for AllDebridClient {
    fn name(&self) -> &str {
        "alldebrid"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn is_enabled(&self) -> bool {
        self.enabled && self.is_configured()
    }

    async fn test_connection(&self) -> Result<bool> {
        let data: UserData = self.get("user", &[]).await?;
        Ok(data.user.is_premium)
    }

    async fn debrid_link(&self, url: &str) -> Result<String> {
        let data: UnlockData = self.get("link/unlock", &[("link", url)]).await?;
        debug!(link = %data.link, "AllDebrid unlocked link");
        Ok(data.link)
    }
}

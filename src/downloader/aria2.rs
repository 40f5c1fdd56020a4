//! aria2 backend
//!
//! JSON-RPC over HTTP. aria2's token auth is not a header: the secret is
//! prefixed into the params array as `token:<secret>`.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::DownloadClient;

#[derive(Debug, Clone)]
pub struct Aria2Config {
    pub enabled: bool,
    /// RPC endpoint base, e.g. "http://localhost:6800".
    pub url: String,
    /// RPC secret, when aria2 runs with `--rpc-secret`.
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct VersionResult {
    version: String,
}

pub struct Aria2Client {
    config: Aria2Config,
    client: reqwest::Client,
}

impl Aria2Client {
    pub fn new(config: Aria2Config) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Build the params array with the token prefix when a secret is set.
    fn params(&self, rest: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
        let mut params = vec![];
        if let Some(ref secret) = self.config.secret {
            params.push(json!(format!("token:{}", secret)));
        }
        params.extend(rest);
        params
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "ddlarr",
            "method": method,
            "params": self.params(params),
        });

        let response: RpcResponse<T> = self
            .client
            .post(format!(
                "{}/jsonrpc",
                self.config.url.trim_end_matches('/')
            ))
            .json(&body)
            .send()
            .await
            .context("aria2 RPC request failed")?
            .json()
            .await
            .context("Failed to parse aria2 RPC response")?;

        if let Some(err) = response.error {
            return Err(anyhow!("aria2 error {}: {}", err.code, err.message));
        }
        response
            .result
            .ok_or_else(|| anyhow!("aria2 answered without result or error"))
    }
}

#[async_trait]
impl DownloadClient for Aria2Client {
    fn name(&self) -> &str {
        "aria2"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    async fn test_connection(&self) -> Result<bool> {
        let version: VersionResult = self.call("aria2.getVersion", vec![]).await?;
        debug!(version = %version.version, "aria2 reachable");
        Ok(true)
    }

    async fn add_download(&self, url: &str, filename: Option<&str>) -> Result<bool> {
        let mut options = serde_json::Map::new();
        if let Some(name) = filename {
            options.insert("out".to_string(), json!(sanitize_filename::sanitize(name)));
        }

        // aria2.addUri returns the new download's gid.
        let gid: String = self
            .call("aria2.addUri", vec![json!([url]), json!(options)])
            .await?;
        debug!(gid = %gid, "aria2 accepted download");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(secret: Option<&str>) -> Aria2Client {
        Aria2Client::new(Aria2Config {
            enabled: true,
            url: "http://localhost:6800".to_string(),
            secret: secret.map(|s| s.to_string()),
        })
    }

    #[test]
    fn test_token_prefixed_into_params() {
        let params = client(Some("s3cret")).params(vec![json!(["https://u"])]);
        assert_eq!(params[0], json!("token:s3cret"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_no_token_without_secret() {
        let params = client(None).params(vec![json!(["https://u"])]);
        assert_eq!(params.len(), 1);
    }
}

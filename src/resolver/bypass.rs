//! Link-protection bypass client
//!
//! DDL sites wrap every hoster link in a dl-protect interstitial. An
//! external resolver service (a headless-browser worker) defeats the
//! interstitial; this client talks to it over HTTP.
//!
//! The service keys its cache on the md5 of the query-stripped URL, so the
//! client strips query parameters before submitting to keep both sides
//! agreeing on link identity.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Domains operated by the link-protection service.
const PROTECTED_DOMAINS: [&str; 3] = ["dl-protect.link", "dl-protect.net", "dl-protect.org"];

/// Resolution can drive a real browser through a captcha; give it room.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(120);

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BypassError {
    #[error("bypass service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bypass service could not resolve the link: {0}")]
    Unresolved(String),
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    resolved_url: Option<String>,
    #[serde(default)]
    cached: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Check whether a URL points at the link-protection service.
pub fn is_protected(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    PROTECTED_DOMAINS.iter().any(|d| host.ends_with(d))
}

/// Strip query parameters and fragments from a URL.
///
/// The protection service treats `?fn=...` display-name parameters as
/// noise; link identity is scheme + host + path.
pub fn clean_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default(),
            parsed.path()
        ),
        Err(_) => url.to_string(),
    }
}

/// HTTP client for the external bypass service.
pub struct BypassClient {
    client: reqwest::Client,
    base_url: String,
}

impl BypassClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(RESOLVE_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            base_url,
        }
    }

    /// Resolve a protected link into the hoster link behind it.
    ///
    /// Only accepts an answer that actually escaped the protection domain;
    /// the service echoes the input URL back when it gives up.
    pub async fn resolve(&self, protected_url: &str) -> Result<String, BypassError> {
        let cleaned = clean_url(protected_url);
        let cache_key = format!("{:x}", md5::compute(cleaned.as_bytes()));
        debug!(url = %cleaned, cache_key = %cache_key, "Submitting link to bypass service");

        let response: ResolveResponse = self
            .client
            .post(format!("{}/resolve", self.base_url.trim_end_matches('/')))
            .json(&serde_json::json!({ "url": cleaned }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(BypassError::Unresolved(err));
        }

        match response.resolved_url {
            Some(resolved) if !is_protected(&resolved) => {
                debug!(resolved = %resolved, cached = response.cached, "Link bypassed");
                Ok(resolved)
            }
            Some(still_protected) => {
                warn!(url = %still_protected, "Bypass service returned a still-protected link");
                Err(BypassError::Unresolved(
                    "resolver returned a protected link".to_string(),
                ))
            }
            None => Err(BypassError::Unresolved("empty resolver response".to_string())),
        }
    }

    /// Probe the service's health endpoint.
    pub async fn health(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/health", self.base_url.trim_end_matches('/')))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response
                .json::<HealthResponse>()
                .await
                .map(|h| h.status == "ok")
                .unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "Bypass service health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_protected() {
        assert!(is_protected("https://dl-protect.link/abc"));
        assert!(is_protected("https://www.dl-protect.net/xyz?fn=movie"));
        assert!(!is_protected("https://1fichier.com/?abc"));
        assert!(!is_protected("not a url"));
    }

    #[test]
    fn test_clean_url_strips_query_and_fragment() {
        assert_eq!(
            clean_url("https://dl-protect.link/abc?fn=Movie.mkv&rl=a2#frag"),
            "https://dl-protect.link/abc"
        );
        assert_eq!(
            clean_url("https://dl-protect.link/abc"),
            "https://dl-protect.link/abc"
        );
        // Unparseable input passes through untouched.
        assert_eq!(clean_url("::not-a-url::"), "::not-a-url::");
    }
}

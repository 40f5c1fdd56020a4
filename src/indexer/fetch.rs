//! Rate-limited page fetching with a shared response cache
//!
//! All scraper traffic goes through one [`PageFetcher`] per site: it applies
//! the site's rate limit, a fixed per-request timeout, and a TTL-bound
//! in-memory cache keyed by URL. The cache is shared across concurrent
//! searches; last-write-wins on a race is fine because entries are
//! content-addressed by URL.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use parking_lot::RwLock;
use tracing::debug;

/// Page fetch timeout. Listing and detail pages are static HTML; anything
/// slower than this is a site outage.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a fetched page stays valid in the cache.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    body: Arc<String>,
    expires_at: Instant,
}

/// TTL-bound HTML cache shared between concurrent scraper operations.
#[derive(Clone)]
pub struct PageCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn get(&self, url: &str) -> Option<Arc<String>> {
        let entries = self.entries.read();
        entries.get(url).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.body.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, url: String, body: Arc<String>) {
        self.entries.write().insert(
            url,
            CacheEntry {
                body,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove expired entries. Called from the cleanup job.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }

    /// Drop everything. Used on explicit reset.
    #[allow(dead_code)]
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

/// Rate-limited, cache-backed HTML fetcher for one site.
pub struct PageFetcher {
    client: reqwest::Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cache: PageCache,
    site: String,
}

impl PageFetcher {
    /// Create a fetcher for a site with the given requests-per-second quota.
    pub fn new(site: &str, requests_per_second: u32, cache: PageCache) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(requests_per_second.max(3)).unwrap_or(NonZeroU32::MIN));

        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent(concat!("ddlarr/", env!("CARGO_PKG_VERSION")))
                .gzip(true)
                .build()
                .expect("Failed to create HTTP client"),
            limiter: RateLimiter::direct(quota),
            cache,
            site: site.to_string(),
        }
    }

    /// Fetch a page, going through the cache.
    pub async fn fetch(&self, url: &str) -> Result<Arc<String>> {
        if let Some(body) = self.cache.get(url) {
            debug!(site = %self.site, url = %url, "Page cache hit");
            return Ok(body);
        }

        self.limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} returned HTTP {}", url, status);
        }

        let body = Arc::new(response.text().await.context("Failed to read page body")?);
        self.cache.insert(url.to_string(), body.clone());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_roundtrip() {
        let cache = PageCache::new(Duration::from_secs(60));
        assert!(cache.get("http://a").is_none());

        cache.insert("http://a".to_string(), Arc::new("body".to_string()));
        assert_eq!(cache.get("http://a").unwrap().as_str(), "body");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = PageCache::new(Duration::from_millis(0));
        cache.insert("http://a".to_string(), Arc::new("body".to_string()));
        assert!(cache.get("http://a").is_none());

        cache.cleanup_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_clear() {
        let cache = PageCache::new(Duration::from_secs(60));
        cache.insert("http://a".to_string(), Arc::new("x".to_string()));
        cache.clear();
        assert!(cache.is_empty());
    }
}

//! Link resolution pipeline
//!
//! Two independently toggleable stages, always run in this order:
//!
//! 1. **bypass**: defeat the dl-protect interstitial through the external
//!    resolver service. Best-effort by default: on failure the pipeline
//!    continues with the query-stripped original URL. Callers that have no
//!    downstream fallback (the folder watcher) inspect the outcome and
//!    treat a fallback as fatal.
//! 2. **debrid**: unlock the hoster link through the first enabled debrid
//!    backend that answers with a different URL. Always best-effort.
//!
//! Whether each stage runs at indexing time or at dispatch time is policy,
//! configured by the caller, not an invariant of the pipeline.

pub mod bypass;
pub mod debrid;

use std::sync::Arc;

use tracing::{debug, warn};

pub use bypass::{BypassClient, BypassError, clean_url, is_protected};
pub use debrid::{AllDebridClient, DebridClient, RealDebridClient};

/// How the bypass stage concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassOutcome {
    /// The URL was never protected; passed through untouched.
    NotProtected,
    /// The protection was defeated.
    Resolved,
    /// The bypass failed; the pipeline fell back to the cleaned original.
    FellBack(String),
}

pub struct LinkResolver {
    bypass: Option<Arc<BypassClient>>,
    debrids: Vec<Arc<dyn DebridClient>>,
}

impl LinkResolver {
    pub fn new(bypass: Option<Arc<BypassClient>>, debrids: Vec<Arc<dyn DebridClient>>) -> Self {
        Self { bypass, debrids }
    }

    /// Whether a bypass service is configured.
    pub fn bypass_configured(&self) -> bool {
        self.bypass.is_some()
    }

    /// Whether at least one debrid backend is enabled.
    pub fn debrid_enabled(&self) -> bool {
        self.debrids.iter().any(|d| d.is_enabled())
    }

    /// The enabled debrid backends, in preference order.
    pub fn enabled_debrids(&self) -> impl Iterator<Item = &Arc<dyn DebridClient>> {
        self.debrids.iter().filter(|d| d.is_enabled())
    }

    /// Run only the bypass stage.
    pub async fn run_bypass(&self, url: &str) -> (String, BypassOutcome) {
        if !is_protected(url) {
            return (url.to_string(), BypassOutcome::NotProtected);
        }

        let cleaned = clean_url(url);
        let Some(ref client) = self.bypass else {
            // No service configured: the cleaned link is the best we have.
            return (
                cleaned,
                BypassOutcome::FellBack("no bypass service configured".to_string()),
            );
        };

        match client.resolve(url).await {
            Ok(resolved) => (resolved, BypassOutcome::Resolved),
            Err(e) => {
                warn!(url = %cleaned, error = %e, "Bypass failed, falling back to cleaned link");
                (cleaned, BypassOutcome::FellBack(e.to_string()))
            }
        }
    }

    /// Run only the debrid stage. Never fails; the original URL is the
    /// fallback.
    pub async fn run_debrid(&self, url: &str) -> (String, Option<String>) {
        for backend in self.enabled_debrids() {
            match backend.debrid_link(url).await {
                Ok(unlocked) if unlocked != url => {
                    debug!(backend = backend.name(), "Link debrided");
                    return (unlocked, Some(backend.name().to_string()));
                }
                Ok(_) => {
                    debug!(backend = backend.name(), "Backend returned the input link, trying next");
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Debrid failed, trying next");
                }
            }
        }
        (url.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FakeDebrid {
        name: &'static str,
        enabled: bool,
        answer: Option<String>,
    }

    #[async_trait]
    impl DebridClient for FakeDebrid {
        fn name(&self) -> &str {
            self.name
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        async fn test_connection(&self) -> Result<bool> {
            Ok(true)
        }
        async fn debrid_link(&self, url: &str) -> Result<String> {
            match &self.answer {
                Some(link) => Ok(link.clone()),
                None => Err(anyhow::anyhow!("{} is down", url)),
            }
        }
    }

    fn resolver_with(debrids: Vec<Arc<dyn DebridClient>>) -> LinkResolver {
        LinkResolver::new(None, debrids)
    }

    #[tokio::test]
    async fn test_unprotected_url_passes_through() {
        let resolver = resolver_with(vec![]);
        let (url, outcome) = resolver.run_bypass("https://1fichier.com/?abc").await;
        assert_eq!(url, "https://1fichier.com/?abc");
        assert_eq!(outcome, BypassOutcome::NotProtected);
    }

    #[tokio::test]
    async fn test_protected_url_without_service_falls_back_cleaned() {
        let resolver = resolver_with(vec![]);
        let (url, outcome) = resolver
            .run_bypass("https://dl-protect.link/abc?fn=Movie.mkv")
            .await;
        // The fallback is the *cleaned* URL, not the raw one.
        assert_eq!(url, "https://dl-protect.link/abc");
        assert_matches::assert_matches!(outcome, BypassOutcome::FellBack(_));
    }

    #[tokio::test]
    async fn test_bypass_service_failure_falls_back_cleaned() {
        // Service configured but unreachable (closed port).
        let resolver = LinkResolver::new(
            Some(Arc::new(BypassClient::new("http://127.0.0.1:1".to_string()))),
            vec![],
        );
        let (url, outcome) = resolver
            .run_bypass("https://dl-protect.link/abc?fn=x")
            .await;
        assert_eq!(url, "https://dl-protect.link/abc");
        assert!(matches!(outcome, BypassOutcome::FellBack(_)));
    }

    #[tokio::test]
    async fn test_debrid_preference_order() {
        let resolver = resolver_with(vec![
            Arc::new(FakeDebrid {
                name: "first",
                enabled: true,
                answer: Some("https://direct.example/file".to_string()),
            }),
            Arc::new(FakeDebrid {
                name: "second",
                enabled: true,
                answer: Some("https://other.example/file".to_string()),
            }),
        ]);

        let (url, by) = resolver.run_debrid("https://hoster.example/x").await;
        assert_eq!(url, "https://direct.example/file");
        assert_eq!(by.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_debrid_skips_failing_and_echoing_backends() {
        let resolver = resolver_with(vec![
            Arc::new(FakeDebrid {
                name: "down",
                enabled: true,
                answer: None,
            }),
            Arc::new(FakeDebrid {
                name: "echo",
                enabled: true,
                answer: Some("https://hoster.example/x".to_string()),
            }),
            Arc::new(FakeDebrid {
                name: "works",
                enabled: true,
                answer: Some("https://direct.example/y".to_string()),
            }),
        ]);

        let (url, by) = resolver.run_debrid("https://hoster.example/x").await;
        assert_eq!(url, "https://direct.example/y");
        assert_eq!(by.as_deref(), Some("works"));
    }

    #[tokio::test]
    async fn test_debrid_all_fail_returns_original() {
        let resolver = resolver_with(vec![
            Arc::new(FakeDebrid {
                name: "down",
                enabled: true,
                answer: None,
            }),
            Arc::new(FakeDebrid {
                name: "disabled",
                enabled: false,
                answer: Some("https://never.example".to_string()),
            }),
        ]);

        let (url, by) = resolver.run_debrid("https://hoster.example/x").await;
        assert_eq!(url, "https://hoster.example/x");
        assert!(by.is_none());
    }
}

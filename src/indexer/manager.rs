//! Search orchestration across sites and content types
//!
//! One incoming Torznab request fans out to the chosen site's scrapers, one
//! branch per content type. Branches fail independently: a dead section
//! contributes zero results, never an aborted search. The merged result is
//! classified, filtered, sorted and paginated here so scrapers stay free of
//! response-shaping concerns.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::{debug, warn};

use crate::resolver::LinkResolver;

use super::categories::{self, classify};
use super::fetch::PageCache;
use super::types::{BranchResult, ContentType, Release, SearchRequest};
use super::SiteIndexer;

/// A release shaped for Torznab serialization.
#[derive(Debug, Clone)]
pub struct TorznabItem {
    pub release: Release,
    pub category: i32,
    pub guid: String,
}

/// Outcome of one orchestrated search.
#[derive(Debug)]
pub struct SearchOutcome {
    /// The page of items selected by offset/limit.
    pub items: Vec<TorznabItem>,
    /// Total matches before pagination.
    pub total: usize,
}

pub struct IndexerManager {
    indexers: Vec<Arc<dyn SiteIndexer>>,
    resolver: Arc<LinkResolver>,
    /// Run the bypass stage while indexing instead of leaving it to the
    /// watcher tier. Costs search latency, saves grab latency.
    resolve_at_index: bool,
    page_cache: PageCache,
}

impl IndexerManager {
    pub fn new(
        indexers: Vec<Arc<dyn SiteIndexer>>,
        resolver: Arc<LinkResolver>,
        resolve_at_index: bool,
        page_cache: PageCache,
    ) -> Self {
        if indexers.is_empty() {
            warn!("No site indexers configured; every search will return empty");
        }
        Self {
            indexers,
            resolver,
            resolve_at_index,
            page_cache,
        }
    }

    pub fn get(&self, site_id: &str) -> Option<Arc<dyn SiteIndexer>> {
        self.indexers.iter().find(|i| i.id() == site_id).cloned()
    }

    pub fn all(&self) -> &[Arc<dyn SiteIndexer>] {
        &self.indexers
    }

    pub fn page_cache(&self) -> &PageCache {
        &self.page_cache
    }

    /// Execute a search request against one site.
    pub async fn search(
        &self,
        site_id: &str,
        request: &SearchRequest,
        category_filter: &[i32],
        limit: usize,
        offset: usize,
    ) -> Result<SearchOutcome> {
        let indexer = self
            .get(site_id)
            .ok_or_else(|| anyhow!("Unknown site: {}", site_id))?;

        debug!(
            site = %site_id,
            text = %request.text,
            episode_code = ?request.episode_code(),
            imdb = ?request.imdb_id,
            "Orchestrating search"
        );

        let releases = if request.text.is_empty() && request.imdb_id.is_none() {
            self.empty_query_feed(&indexer, category_filter).await
        } else {
            self.fan_out(&indexer, request, category_filter).await
        };

        let searched = !(request.text.is_empty() && request.imdb_id.is_none());

        let mut items: Vec<TorznabItem> = releases
            .into_iter()
            .filter_map(|release| {
                let category = classify(release.content_type, release.quality.as_deref());
                if !categories::category_matches(category, category_filter) {
                    return None;
                }
                // Automation tools need a size to make grab decisions; a
                // sizeless search result is dead weight. Feed items are
                // informational and keep flowing.
                if searched && !release.has_usable_size() {
                    return None;
                }
                let guid = release.guid();
                Some(TorznabItem {
                    release,
                    category,
                    guid,
                })
            })
            .collect();

        if self.resolve_at_index && searched {
            items = self.bypass_links(items).await;
        }

        items.sort_by(|a, b| b.release.published_at.cmp(&a.release.published_at));

        let total = items.len();
        let page = items.into_iter().skip(offset).take(limit).collect();

        Ok(SearchOutcome { items: page, total })
    }

    /// Latest-releases feed for empty queries, falling back to a single
    /// synthetic result so connectivity probes from automation tools get a
    /// well-formed non-empty feed.
    async fn empty_query_feed(
        &self,
        indexer: &Arc<dyn SiteIndexer>,
        category_filter: &[i32],
    ) -> Vec<Release> {
        if indexer.supports_latest() {
            let types: Vec<ContentType> = categories::content_types_for(category_filter)
                .into_iter()
                .filter(|&t| indexer.supports(t))
                .collect();

            let futures: Vec<_> = types
                .iter()
                .map(|&content_type| {
                    let indexer = indexer.clone();
                    async move { indexer.latest(content_type).await }
                })
                .collect();

            let mut releases = vec![];
            for (content_type, result) in
                types.iter().zip(futures::future::join_all(futures).await)
            {
                match result {
                    Ok(mut batch) => releases.append(&mut batch),
                    Err(e) => {
                        warn!(site = indexer.id(), %content_type, error = %e, "Latest feed failed")
                    }
                }
            }
            if !releases.is_empty() {
                return releases;
            }
        }

        vec![Self::probe_release(category_filter)]
    }

    /// The synthetic result served when there is nothing else to say.
    fn probe_release(category_filter: &[i32]) -> Release {
        let content_type = categories::content_types_for(category_filter)
            .first()
            .copied()
            .unwrap_or(ContentType::Movie);
        Release {
            title: concat!("ddlarr.connectivity.test.", env!("CARGO_PKG_VERSION")).to_string(),
            download_link: "https://localhost/probe".to_string(),
            source_page_url: "https://localhost/probe".to_string(),
            size_bytes: Some(1024 * 1024 * 1024),
            quality: Some("1080p".to_string()),
            language: None,
            imdb_id: None,
            season: None,
            episode: None,
            year: None,
            content_type,
            published_at: Utc::now(),
        }
    }

    /// Fan the request out across the site's content types.
    async fn fan_out(
        &self,
        indexer: &Arc<dyn SiteIndexer>,
        request: &SearchRequest,
        category_filter: &[i32],
    ) -> Vec<Release> {
        let types: Vec<ContentType> = categories::content_types_for(category_filter)
            .into_iter()
            .filter(|&t| indexer.supports(t))
            .collect();

        let futures: Vec<_> = types
            .into_iter()
            .map(|content_type| {
                let indexer = indexer.clone();
                let request = request.clone();
                async move {
                    let start = Instant::now();
                    let result = indexer.search_by_type(&request, content_type).await;
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    match result {
                        Ok(releases) => BranchResult {
                            site_id: indexer.id().to_string(),
                            content_type,
                            releases,
                            elapsed_ms,
                            error: None,
                        },
                        Err(e) => BranchResult {
                            site_id: indexer.id().to_string(),
                            content_type,
                            releases: vec![],
                            elapsed_ms,
                            error: Some(e.to_string()),
                        },
                    }
                }
            })
            .collect();

        let mut releases = vec![];
        for branch in futures::future::join_all(futures).await {
            match branch.error {
                None => {
                    debug!(
                        site = %branch.site_id,
                        content_type = %branch.content_type,
                        results = branch.releases.len(),
                        elapsed_ms = branch.elapsed_ms,
                        "Branch complete"
                    );
                    releases.extend(branch.releases);
                }
                Some(e) => {
                    // One dead section must not abort the other branches.
                    warn!(
                        site = %branch.site_id,
                        content_type = %branch.content_type,
                        error = %e,
                        "Branch failed"
                    );
                }
            }
        }
        releases
    }

    /// Run the bypass half of the resolution pipeline over a result page.
    async fn bypass_links(&self, items: Vec<TorznabItem>) -> Vec<TorznabItem> {
        let futures: Vec<_> = items
            .into_iter()
            .map(|mut item| {
                let resolver = self.resolver.clone();
                async move {
                    let (url, _) = resolver.run_bypass(&item.release.download_link).await;
                    item.release.download_link = url;
                    item
                }
            })
            .collect();
        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeSite {
        releases: Vec<Release>,
        fail: bool,
    }

    fn release(title: &str, quality: &str, content_type: ContentType, size: Option<i64>) -> Release {
        Release {
            title: title.to_string(),
            download_link: format!("https://dl-protect.link/{}", title),
            source_page_url: "https://site/page".to_string(),
            size_bytes: size,
            quality: Some(quality.to_string()),
            language: Some("FRENCH".to_string()),
            imdb_id: None,
            season: None,
            episode: None,
            year: None,
            content_type,
            published_at: Utc::now(),
        }
    }

    #[async_trait]
    impl SiteIndexer for FakeSite {
        fn id(&self) -> &str {
            "fake"
        }
        fn name(&self) -> &str {
            "Fake"
        }
        fn site_link(&self) -> &str {
            "https://fake.example"
        }
        fn supports(&self, _content_type: ContentType) -> bool {
            true
        }
        async fn search_by_type(
            &self,
            _request: &SearchRequest,
            content_type: ContentType,
        ) -> Result<Vec<Release>> {
            if self.fail {
                anyhow::bail!("section down");
            }
            Ok(self
                .releases
                .iter()
                .filter(|r| r.content_type == content_type)
                .cloned()
                .collect())
        }
        async fn test_connection(&self) -> Result<bool> {
            Ok(!self.fail)
        }
    }

    fn manager(site: FakeSite) -> IndexerManager {
        IndexerManager::new(
            vec![Arc::new(site)],
            Arc::new(LinkResolver::new(None, vec![])),
            false,
            PageCache::default(),
        )
    }

    #[tokio::test]
    async fn test_category_filter_drops_wrong_tier() {
        // Scenario: an HD-only filter must keep the 1080p release and drop
        // the UHD one.
        let site = FakeSite {
            releases: vec![
                release(
                    "Inception.1080p.FRENCH",
                    "1080p",
                    ContentType::Movie,
                    Some(1_000_000),
                ),
                release(
                    "Inception.2.Fake.2160p",
                    "2160p",
                    ContentType::Movie,
                    Some(2_000_000),
                ),
            ],
            fail: false,
        };
        let outcome = manager(site)
            .search("fake", &SearchRequest::text("Inception"), &[2040], 100, 0)
            .await
            .unwrap();

        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.items[0].release.title, "Inception.1080p.FRENCH");
        assert_eq!(outcome.items[0].category, 2040);
    }

    #[tokio::test]
    async fn test_sizeless_releases_dropped() {
        let site = FakeSite {
            releases: vec![
                release("With.Size", "1080p", ContentType::Movie, Some(5)),
                release("No.Size", "1080p", ContentType::Movie, None),
            ],
            fail: false,
        };
        let outcome = manager(site)
            .search("fake", &SearchRequest::text("whatever"), &[], 100, 0)
            .await
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.items[0].release.title, "With.Size");
    }

    #[tokio::test]
    async fn test_failed_branch_contributes_zero() {
        let site = FakeSite {
            releases: vec![],
            fail: true,
        };
        let outcome = manager(site)
            .search("fake", &SearchRequest::text("q"), &[], 100, 0)
            .await
            .unwrap();
        assert_eq!(outcome.total, 0);
    }

    #[tokio::test]
    async fn test_empty_query_serves_probe() {
        let site = FakeSite {
            releases: vec![],
            fail: false,
        };
        let outcome = manager(site)
            .search("fake", &SearchRequest::default(), &[2000], 100, 0)
            .await
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert!(outcome.items[0].release.title.contains("connectivity.test"));
    }

    #[tokio::test]
    async fn test_unknown_site_errors() {
        let site = FakeSite {
            releases: vec![],
            fail: false,
        };
        assert!(
            manager(site)
                .search("nope", &SearchRequest::text("q"), &[], 100, 0)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_pagination() {
        let releases: Vec<Release> = (0..25)
            .map(|i| {
                release(
                    &format!("R{:02}", i),
                    "1080p",
                    ContentType::Movie,
                    Some(100),
                )
            })
            .collect();
        let site = FakeSite {
            releases,
            fail: false,
        };
        let outcome = manager(site)
            .search("fake", &SearchRequest::text("R"), &[], 10, 20)
            .await
            .unwrap();
        assert_eq!(outcome.total, 25);
        assert_eq!(outcome.items.len(), 5);
    }
}

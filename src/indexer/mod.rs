//! DDL site indexing
//!
//! A [`SiteIndexer`] turns a fuzzy title query into validated releases by
//! scraping a DDL site's search pages. The [`manager`] fans one incoming
//! request out across sites and content types and shapes the merged result
//! for the Torznab API layer.

pub mod categories;
pub mod definitions;
pub mod expander;
pub mod fetch;
pub mod manager;
pub mod matcher;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use manager::{IndexerManager, SearchOutcome};
pub use types::{BranchResult, Candidate, ContentType, DownloadLink, Release, SearchRequest};

/// A scraper for one DDL site.
///
/// Implementations own their HTTP client, rate limit and page cache, and are
/// safe to search concurrently.
#[async_trait]
pub trait SiteIndexer: Send + Sync {
    /// Short identifier used in API routes (e.g. "zone").
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Base URL currently configured for the site.
    fn site_link(&self) -> &str;

    /// Whether the site indexes this content type.
    fn supports(&self, content_type: ContentType) -> bool;

    /// Whether the site exposes a browsable "latest releases" listing.
    fn supports_latest(&self) -> bool {
        false
    }

    /// Search one content type. Individual page failures are tolerated
    /// internally; an `Err` here means the whole branch produced nothing.
    async fn search_by_type(
        &self,
        request: &SearchRequest,
        content_type: ContentType,
    ) -> Result<Vec<Release>>;

    /// Latest releases for a content type, for empty-query feeds.
    async fn latest(&self, _content_type: ContentType) -> Result<Vec<Release>> {
        Ok(vec![])
    }

    /// Probe the site. Used by the readiness endpoint.
    async fn test_connection(&self) -> Result<bool>;
}

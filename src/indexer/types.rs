//! Core types for the DDL indexer system
//!
//! These types are modeled after the Torznab specification: a search request
//! comes in over the Torznab query protocol, scrapers produce releases, and
//! the API layer serializes them back out as an RSS feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The kind of content a search targets.
///
/// DDL sites index movies, series, animes and ebooks in separate sections
/// with different URL schemes, so every search is performed per content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Series,
    Anime,
    Ebook,
}

impl ContentType {
    /// All content types, in search fan-out order.
    pub const ALL: [ContentType; 4] = [
        ContentType::Movie,
        ContentType::Series,
        ContentType::Anime,
        ContentType::Ebook,
    ];

    /// Whether containment matching is allowed for this content type.
    ///
    /// Movies match on containment ("Heat" matches "Heat 1995"); series and
    /// animes would produce false positives on partial season names.
    pub fn allows_containment(&self) -> bool {
        matches!(self, ContentType::Movie)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Movie => write!(f, "movie"),
            ContentType::Series => write!(f, "series"),
            ContentType::Anime => write!(f, "anime"),
            ContentType::Ebook => write!(f, "ebook"),
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" | "movies" | "film" => Ok(ContentType::Movie),
            "series" | "tv" | "show" => Ok(ContentType::Series),
            "anime" | "animes" => Ok(ContentType::Anime),
            "ebook" | "book" | "books" => Ok(ContentType::Ebook),
            _ => Err(anyhow::anyhow!("Unknown content type: {}", s)),
        }
    }
}

/// A search request, constructed per incoming API call.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Free-text search term.
    pub text: String,
    /// Season number (series searches).
    pub season: Option<i32>,
    /// Episode number (series searches).
    pub episode: Option<i32>,
    /// Release year (movie searches).
    pub year: Option<i32>,
    /// IMDB ID with the "tt" prefix (e.g. "tt1375666").
    pub imdb_id: Option<String>,
    /// Case-insensitive hoster allow-list; empty means all hosters.
    pub hoster_allow_list: Vec<String>,
}

impl SearchRequest {
    /// Create a plain text search.
    pub fn text(term: &str) -> Self {
        Self {
            text: term.to_string(),
            ..Default::default()
        }
    }

    /// Season/episode code for release naming (e.g. "S02E05", "S02").
    pub fn episode_code(&self) -> Option<String> {
        self.season.map(|s| match self.episode {
            Some(e) => format!("S{:02}E{:02}", s, e),
            None => format!("S{:02}", s),
        })
    }
}

/// A listing-page hit, before the detail page has been visited.
///
/// Candidates only live inside a single scraper run; the detail-page parse
/// turns them into [`Release`]s.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Raw title as found on the listing page.
    pub title: String,
    /// Absolute URL of the detail page.
    pub page_url: String,
    /// Quality string from the listing, when shown there.
    pub quality: Option<String>,
    /// Language/version string from the listing.
    pub language: Option<String>,
    /// Season extracted from the listing title, when present.
    pub season: Option<i32>,
    /// The (possibly accent-expanded) query this candidate was validated
    /// against; kept for logging.
    pub matched_against: String,
}

/// A single download link on a detail page, keyed by hoster.
#[derive(Debug, Clone)]
pub struct DownloadLink {
    /// Hoster display name as printed on the page (e.g. "1fichier").
    pub hoster: String,
    /// Absolute link URL (usually a link-protector URL).
    pub url: String,
    /// Episode number parsed from the link label (series pages list one
    /// link per episode).
    pub episode: Option<i32>,
}

/// A fully-parsed release, the unit returned by a scraper.
#[derive(Debug, Clone, Serialize)]
pub struct Release {
    /// Normalized dot-separated pseudo-scene name.
    pub title: String,
    /// Absolute download link.
    pub download_link: String,
    /// Detail page the release was parsed from.
    pub source_page_url: String,
    /// Size in bytes, when the page states one.
    pub size_bytes: Option<i64>,
    /// Quality string (e.g. "1080p", "HDLight", "2160p").
    pub quality: Option<String>,
    /// Language/version string (e.g. "FRENCH", "MULTI").
    pub language: Option<String>,
    /// IMDB ID found embedded in the detail page.
    pub imdb_id: Option<String>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub year: Option<i32>,
    pub content_type: ContentType,
    /// Publication date; DDL sites rarely state one, so this defaults to
    /// the scrape time.
    pub published_at: DateTime<Utc>,
}

impl Release {
    /// Synthetic stable identifier for Radarr/Sonarr dedup.
    ///
    /// Derived from (link, title) so the same release keeps the same guid
    /// across searches within one process lifetime.
    pub fn guid(&self) -> String {
        let digest = Sha256::digest(format!("{}{}", self.download_link, self.title).as_bytes());
        format!("{:x}", digest)
    }

    /// Whether the release carries a usable size.
    ///
    /// Radarr/Sonarr reject sizeless results, so the orchestrator drops
    /// releases where this is false.
    pub fn has_usable_size(&self) -> bool {
        self.size_bytes.is_some_and(|s| s > 0)
    }
}

/// Result of a single site/content-type search branch.
#[derive(Debug)]
pub struct BranchResult {
    pub site_id: String,
    pub content_type: ContentType,
    pub releases: Vec<Release>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parse() {
        assert_eq!("movie".parse::<ContentType>().unwrap(), ContentType::Movie);
        assert_eq!("tv".parse::<ContentType>().unwrap(), ContentType::Series);
        assert_eq!("books".parse::<ContentType>().unwrap(), ContentType::Ebook);
        assert!("podcast".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_episode_code() {
        let mut req = SearchRequest::text("show");
        assert_eq!(req.episode_code(), None);

        req.season = Some(2);
        assert_eq!(req.episode_code().as_deref(), Some("S02"));

        req.episode = Some(5);
        assert_eq!(req.episode_code().as_deref(), Some("S02E05"));
    }

    #[test]
    fn test_guid_stable_for_same_link_and_title() {
        let release = Release {
            title: "Some.Movie.2024.1080p.FRENCH.1fichier".to_string(),
            download_link: "https://dl-protect.link/abc".to_string(),
            source_page_url: "https://example.com/movie/1".to_string(),
            size_bytes: Some(1_000_000),
            quality: Some("1080p".to_string()),
            language: Some("FRENCH".to_string()),
            imdb_id: None,
            season: None,
            episode: None,
            year: Some(2024),
            content_type: ContentType::Movie,
            published_at: Utc::now(),
        };

        let mut other = release.clone();
        other.published_at = Utc::now();
        assert_eq!(release.guid(), other.guid());

        other.title = "Different.Title".to_string();
        assert_ne!(release.guid(), other.guid());
    }

    #[test]
    fn test_containment_policy_is_movie_only() {
        assert!(ContentType::Movie.allows_containment());
        assert!(!ContentType::Series.allows_containment());
        assert!(!ContentType::Anime.allows_containment());
        assert!(!ContentType::Ebook.allows_containment());
    }

    #[test]
    fn test_usable_size() {
        let mut release = Release {
            title: "t".to_string(),
            download_link: "l".to_string(),
            source_page_url: "p".to_string(),
            size_bytes: None,
            quality: None,
            language: None,
            imdb_id: None,
            season: None,
            episode: None,
            year: None,
            content_type: ContentType::Movie,
            published_at: Utc::now(),
        };
        assert!(!release.has_usable_size());
        release.size_bytes = Some(0);
        assert!(!release.has_usable_size());
        release.size_bytes = Some(1);
        assert!(release.has_usable_size());
    }
}

//! Zone indexer
//!
//! Scrapes a DLE-style French DDL site: a paginated search listing per
//! content section, detail pages carrying a quality line, a size line, an
//! IMDB link and per-hoster download links (one link per episode for
//! series).
//!
//! The site's markup shifts between mirror domains, so every selector has a
//! fallback and a parse miss is never fatal to the whole search.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::{
    MAX_DETAIL_PAGES, absolutize, clean_base_name, episode_filter, episode_from_label,
    find_imdb_id, find_year, hoster_allowed, parse_quality_language, parse_size_bytes,
    scene_title, season_from_title, truncate_query,
};
use crate::indexer::expander::{TitleExpander, accent_variants};
use crate::indexer::fetch::PageFetcher;
use crate::indexer::matcher;
use crate::indexer::types::{Candidate, ContentType, DownloadLink, Release, SearchRequest};
use crate::indexer::SiteIndexer;

/// The site truncates longer search terms server-side and then ignores the
/// filter entirely, returning an unfiltered listing.
const MAX_QUERY_LEN: usize = 32;

/// Configuration for a [`ZoneIndexer`] instance.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub site_url: String,
    /// Pagination cap per expansion.
    pub max_pages: usize,
    pub requests_per_second: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            site_url: "https://www.zone-annuaire.com".to_string(),
            max_pages: 3,
            requests_per_second: 2,
        }
    }
}

/// Everything parsed from one detail page.
#[derive(Debug, Default)]
struct DetailInfo {
    size_bytes: Option<i64>,
    quality: Option<String>,
    language: Option<String>,
    imdb_id: Option<String>,
    year: Option<i32>,
    links: Vec<DownloadLink>,
}

pub struct ZoneIndexer {
    config: ZoneConfig,
    fetcher: PageFetcher,
    expander: Arc<TitleExpander>,
}

impl ZoneIndexer {
    pub fn new(config: ZoneConfig, fetcher: PageFetcher, expander: Arc<TitleExpander>) -> Self {
        Self {
            config,
            fetcher,
            expander,
        }
    }

    /// Section slug for a content type, as used in the site's query string.
    fn section(content_type: ContentType) -> &'static str {
        match content_type {
            ContentType::Movie => "films",
            ContentType::Series => "series",
            ContentType::Anime => "mangas",
            ContentType::Ebook => "ebooks",
        }
    }

    fn search_url(&self, term: &str, content_type: ContentType, page: usize) -> String {
        let mut url = format!(
            "{}/?p={}&search={}",
            self.config.site_url.trim_end_matches('/'),
            Self::section(content_type),
            urlencoding::encode(term)
        );
        if page > 1 {
            url.push_str(&format!("&page={}", page));
        }
        url
    }

    fn browse_url(&self, content_type: ContentType) -> String {
        format!(
            "{}/?p={}",
            self.config.site_url.trim_end_matches('/'),
            Self::section(content_type)
        )
    }

    /// Compute the query expansions to search for this request.
    async fn expansions(&self, request: &SearchRequest) -> Vec<String> {
        if let Some(ref imdb_id) = request.imdb_id {
            let expanded = self
                .expander
                .expand(imdb_id, (!request.text.is_empty()).then_some(request.text.as_str()))
                .await;
            if !expanded.is_empty() {
                return expanded;
            }
        }
        accent_variants(&request.text)
    }

    /// Parse one listing page into candidates plus a has-next-page flag.
    fn parse_listing(
        &self,
        html: &str,
        matched_against: &str,
        content_type: ContentType,
        request: &SearchRequest,
    ) -> (Vec<Candidate>, bool) {
        let document = Html::parse_document(html);

        // Main listing block; older mirrors use the bare cover class.
        let item_selectors = ["#dle-content .cover_infos_title a", ".cover_infos_title a"];
        let quality_selector = Selector::parse(".detail_release").unwrap();

        let mut candidates = vec![];
        for sel in item_selectors {
            let Ok(selector) = Selector::parse(sel) else {
                continue;
            };
            for link in document.select(&selector) {
                let href = link.value().attr("href").unwrap_or("");
                if href.is_empty() {
                    continue;
                }
                let title: String = link.text().collect::<String>().trim().to_string();
                if title.is_empty() {
                    continue;
                }

                let season = season_from_title(&title);
                let base = clean_base_name(&title);
                if !matcher::is_match(matched_against, &base, content_type) {
                    continue;
                }
                if let Some(wanted) = request.season
                    && season != Some(wanted)
                {
                    continue;
                }

                // Quality badge next to the cover, when the theme shows one.
                let quality = link
                    .parent()
                    .and_then(ElementRef::wrap)
                    .and_then(|p| p.parent())
                    .and_then(ElementRef::wrap)
                    .and_then(|block| {
                        block
                            .select(&quality_selector)
                            .next()
                            .map(|el| el.text().collect::<String>().trim().to_string())
                    })
                    .filter(|s| !s.is_empty());

                candidates.push(Candidate {
                    title,
                    page_url: absolutize(&self.config.site_url, href),
                    quality,
                    language: None,
                    season,
                    matched_against: matched_against.to_string(),
                });
            }
            if !candidates.is_empty() {
                break;
            }
        }

        let has_next = Self::has_next_page(&document);
        (candidates, has_next)
    }

    /// The pagination block only renders a "next" arrow when more pages
    /// exist; its absence ends the loop.
    fn has_next_page(document: &Html) -> bool {
        let nav = Selector::parse(".navigation a, span.pnext a").unwrap();
        document.select(&nav).any(|a| {
            let text = a.text().collect::<String>().to_lowercase();
            text.contains("suivant") || text.contains('»')
        })
    }

    /// Run the paginated listing fetch for one expansion.
    async fn search_expansion(
        &self,
        term: &str,
        content_type: ContentType,
        request: &SearchRequest,
    ) -> Vec<Candidate> {
        let term = truncate_query(term, MAX_QUERY_LEN);
        let mut all = vec![];

        for page in 1..=self.config.max_pages {
            let url = self.search_url(term, content_type, page);
            let body = match self.fetcher.fetch(&url).await {
                Ok(body) => body,
                Err(e) => {
                    // A failed page ends this expansion's pagination but not
                    // the other expansions.
                    warn!(site = "zone", url = %url, error = %e, "Listing fetch failed");
                    break;
                }
            };

            let (candidates, has_next) =
                self.parse_listing(&body, term, content_type, request);
            let empty_page = candidates.is_empty();
            all.extend(candidates);

            if !has_next || empty_page {
                break;
            }
        }

        all
    }

    /// Parse a detail page.
    fn parse_detail(&self, html: &str) -> DetailInfo {
        let document = Html::parse_document(html);

        let mut info = DetailInfo {
            size_bytes: parse_size_bytes(html),
            imdb_id: find_imdb_id(html),
            year: find_year(html),
            ..Default::default()
        };

        let (quality, language) = parse_quality_language(html);
        info.quality = quality;
        info.language = language;

        // Download links are grouped under per-hoster headers inside the
        // post body; walk the body in document order and track the current
        // hoster.
        let body_selectors = ["div.postinfo", ".corps-news", "#news-id-content"];
        for sel in body_selectors {
            let Ok(selector) = Selector::parse(sel) else {
                continue;
            };
            let Some(body) = document.select(&selector).next() else {
                continue;
            };

            let mut current_hoster: Option<String> = None;
            for node in body.descendants() {
                let Some(el) = ElementRef::wrap(node) else {
                    continue;
                };
                match el.value().name() {
                    "b" | "strong" => {
                        // A bold run with no link inside names the next
                        // hoster block.
                        if el.select(&Selector::parse("a").unwrap()).next().is_none() {
                            let name = el.text().collect::<String>().trim().to_string();
                            if !name.is_empty() && name.len() < 40 {
                                current_hoster = Some(name);
                            }
                        }
                    }
                    "a" => {
                        let Some(hoster) = current_hoster.clone() else {
                            continue;
                        };
                        let href = el.value().attr("href").unwrap_or("");
                        if !href.starts_with("http") {
                            continue;
                        }
                        let label: String = el.text().collect();
                        info.links.push(DownloadLink {
                            hoster,
                            url: href.to_string(),
                            episode: episode_from_label(&label),
                        });
                    }
                    _ => {}
                }
            }

            if !info.links.is_empty() {
                break;
            }
        }

        info
    }

    /// Turn one candidate's detail page into releases, applying the
    /// post-parse filters.
    fn releases_for_candidate(
        &self,
        candidate: &Candidate,
        info: DetailInfo,
        content_type: ContentType,
        request: &SearchRequest,
    ) -> Vec<Release> {
        // Year filter: only rejects when both sides are known and disagree.
        if let (Some(wanted), Some(found)) = (request.year, info.year)
            && wanted != found
        {
            debug!(page = %candidate.page_url, wanted, found, "Year mismatch, skipping");
            return vec![];
        }

        let links: Vec<DownloadLink> = info
            .links
            .into_iter()
            .filter(|l| hoster_allowed(&l.hoster, &request.hoster_allow_list))
            .collect();
        let links = episode_filter(links, request);

        let base = clean_base_name(&candidate.title);
        let quality = info.quality.or_else(|| candidate.quality.clone());
        let language = info.language.or_else(|| candidate.language.clone());
        let season = candidate.season.or(request.season);
        let now = Utc::now();

        links
            .into_iter()
            .map(|link| {
                let episode_code = match content_type {
                    ContentType::Series | ContentType::Anime => season.map(|s| {
                        match link.episode.or(request.episode) {
                            Some(e) => format!("S{:02}E{:02}", s, e),
                            None => format!("S{:02}", s),
                        }
                    }),
                    _ => None,
                };
                let year = (content_type == ContentType::Movie)
                    .then_some(info.year.or(request.year))
                    .flatten();

                Release {
                    title: scene_title(
                        &base,
                        year,
                        episode_code.as_deref(),
                        quality.as_deref(),
                        language.as_deref(),
                        &link.hoster,
                    ),
                    download_link: link.url,
                    source_page_url: candidate.page_url.clone(),
                    size_bytes: info.size_bytes,
                    quality: quality.clone(),
                    language: language.clone(),
                    imdb_id: info.imdb_id.clone(),
                    season,
                    episode: link.episode,
                    year: info.year,
                    content_type,
                    published_at: now,
                }
            })
            .collect()
    }

    /// Fetch and parse up to [`MAX_DETAIL_PAGES`] detail pages.
    async fn visit_details(
        &self,
        candidates: Vec<Candidate>,
        content_type: ContentType,
        request: &SearchRequest,
    ) -> Vec<Release> {
        let mut releases = vec![];
        for candidate in candidates.into_iter().take(MAX_DETAIL_PAGES) {
            debug!(
                page = %candidate.page_url,
                matched_against = %candidate.matched_against,
                "Visiting detail page"
            );
            let body = match self.fetcher.fetch(&candidate.page_url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(site = "zone", page = %candidate.page_url, error = %e, "Detail fetch failed");
                    continue;
                }
            };
            let info = self.parse_detail(&body);
            releases.extend(self.releases_for_candidate(&candidate, info, content_type, request));
        }
        releases
    }
}

#[async_trait]
impl SiteIndexer for ZoneIndexer {
    fn id(&self) -> &str {
        "zone"
    }

    fn name(&self) -> &str {
        "Zone"
    }

    fn site_link(&self) -> &str {
        &self.config.site_url
    }

    fn supports(&self, _content_type: ContentType) -> bool {
        true
    }

    fn supports_latest(&self) -> bool {
        true
    }

    async fn search_by_type(
        &self,
        request: &SearchRequest,
        content_type: ContentType,
    ) -> Result<Vec<Release>> {
        let expansions = self.expansions(request).await;
        if expansions.is_empty() {
            return Ok(vec![]);
        }
        debug!(site = "zone", ?expansions, %content_type, "Searching");

        let futures: Vec<_> = expansions
            .iter()
            .map(|term| self.search_expansion(term, content_type, request))
            .collect();
        let per_expansion = futures::future::join_all(futures).await;

        // Dedup across expansions by detail URL; different spellings land
        // on the same pages.
        let mut seen = HashSet::new();
        let mut candidates = vec![];
        for candidate in per_expansion.into_iter().flatten() {
            if seen.insert(candidate.page_url.clone()) {
                candidates.push(candidate);
            }
        }

        Ok(self.visit_details(candidates, content_type, request).await)
    }

    async fn latest(&self, content_type: ContentType) -> Result<Vec<Release>> {
        let url = self.browse_url(content_type);
        let body = self.fetcher.fetch(&url).await?;

        // The browse page shares the listing markup; take everything
        // without matching and surface the detail pages as releases.
        let document = Html::parse_document(&body);
        let selector = Selector::parse("#dle-content .cover_infos_title a").unwrap();
        let now = Utc::now();

        let releases = document
            .select(&selector)
            .filter_map(|link| {
                let href = link.value().attr("href")?;
                let title: String = link.text().collect::<String>().trim().to_string();
                if title.is_empty() {
                    return None;
                }
                Some(Release {
                    title: clean_base_name(&title).replace(' ', "."),
                    download_link: absolutize(&self.config.site_url, href),
                    source_page_url: absolutize(&self.config.site_url, href),
                    size_bytes: None,
                    quality: None,
                    language: None,
                    imdb_id: None,
                    season: season_from_title(&title),
                    episode: None,
                    year: None,
                    content_type,
                    published_at: now,
                })
            })
            .collect();

        Ok(releases)
    }

    async fn test_connection(&self) -> Result<bool> {
        let body = self.fetcher.fetch(&self.config.site_url).await?;
        Ok(body.contains("dle-content") || body.contains("cover_infos_title"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexer() -> ZoneIndexer {
        ZoneIndexer::new(
            ZoneConfig::default(),
            PageFetcher::new("zone", 2, crate::indexer::fetch::PageCache::default()),
            Arc::new(TitleExpander::new(String::new())),
        )
    }

    const LISTING: &str = r#"
        <div id="dle-content">
          <div class="cover_infos_global">
            <div class="cover_infos_title"><a href="/?p=film&id=1-inception">Inception</a></div>
            <span class="detail_release">1080p FRENCH</span>
          </div>
          <div class="cover_infos_global">
            <div class="cover_infos_title"><a href="/?p=film&id=2-unrelated">Totally Different Film</a></div>
          </div>
          <span class="navigation"><a href="/?page=2">Suivant »</a></span>
        </div>"#;

    const DETAIL: &str = r#"
        <div class="postinfo">
          <p>Qualité : HDLight 1080p (FRENCH)</p>
          <p>Taille du fichier : 1.40 Go</p>
          <p>Année de production : 2010</p>
          <a href="https://www.imdb.com/title/tt1375666/">fiche imdb</a>
          <b><div>1fichier</div></b>
          <a href="https://dl-protect.link/abc123">Télécharger</a>
          <b><div>Rapidgator</div></b>
          <a href="https://dl-protect.link/def456">Télécharger</a>
        </div>"#;

    #[test]
    fn test_parse_listing_matches_and_paginates() {
        let idx = indexer();
        let request = SearchRequest::text("Inception");
        let (candidates, has_next) =
            idx.parse_listing(LISTING, "Inception", ContentType::Movie, &request);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Inception");
        assert!(candidates[0].page_url.starts_with("https://"));
        assert_eq!(candidates[0].quality.as_deref(), Some("1080p FRENCH"));
        assert!(has_next);
    }

    #[test]
    fn test_parse_listing_season_filter() {
        let idx = indexer();
        let listing = r#"
            <div id="dle-content">
              <div class="cover_infos_title"><a href="/?id=1">Breaking Bad - Saison 2</a></div>
              <div class="cover_infos_title"><a href="/?id=2">Breaking Bad - Saison 3</a></div>
            </div>"#;
        let request = SearchRequest {
            text: "Breaking Bad".to_string(),
            season: Some(3),
            ..Default::default()
        };
        let (candidates, _) =
            idx.parse_listing(listing, "Breaking Bad", ContentType::Series, &request);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].season, Some(3));
    }

    #[test]
    fn test_parse_detail() {
        let idx = indexer();
        let info = idx.parse_detail(DETAIL);

        assert_eq!(info.quality.as_deref(), Some("HDLight 1080p"));
        assert_eq!(info.language.as_deref(), Some("FRENCH"));
        assert_eq!(info.imdb_id.as_deref(), Some("tt1375666"));
        assert_eq!(info.year, Some(2010));
        assert!(info.size_bytes.is_some());
        assert_eq!(info.links.len(), 2);
        assert_eq!(info.links[0].hoster, "1fichier");
        assert_eq!(info.links[1].hoster, "Rapidgator");
    }

    #[test]
    fn test_releases_apply_hoster_filter_and_title_synthesis() {
        let idx = indexer();
        let candidate = Candidate {
            title: "Inception".to_string(),
            page_url: "https://site/1".to_string(),
            quality: None,
            language: None,
            season: None,
            matched_against: "inception".to_string(),
        };
        let info = idx.parse_detail(DETAIL);
        let request = SearchRequest {
            text: "Inception".to_string(),
            hoster_allow_list: vec!["1fichier".to_string()],
            ..Default::default()
        };

        let releases =
            idx.releases_for_candidate(&candidate, info, ContentType::Movie, &request);
        assert_eq!(releases.len(), 1);
        assert_eq!(
            releases[0].title,
            "Inception.2010.HDLight.1080p.FRENCH.1fichier"
        );
        assert_eq!(releases[0].download_link, "https://dl-protect.link/abc123");
    }

    #[test]
    fn test_year_mismatch_rejects() {
        let idx = indexer();
        let candidate = Candidate {
            title: "Inception".to_string(),
            page_url: "https://site/1".to_string(),
            quality: None,
            language: None,
            season: None,
            matched_against: "inception".to_string(),
        };
        let info = idx.parse_detail(DETAIL);
        let request = SearchRequest {
            text: "Inception".to_string(),
            year: Some(1999),
            ..Default::default()
        };
        let releases =
            idx.releases_for_candidate(&candidate, info, ContentType::Movie, &request);
        assert!(releases.is_empty());
    }
}

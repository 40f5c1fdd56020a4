//! Wawa indexer
//!
//! Second supported DDL site. Same overall shape as `zone` (paginated
//! search listing, detail page with quality/size lines and hoster links)
//! but a table-based theme: listing hits are `.wa-block` cards and download
//! links live in a table with one row per (hoster, episode).

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::{
    MAX_DETAIL_PAGES, absolutize, clean_base_name, episode_filter, episode_from_label,
    find_imdb_id, find_year, hoster_allowed, parse_quality_language, parse_size_bytes,
    scene_title, season_from_title, truncate_query,
};
use crate::indexer::SiteIndexer;
use crate::indexer::expander::{TitleExpander, accent_variants};
use crate::indexer::fetch::PageFetcher;
use crate::indexer::matcher;
use crate::indexer::types::{Candidate, ContentType, DownloadLink, Release, SearchRequest};

/// Longest search term the site's filter accepts.
const MAX_QUERY_LEN: usize = 27;

#[derive(Debug, Clone)]
pub struct WawaConfig {
    pub site_url: String,
    pub max_pages: usize,
    pub requests_per_second: u32,
}

impl Default for WawaConfig {
    fn default() -> Self {
        Self {
            site_url: "https://www.wawacity.tools".to_string(),
            max_pages: 2,
            requests_per_second: 2,
        }
    }
}

pub struct WawaIndexer {
    config: WawaConfig,
    fetcher: PageFetcher,
    expander: Arc<TitleExpander>,
}

impl WawaIndexer {
    pub fn new(config: WawaConfig, fetcher: PageFetcher, expander: Arc<TitleExpander>) -> Self {
        Self {
            config,
            fetcher,
            expander,
        }
    }

    fn section(content_type: ContentType) -> Option<&'static str> {
        match content_type {
            ContentType::Movie => Some("films"),
            ContentType::Series => Some("series"),
            ContentType::Ebook => Some("ebooks"),
            // No manga section on this site.
            ContentType::Anime => None,
        }
    }

    fn search_url(&self, term: &str, section: &str, page: usize) -> String {
        format!(
            "{}/?p={}&search={}&page={}",
            self.config.site_url.trim_end_matches('/'),
            section,
            urlencoding::encode(term),
            page
        )
    }

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

    fn parse_listing(
        &self,
        html: &str,
        matched_against: &str,
        content_type: ContentType,
        request: &SearchRequest,
    ) -> (Vec<Candidate>, bool) {
        let document = Html::parse_document(html);
        let block = Selector::parse(".wa-sub-block-title a, .wa-block-title a").unwrap();

        let mut candidates = vec![];
        for link in document.select(&block) {
            let href = link.value().attr("href").unwrap_or("");
            let title: String = link.text().collect::<String>().trim().to_string();
            if href.is_empty() || title.is_empty() {
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

            candidates.push(Candidate {
                title,
                page_url: absolutize(&self.config.site_url, href),
                quality: None,
                language: None,
                season,
                matched_against: matched_against.to_string(),
            });
        }

        let next = Selector::parse("ul.pagination a[rel=next], a.page-next").unwrap();
        let has_next = document.select(&next).next().is_some();
        (candidates, has_next)
    }

    fn parse_links(&self, document: &Html) -> Vec<DownloadLink> {
        // One table row per link: first cell carries the anchor, second the
        // hoster name, optional label text names the episode.
        let row = Selector::parse("table#DDLLinks tr.link-row, table.link-table tr").unwrap();
        let cell = Selector::parse("td").unwrap();
        let anchor = Selector::parse("a[href]").unwrap();

        let mut links = vec![];
        for tr in document.select(&row) {
            let cells: Vec<_> = tr.select(&cell).collect();
            if cells.is_empty() {
                continue;
            }
            let Some(a) = tr.select(&anchor).next() else {
                continue;
            };
            let href = a.value().attr("href").unwrap_or("");
            if !href.starts_with("http") {
                continue;
            }

            let label: String = a.text().collect();
            let hoster = cells
                .get(1)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "unknown".to_string());

            links.push(DownloadLink {
                hoster,
                url: href.to_string(),
                episode: episode_from_label(&label),
            });
        }
        links
    }

    async fn visit_details(
        &self,
        candidates: Vec<Candidate>,
        content_type: ContentType,
        request: &SearchRequest,
    ) -> Vec<Release> {
        let now = Utc::now();
        let mut releases = vec![];

        for candidate in candidates.into_iter().take(MAX_DETAIL_PAGES) {
            let body = match self.fetcher.fetch(&candidate.page_url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(site = "wawa", page = %candidate.page_url, error = %e, "Detail fetch failed");
                    continue;
                }
            };

            let document = Html::parse_document(&body);
            let size_bytes = parse_size_bytes(&body);
            let (quality, language) = parse_quality_language(&body);
            let imdb_id = find_imdb_id(&body);
            let year = find_year(&body);

            if let (Some(wanted), Some(found)) = (request.year, year)
                && wanted != found
            {
                continue;
            }

            let links: Vec<DownloadLink> = self
                .parse_links(&document)
                .into_iter()
                .filter(|l| hoster_allowed(&l.hoster, &request.hoster_allow_list))
                .collect();
            let links = episode_filter(links, request);

            let base = clean_base_name(&candidate.title);
            let season = candidate.season.or(request.season);

            for link in links {
                let episode_code = match content_type {
                    ContentType::Series | ContentType::Anime => season.map(|s| {
                        match link.episode.or(request.episode) {
                            Some(e) => format!("S{:02}E{:02}", s, e),
                            None => format!("S{:02}", s),
                        }
                    }),
                    _ => None,
                };
                let release_year =
                    (content_type == ContentType::Movie).then_some(year.or(request.year)).flatten();

                releases.push(Release {
                    title: scene_title(
                        &base,
                        release_year,
                        episode_code.as_deref(),
                        quality.as_deref(),
                        language.as_deref(),
                        &link.hoster,
                    ),
                    download_link: link.url,
                    source_page_url: candidate.page_url.clone(),
                    size_bytes,
                    quality: quality.clone(),
                    language: language.clone(),
                    imdb_id: imdb_id.clone(),
                    season,
                    episode: link.episode,
                    year,
                    content_type,
                    published_at: now,
                });
            }
        }

        releases
    }
}

#[async_trait]
impl SiteIndexer for WawaIndexer {
    fn id(&self) -> &str {
        "wawa"
    }

    fn name(&self) -> &str {
        "Wawa"
    }

    fn site_link(&self) -> &str {
        &self.config.site_url
    }

    fn supports(&self, content_type: ContentType) -> bool {
        Self::section(content_type).is_some()
    }

    async fn search_by_type(
        &self,
        request: &SearchRequest,
        content_type: ContentType,
    ) -> Result<Vec<Release>> {
        let Some(section) = Self::section(content_type) else {
            return Ok(vec![]);
        };

        let expansions = self.expansions(request).await;
        if expansions.is_empty() {
            return Ok(vec![]);
        }
        debug!(site = "wawa", ?expansions, %content_type, "Searching");

        let futures: Vec<_> = expansions
            .iter()
            .map(|term| async move {
                let term = truncate_query(term, MAX_QUERY_LEN);
                let mut all = vec![];
                for page in 1..=self.config.max_pages {
                    let url = self.search_url(term, section, page);
                    let body = match self.fetcher.fetch(&url).await {
                        Ok(body) => body,
                        Err(e) => {
                            warn!(site = "wawa", url = %url, error = %e, "Listing fetch failed");
                            break;
                        }
                    };
                    let (candidates, has_next) =
                        self.parse_listing(&body, term, content_type, request);
                    let empty = candidates.is_empty();
                    all.extend(candidates);
                    if !has_next || empty {
                        break;
                    }
                }
                all
            })
            .collect();
        let per_expansion = futures::future::join_all(futures).await;

        let mut seen = HashSet::new();
        let mut candidates = vec![];
        for candidate in per_expansion.into_iter().flatten() {
            if seen.insert(candidate.page_url.clone()) {
                candidates.push(candidate);
            }
        }

        Ok(self.visit_details(candidates, content_type, request).await)
    }

    async fn test_connection(&self) -> Result<bool> {
        let body = self.fetcher.fetch(&self.config.site_url).await?;
        Ok(body.contains("wa-block") || body.contains("wawacity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexer() -> WawaIndexer {
        WawaIndexer::new(
            WawaConfig::default(),
            PageFetcher::new("wawa", 2, crate::indexer::fetch::PageCache::default()),
            Arc::new(TitleExpander::new(String::new())),
        )
    }

    #[test]
    fn test_parse_listing() {
        let idx = indexer();
        let html = r#"
            <div class="wa-block">
              <div class="wa-sub-block-title"><a href="/film/1-heat">Heat (1995)</a></div>
            </div>
            <div class="wa-block">
              <div class="wa-sub-block-title"><a href="/film/2-other">Something Else Entirely</a></div>
            </div>
            <ul class="pagination"><a rel="next" href="?page=2">2</a></ul>"#;

        let request = SearchRequest::text("Heat");
        let (candidates, has_next) =
            idx.parse_listing(html, "Heat", ContentType::Movie, &request);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].page_url, "https://www.wawacity.tools/film/1-heat");
        assert!(has_next);
    }

    #[test]
    fn test_parse_links_table() {
        let idx = indexer();
        let html = r#"
            <table id="DDLLinks">
              <tr class="link-row">
                <td><a href="https://dl-protect.link/aaa">Episode 1</a></td>
                <td>1fichier</td>
              </tr>
              <tr class="link-row">
                <td><a href="https://dl-protect.link/bbb">Episode 2</a></td>
                <td>Uptobox</td>
              </tr>
              <tr class="link-row">
                <td><a href="javascript:void(0)">broken</a></td>
                <td>dead</td>
              </tr>
            </table>"#;

        let document = Html::parse_document(html);
        let links = idx.parse_links(&document);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].hoster, "1fichier");
        assert_eq!(links[0].episode, Some(1));
        assert_eq!(links[1].hoster, "Uptobox");
        assert_eq!(links[1].episode, Some(2));
    }

    #[test]
    fn test_anime_not_supported() {
        let idx = indexer();
        assert!(!idx.supports(ContentType::Anime));
        assert!(idx.supports(ContentType::Movie));
    }
}

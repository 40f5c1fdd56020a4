//! Query expansion for DDL site searches
//!
//! Sites index the same work under different spellings: the French title,
//! the original title, or the original title with French orthography. Two
//! mechanisms compensate, composed by the scrapers as needed:
//!
//! - accent variant generation: mutate an unaccented query into plausible
//!   French spellings ("the" -> "thé");
//! - canonical-title expansion: resolve an IMDB ID through TMDB into the
//!   primary and French titles of the work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

/// Maximum number of accent variants generated for one query.
const MAX_VARIANTS: usize = 5;

/// Whole-word substitutions applied before per-character swaps.
const WORD_SUBSTITUTIONS: [(&str, &str); 6] = [
    ("the", "thé"),
    ("le", "lé"),
    ("a", "à"),
    ("ou", "où"),
    ("des", "dès"),
    ("la", "là"),
];

/// Per-character accent swaps tried at word boundaries.
const CHAR_SWAPS: [(char, &[char]); 6] = [
    ('e', &['é', 'è', 'ê']),
    ('a', &['à', 'â']),
    ('i', &['î']),
    ('o', &['ô']),
    ('u', &['û', 'ù']),
    ('c', &['ç']),
];

fn has_accent(s: &str) -> bool {
    s.chars().any(|c| !c.is_ascii() && c.is_alphabetic())
}

/// Generate alternate French spellings for a query.
///
/// A query that already contains accented characters is returned unchanged
/// (the requester supplied French orthography, mutating it further only adds
/// noise). Otherwise up to [`MAX_VARIANTS`] candidates are produced, the
/// original always first.
pub fn accent_variants(query: &str) -> Vec<String> {
    if has_accent(query) {
        return vec![query.to_string()];
    }

    let mut variants = vec![query.to_string()];

    // Whole-word table first: these are the substitutions actually seen in
    // site indexes.
    for (from, to) in WORD_SUBSTITUTIONS {
        let replaced: Vec<String> = query
            .split(' ')
            .map(|w| {
                if w.eq_ignore_ascii_case(from) {
                    to.to_string()
                } else {
                    w.to_string()
                }
            })
            .collect();
        let candidate = replaced.join(" ");
        if candidate != query && !variants.contains(&candidate) {
            variants.push(candidate);
            if variants.len() >= MAX_VARIANTS {
                return variants;
            }
        }
    }

    // Single-character swaps, first occurrence per word, words >= 3 chars.
    'outer: for (plain, accented) in CHAR_SWAPS {
        for &acc in accented {
            let words: Vec<String> = query
                .split(' ')
                .map(|w| {
                    if w.chars().count() >= 3 {
                        w.replacen(plain, &acc.to_string(), 1)
                    } else {
                        w.to_string()
                    }
                })
                .collect();
            let candidate = words.join(" ");
            if candidate != query && !variants.contains(&candidate) {
                variants.push(candidate);
                if variants.len() >= MAX_VARIANTS {
                    break 'outer;
                }
            }
        }
    }

    variants
}

// TMDB response shapes (only the fields used here).

#[derive(Debug, Deserialize)]
struct TmdbFindResponse {
    #[serde(default)]
    movie_results: Vec<TmdbEntry>,
    #[serde(default)]
    tv_results: Vec<TmdbEntry>,
}

#[derive(Debug, Deserialize)]
struct TmdbEntry {
    id: i64,
    title: Option<String>,
    name: Option<String>,
}

impl TmdbEntry {
    fn title(&self) -> Option<&str> {
        self.title.as_deref().or(self.name.as_deref())
    }
}

/// Resolved titles for one IMDB ID.
#[derive(Debug, Clone)]
struct ResolvedTitles {
    primary: Option<String>,
    french: Option<String>,
}

/// TMDB-backed canonical-title resolver.
///
/// Lookups are cached indefinitely on success (the titles of a fixed IMDB ID
/// never change); failed lookups are not cached so the next search retries.
pub struct TitleExpander {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: Arc<RwLock<HashMap<String, ResolvedTitles>>>,
}

impl TitleExpander {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether an API key is configured.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Expand an IMDB ID into the set of queries worth searching.
    ///
    /// Returns the deduplicated, lowercased union of the work's primary
    /// title, its French title, and the caller-supplied fallback. When every
    /// lookup fails and no fallback is given the set is empty and the caller
    /// logs that no queries are available.
    pub async fn expand(&self, imdb_id: &str, fallback: Option<&str>) -> Vec<String> {
        let titles = match self.lookup(imdb_id).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(imdb_id = %imdb_id, error = %e, "TMDB lookup failed");
                ResolvedTitles {
                    primary: None,
                    french: None,
                }
            }
        };

        let mut queries: Vec<String> = vec![];
        for title in [
            titles.primary.as_deref(),
            titles.french.as_deref(),
            fallback,
        ]
        .into_iter()
        .flatten()
        {
            let q = title.to_lowercase();
            if !q.is_empty() && !queries.contains(&q) {
                queries.push(q);
            }
        }

        if queries.is_empty() {
            warn!(imdb_id = %imdb_id, "No search queries available for ID search");
        }
        queries
    }

    async fn lookup(&self, imdb_id: &str) -> Result<ResolvedTitles> {
        if let Some(cached) = self.cache.read().get(imdb_id) {
            debug!(imdb_id = %imdb_id, "Title cache hit");
            return Ok(cached.clone());
        }

        if !self.is_configured() {
            anyhow::bail!("TMDB API key not configured");
        }

        let find_url = format!(
            "{}/find/{}?api_key={}&external_source=imdb_id",
            self.base_url, imdb_id, self.api_key
        );
        let found: TmdbFindResponse = self
            .client
            .get(&find_url)
            .send()
            .await
            .context("TMDB find request failed")?
            .error_for_status()
            .context("TMDB find returned an error status")?
            .json()
            .await
            .context("Failed to parse TMDB find response")?;

        let (entry, kind) = match (found.movie_results.first(), found.tv_results.first()) {
            (Some(m), _) => (m, "movie"),
            (None, Some(t)) => (t, "tv"),
            (None, None) => anyhow::bail!("IMDB ID {} not known to TMDB", imdb_id),
        };

        let primary = entry.title().map(|t| t.to_string());

        // Separate request for the localized title; its failure must not
        // discard the primary title we already have.
        let french = match self.localized_title(kind, entry.id).await {
            Ok(title) => title,
            Err(e) => {
                warn!(imdb_id = %imdb_id, error = %e, "French title lookup failed");
                None
            }
        };

        let resolved = ResolvedTitles { primary, french };

        // Only successful resolutions are cached; a transient TMDB outage
        // must not pin an empty result forever.
        if resolved.primary.is_some() || resolved.french.is_some() {
            self.cache
                .write()
                .insert(imdb_id.to_string(), resolved.clone());
        }

        Ok(resolved)
    }

    async fn localized_title(&self, kind: &str, tmdb_id: i64) -> Result<Option<String>> {
        let url = format!(
            "{}/{}/{}?api_key={}&language=fr-FR",
            self.base_url, kind, tmdb_id, self.api_key
        );
        let entry: TmdbEntry = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entry.title().map(|t| t.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accented_query_unchanged() {
        assert_eq!(accent_variants("thé"), vec!["thé".to_string()]);
        assert_eq!(accent_variants("Amélie"), vec!["Amélie".to_string()]);
    }

    #[test]
    fn test_original_always_first() {
        let variants = accent_variants("the mask");
        assert_eq!(variants[0], "the mask");
        assert!(variants.len() > 1);
    }

    #[test]
    fn test_word_substitution() {
        let variants = accent_variants("the simpsons");
        assert!(variants.contains(&"thé simpsons".to_string()));
    }

    #[test]
    fn test_char_swap_respects_word_length() {
        // "le" is below the 3-char boundary, so no per-character swap; the
        // word table still applies.
        let variants = accent_variants("le bureau");
        assert!(variants.contains(&"lé bureau".to_string()));
        assert!(variants.iter().any(|v| v.contains("burêau") || v.contains("buréau") || v.contains("burèau")));
    }

    #[test]
    fn test_bounded_variant_count() {
        let variants = accent_variants("a long enough query to generate everything");
        assert!(variants.len() <= MAX_VARIANTS);
    }

    #[test]
    fn test_no_duplicates() {
        let variants = accent_variants("once once");
        let mut deduped = variants.clone();
        deduped.dedup();
        assert_eq!(variants, deduped);
    }

    #[tokio::test]
    async fn test_expand_without_api_key_uses_fallback() {
        let expander = TitleExpander::new(String::new());
        let queries = expander.expand("tt1375666", Some("Inception")).await;
        assert_eq!(queries, vec!["inception".to_string()]);
    }

    #[tokio::test]
    async fn test_expand_without_api_key_or_fallback_is_empty() {
        let expander = TitleExpander::new(String::new());
        let queries = expander.expand("tt1375666", None).await;
        assert!(queries.is_empty());
    }
}

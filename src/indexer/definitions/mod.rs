//! Site scraper implementations
//!
//! One module per supported DDL site. The sites share their page grammar
//! loosely (a paginated search listing, a detail page with a quality line, a
//! size line and a hoster-keyed link list), so the common parsing lives here
//! and each site module only contributes selectors and URL building.

pub mod wawa;
pub mod zone;

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{DownloadLink, SearchRequest};

/// Hard cap on detail pages visited per search, across all expansions.
/// Detail fetches dominate search latency and site load.
pub const MAX_DETAIL_PAGES: usize = 10;

/// Labeled size line ("Taille du fichier : 1.40 Go", "Taille d'un épisode : 350 Mo").
static SIZE_LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)taille[^:]*:\s*([\d.,]+)\s*(to|go|mo|ko|tb|gb|mb|kb)").unwrap()
});

/// Bare size fragment ("1.40 Go"), used when no labeled line exists.
static SIZE_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d.,]+)\s*(to|go|mo|ko|tb|gb|mb|kb)\b").unwrap());

/// Quality line ("Qualité : HDLight 1080p (FRENCH)").
static QUALITY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)qualit[eé]\s*:?\s*([^(<\r\n|]+)(?:\(([^)]+)\))?").unwrap()
});

/// IMDB IDs embedded in detail pages (links to imdb.com).
static IMDB_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"tt\d{7,8}").unwrap());

/// Labeled production year ("Année de production : 2010").
static YEAR_LABELED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ann[eé]e[^:]*:\s*((?:19|20)\d{2})").unwrap());

/// Episode number in a link label ("Episode 5", "Épisode 05").
static EPISODE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[eé]pisode\s*(\d{1,3})").unwrap());

/// Season marker in a listing title ("Saison 2", "- Saison 02").
static SEASON_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)saison\s*(\d{1,2})").unwrap());

/// Parse a human size string into bytes.
///
/// Tries the labeled form first, then the first bare size fragment. French
/// units (Ko/Mo/Go/To) and English units are both accepted.
pub fn parse_size_bytes(text: &str) -> Option<i64> {
    let caps = SIZE_LABELED.captures(text).or_else(|| SIZE_BARE.captures(text))?;

    let number: f64 = caps[1].replace(',', ".").parse().ok()?;
    let multiplier = match caps[2].to_lowercase().as_str() {
        "ko" | "kb" => 1024.0,
        "mo" | "mb" => 1024.0 * 1024.0,
        "go" | "gb" => 1024.0 * 1024.0 * 1024.0,
        "to" | "tb" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };

    Some((number * multiplier) as i64)
}

/// Parse the quality line into (quality, language).
pub fn parse_quality_language(text: &str) -> (Option<String>, Option<String>) {
    match QUALITY_LINE.captures(text) {
        Some(caps) => {
            let quality = caps[1].trim().to_string();
            let quality = (!quality.is_empty()).then_some(quality);
            let language = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty());
            (quality, language)
        }
        None => (None, None),
    }
}

/// First IMDB ID found anywhere in the raw page.
pub fn find_imdb_id(page: &str) -> Option<String> {
    IMDB_ID.find(page).map(|m| m.as_str().to_string())
}

/// Production year from a labeled line.
pub fn find_year(page: &str) -> Option<i32> {
    YEAR_LABELED
        .captures(page)
        .and_then(|c| c[1].parse().ok())
}

/// Episode number from a download link's label text.
pub fn episode_from_label(label: &str) -> Option<i32> {
    EPISODE_LABEL
        .captures(label)
        .and_then(|c| c[1].parse().ok())
}

/// Season number from a listing title.
pub fn season_from_title(title: &str) -> Option<i32> {
    SEASON_LABEL
        .captures(title)
        .and_then(|c| c[1].parse().ok())
}

/// Resolve a possibly-relative href against the site base.
pub fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}

/// Truncate a search term to a site's maximum query length.
///
/// Sites silently ignore the filter and return an unfiltered listing when
/// the term is longer; truncating keeps the filter effective.
pub fn truncate_query(term: &str, max_len: usize) -> &str {
    match term.char_indices().nth(max_len) {
        Some((idx, _)) => term[..idx].trim_end(),
        None => term,
    }
}

/// Whether a link passes the hoster allow-list.
///
/// Case-insensitive substring match in either direction, so "1fichier"
/// matches an allow-list entry of "fichier" and vice versa.
pub fn hoster_allowed(hoster: &str, allow_list: &[String]) -> bool {
    if allow_list.is_empty() {
        return true;
    }
    let h = hoster.to_lowercase();
    allow_list.iter().any(|allowed| {
        let a = allowed.to_lowercase();
        h.contains(&a) || a.contains(&h)
    })
}

/// Synthesize the dot-separated pseudo-scene name for one (release, hoster)
/// pair: base name, year (movies), season/episode code (series), quality,
/// language, hoster.
pub fn scene_title(
    base: &str,
    year: Option<i32>,
    episode_code: Option<&str>,
    quality: Option<&str>,
    language: Option<&str>,
    hoster: &str,
) -> String {
    let mut parts: Vec<String> = vec![base.trim().to_string()];
    if let Some(y) = year {
        parts.push(y.to_string());
    }
    if let Some(code) = episode_code {
        parts.push(code.to_string());
    }
    if let Some(q) = quality {
        parts.push(q.trim().to_string());
    }
    if let Some(l) = language {
        parts.push(l.trim().to_string());
    }
    parts.push(hoster.trim().to_string());

    let joined = parts.join(".").replace(' ', ".");
    // Collapse runs introduced by multi-word parts.
    let mut out = String::with_capacity(joined.len());
    let mut prev_dot = false;
    for c in joined.chars() {
        if c == '.' {
            if !prev_dot {
                out.push('.');
            }
            prev_dot = true;
        } else {
            out.push(c);
            prev_dot = false;
        }
    }
    out.trim_matches('.').to_string()
}

/// Parenthesized qualifiers at the end of a listing title ("(2010)", "(VF)").
static TRAILING_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)\s*$").unwrap());

/// Reduce a listing title to the bare work name used in scene-title
/// synthesis: season markers, trailing parenthesized qualifiers and
/// separator debris are removed.
pub fn clean_base_name(title: &str) -> String {
    let cut = match SEASON_LABEL.find(title) {
        Some(m) => &title[..m.start()],
        None => title,
    };
    let cut = TRAILING_PARENS.replace(cut, "");
    cut.trim()
        .trim_end_matches(['-', ':', '–'])
        .trim()
        .to_string()
}

/// Per-episode filter: keep a link either when no episode was requested, or
/// when the link's parsed episode matches exactly.
pub fn episode_filter(links: Vec<DownloadLink>, request: &SearchRequest) -> Vec<DownloadLink> {
    match request.episode {
        None => links,
        Some(wanted) => links
            .into_iter()
            .filter(|l| l.episode == Some(wanted))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_labeled() {
        assert_eq!(
            parse_size_bytes("Taille du fichier : 1.40 Go"),
            Some((1.40 * 1024.0 * 1024.0 * 1024.0) as i64)
        );
        assert_eq!(
            parse_size_bytes("Taille d'un épisode : 350 Mo"),
            Some(350 * 1024 * 1024)
        );
    }

    #[test]
    fn test_parse_size_bare_and_comma() {
        assert_eq!(
            parse_size_bytes("environ 1,2 Go par fichier"),
            Some((1.2f64 * 1024.0 * 1024.0 * 1024.0) as i64)
        );
        assert_eq!(parse_size_bytes("rien ici"), None);
    }

    #[test]
    fn test_parse_quality_language() {
        let (q, l) = parse_quality_language("Qualité : HDLight 1080p (FRENCH)");
        assert_eq!(q.as_deref(), Some("HDLight 1080p"));
        assert_eq!(l.as_deref(), Some("FRENCH"));

        let (q, l) = parse_quality_language("Qualité : DVDRIP");
        assert_eq!(q.as_deref(), Some("DVDRIP"));
        assert_eq!(l, None);

        assert_eq!(parse_quality_language("no quality here"), (None, None));
    }

    #[test]
    fn test_find_imdb_id() {
        let page = r#"<a href="https://www.imdb.com/title/tt1375666/">IMDB</a>"#;
        assert_eq!(find_imdb_id(page).as_deref(), Some("tt1375666"));
        assert_eq!(find_imdb_id("nothing"), None);
    }

    #[test]
    fn test_episode_and_season_labels() {
        assert_eq!(episode_from_label("Episode 5"), Some(5));
        assert_eq!(episode_from_label("Épisode 12 Final"), Some(12));
        assert_eq!(episode_from_label("Pack complet"), None);
        assert_eq!(season_from_title("Breaking Bad - Saison 2"), Some(2));
        assert_eq!(season_from_title("Heat 1995"), None);
    }

    #[test]
    fn test_truncate_query() {
        assert_eq!(truncate_query("short", 32), "short");
        assert_eq!(truncate_query("abcdefghij", 5), "abcde");
        // Multi-byte chars must not split.
        assert_eq!(truncate_query("éééééé", 3), "ééé");
    }

    #[test]
    fn test_hoster_allowed() {
        let allow = vec!["1fichier".to_string()];
        assert!(hoster_allowed("1fichier", &allow));
        assert!(hoster_allowed("1Fichier", &allow));
        assert!(hoster_allowed("fichier", &allow)); // allow-entry contains hoster
        assert!(!hoster_allowed("rapidgator", &allow));
        assert!(hoster_allowed("anything", &[]));
    }

    #[test]
    fn test_scene_title() {
        assert_eq!(
            scene_title("Inception", Some(2010), None, Some("1080p"), Some("FRENCH"), "1fichier"),
            "Inception.2010.1080p.FRENCH.1fichier"
        );
        assert_eq!(
            scene_title(
                "Breaking Bad",
                None,
                Some("S02E05"),
                Some("HDLight 720p"),
                Some("VOSTFR"),
                "rapidgator"
            ),
            "Breaking.Bad.S02E05.HDLight.720p.VOSTFR.rapidgator"
        );
    }

    #[test]
    fn test_clean_base_name() {
        assert_eq!(clean_base_name("Breaking Bad - Saison 2"), "Breaking Bad");
        assert_eq!(clean_base_name("Inception (2010)"), "Inception");
        assert_eq!(clean_base_name("Heat"), "Heat");
    }

    #[test]
    fn test_episode_filter() {
        let links = vec![
            DownloadLink {
                hoster: "1fichier".to_string(),
                url: "u1".to_string(),
                episode: Some(1),
            },
            DownloadLink {
                hoster: "1fichier".to_string(),
                url: "u2".to_string(),
                episode: Some(2),
            },
        ];
        let req = SearchRequest {
            episode: Some(2),
            ..Default::default()
        };
        let kept = episode_filter(links.clone(), &req);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "u2");

        let all = episode_filter(links, &SearchRequest::default());
        assert_eq!(all.len(), 2);
    }
}

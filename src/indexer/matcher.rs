//! Title normalization and fuzzy comparison
//!
//! DDL sites list titles with inconsistent accents, separators and bracketed
//! annotations, so direct string equality is useless. Everything here works
//! on a normalized form and tolerates an edit distance that scales with the
//! query length.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::ContentType;

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Normalize a title for comparison.
///
/// Strips bracketed annotations (`[1080p]`, `[MULTI]`), HTML tags,
/// diacritics and anything non-alphanumeric, then lowercases. Whitespace is
/// collapsed to single spaces.
pub fn normalize(s: &str) -> String {
    let s = BRACKETED.replace_all(s, " ");
    let s = HTML_TAG.replace_all(&s, " ");

    s.chars()
        .map(strip_diacritic)
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a single accented character onto its base ASCII letter.
///
/// Covers the accents found on French DDL sites; anything else passes
/// through unchanged.
fn strip_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'À' | 'Á' | 'Â' | 'Ä' => 'a',
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => 'i',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' | 'Ò' | 'Ó' | 'Ô' | 'Ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        'œ' => 'o',
        _ => c,
    }
}

/// Edit distance between two titles, computed over their normalized forms.
pub fn distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(&normalize(a), &normalize(b))
}

/// Maximum edit distance tolerated for a query of the given length.
///
/// Short queries get almost no slack ("Heat" must not match "Hear"); long
/// queries scale at 20% of their length.
pub fn allowed_distance(len: usize) -> usize {
    if len <= 5 {
        1
    } else if len <= 10 {
        2
    } else {
        len / 5
    }
}

/// Decide whether a scraped title matches the query.
///
/// Exact normalized equality always matches. Movies additionally match on
/// containment of the query inside the candidate (sites append the year and
/// edition markers to movie titles). Everything else falls back to the
/// length-scaled edit distance.
pub fn is_match(query: &str, candidate: &str, content_type: ContentType) -> bool {
    let q = normalize(query);
    let c = normalize(candidate);

    if q.is_empty() || c.is_empty() {
        return false;
    }
    if q == c {
        return true;
    }
    if content_type.allows_containment() && c.contains(&q) {
        return true;
    }

    distance(query, candidate) <= allowed_distance(q.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_brackets_and_tags() {
        assert_eq!(normalize("Heat [1080p] <b>FRENCH</b>"), "heat french");
        assert_eq!(normalize("Le.Fabuleux-Destin"), "le fabuleux destin");
    }

    #[test]
    fn test_normalize_strips_diacritics() {
        assert_eq!(normalize("Amélie Poulain"), "amelie poulain");
        assert_eq!(normalize("Les Misérables"), "les miserables");
        assert_eq!(normalize("Ça"), "ca");
    }

    #[test]
    fn test_allowed_distance_scales() {
        assert_eq!(allowed_distance(3), 1);
        assert_eq!(allowed_distance(5), 1);
        assert_eq!(allowed_distance(8), 2);
        assert_eq!(allowed_distance(10), 2);
        assert_eq!(allowed_distance(20), 4);
        assert_eq!(allowed_distance(30), 6);
    }

    #[test]
    fn test_allowed_distance_non_decreasing() {
        let mut prev = 0;
        for len in 1..200 {
            let d = allowed_distance(len);
            assert!(d >= prev, "allowed_distance regressed at len {}", len);
            prev = d;
        }
    }

    #[test]
    fn test_self_match() {
        for q in ["Heat", "Amélie", "The Lord of the Rings", "x"] {
            assert!(is_match(q, q, ContentType::Series), "{} must self-match", q);
        }
    }

    #[test]
    fn test_movie_containment() {
        assert!(is_match("Heat", "Heat 1995", ContentType::Movie));
        assert!(!is_match("Heat", "Heat 1995", ContentType::Series));
        assert!(!is_match("Heat", "Heat 1995", ContentType::Anime));
    }

    #[test]
    fn test_distance_fallback() {
        // One typo on a medium-length query is tolerated.
        assert!(is_match("Breaking Bad", "Braeking Bad", ContentType::Series));
        // Short queries stay strict.
        assert!(!is_match("Heat", "Heist", ContentType::Series));
    }

    #[test]
    fn test_accented_query_matches_unaccented_candidate() {
        assert!(is_match("Amélie", "Amelie", ContentType::Movie));
    }

    #[test]
    fn test_empty_never_matches() {
        assert!(!is_match("", "Heat", ContentType::Movie));
        assert!(!is_match("Heat", "", ContentType::Movie));
    }
}

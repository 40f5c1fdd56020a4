//! Torznab category taxonomy and quality classification
//!
//! Standard Torznab categories follow the Newznab numbering scheme: main
//! categories in thousands (2000 Movies, 5000 TV, 7000 Books) and
//! subcategories adding tens. DDL sites don't expose categories themselves,
//! so releases are classified from their quality string.

use super::types::ContentType;

/// A Torznab category definition.
#[derive(Debug, Clone)]
pub struct TorznabCategory {
    pub id: i32,
    pub name: &'static str,
    pub parent_id: Option<i32>,
}

impl TorznabCategory {
    pub const fn new(id: i32, name: &'static str, parent_id: Option<i32>) -> Self {
        Self {
            id,
            name,
            parent_id,
        }
    }
}

/// Categories advertised in the caps document.
pub static CATEGORIES: &[TorznabCategory] = &[
    TorznabCategory::new(2000, "Movies", None),
    TorznabCategory::new(2030, "Movies/SD", Some(2000)),
    TorznabCategory::new(2040, "Movies/HD", Some(2000)),
    TorznabCategory::new(2045, "Movies/UHD", Some(2000)),
    TorznabCategory::new(5000, "TV", None),
    TorznabCategory::new(5030, "TV/SD", Some(5000)),
    TorznabCategory::new(5040, "TV/HD", Some(5000)),
    TorznabCategory::new(5045, "TV/UHD", Some(5000)),
    TorznabCategory::new(5070, "TV/Anime", Some(5000)),
    TorznabCategory::new(7000, "Books", None),
    TorznabCategory::new(7020, "Books/EBook", Some(7000)),
];

/// Common category constants for easy reference.
pub mod cats {
    pub const MOVIES: i32 = 2000;
    pub const MOVIES_SD: i32 = 2030;
    pub const MOVIES_HD: i32 = 2040;
    pub const MOVIES_UHD: i32 = 2045;
    pub const TV: i32 = 5000;
    pub const TV_SD: i32 = 5030;
    pub const TV_HD: i32 = 5040;
    pub const TV_UHD: i32 = 5045;
    pub const TV_ANIME: i32 = 5070;
    pub const BOOKS: i32 = 7000;
    pub const BOOKS_EBOOK: i32 = 7020;
}

/// Quality tier derived from a release's quality string.
///
/// The pattern list is ordered and first-match-wins: UHD markers are checked
/// before HD markers, so a string matching both (e.g. "4K 1080p remux")
/// classifies as UHD. "HDLight" counts as HD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityTier {
    Uhd,
    Hd,
    Sd,
}

fn quality_tier(quality: Option<&str>) -> QualityTier {
    let q = match quality {
        Some(q) => q.to_lowercase(),
        None => return QualityTier::Sd,
    };

    const UHD_MARKERS: [&str; 3] = ["2160p", "4k", "uhd"];
    const HD_MARKERS: [&str; 5] = ["1080p", "720p", "fhd", "hdlight", "hd"];

    if UHD_MARKERS.iter().any(|m| q.contains(m)) {
        QualityTier::Uhd
    } else if HD_MARKERS.iter().any(|m| q.contains(m)) {
        QualityTier::Hd
    } else {
        QualityTier::Sd
    }
}

/// Map a (content type, quality) pair onto a Torznab category code.
///
/// Animes and ebooks are flat; movies and series split by quality tier.
pub fn classify(content_type: ContentType, quality: Option<&str>) -> i32 {
    match content_type {
        ContentType::Anime => cats::TV_ANIME,
        ContentType::Ebook => cats::BOOKS_EBOOK,
        ContentType::Movie => match quality_tier(quality) {
            QualityTier::Uhd => cats::MOVIES_UHD,
            QualityTier::Hd => cats::MOVIES_HD,
            QualityTier::Sd => cats::MOVIES_SD,
        },
        ContentType::Series => match quality_tier(quality) {
            QualityTier::Uhd => cats::TV_UHD,
            QualityTier::Hd => cats::TV_HD,
            QualityTier::Sd => cats::TV_SD,
        },
    }
}

/// Content types implied by a Torznab category filter.
///
/// An empty filter means everything. A parent category covers all of its
/// subcategories (2000 covers 2030/2040/2045).
pub fn content_types_for(categories: &[i32]) -> Vec<ContentType> {
    if categories.is_empty() {
        return ContentType::ALL.to_vec();
    }

    let mut types = vec![];
    for &cat in categories {
        let implied = match cat {
            cats::TV_ANIME => Some(ContentType::Anime),
            c if (2000..3000).contains(&c) => Some(ContentType::Movie),
            c if (5000..6000).contains(&c) => Some(ContentType::Series),
            c if (7000..8000).contains(&c) => Some(ContentType::Ebook),
            _ => None,
        };
        if let Some(t) = implied
            && !types.contains(&t)
        {
            types.push(t);
        }
    }

    // Anime shares the 5000 block; a bare "5000" search covers both.
    if categories.contains(&cats::TV) && !types.contains(&ContentType::Anime) {
        types.push(ContentType::Anime);
    }

    types
}

/// Whether a release's category passes a category filter.
///
/// A parent code in the filter accepts all of its subcategories.
pub fn category_matches(release_cat: i32, filter: &[i32]) -> bool {
    if filter.is_empty() {
        return true;
    }
    filter
        .iter()
        .any(|&f| f == release_cat || (f % 1000 == 0 && release_cat / 1000 == f / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_movie_tiers() {
        assert_eq!(classify(ContentType::Movie, Some("2160p")), cats::MOVIES_UHD);
        assert_eq!(classify(ContentType::Movie, Some("4K HDR")), cats::MOVIES_UHD);
        assert_eq!(classify(ContentType::Movie, Some("720p")), cats::MOVIES_HD);
        assert_eq!(classify(ContentType::Movie, Some("1080p")), cats::MOVIES_HD);
        assert_eq!(classify(ContentType::Movie, Some("HDLight")), cats::MOVIES_HD);
        assert_eq!(classify(ContentType::Movie, Some("DVDRIP")), cats::MOVIES_SD);
        assert_eq!(classify(ContentType::Movie, None), cats::MOVIES_SD);
    }

    #[test]
    fn test_classify_series_tiers() {
        assert_eq!(classify(ContentType::Series, Some("2160p")), cats::TV_UHD);
        assert_eq!(classify(ContentType::Series, Some("1080p")), cats::TV_HD);
        assert_eq!(classify(ContentType::Series, None), cats::TV_SD);
    }

    #[test]
    fn test_classify_flat_types() {
        assert_eq!(classify(ContentType::Anime, Some("2160p")), cats::TV_ANIME);
        assert_eq!(classify(ContentType::Anime, None), cats::TV_ANIME);
        assert_eq!(classify(ContentType::Ebook, Some("1080p")), cats::BOOKS_EBOOK);
    }

    #[test]
    fn test_uhd_wins_over_hd_on_ambiguous_strings() {
        // First-match precedence: UHD markers are checked before HD markers.
        assert_eq!(
            classify(ContentType::Movie, Some("4K 1080p remux")),
            cats::MOVIES_UHD
        );
    }

    #[test]
    fn test_content_types_for_filter() {
        assert_eq!(content_types_for(&[]).len(), 4);
        assert_eq!(content_types_for(&[2040]), vec![ContentType::Movie]);
        assert_eq!(content_types_for(&[5070]), vec![ContentType::Anime]);
        assert_eq!(
            content_types_for(&[5000]),
            vec![ContentType::Series, ContentType::Anime]
        );
        assert_eq!(content_types_for(&[7020]), vec![ContentType::Ebook]);
    }

    #[test]
    fn test_category_matches() {
        assert!(category_matches(2040, &[]));
        assert!(category_matches(2040, &[2040]));
        assert!(category_matches(2040, &[2000]));
        assert!(!category_matches(2045, &[2040]));
        assert!(!category_matches(5040, &[2000]));
    }
}

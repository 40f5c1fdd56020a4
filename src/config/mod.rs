//! Application configuration management

use std::env;

use anyhow::{Context, Result};

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Application configuration loaded from environment variables.
///
/// Missing optional settings degrade features (no TMDB key means no
/// ID-based title expansion, no debrid key means raw hoster links); they
/// never prevent startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Externally reachable base URL, used for self-links in the feed
    pub public_url: String,

    /// SQLite database path
    pub database_path: String,

    /// Final destination for completed downloads
    pub downloads_path: String,

    /// Partial downloads (engine temp files)
    pub incomplete_path: String,

    /// Watcher inbox for placeholder files
    pub blackhole_path: String,

    /// Watcher scan interval in seconds
    pub scan_interval_secs: u64,

    /// Keep dispatched placeholders in processed/ instead of deleting
    pub keep_processed: bool,

    /// TMDB API key for ID-based title expansion
    pub tmdb_api_key: Option<String>,

    /// Link-protection bypass service base URL
    pub bypass_url: Option<String>,

    /// Run the bypass stage at indexing time instead of dispatch time
    pub resolve_at_index: bool,

    /// Comma-separated enabled site ids
    pub sites: Vec<String>,

    /// Per-site base URL overrides (sites hop domains regularly)
    pub zone_url: Option<String>,
    pub wawa_url: Option<String>,

    /// Pagination cap per search expansion
    pub max_pages: usize,

    // Debrid backends, in preference order
    pub alldebrid_api_key: Option<String>,
    pub alldebrid_enabled: bool,
    pub realdebrid_api_token: Option<String>,
    pub realdebrid_enabled: bool,

    // Synology Download Station
    pub synology_enabled: bool,
    pub synology_url: String,
    pub synology_username: String,
    pub synology_password: String,

    // JDownloader
    pub jdownloader_enabled: bool,
    pub jdownloader_mode: String,
    pub jdownloader_local_url: Option<String>,
    pub jdownloader_email: Option<String>,
    pub jdownloader_password: Option<String>,
    pub jdownloader_device: Option<String>,

    // aria2
    pub aria2_enabled: bool,
    pub aria2_url: String,
    pub aria2_secret: Option<String>,

    // Direct-fetch backends
    pub wget_enabled: bool,
    pub curl_enabled: bool,

    // Compatibility-shim settings
    pub shim_username: String,
    pub shim_password: String,
    pub max_concurrent_downloads: usize,
    pub stall_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port: u16 = env_or("PORT", "9117").parse().context("Invalid PORT")?;

        Ok(Self {
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            port,

            database_path: env_or("DATABASE_PATH", "./data/ddlarr.db"),
            downloads_path: env_or("DOWNLOADS_PATH", "./data/downloads"),
            incomplete_path: env_or("INCOMPLETE_PATH", "./data/incomplete"),
            blackhole_path: env_or("BLACKHOLE_PATH", "./data/blackhole"),

            scan_interval_secs: env_or("SCAN_INTERVAL_SECS", "30")
                .parse()
                .context("Invalid SCAN_INTERVAL_SECS")?,
            keep_processed: env_bool("KEEP_PROCESSED", false),

            tmdb_api_key: env::var("TMDB_API_KEY").ok(),

            bypass_url: env::var("BYPASS_URL").ok(),
            resolve_at_index: env_bool("RESOLVE_AT_INDEX", false),

            sites: env_or("SITES", "zone,wawa")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            zone_url: env::var("ZONE_URL").ok(),
            wawa_url: env::var("WAWA_URL").ok(),
            max_pages: env_or("MAX_PAGES", "3").parse().context("Invalid MAX_PAGES")?,

            alldebrid_api_key: env::var("ALLDEBRID_API_KEY").ok(),
            alldebrid_enabled: env_bool("ALLDEBRID_ENABLED", true),
            realdebrid_api_token: env::var("REALDEBRID_API_TOKEN").ok(),
            realdebrid_enabled: env_bool("REALDEBRID_ENABLED", true),

            synology_enabled: env_bool("SYNOLOGY_ENABLED", false),
            synology_url: env_or("SYNOLOGY_URL", ""),
            synology_username: env_or("SYNOLOGY_USERNAME", ""),
            synology_password: env_or("SYNOLOGY_PASSWORD", ""),

            jdownloader_enabled: env_bool("JDOWNLOADER_ENABLED", false),
            jdownloader_mode: env_or("JDOWNLOADER_MODE", "auto"),
            jdownloader_local_url: env::var("JDOWNLOADER_LOCAL_URL").ok(),
            jdownloader_email: env::var("JDOWNLOADER_EMAIL").ok(),
            jdownloader_password: env::var("JDOWNLOADER_PASSWORD").ok(),
            jdownloader_device: env::var("JDOWNLOADER_DEVICE").ok(),

            aria2_enabled: env_bool("ARIA2_ENABLED", false),
            aria2_url: env_or("ARIA2_URL", "http://localhost:6800"),
            aria2_secret: env::var("ARIA2_SECRET").ok(),

            wget_enabled: env_bool("WGET_ENABLED", false),
            curl_enabled: env_bool("CURL_ENABLED", false),

            shim_username: env_or("SHIM_USERNAME", "admin"),
            shim_password: env_or("SHIM_PASSWORD", "adminadmin"),
            max_concurrent_downloads: env_or("MAX_CONCURRENT_DOWNLOADS", "2")
                .parse()
                .context("Invalid MAX_CONCURRENT_DOWNLOADS")?,
            stall_timeout_secs: env_or("STALL_TIMEOUT_SECS", "300")
                .parse()
                .context("Invalid STALL_TIMEOUT_SECS")?,
        })
    }
}

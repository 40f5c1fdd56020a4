//! ddlarr - DDL indexer with a Torznab face
//!
//! Serves DDL-site search results as a Torznab feed, fabricates placeholder
//! .torrent files carrying real download URLs, watches a blackhole folder
//! to resolve and dispatch them, and exposes a qBittorrent-compatible API
//! over an internal download engine.

mod api;
mod config;
mod container;
mod db;
mod downloader;
mod engine;
mod indexer;
mod jobs;
mod resolver;
mod watcher;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::downloader::fetch::{CurlClient, FetchConfig, WgetClient};
use crate::downloader::jdownloader::{JdClient, JdConfig};
use crate::downloader::synology::{SynologyClient, SynologyConfig};
use crate::downloader::aria2::{Aria2Client, Aria2Config};
use crate::downloader::{DownloadClient, TransferRegistry};
use crate::engine::{DownloadEngine, EngineConfig};
use crate::indexer::IndexerManager;
use crate::indexer::definitions::wawa::{WawaConfig, WawaIndexer};
use crate::indexer::definitions::zone::{ZoneConfig, ZoneIndexer};
use crate::indexer::expander::TitleExpander;
use crate::indexer::fetch::{PageCache, PageFetcher};
use crate::resolver::{
    AllDebridClient, BypassClient, DebridClient, LinkResolver, RealDebridClient,
};
use crate::watcher::{FolderWatcher, WatcherConfig};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub manager: Arc<IndexerManager>,
    pub engine: Arc<DownloadEngine>,
    pub registry: Arc<TransferRegistry>,
    /// Health-check handle on the bypass service, when one is configured.
    pub bypass_health: Option<Arc<BypassClient>>,
    /// Live shim session ids.
    pub sessions: Arc<RwLock<HashSet<String>>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ddlarr=debug,tower_http=info".into()),
        )
        .init();

    info!("Starting ddlarr");

    let db = Database::connect(&config.database_path).await?;
    info!("Database connected");

    // Shared scraper infrastructure.
    let page_cache = PageCache::default();
    let expander = Arc::new(TitleExpander::new(
        config.tmdb_api_key.clone().unwrap_or_default(),
    ));
    if config.tmdb_api_key.is_none() {
        warn!("No TMDB_API_KEY set; ID-based searches fall back to the raw query");
    }

    let mut indexers: Vec<Arc<dyn indexer::SiteIndexer>> = vec![];
    for site in &config.sites {
        match site.as_str() {
            "zone" => {
                let mut zone_config = ZoneConfig {
                    max_pages: config.max_pages,
                    ..ZoneConfig::default()
                };
                if let Some(ref url) = config.zone_url {
                    zone_config.site_url = url.clone();
                }
                let fetcher = PageFetcher::new(
                    "zone",
                    zone_config.requests_per_second,
                    page_cache.clone(),
                );
                indexers.push(Arc::new(ZoneIndexer::new(
                    zone_config,
                    fetcher,
                    expander.clone(),
                )));
            }
            "wawa" => {
                let mut wawa_config = WawaConfig {
                    max_pages: config.max_pages.min(2),
                    ..WawaConfig::default()
                };
                if let Some(ref url) = config.wawa_url {
                    wawa_config.site_url = url.clone();
                }
                let fetcher = PageFetcher::new(
                    "wawa",
                    wawa_config.requests_per_second,
                    page_cache.clone(),
                );
                indexers.push(Arc::new(WawaIndexer::new(
                    wawa_config,
                    fetcher,
                    expander.clone(),
                )));
            }
            other => warn!(site = other, "Unknown site id in SITES, skipping"),
        }
    }
    if indexers.is_empty() {
        warn!("No site configured; searches will return empty feeds");
    }

    // Link resolution pipeline.
    let bypass = config.bypass_url.clone().map(|url| Arc::new(BypassClient::new(url)));
    let debrids: Vec<Arc<dyn DebridClient>> = vec![
        Arc::new(AllDebridClient::new(
            config.alldebrid_api_key.clone(),
            config.alldebrid_enabled,
        )),
        Arc::new(RealDebridClient::new(
            config.realdebrid_api_token.clone(),
            config.realdebrid_enabled,
        )),
    ];
    let resolver = Arc::new(LinkResolver::new(bypass.clone(), debrids));
    if !resolver.bypass_configured() {
        warn!("No BYPASS_URL set; protected links cannot be resolved");
    }
    if !resolver.debrid_enabled() {
        warn!("No debrid backend enabled; hoster links are dispatched as-is");
    }

    let manager = Arc::new(IndexerManager::new(
        indexers,
        resolver.clone(),
        config.resolve_at_index,
        page_cache.clone(),
    ));

    // Download-client backends for the watcher tier.
    let registry = Arc::new(TransferRegistry::new());
    let fetch_dirs = FetchConfig {
        enabled: false,
        dest_dir: PathBuf::from(&config.downloads_path),
        temp_dir: PathBuf::from(&config.incomplete_path),
    };
    let clients: Vec<Arc<dyn DownloadClient>> = vec![
        Arc::new(SynologyClient::new(SynologyConfig {
            enabled: config.synology_enabled,
            url: config.synology_url.clone(),
            username: config.synology_username.clone(),
            password: config.synology_password.clone(),
        })),
        Arc::new(JdClient::new(JdConfig {
            enabled: config.jdownloader_enabled,
            mode: config.jdownloader_mode.parse().unwrap_or_default(),
            local_url: config.jdownloader_local_url.clone(),
            email: config.jdownloader_email.clone(),
            password: config.jdownloader_password.clone(),
            device_name: config.jdownloader_device.clone(),
        })),
        Arc::new(Aria2Client::new(Aria2Config {
            enabled: config.aria2_enabled,
            url: config.aria2_url.clone(),
            secret: config.aria2_secret.clone(),
        })),
        Arc::new(WgetClient::new(
            FetchConfig {
                enabled: config.wget_enabled,
                ..fetch_dirs.clone()
            },
            registry.clone(),
        )),
        Arc::new(CurlClient::new(
            FetchConfig {
                enabled: config.curl_enabled,
                ..fetch_dirs
            },
            registry.clone(),
        )),
    ];
    if !clients.iter().any(|c| c.is_enabled()) {
        warn!("No download client enabled; watcher dispatches will fail");
    }

    // Folder watcher over the blackhole inbox.
    let folder_watcher = FolderWatcher::new(
        WatcherConfig {
            inbox: PathBuf::from(&config.blackhole_path),
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            keep_processed: config.keep_processed,
            bypass_here: !config.resolve_at_index,
        },
        resolver.clone(),
        clients,
    );
    folder_watcher.start().await?;

    // Compatibility-shim download engine.
    let engine = DownloadEngine::new(
        db.clone(),
        resolver.clone(),
        EngineConfig {
            max_concurrent: config.max_concurrent_downloads,
            temp_dir: PathBuf::from(&config.incomplete_path),
            default_save_path: PathBuf::from(&config.downloads_path),
            stall_timeout: Duration::from_secs(config.stall_timeout_secs),
        },
    );

    let _scheduler = jobs::start_scheduler(engine.clone(), page_cache).await?;

    let state = AppState {
        config: config.clone(),
        db,
        manager,
        engine,
        registry,
        bypass_health: bypass,
        sessions: Arc::new(RwLock::new(HashSet::new())),
    };

    let app = Router::new()
        .merge(api::health::router())
        .merge(api::torznab::router())
        .merge(api::torrent::router())
        .merge(api::qbittorrent::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! Torznab REST API endpoint
//!
//! Provides a Torznab-compatible API for automation clients like Sonarr and
//! Radarr.
//!
//! # Endpoints
//!
//! - `GET /api/{site}?t=caps` - Indexer capabilities
//! - `GET /api/{site}?t=search&q=...` - General search
//! - `GET /api/{site}?t=tvsearch|movie|book&q=...` - Typed searches
//! - `GET /api/{site}/{hoster}?...` - Same, pre-filtered to one hoster
//!
//! Every answer is a well-formed XML document, including failures: clients
//! parse an `<error code=.../>` document, never an HTTP-level error.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use serde::Deserialize;
use std::io::Cursor;
use tracing::{debug, warn};

use crate::AppState;
use crate::indexer::SiteIndexer;
use crate::indexer::categories::CATEGORIES;
use crate::indexer::manager::TorznabItem;
use crate::indexer::types::SearchRequest;

/// Torznab query parameters.
#[derive(Debug, Deserialize, Default)]
pub struct TorznabParams {
    pub t: Option<String>,
    pub q: Option<String>,
    pub cat: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub season: Option<String>,
    pub ep: Option<String>,
    pub year: Option<String>,
    pub imdbid: Option<String>,
    pub tmdbid: Option<String>,
    pub tvdbid: Option<String>,
    pub hoster: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/{site}", get(site_handler))
        .route("/api/{site}/{hoster}", get(site_hoster_handler))
}

async fn site_handler(
    State(state): State<AppState>,
    Path(site): Path<String>,
    Query(params): Query<TorznabParams>,
) -> Response {
    handle(state, site, None, params).await
}

async fn site_hoster_handler(
    State(state): State<AppState>,
    Path((site, hoster)): Path<(String, String)>,
    Query(params): Query<TorznabParams>,
) -> Response {
    handle(state, site, Some(hoster), params).await
}

async fn handle(
    state: AppState,
    site: String,
    path_hoster: Option<String>,
    params: TorznabParams,
) -> Response {
    let Some(indexer) = state.manager.get(&site) else {
        return error_response(201, &format!("Unknown site: {}", site));
    };

    let query_type = params.t.as_deref().unwrap_or("search");
    match query_type {
        "caps" | "capabilities" => caps_response(indexer.name(), indexer.site_link()),
        "search" | "tvsearch" | "movie" | "book" => {
            let mut hosters: Vec<String> = vec![];
            if let Some(h) = path_hoster {
                hosters.push(h);
            }
            if let Some(ref h) = params.hoster {
                hosters.extend(h.split(',').map(|s| s.trim().to_string()));
            }

            let request = SearchRequest {
                text: params.q.clone().unwrap_or_default(),
                season: params.season.as_ref().and_then(|s| s.parse().ok()),
                episode: params.ep.as_ref().and_then(|s| s.parse().ok()),
                year: params.year.as_ref().and_then(|s| s.parse().ok()),
                imdb_id: params.imdbid.as_ref().map(|id| {
                    if id.starts_with("tt") {
                        id.clone()
                    } else {
                        format!("tt{}", id)
                    }
                }),
                hoster_allow_list: hosters,
            };

            let categories: Vec<i32> = params
                .cat
                .as_ref()
                .map(|c| c.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                .unwrap_or_default();
            let limit = params
                .limit
                .as_ref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100usize)
                .min(100);
            let offset = params
                .offset
                .as_ref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0usize);

            if params.tmdbid.is_some() || params.tvdbid.is_some() {
                debug!("tmdbid/tvdbid hints ignored; only imdbid drives ID searches");
            }

            match state
                .manager
                .search(&site, &request, &categories, limit, offset)
                .await
            {
                Ok(outcome) => search_response(
                    indexer.name(),
                    indexer.site_link(),
                    &state.config.public_url,
                    offset,
                    outcome.total,
                    outcome.items,
                ),
                Err(e) => {
                    warn!(site = %site, error = %e, "Search failed");
                    error_response(900, &e.to_string())
                }
            }
        }
        _ => error_response(201, &format!("Unknown query type: {}", query_type)),
    }
}

/// Generate an error response in Torznab XML format.
fn error_response(code: i32, description: &str) -> Response {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .ok();

    let mut error = BytesStart::new("error");
    error.push_attribute(("code", code.to_string().as_str()));
    error.push_attribute(("description", description));
    writer.write_event(Event::Empty(error)).ok();

    xml_response(writer, "application/xml; charset=utf-8")
}

/// Generate the capabilities document.
fn caps_response(title: &str, link: &str) -> Response {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .ok();

    writer
        .write_event(Event::Start(BytesStart::new("caps")))
        .ok();

    let mut server = BytesStart::new("server");
    server.push_attribute(("title", title));
    server.push_attribute(("url", link));
    writer.write_event(Event::Empty(server)).ok();

    let mut limits = BytesStart::new("limits");
    limits.push_attribute(("default", "100"));
    limits.push_attribute(("max", "100"));
    writer.write_event(Event::Empty(limits)).ok();

    writer
        .write_event(Event::Start(BytesStart::new("searching")))
        .ok();

    let mut search = BytesStart::new("search");
    search.push_attribute(("available", "yes"));
    search.push_attribute(("supportedParams", "q"));
    writer.write_event(Event::Empty(search)).ok();

    let mut tv = BytesStart::new("tv-search");
    tv.push_attribute(("available", "yes"));
    tv.push_attribute(("supportedParams", "q,season,ep,imdbid"));
    writer.write_event(Event::Empty(tv)).ok();

    let mut movie = BytesStart::new("movie-search");
    movie.push_attribute(("available", "yes"));
    movie.push_attribute(("supportedParams", "q,imdbid,year"));
    writer.write_event(Event::Empty(movie)).ok();

    let mut book = BytesStart::new("book-search");
    book.push_attribute(("available", "yes"));
    book.push_attribute(("supportedParams", "q"));
    writer.write_event(Event::Empty(book)).ok();

    writer
        .write_event(Event::End(BytesEnd::new("searching")))
        .ok();

    writer
        .write_event(Event::Start(BytesStart::new("categories")))
        .ok();
    for cat in CATEGORIES {
        let mut elem = BytesStart::new("category");
        elem.push_attribute(("id", cat.id.to_string().as_str()));
        elem.push_attribute(("name", cat.name));
        writer.write_event(Event::Empty(elem)).ok();
    }
    writer
        .write_event(Event::End(BytesEnd::new("categories")))
        .ok();

    writer.write_event(Event::End(BytesEnd::new("caps"))).ok();

    xml_response(writer, "application/xml; charset=utf-8")
}

/// Generate the RSS search-results document.
fn search_response(
    title: &str,
    link: &str,
    public_url: &str,
    offset: usize,
    total: usize,
    items: Vec<TorznabItem>,
) -> Response {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .ok();

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:atom", "http://www.w3.org/2005/Atom"));
    rss.push_attribute(("xmlns:torznab", "http://torznab.com/schemas/2015/feed"));
    writer.write_event(Event::Start(rss)).ok();

    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .ok();

    write_text(&mut writer, "title", title);
    write_text(&mut writer, "description", "DDL releases indexed as Torznab");
    write_text(&mut writer, "link", link);

    let mut response = BytesStart::new("torznab:response");
    response.push_attribute(("offset", offset.to_string().as_str()));
    response.push_attribute(("total", total.to_string().as_str()));
    writer.write_event(Event::Empty(response)).ok();

    for item in items {
        write_item(&mut writer, public_url, &item);
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .ok();
    writer.write_event(Event::End(BytesEnd::new("rss"))).ok();

    xml_response(writer, "application/rss+xml; charset=utf-8")
}

fn write_item(writer: &mut Writer<Cursor<Vec<u8>>>, public_url: &str, item: &TorznabItem) {
    let release = &item.release;

    writer
        .write_event(Event::Start(BytesStart::new("item")))
        .ok();

    write_text(writer, "title", &release.title);
    write_text(writer, "guid", &item.guid);

    let pub_date = release
        .published_at
        .format("%a, %d %b %Y %H:%M:%S %z")
        .to_string();
    write_text(writer, "pubDate", &pub_date);

    // The link points back at the placeholder-container endpoint: the
    // client downloads a fake .torrent carrying the real URL.
    let size = release.size_bytes.unwrap_or(0);
    let container_link = format!(
        "{}/torrent?link={}&name={}&size={}",
        public_url.trim_end_matches('/'),
        urlencoding::encode(&release.download_link),
        urlencoding::encode(&release.title),
        size
    );
    write_text(writer, "link", &container_link);
    write_text(writer, "comments", &release.source_page_url);

    if size > 0 {
        write_text(writer, "size", &size.to_string());
    }

    let mut enclosure = BytesStart::new("enclosure");
    enclosure.push_attribute(("url", container_link.as_str()));
    if size > 0 {
        enclosure.push_attribute(("length", size.to_string().as_str()));
    }
    enclosure.push_attribute(("type", "application/x-bittorrent"));
    writer.write_event(Event::Empty(enclosure)).ok();

    write_attr(writer, "category", &item.category.to_string());
    if size > 0 {
        write_attr(writer, "size", &size.to_string());
    }
    if let Some(ref imdb) = release.imdb_id {
        write_attr(writer, "imdbid", imdb);
    }
    if let Some(season) = release.season {
        write_attr(writer, "season", &season.to_string());
    }
    if let Some(episode) = release.episode {
        write_attr(writer, "episode", &episode.to_string());
    }

    // There is no swarm behind a DDL link, but the carrying protocol
    // expects health metrics; a constant non-zero value stops clients
    // from filtering the result out as dead.
    write_attr(writer, "seeders", "99");
    write_attr(writer, "peers", "99");

    writer.write_event(Event::End(BytesEnd::new("item"))).ok();
}

fn write_text(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .ok();
    writer.write_event(Event::Text(BytesText::new(text))).ok();
    writer.write_event(Event::End(BytesEnd::new(tag))).ok();
}

fn write_attr(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &str) {
    let mut attr = BytesStart::new("torznab:attr");
    attr.push_attribute(("name", name));
    attr.push_attribute(("value", value));
    writer.write_event(Event::Empty(attr)).ok();
}

fn xml_response(writer: Writer<Cursor<Vec<u8>>>, content_type: &'static str) -> Response {
    let xml = String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default();
    (
        // Torznab returns 200 even for errors.
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        xml,
    )
        .into_response()
}

//! Placeholder-container endpoint
//!
//! `GET /torrent?link=&name=&size=` returns the binary placeholder the
//! Torznab feed's item links point at. The automation client stores the
//! bytes as a .torrent file and later drops it into the watcher's inbox.

use axum::{
    Router,
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::container;

#[derive(Debug, Deserialize)]
pub struct TorrentParams {
    pub link: String,
    pub name: Option<String>,
    pub size: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/torrent", get(torrent_handler))
}

async fn torrent_handler(Query(params): Query<TorrentParams>) -> Response {
    if params.link.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing link").into_response();
    }

    let name = params.name.as_deref().unwrap_or("download");
    let bytes = container::encode(name, &params.link, params.size);

    let filename = format!("{}.torrent", sanitize_filename::sanitize(name));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/x-bittorrent".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

//! HTTP API surface
//!
//! Three faces for three consumers: the Torznab feed for automation
//! clients, the placeholder-container endpoint their grabs land on, and a
//! qBittorrent-compatible facade over the internal download engine.

pub mod health;
pub mod qbittorrent;
pub mod torrent;
pub mod torznab;

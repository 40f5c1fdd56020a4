//! Debrid backends
//!
//! A debrid service converts a restricted hoster link into a direct,
//! full-speed download URL. Backends are interchangeable implementations of
//! one capability and are consulted in a fixed preference order; debriding
//! is best-effort everywhere, a download can proceed on the original link.

mod alldebrid;
mod realdebrid;

pub use alldebrid::AllDebridClient;
pub use realdebrid::RealDebridClient;

use anyhow::Result;
use async_trait::async_trait;

/// One debrid provider.
#[async_trait]
pub trait DebridClient: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Whether credentials are present.
    fn is_configured(&self) -> bool;

    /// Whether the provider is switched on in configuration.
    fn is_enabled(&self) -> bool;

    /// Probe the provider's API with the configured credentials.
    async fn test_connection(&self) -> Result<bool>;

    /// Unlock a single link. Returns the direct URL.
    async fn debrid_link(&self, url: &str) -> Result<String>;
}

//! Client configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `murmur.toml` in the user config directory, then `MURMUR_*` environment
//! variables (`MURMUR_SERVER_URL`, `MURMUR_PAGE_SIZE`, ...).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::state::DayBoundary;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base HTTP URL of the chat server
    pub server_url: String,
    /// Messages requested per history page
    pub page_size: usize,
    /// Pause between revealed history messages
    pub reveal_delay_ms: u64,
    /// Distance from the top of the viewport that triggers a history load
    pub scroll_threshold_px: f64,
    /// How calendar days are derived when grouping messages
    pub day_boundary: DayBoundary,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            page_size: 20,
            reveal_delay_ms: 50,
            scroll_threshold_px: 200.0,
            day_boundary: DayBoundary::Utc,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
        }
    }
}

impl ClientConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("murmur").join("murmur.toml"))
    }

    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let mut builder = config::Config::builder()
            .set_default("server_url", defaults.server_url)?
            .set_default("page_size", defaults.page_size as i64)?
            .set_default("reveal_delay_ms", defaults.reveal_delay_ms as i64)?
            .set_default("scroll_threshold_px", defaults.scroll_threshold_px)?
            .set_default("day_boundary", "utc")?
            .set_default("reconnect_initial_ms", defaults.reconnect_initial_ms as i64)?
            .set_default("reconnect_max_ms", defaults.reconnect_max_ms as i64)?;

        if let Some(path) = Self::config_path() {
            tracing::debug!("Reading optional config file {:?}", path);
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("MURMUR"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Push channel URL derived from the HTTP base URL
    pub fn live_updates_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let ws = base.replace("http://", "ws://").replace("https://", "wss://");
        format!("{}/liveUpdates", ws)
    }

    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_delay_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

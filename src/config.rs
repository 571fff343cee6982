//! Runtime configuration.
//!
//! There is no config file: every value comes from a CLI flag or its
//! environment fallback, and anything left unset uses `Config::default()`.
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::feed::MAX_FEED_SIZE;

/// Upstream feed this service re-publishes.
pub const DEFAULT_UPSTREAM_URL: &str =
    "https://cloud.google.com/feeds/google-cloud-security-bulletins.xml";

/// Default listen address when neither `--listen` nor `PORT` is given.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Default client timeout for the upstream request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unsupported upstream URL scheme {0:?}: only http and https are allowed")]
    Scheme(String),

    #[error("Invalid listen address: {0}")]
    ListenAddr(#[from] std::net::AddrParseError),
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP endpoint binds to.
    pub listen_addr: SocketAddr,

    /// Feed fetched on every request.
    pub upstream_url: Url,

    /// Timeout for the whole upstream request.
    pub request_timeout: Duration,

    /// Upper bound on the upstream response body.
    pub max_feed_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            upstream_url: Url::parse(DEFAULT_UPSTREAM_URL).expect("default upstream URL is valid"),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_feed_bytes: MAX_FEED_SIZE,
        }
    }
}

impl Config {
    /// Sets the listen address from an explicit `host:port`.
    pub fn with_listen(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.listen_addr = addr.parse()?;
        Ok(self)
    }

    /// Binds every interface on `port`, as hosting runtimes that export `PORT` expect.
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_addr = SocketAddr::from(([0, 0, 0, 0], port));
        self
    }

    pub fn with_upstream(mut self, url: &str) -> Result<Self, ConfigError> {
        self.upstream_url = parse_upstream_url(url)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_feed_bytes(mut self, max: usize) -> Self {
        self.max_feed_bytes = max;
        self
    }
}

/// Parses an absolute http(s) URL.
pub fn parse_upstream_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Scheme(other.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================

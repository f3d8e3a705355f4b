//! Client configuration.

use std::time::Duration;

use url::Url;

use crate::error::{RefreshError, RefreshResult};

/// Shortest accepted time between poll cycles.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Status refresh configuration.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between poll cycles
    pub poll_interval: Duration,
    /// Consecutive poll failures tolerated before a job is marked failed
    pub max_poll_failures: u32,
    /// Upper bound for a single status request
    pub poll_timeout: Duration,
    /// Consecutive failures logged per job before logs are suppressed
    pub max_logged_failures: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_poll_failures: 5,
            poll_timeout: Duration::from_secs(10),
            max_logged_failures: 3,
        }
    }
}

impl RefreshConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_secs(
                std::env::var("VUP_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(defaults.poll_interval.as_secs()),
            ),
            max_poll_failures: std::env::var("VUP_MAX_POLL_FAILURES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_poll_failures),
            poll_timeout: Duration::from_secs(
                std::env::var("VUP_POLL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.poll_timeout.as_secs()),
            ),
            max_logged_failures: defaults.max_logged_failures,
        }
    }

    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_max_poll_failures(mut self, max: u32) -> Self {
        self.max_poll_failures = max;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

/// Remote status API configuration.
#[derive(Debug, Clone)]
pub struct StatusApiConfig {
    /// Base URL, e.g. `https://api.example.com/v1/`
    pub base_url: Url,
    /// Bearer token
    pub token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl StatusApiConfig {
    pub fn new(base_url: &str) -> RefreshResult<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            token: None,
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        })
    }

    /// Create config from environment variables.
    pub fn from_env() -> RefreshResult<Self> {
        let base_url = std::env::var("VUP_API_BASE_URL")
            .map_err(|_| RefreshError::config("VUP_API_BASE_URL must be set"))?;

        let mut config = Self::new(&base_url)?;
        config.token = std::env::var("VUP_API_TOKEN").ok().filter(|t| !t.is_empty());
        config.timeout = Duration::from_secs(
            std::env::var("VUP_POLL_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        );
        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parse a base URL, forcing a trailing slash so relative joins keep the path.
fn parse_base_url(raw: &str) -> RefreshResult<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| RefreshError::config(format!("Invalid base URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(RefreshError::config(format!("Invalid base URL '{}'", raw)));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

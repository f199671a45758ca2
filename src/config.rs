use crate::error::ConfigError;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
/// The service caps pages at this size.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// REST root, including the `/api` suffix.
    pub base_url: String,
    pub page_size: u32,
    pub typing_throttle: Duration,
    pub typing_timeout: Duration,
    pub reconnect_step: Duration,
    pub max_reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub enable_auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 50,
            typing_throttle: dmcore::typing::DEFAULT_THROTTLE,
            typing_timeout: dmcore::typing::DEFAULT_REMOTE_TIMEOUT,
            reconnect_step: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            enable_auto_reconnect: true,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `SHAREMYSHOWS_API_URL` and `SHAREMYSHOWS_PAGE_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup("SHAREMYSHOWS_API_URL") {
            config = config.with_base_url(url)?;
        }
        if let Some(raw) = lookup("SHAREMYSHOWS_PAGE_SIZE") {
            config.page_size = raw
                .trim()
                .parse()
                .ok()
                .filter(|n| (1..=MAX_PAGE_SIZE).contains(n))
                .ok_or(ConfigError::InvalidPageSize(raw))?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(url));
        }
        self.base_url = url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Socket.IO endpoint for the push channel. It lives at the service root,
    /// not under `/api`, and takes the credential as a query parameter.
    pub fn channel_url(&self, credential: &str) -> Result<String, ConfigError> {
        let root = self.base_url.strip_suffix("/api").unwrap_or(&self.base_url);
        let ws_root = if let Some(rest) = root.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = root.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        };
        Ok(format!(
            "{ws_root}/socket.io/?EIO=4&transport=websocket&token={}",
            urlencoding::encode(credential)
        ))
    }

    /// Linear backoff: one step per failed attempt, capped.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_step
            .saturating_mul(attempt)
            .min(self.max_reconnect_delay)
    }
}

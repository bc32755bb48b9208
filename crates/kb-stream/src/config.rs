use std::time::Duration;

use reqwest::Url;

use crate::errors::ClientError;

const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Configuration for the HTTP transport and endpoint layout.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the streaming backend.
    pub base_url: String,
    /// Bound on connection setup. Body reads are deliberately unbounded; a
    /// stalled stream keeps its session open.
    pub connect_timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("kb-stream/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Creates a config pointing at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `KB_STREAM_BASE_URL` and `KB_STREAM_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();
        if let Ok(base_url) = std::env::var("KB_STREAM_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url.trim().to_string();
        }
        if let Ok(raw) = std::env::var("KB_STREAM_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ClientError::Config(format!(
                    "KB_STREAM_CONNECT_TIMEOUT_SECS must be a whole number of seconds, got `{raw}`"
                ))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        let base = self.parsed_base()?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL, got `{}`",
                self.base_url
            )));
        }
        Ok(())
    }

    fn parsed_base(&self) -> Result<Url, ClientError> {
        Url::parse(self.base_url.trim())
            .map_err(|e| ClientError::Config(format!("invalid base_url `{}`: {e}", self.base_url)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn chat_url(&self) -> String {
        self.url("/chat")
    }

    /// `/product-details/{product}` with the name as one encoded path segment.
    pub(crate) fn product_url(&self, product: &str) -> Result<String, ClientError> {
        let mut url = self.parsed_base()?;
        url.path_segments_mut()
            .map_err(|()| {
                ClientError::Config(format!("base_url `{}` cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["product-details", product]);
        Ok(url.into())
    }

    pub(crate) fn catalog_url(&self) -> String {
        self.url("/products")
    }
}

use std::time::Duration;

use serde::Deserialize;

/// `[feed]` section of the server config.
#[derive(Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_product")]
    pub product: String,
    /// Usually supplied through the environment rather than the file.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Start a supervised ingestion loop at boot.
    #[serde(default)]
    pub autostart: bool,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Longest SSE line accepted before the run is aborted.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_base_url() -> String {
    "https://api.particle.io".into()
}
fn default_product() -> String {
    "p2p-energy-v100".into()
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_max_line_length() -> usize {
    1024 * 1024
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            product: default_product(),
            access_token: None,
            autostart: false,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl FeedConfig {
    /// The configured source, if an access token is available.
    pub fn source(&self) -> Option<FeedSource> {
        let token = self.access_token.as_deref().filter(|t| !t.is_empty())?;
        Some(FeedSource {
            base_url: self.base_url.clone(),
            product: self.product.clone(),
            access_token: token.to_string(),
            max_line_length: self.max_line_length,
        })
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Everything one ingestion run needs to open the stream.
#[derive(Clone)]
pub struct FeedSource {
    pub base_url: String,
    pub product: String,
    pub access_token: String,
    pub max_line_length: usize,
}

impl FeedSource {
    /// Events endpoint without credentials; the token goes in the query.
    pub fn events_url(&self) -> String {
        format!(
            "{}/v1/products/{}/events",
            self.base_url.trim_end_matches('/'),
            self.product
        )
    }

    pub fn with_product(&self, product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("base_url", &self.base_url)
            .field("product", &self.product)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("autostart", &self.autostart)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for FeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSource")
            .field("base_url", &self.base_url)
            .field("product", &self.product)
            .field("access_token", &"***")
            .finish()
    }
}

//! Configuration loaded from `flexage.toml`.
//!
//! Every field has a default, so a missing file is not an error. The
//! `GOOGLE_API_KEY` environment variable takes precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::evaluator::DEFAULT_MODEL;
use crate::gemini::client::API_BASE_URL;

pub const DEFAULT_CONFIG_FILE: &str = "flexage.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct FlexageConfig {
    /// Gemini API key. Empty selects the simulated evaluator.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Replaces the built-in evaluation prompt.
    #[serde(default)]
    pub prompt_template: Option<PathBuf>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Extra attempts the background runner makes after a failed evaluation.
    #[serde(default)]
    pub background_retries: u32,

    /// Base delay for the runner's exponential backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Age after which a submission still awaiting its outcome is re-queued.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base_url() -> String {
    API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_stale_after_secs() -> u64 {
    900
}

impl Default for FlexageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            api_base_url: default_api_base_url(),
            prompt_template: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            background_retries: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl FlexageConfig {
    /// Load `flexage.toml` from the working directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<FlexageConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("GOOGLE_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

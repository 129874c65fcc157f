//! Configuration management for lexingest.
//!
//! Settings come from an optional TOML file plus environment overrides for
//! secrets. Every knob has a default so `lex run` works against a configured
//! source with nothing but a token in the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;
use crate::source::{RetryConfig, SourceClientConfig};

/// Environment variable holding the source API token.
pub const API_TOKEN_ENV: &str = "LEXINGEST_API_TOKEN";

fn default_base_url() -> String {
    "https://www.courtlistener.com/api/rest/v4/".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_bucket_capacity() -> u32 {
    10
}

fn default_refill_per_sec() -> f64 {
    2.0
}

fn default_stage_timeout_secs() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_index_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Token may live in the config file, but the environment wins.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_bucket_capacity")]
    pub rate_limit_capacity: u32,
    #[serde(default = "default_refill_per_sec")]
    pub rate_limit_refill_per_sec: f64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            rate_limit_capacity: default_bucket_capacity(),
            rate_limit_refill_per_sec: default_refill_per_sec(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Data directory; defaults to the platform data dir + "lexingest".
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lexingest")
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("lexingest.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub strict: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            concurrency: default_concurrency(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Bulk-index endpoint; None disables index pushes.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_index_attempts")]
    pub push_attempts: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            push_attempts: default_index_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub search: SearchSettings,
}

impl Settings {
    /// Load settings from an explicit path, or from `lexingest.toml` in the
    /// working directory when present, falling back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(p) => {
                let raw = fs::read_to_string(p)?;
                toml::from_str(&raw)?
            }
            None => {
                let candidate = Path::new("lexingest.toml");
                if candidate.exists() {
                    let raw = fs::read_to_string(candidate)?;
                    toml::from_str(&raw)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(token) = std::env::var(API_TOKEN_ENV) {
            if !token.is_empty() {
                settings.source.api_token = Some(token);
            }
        }

        Ok(settings)
    }

    pub fn source_client_config(&self) -> anyhow::Result<SourceClientConfig> {
        let api_token = self
            .source
            .api_token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no API token: set {} or source.api_token", API_TOKEN_ENV))?;

        Ok(SourceClientConfig {
            base_url: self.source.base_url.clone(),
            api_token,
            request_timeout: Duration::from_secs(self.source.request_timeout_secs),
            retry: RetryConfig {
                max_attempts: self.source.retry_attempts,
                ..RetryConfig::default()
            },
        })
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.source.rate_limit_capacity,
            refill_per_sec: self.source.rate_limit_refill_per_sec,
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.stage_timeout_secs)
    }
}

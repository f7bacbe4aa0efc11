//! DashScope configuration

use serde::Serialize;
use std::env;
use std::fmt;
use kbqa_core::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_EMBEDDING_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/embeddings/text-embedding/text-embedding";
pub const DEFAULT_CHAT_MODEL: &str = "qwen-plus-0919";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v2";

/// Configuration for the DashScope clients
#[derive(Clone, Serialize)]
pub struct DashScopeConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub api_base: String,
    pub embedding_url: String,
    pub chat_model: String,
    pub embedding_model: String,
}

impl DashScopeConfig {
    /// Create configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("DASHSCOPE_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Configuration(
                "DASHSCOPE_API_KEY environment variable not found".to_string()
            ))?;

        let config = Self {
            api_key,
            api_base: lookup("DASHSCOPE_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            embedding_url: lookup("DASHSCOPE_EMBEDDING_URL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
            chat_model: lookup("KBQA_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            embedding_model: lookup("KBQA_EMBED_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration with explicit values
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            embedding_url: DEFAULT_EMBEDDING_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Check that both endpoints are absolute http(s) URLs
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("DASHSCOPE_BASE_URL", &self.api_base), ("DASHSCOPE_EMBEDDING_URL", &self.embedding_url)] {
            let parsed = url::Url::parse(value)
                .map_err(|e| Error::Configuration(format!("{} is not a valid URL ({}): {}", name, value, e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(Error::Configuration(format!(
                    "{} must use http or https, got '{}'",
                    name,
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DashScopeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashScopeConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("embedding_url", &self.embedding_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

//! Agent configuration (TOML) and credentials (environment).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::branch::{DEFAULT_BRANCH_PREFIX, DEFAULT_SLUG_MAX_CHARS};

/// Agent configuration (TOML).
///
/// Missing fields default to values suitable for a single GitHub repository
/// driven through an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of model turns before the run is forced to finalize.
    pub max_turns: u32,

    /// Per-call timeout for the inference provider, in seconds.
    pub model_timeout_secs: u64,

    /// Wall-clock budget for a whole run, in seconds.
    pub run_timeout_secs: u64,

    /// Prefix for working branch names.
    pub branch_prefix: String,

    /// Cap on the issue-title slug appended to `branch_prefix`.
    pub branch_slug_max_chars: usize,

    pub model: ModelConfig,
    pub github: GithubConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the chat-completions API (without `/chat/completions`).
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Total attempts for a request hitting a transient failure (1 = no retry).
    pub retry_max_attempts: u32,
    /// Base delay of the exponential backoff between attempts.
    pub retry_base_delay_ms: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            request_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Repositories allowed to trigger runs (`owner/name`). Empty allows any.
    pub repositories: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            repositories: Vec::new(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 25,
            model_timeout_secs: 120,
            run_timeout_secs: 30 * 60,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            branch_slug_max_chars: DEFAULT_SLUG_MAX_CHARS,
            model: ModelConfig::default(),
            github: GithubConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if self.model_timeout_secs == 0 {
            return Err(anyhow!("model_timeout_secs must be > 0"));
        }
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(anyhow!("branch_prefix must not be empty"));
        }
        if self.branch_slug_max_chars == 0 {
            return Err(anyhow!("branch_slug_max_chars must be > 0"));
        }
        if self.model.base_url.trim().is_empty() || self.model.model.trim().is_empty() {
            return Err(anyhow!("model.base_url and model.model must be set"));
        }
        if self.github.api_base.trim().is_empty() {
            return Err(anyhow!("github.api_base must be set"));
        }
        if self.github.request_timeout_secs == 0 {
            return Err(anyhow!("github.request_timeout_secs must be > 0"));
        }
        if self.github.retry_max_attempts == 0 {
            return Err(anyhow!("github.retry_max_attempts must be > 0"));
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Secrets read from the process environment.
#[derive(Clone)]
pub struct Credentials {
    pub github_token: String,
    pub llm_token: String,
    /// Shared secret for webhook signatures; verification is skipped when unset.
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("github_token", &"<redacted>")
            .field("llm_token", &"<redacted>")
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Read `GITHUB_TOKEN`, `LLM_TOKEN` and optional `WEBHOOK_SECRET`,
    /// loading a `.env` file first when one exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow!("missing required environment variable {key}"))
        };
        Ok(Self {
            github_token: required("GITHUB_TOKEN")?,
            llm_token: required("LLM_TOKEN")?,
            webhook_secret: lookup("WEBHOOK_SECRET")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }
}

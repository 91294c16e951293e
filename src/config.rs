//! Runtime settings, read from an optional YAML file.
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! working local setup:
//!
//! ```yaml
//! database: veille.db
//! bind: 127.0.0.1:8000
//! # api_url: http://veille-api:8000   # share a remote cache instead
//! llm:
//!   base_url: http://localhost:11434
//!   model: llama3.2:3b
//!   retry: { kind: fixed, max_attempts: 3, delay: 2000 }
//! orchestrator:
//!   cap: 12
//!   concurrency: 4
//! ```
//!
//! Secrets (the search key) are better passed through the environment; see
//! [`Settings::apply_env`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::orchestrator::OrchestratorConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite file holding the cache, catalog and feedback.
    pub database: PathBuf,
    /// Address `veille serve` listens on.
    pub bind: SocketAddr,
    /// Base URL of a remote `veille serve`; when set, the cache lives there.
    pub api_url: Option<String>,
    /// Serialize concurrent identical requests so each computes once.
    pub single_flight: bool,
    /// Where scraped pages are archived; disabled when unset.
    pub archive_dir: Option<PathBuf>,
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub scrape: ScrapeSettings,
    pub orchestrator: OrchestratorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("veille.db"),
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            api_url: None,
            single_flight: true,
            archive_dir: None,
            llm: LlmSettings::default(),
            search: SearchSettings::default(),
            scrape: ScrapeSettings::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub api_key: Option<String>,
    pub engine_id: Option<String>,
    /// Override of the Custom Search endpoint, mostly for tests.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSettings {
    pub timeout_secs: u64,
    /// Timeout and retry policy of the HTTP cache store client.
    pub api_timeout_secs: u64,
    pub api_retry: RetryPolicy,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            api_timeout_secs: 10,
            api_retry: RetryPolicy::default(),
        }
    }
}

impl ScrapeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

impl Settings {
    /// Parse settings from YAML text. Empty text yields the defaults.
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load settings from `path`, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("No settings file; using defaults");
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_yaml(&text, path)?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Overlay values present in the environment.
    ///
    /// Recognized: `VEILLE_DB`, `API_URL`, `OLLAMA_URL`, `OLLAMA_MODEL`,
    /// `GOOGLE_API_KEY`, `GOOGLE_CX`.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("VEILLE_DB") {
            self.database = PathBuf::from(v);
        }
        if let Some(v) = get("API_URL") {
            self.api_url = Some(v);
        }
        if let Some(v) = get("OLLAMA_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("GOOGLE_API_KEY") {
            self.search.api_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_CX") {
            self.search.engine_id = Some(v);
        }
    }
}

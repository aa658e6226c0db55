use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::ModelPreference;

pub const CONFIG_FILE_NAME: &str = "article-pipeline.toml";

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub fetch: FetchConfig,
    pub extraction: ExtractionConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Articles processed at once, download and extraction together.
    pub max_concurrent: u32,
    pub startup_resume_delay_secs: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub haiku_model: String,
    pub sonnet_model: String,
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            startup_resume_delay_secs: 3,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/store.json".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            max_retries: 2,
            backoff_base_ms: 2000,
            timeout_secs: 60,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: "ANTHROPIC_AUTH_TOKEN".to_string(),
            max_tokens: 4096,
            haiku_model: "claude-haiku-4-5-20251001".to_string(),
            sonnet_model: "claude-sonnet-4-5-20250929".to_string(),
            timeout_secs: 120,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

impl ExtractionConfig {
    pub fn model_id(&self, preference: ModelPreference) -> &str {
        match preference {
            ModelPreference::Haiku => &self.haiku_model,
            ModelPreference::Sonnet => &self.sonnet_model,
        }
    }
}

/// Bounded retries with linear backoff: attempt `n` failing waits `n * backoff_base`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait before the attempt following `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        FetchConfig::default().retry_policy()
    }
}

pub fn validate(config: &AppConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.pipeline.max_concurrent < 1 {
        errors.push("pipeline.max_concurrent must be >= 1".to_string());
    }

    if config.store.path.trim().is_empty() {
        errors.push("store.path must not be empty".to_string());
    }

    if config.fetch.base_url.trim().is_empty() {
        errors.push("fetch.base_url must not be empty".to_string());
    }

    if config.fetch.timeout_secs == 0 {
        errors.push("fetch.timeout_secs must be >= 1".to_string());
    }

    if config.extraction.base_url.trim().is_empty() {
        errors.push("extraction.base_url must not be empty".to_string());
    }

    if config.extraction.max_tokens < 1 {
        errors.push("extraction.max_tokens must be >= 1".to_string());
    }

    for (key, model) in [
        ("extraction.haiku_model", &config.extraction.haiku_model),
        ("extraction.sonnet_model", &config.extraction.sonnet_model),
    ] {
        if model.trim().is_empty() {
            errors.push(format!("{} must not be empty", key));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Apply `SPIDER_API_URL` / `ANTHROPIC_BASE_URL` from the given lookup.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("SPIDER_API_URL").filter(|u| !u.trim().is_empty()) {
        config.fetch.base_url = url;
    }
    if let Some(url) = lookup("ANTHROPIC_BASE_URL").filter(|u| !u.trim().is_empty()) {
        config.extraction.base_url = url;
    }
}

/// Load config from an explicit path, or `{root}/article-pipeline.toml`.
///
/// A missing default file yields defaults; a missing explicit file is an error.
pub fn load_config_from(config_path: Option<&Path>, root: &Path) -> Result<AppConfig, String> {
    let (path, explicit): (PathBuf, bool) = match config_path {
        Some(p) => (p.to_path_buf(), true),
        None => (root.join(CONFIG_FILE_NAME), false),
    };

    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        toml::from_str::<AppConfig>(&contents)
            .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?
    } else if explicit {
        return Err(format!("Config file not found: {}", path.display()));
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}

pub fn load_config(root: &Path) -> Result<AppConfig, String> {
    load_config_from(None, root)
}

/// Contents written by `init`.
pub fn default_config_toml() -> String {
    let defaults = AppConfig::default();
    format!(
        r#"[pipeline]
max_concurrent = {max_concurrent}
startup_resume_delay_secs = {delay}

[store]
path = "{store_path}"

[fetch]
base_url = "{fetch_url}"        # overridden by SPIDER_API_URL
max_retries = {max_retries}
backoff_base_ms = {backoff}
timeout_secs = {fetch_timeout}

[extraction]
base_url = "{ai_url}"           # overridden by ANTHROPIC_BASE_URL
api_key_env = "{key_env}"
max_tokens = {max_tokens}
haiku_model = "{haiku}"
sonnet_model = "{sonnet}"
timeout_secs = {ai_timeout}
"#,
        max_concurrent = defaults.pipeline.max_concurrent,
        delay = defaults.pipeline.startup_resume_delay_secs,
        store_path = defaults.store.path,
        fetch_url = defaults.fetch.base_url,
        max_retries = defaults.fetch.max_retries,
        backoff = defaults.fetch.backoff_base_ms,
        fetch_timeout = defaults.fetch.timeout_secs,
        ai_url = defaults.extraction.base_url,
        key_env = defaults.extraction.api_key_env,
        max_tokens = defaults.extraction.max_tokens,
        haiku = defaults.extraction.haiku_model,
        sonnet = defaults.extraction.sonnet_model,
        ai_timeout = defaults.extraction.timeout_secs,
    )
}

//! Configuration management for sluice.
//!
//! Loads configuration from ${SLUICE_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod paths {
    //! SLUICE_HOME resolution order:
    //! 1. SLUICE_HOME environment variable (if set)
    //! 2. ~/.config/sluice (default)

    use std::path::PathBuf;

    pub fn sluice_home() -> PathBuf {
        if let Ok(home) = std::env::var("SLUICE_HOME")
            && !home.trim().is_empty()
        {
            return PathBuf::from(home);
        }

        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("sluice")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        sluice_home().join("config.toml")
    }
}

/// Where chat requests are sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Chat endpoint accepting `POST {messages, sessionId}`
    pub url: String,
    /// TCP/TLS connect timeout in seconds (0 disables)
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: Config::DEFAULT_URL.to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl EndpointConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

/// Retry/backoff policy for the stream controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    /// Upper bound of the random extra delay, as a fraction of the base delay
    pub jitter_fraction: f64,
    /// The server honours `Last-Event-ID`, so a stream that already delivered
    /// text may be resumed instead of failed.
    pub resume_mid_stream: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            jitter_fraction: 0.1,
            resume_mid_stream: false,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Token batching for UI updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub flush_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Outbound history budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Roughly 4 chars per token; the default fits a 4000 token window.
    pub max_context_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 16_000,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub context: ContextConfig,
}

/// Returns the default config template with comments.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

impl Config {
    const DEFAULT_URL: &str = "http://localhost:3000/api/chat";
    const URL_ENV: &str = "SLUICE_URL";

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Resolves the endpoint URL with precedence: explicit > env > config.
    ///
    /// # Errors
    /// Returns an error if the chosen URL is not a valid absolute URL.
    pub fn resolve_url(&self, explicit: Option<&str>) -> Result<String> {
        let from_env = std::env::var(Self::URL_ENV).ok();
        let candidates = [explicit, from_env.as_deref(), Some(self.endpoint.url.as_str())];

        let chosen = candidates
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|url| !url.is_empty())
            .unwrap_or(Self::DEFAULT_URL);

        url::Url::parse(chosen).with_context(|| format!("Invalid endpoint URL: {chosen}"))?;
        Ok(chosen.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();

        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.batch.flush_interval(), Duration::from_millis(50));
        assert_eq!(config.context.max_context_chars, 16_000);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[retry]\nmax_retries = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert!((config.retry.backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.endpoint.url, "http://localhost:3000/api/chat");
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[retry\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_init_writes_template_that_parses_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::init(&path).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.batch, BatchConfig::default());

        assert!(Config::init(&path).is_err());
    }

    #[test]
    fn test_resolve_url_prefers_explicit_and_validates() {
        let config = Config::default();
        assert_eq!(
            config.resolve_url(Some("http://example.test/chat")).unwrap(),
            "http://example.test/chat"
        );
        assert!(config.resolve_url(Some("not a url")).is_err());
    }
}

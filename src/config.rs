//! Application configuration: a TOML file with per-field defaults, plus
//! environment overrides. Secrets are never read from the file; the API key
//! comes from the environment variable named by `backend.api_key_env`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::translate::batch::{BatchRequestBuilder, SizeUnit};

/// Overrides `cache.path` when set.
pub const CACHE_PATH_ENV: &str = "LINGUAL_CACHE_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub backend: BackendConfig,
    pub batching: BatchingConfig,
    pub run: RunConfig,
}

/// Persistent cache location and I/O bound.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
    /// How long a cache operation waits on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lingual-cache.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Chat-completions backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Upper bound on completion tokens per request.
    pub max_tokens: u32,
    /// Per-HTTP-request timeout.
    pub timeout_secs: u64,
    /// Minimum spacing between requests.
    pub min_interval_ms: u64,
    pub api_key_env: String,
    pub max_rate_limit_retries: u32,
    pub max_server_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 90,
            min_interval_ms: 100,
            api_key_env: "LINGUAL_API_KEY".into(),
            max_rate_limit_retries: 3,
            max_server_retries: 2,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingEnv(self.api_key_env.clone())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub max_units: usize,
    pub unit: SizeUnit,
    pub prompt_overhead_units: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_units: 1_500,
            unit: SizeUnit::Words,
            prompt_overhead_units: 24,
        }
    }
}

impl BatchingConfig {
    pub fn builder(&self) -> BatchRequestBuilder {
        BatchRequestBuilder::new(self.max_units)
            .with_unit(self.unit)
            .with_overhead(self.prompt_overhead_units)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hard bound on one backend batch call, retries included.
    pub request_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
        }
    }
}

impl RunConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AppConfig {
    /// Parse and validate a TOML document. `origin` only labels errors.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load `path` if given, otherwise defaults; then apply environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        if let Ok(cache_path) = std::env::var(CACHE_PATH_ENV) {
            if !cache_path.trim().is_empty() {
                config.cache.path = PathBuf::from(cache_path);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.path.as_os_str().is_empty() {
            return Err(invalid("cache.path", "must not be empty"));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(invalid("backend.base_url", "must not be empty"));
        }
        if self.backend.model.trim().is_empty() {
            return Err(invalid("backend.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(invalid(
                "backend.temperature",
                format!("{} is outside 0.0..=2.0", self.backend.temperature),
            ));
        }
        if self.backend.max_tokens == 0 {
            return Err(invalid("backend.max_tokens", "must be greater than zero"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(invalid("backend.timeout_secs", "must be greater than zero"));
        }
        if self.batching.max_units == 0 {
            return Err(invalid("batching.max_units", "must be greater than zero"));
        }
        if self.run.request_timeout_secs == 0 {
            return Err(invalid("run.request_timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml_str("", "test").unwrap();
        assert_eq!(config.cache.path, PathBuf::from("lingual-cache.db"));
        assert_eq!(config.backend.timeout_secs, 90);
        assert_eq!(config.batching.unit, SizeUnit::Words);
        assert_eq!(config.run.request_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [cache]
            path = "/var/lib/lingual/cache.db"

            [backend]
            model = "gpt-4o"
            temperature = 0.0

            [batching]
            max_units = 200
            unit = "chars"
            "#,
            "test",
        )
        .unwrap();

        assert_eq!(config.cache.path, PathBuf::from("/var/lib/lingual/cache.db"));
        assert_eq!(config.cache.busy_timeout_ms, 5_000);
        assert_eq!(config.backend.model, "gpt-4o");
        assert_eq!(config.backend.api_key_env, "LINGUAL_API_KEY");
        assert_eq!(config.batching.max_units, 200);
        assert_eq!(config.batching.unit, SizeUnit::Chars);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = AppConfig::from_toml_str("[batching]\nmax_units = 0", "test").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "batching.max_units", .. }));

        let err = AppConfig::from_toml_str("[backend]\ntemperature = 3.5", "test").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "backend.temperature", .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[cache\npath=", "broken.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "broken.toml"));
    }

    #[test]
    fn missing_api_key_env_is_reported_by_name() {
        let backend = BackendConfig {
            api_key_env: "LINGUAL_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..BackendConfig::default()
        };
        assert_eq!(
            backend.api_key(),
            Err(ConfigError::MissingEnv("LINGUAL_TEST_KEY_THAT_IS_NEVER_SET".into()))
        );
    }
}

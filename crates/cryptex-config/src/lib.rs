use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use cryptex_core::{Pattern, PatternDefinition, builtin_patterns};
use cryptex_engine::{CacheConfig, EnforcementMode, EngineConfig, TemporalIsolationEngine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Prefix for environment overrides, e.g. `CRYPTEX_CACHE_SIZE`
pub const ENV_PREFIX: &str = "CRYPTEX";

/// Engine configuration as stored in `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// How configured patterns combine with the built-ins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    #[default]
    Extend,
    Replace,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub mode: PatternMode,

    #[serde(default)]
    pub patterns: Vec<PatternDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enforcement_mode: EnforcementMode,

    /// Seconds a context stays resolvable
    #[serde(default = "default_max_placeholder_age")]
    pub max_placeholder_age: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    #[serde(default = "default_sanitization_timeout_ms")]
    pub sanitization_timeout_ms: u64,

    #[serde(default = "default_resolution_timeout_ms")]
    pub resolution_timeout_ms: u64,

    #[serde(default = "default_max_data_size")]
    pub max_data_size: usize,

    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enforcement_mode: EnforcementMode::default(),
            max_placeholder_age: default_max_placeholder_age(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            sanitization_timeout_ms: default_sanitization_timeout_ms(),
            resolution_timeout_ms: default_resolution_timeout_ms(),
            max_data_size: default_max_data_size(),
            max_string_length: default_max_string_length(),
        }
    }
}

fn default_max_placeholder_age() -> u64 {
    3600
}

fn default_cache_size() -> usize {
    1000
}

fn default_sanitization_timeout_ms() -> u64 {
    5
}

fn default_resolution_timeout_ms() -> u64 {
    10
}

fn default_max_data_size() -> usize {
    cryptex_engine::DEFAULT_MAX_DATA_SIZE
}

fn default_max_string_length() -> usize {
    cryptex_engine::DEFAULT_MAX_STRING_LENGTH
}

impl Config {
    /// Load config from default location or create default if not found
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();

        let mut config = if path.exists() {
            Self::from_path(&path)?
        } else {
            // Create default config file
            let config = Config::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&path, content)?;
            info!(path = %path.display(), "Wrote default config");
            config
        };

        config.apply_env(ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file; environment overrides are not applied
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get config file path
    pub fn config_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "cryptex", "cryptex") {
            dirs.config_dir().join("config.toml")
        } else {
            PathBuf::from("~/.cryptex/config.toml")
        }
    }

    /// Apply `<PREFIX>_*` overrides from the process environment
    pub fn apply_env(&mut self, prefix: &str) -> anyhow::Result<()> {
        self.apply_env_with(prefix, |key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_env_with<F>(&mut self, prefix: &str, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}_{}", prefix, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = var("CACHE_SIZE") {
            self.performance.cache_size = parse_var(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_PLACEHOLDER_AGE") {
            self.security.max_placeholder_age = parse_var(&key, &value)?;
        }
        if let Some((key, value)) = var("SANITIZATION_TIMEOUT_MS") {
            self.performance.sanitization_timeout_ms = parse_var(&key, &value)?;
        }
        if let Some((key, value)) = var("RESOLUTION_TIMEOUT_MS") {
            self.performance.resolution_timeout_ms = parse_var(&key, &value)?;
        }
        if let Some((key, value)) = var("ENFORCEMENT_MODE") {
            self.security.enforcement_mode = match value.trim().to_ascii_lowercase().as_str() {
                "strict" => EnforcementMode::Strict,
                "permissive" => EnforcementMode::Permissive,
                other => bail!("{} must be 'strict' or 'permissive', got '{}'", key, other),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.performance.cache_size == 0 {
            bail!("performance.cache_size must be at least 1");
        }
        if self.performance.sanitization_timeout_ms == 0
            || self.performance.resolution_timeout_ms == 0
        {
            bail!("performance timeouts must be at least 1ms");
        }
        if self.security.max_placeholder_age == 0 {
            bail!("security.max_placeholder_age must be at least 1 second");
        }
        if self.performance.max_string_length > self.performance.max_data_size {
            bail!("performance.max_string_length cannot exceed performance.max_data_size");
        }
        for def in &self.secrets.patterns {
            Pattern::from_definition(def)?;
        }
        Ok(())
    }

    /// Seed patterns: built-ins first unless replaced, then configured ones
    pub fn patterns(&self) -> anyhow::Result<Vec<Pattern>> {
        let mut patterns = match self.secrets.mode {
            PatternMode::Extend => builtin_patterns(),
            PatternMode::Replace => Vec::new(),
        };
        for def in &self.secrets.patterns {
            patterns.push(Pattern::from_definition(def)?);
        }
        Ok(patterns)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache: CacheConfig {
                max_size: self.performance.cache_size,
                max_age: Duration::from_secs(self.security.max_placeholder_age),
            },
            sanitization_threshold: Duration::from_millis(self.performance.sanitization_timeout_ms),
            resolution_threshold: Duration::from_millis(self.performance.resolution_timeout_ms),
            max_data_size: self.performance.max_data_size,
            max_string_length: self.performance.max_string_length,
            enforcement: self.security.enforcement_mode,
        }
    }

    /// Engine over a private registry seeded from this config
    pub fn build_engine(&self) -> anyhow::Result<TemporalIsolationEngine> {
        let patterns = self.patterns()?;
        info!(
            patterns = patterns.len(),
            mode = ?self.secrets.mode,
            "Building engine from config"
        );
        Ok(TemporalIsolationEngine::with_patterns(self.engine_config(), patterns)?)
    }
}

fn parse_var<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: '{}'", key, value))
}

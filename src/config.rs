use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::Namespace;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Per-namespace switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry lifetime in seconds; 0 disables time-based expiry
    pub ttl_seconds: u64,
}

impl NamespaceConfig {
    fn enabled_with_ttl(ttl_seconds: u64) -> Self {
        Self {
            enabled: true,
            ttl_seconds,
        }
    }
}

/// Configuration for the two-tier cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fetched pages and web search results (default: 24h)
    #[serde(default = "default_url")]
    pub url: NamespaceConfig,

    /// Complete LLM responses (default: 1h)
    #[serde(default = "default_llm")]
    pub llm: NamespaceConfig,

    /// Assembled system prompts (default: 1h)
    #[serde(default = "default_prompt")]
    pub prompt: NamespaceConfig,

    /// Translations (default: 7 days)
    #[serde(default = "default_translate")]
    pub translate: NamespaceConfig,

    /// Tool results (default: 1h)
    #[serde(default = "default_tool")]
    pub tool: NamespaceConfig,

    /// Memory tier capacity per namespace (default: 100)
    #[serde(default = "default_max_memory_items")]
    pub max_memory_items: usize,

    /// Disk tier ceiling per namespace in MiB (default: 5 GiB)
    #[serde(default = "default_max_disk_size_mb")]
    pub max_disk_size_mb: u64,

    /// Root directory holding one subdirectory per namespace
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Seconds between background cleanup passes (default: 1h)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_url() -> NamespaceConfig {
    NamespaceConfig::enabled_with_ttl(24 * 60 * 60)
}

fn default_llm() -> NamespaceConfig {
    NamespaceConfig::enabled_with_ttl(60 * 60)
}

fn default_prompt() -> NamespaceConfig {
    NamespaceConfig::enabled_with_ttl(60 * 60)
}

fn default_translate() -> NamespaceConfig {
    NamespaceConfig::enabled_with_ttl(7 * 24 * 60 * 60)
}

fn default_tool() -> NamespaceConfig {
    NamespaceConfig::enabled_with_ttl(60 * 60)
}

fn default_max_memory_items() -> usize {
    100
}

fn default_max_disk_size_mb() -> u64 {
    5 * 1024
}

fn default_cache_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("worker-cache")
        .join("cache")
}

fn default_cleanup_interval() -> u64 {
    60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            llm: default_llm(),
            prompt: default_prompt(),
            translate: default_translate(),
            tool: default_tool(),
            max_memory_items: default_max_memory_items(),
            max_disk_size_mb: default_max_disk_size_mb(),
            cache_dir: default_cache_dir(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl CacheConfig {
    pub fn namespace(&self, namespace: Namespace) -> &NamespaceConfig {
        match namespace {
            Namespace::Url => &self.url,
            Namespace::Llm => &self.llm,
            Namespace::Prompt => &self.prompt,
            Namespace::Translate => &self.translate,
            Namespace::Tool => &self.tool,
        }
    }

    pub fn namespace_mut(&mut self, namespace: Namespace) -> &mut NamespaceConfig {
        match namespace {
            Namespace::Url => &mut self.url,
            Namespace::Llm => &mut self.llm,
            Namespace::Prompt => &mut self.prompt,
            Namespace::Translate => &mut self.translate,
            Namespace::Tool => &mut self.tool,
        }
    }

    pub fn max_disk_bytes(&self) -> u64 {
        self.max_disk_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.cache_dir.join(namespace.as_str())
    }

    /// Reject values that would leave the cache in an inconsistent state
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_memory_items == 0 {
            return Err(ConfigError::invalid(
                "CACHE_MAX_MEMORY_ITEMS",
                self.max_memory_items,
                "must be at least 1",
            ));
        }
        if self.max_disk_size_mb == 0 {
            return Err(ConfigError::invalid(
                "CACHE_MAX_DISK_SIZE_MB",
                self.max_disk_size_mb,
                "must be at least 1",
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "CACHE_CLEANUP_INTERVAL",
                self.cleanup_interval_secs,
                "must be at least 1 second",
            ));
        }
        // Durations beyond this overflow timestamp arithmetic
        const MAX_TTL: u64 = 100 * 365 * 24 * 60 * 60;
        for namespace in Namespace::ALL {
            let ttl = self.namespace(namespace).ttl_seconds;
            if ttl > MAX_TTL {
                return Err(ConfigError::invalid(
                    &ttl_var(namespace),
                    ttl,
                    "must not exceed 100 years",
                ));
            }
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("CACHE_DIR", "", "must not be empty"));
        }
        Ok(())
    }

    /// Apply environment overrides using `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for namespace in Namespace::ALL {
            let enable_var = enable_var(namespace);
            if let Some(raw) = lookup(&enable_var) {
                self.namespace_mut(namespace).enabled = parse_bool(&enable_var, &raw)?;
            }
            let ttl_var = ttl_var(namespace);
            if let Some(raw) = lookup(&ttl_var) {
                self.namespace_mut(namespace).ttl_seconds = parse_number(&ttl_var, &raw)?;
            }
        }
        if let Some(raw) = lookup("CACHE_MAX_MEMORY_ITEMS") {
            self.max_memory_items = parse_number("CACHE_MAX_MEMORY_ITEMS", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_MAX_DISK_SIZE_MB") {
            self.max_disk_size_mb = parse_number("CACHE_MAX_DISK_SIZE_MB", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_CLEANUP_INTERVAL") {
            self.cleanup_interval_secs = parse_number("CACHE_CLEANUP_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_DIR") {
            self.cache_dir = PathBuf::from(raw.trim());
        }
        Ok(())
    }
}

fn enable_var(namespace: Namespace) -> String {
    format!("ENABLE_{}_CACHE", namespace.as_str().to_uppercase())
}

fn ttl_var(namespace: Namespace) -> String {
    format!("{}_CACHE_TTL", namespace.as_str().to_uppercase())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(name, raw, "expected true or false")),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, raw, "expected a non-negative integer"))
}

impl Config {
    /// Load the config file (if any), apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path, |name| std::env::var(name).ok())
    }

    pub fn load_from<F>(config_path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config.cache.apply_env(lookup)?;
        config.cache.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;
        Ok(config_dir.join("worker-cache").join("config.toml"))
    }
}

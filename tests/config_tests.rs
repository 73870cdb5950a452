use anyhow::Result;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;
use worker_cache::cache::Namespace;
use worker_cache::config::{CacheConfig, Config};

const CACHE_VARS: &[&str] = &[
    "ENABLE_URL_CACHE",
    "ENABLE_LLM_CACHE",
    "ENABLE_PROMPT_CACHE",
    "ENABLE_TRANSLATE_CACHE",
    "ENABLE_TOOL_CACHE",
    "URL_CACHE_TTL",
    "LLM_CACHE_TTL",
    "PROMPT_CACHE_TTL",
    "TRANSLATE_CACHE_TTL",
    "TOOL_CACHE_TTL",
    "CACHE_MAX_MEMORY_ITEMS",
    "CACHE_MAX_DISK_SIZE_MB",
    "CACHE_DIR",
    "CACHE_CLEANUP_INTERVAL",
];

/// Helper to clear all cache environment variables
fn clear_cache_env_vars() {
    for var in CACHE_VARS {
        std::env::remove_var(var);
    }
}

fn load(path: &std::path::Path) -> Result<Config> {
    Config::load_from(path, |name| std::env::var(name).ok())
}

#[test]
#[serial]
fn test_load_without_file_uses_defaults() -> Result<()> {
    clear_cache_env_vars();
    let temp_dir = TempDir::new()?;

    let config = load(&temp_dir.path().join("missing.toml"))?;
    assert_eq!(config.cache, CacheConfig::default());
    Ok(())
}

#[test]
#[serial]
fn test_environment_overrides_file() -> Result<()> {
    clear_cache_env_vars();
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[cache]
max_memory_items = 50
cleanup_interval_secs = 600

[cache.translate]
enabled = false
ttl_seconds = 10
"#,
    )?;

    std::env::set_var("CACHE_MAX_MEMORY_ITEMS", "25");
    std::env::set_var("ENABLE_TRANSLATE_CACHE", "true");
    std::env::set_var("TOOL_CACHE_TTL", "0");
    let config = load(&config_path);
    clear_cache_env_vars();
    let config = config?;

    assert_eq!(config.cache.max_memory_items, 25);
    assert_eq!(config.cache.cleanup_interval_secs, 600);
    assert!(config.cache.translate.enabled);
    assert_eq!(config.cache.translate.ttl_seconds, 10);
    assert_eq!(config.cache.tool.ttl_seconds, 0);
    // Sections missing from the file keep their defaults
    assert_eq!(config.cache.url.ttl_seconds, 86400);
    Ok(())
}

#[test]
#[serial]
fn test_invalid_environment_fails_load() -> Result<()> {
    clear_cache_env_vars();
    let temp_dir = TempDir::new()?;

    std::env::set_var("CACHE_CLEANUP_INTERVAL", "0");
    let result = load(&temp_dir.path().join("config.toml"));
    clear_cache_env_vars();

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("CACHE_CLEANUP_INTERVAL"));
    Ok(())
}

#[test]
#[serial]
fn test_save_then_load() -> Result<()> {
    clear_cache_env_vars();
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.cache.cache_dir = temp_dir.path().join("cache");
    config.cache.namespace_mut(Namespace::Llm).enabled = false;
    config.save_to(&config_path)?;

    let loaded = load(&config_path)?;
    assert_eq!(loaded.cache, config.cache);
    assert!(!loaded.cache.namespace(Namespace::Llm).enabled);
    Ok(())
}

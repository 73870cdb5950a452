//! Per-namespace composition of the memory and disk tiers
//!
//! [`CacheRegistry`] is built once at startup from [`CacheConfig`] and shared
//! as `Arc<CacheRegistry>` with everything that caches: route handlers, the
//! LLM runner decorator and tool wrappers.
//!
//! Reads go L1 -> L2 (promoting hits into L1) and writes go to both tiers.
//! Tier failures are logged and surface to callers as a plain miss.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::disk::{CleanupReport, DiskTier};
use super::entry::{CacheEntry, CacheValue, Namespace, PromptRecord};
use super::key::{KeyCodec, WorkspaceFingerprint};
use super::memory::{short, MemoryTier};
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult, Lookup};

/// Which namespaces an admin operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    All,
    One(Namespace),
}

impl ClearTarget {
    pub fn namespaces(&self) -> Vec<Namespace> {
        match self {
            ClearTarget::All => Namespace::ALL.to_vec(),
            ClearTarget::One(namespace) => vec![*namespace],
        }
    }
}

impl FromStr for ClearTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(ClearTarget::All)
        } else {
            s.parse().map(ClearTarget::One)
        }
    }
}

impl fmt::Display for ClearTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearTarget::All => f.write_str("all"),
            ClearTarget::One(namespace) => write!(f, "{}", namespace),
        }
    }
}

/// Statistics for one namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub memory_entries: usize,
}

impl NamespaceStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsTotals {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsReport {
    pub namespaces: BTreeMap<Namespace, NamespaceStats>,
    pub totals: StatsTotals,
}

/// Entries removed from each tier by a clear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearCounts {
    pub memory: usize,
    pub disk: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearReport {
    pub cleared: BTreeMap<Namespace, ClearCounts>,
    /// Entries removed from durable storage across all targeted namespaces
    pub total_removed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupSummary {
    pub namespaces: BTreeMap<Namespace, CleanupReport>,
    pub errors: BTreeMap<Namespace, String>,
}

impl CleanupSummary {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// L1 + L2 for a single namespace
pub struct NamespaceCache {
    namespace: Namespace,
    enabled: bool,
    ttl_seconds: u64,
    memory: MemoryTier,
    disk: Arc<DiskTier>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NamespaceCache {
    pub fn new(
        namespace: Namespace,
        enabled: bool,
        ttl_seconds: u64,
        memory: MemoryTier,
        disk: DiskTier,
    ) -> Self {
        Self {
            namespace,
            enabled,
            ttl_seconds,
            memory,
            disk: Arc::new(disk),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(value) = self.memory.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(namespace = %self.namespace, key = %short(key), "cache hit (memory)");
            return Some(value);
        }

        let seen_generation = self.memory.generation();
        let disk = Arc::clone(&self.disk);
        let owned_key = key.to_string();
        let lookup: Lookup<CacheEntry> =
            flatten_join(tokio::task::spawn_blocking(move || disk.get_entry(&owned_key)).await)
                .into();

        match lookup.into_option(self.namespace) {
            Some(entry) => {
                let value = entry.value.clone();
                let promoted = self.memory.promote(entry, seen_generation);
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(namespace = %self.namespace, key = %short(key), promoted, "cache hit (disk)");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(namespace = %self.namespace, key = %short(key), "cache miss");
                None
            }
        }
    }

    /// Write-through to both tiers. A disk failure still leaves the value
    /// in memory.
    pub async fn put(&self, key: &str, value: CacheValue) {
        if !self.enabled {
            return;
        }
        if !value.belongs_to(self.namespace) {
            tracing::warn!(
                namespace = %self.namespace,
                found = %value.namespace(),
                "refusing to cache value of another namespace"
            );
            return;
        }

        let entry = CacheEntry::new(key, value, self.ttl_seconds);
        self.memory.put_entry(entry.clone());

        let disk = Arc::clone(&self.disk);
        let result = flatten_join(tokio::task::spawn_blocking(move || disk.store(&entry)).await);
        if let Err(e) = result {
            tracing::warn!(namespace = %self.namespace, key = %short(key), error = %e, "disk cache write failed");
        }
    }

    /// Removes the disk copy before the memory copy, so a concurrent disk
    /// read is always followed by a generation bump and never promoted.
    pub async fn invalidate(&self, key: &str) -> bool {
        let disk = Arc::clone(&self.disk);
        let owned_key = key.to_string();
        let on_disk = match flatten_join(tokio::task::spawn_blocking(move || disk.delete(&owned_key)).await) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "disk cache delete failed");
                false
            }
        };
        let in_memory = self.memory.delete(key);
        in_memory || on_disk
    }

    pub async fn clear(&self) -> CacheResult<ClearCounts> {
        let disk_tier = Arc::clone(&self.disk);
        let disk = flatten_join(tokio::task::spawn_blocking(move || disk_tier.clear()).await);
        let memory = self.memory.clear();
        Ok(ClearCounts { memory, disk: disk? })
    }

    pub async fn stats(&self) -> NamespaceStats {
        let disk = Arc::clone(&self.disk);
        let usage = flatten_join(
            tokio::task::spawn_blocking(move || -> CacheResult<(usize, u64)> {
                Ok((disk.len()?, disk.size_bytes()?))
            })
            .await,
        );
        let (entry_count, total_size_bytes) = usage.unwrap_or_else(|e| {
            tracing::warn!(namespace = %self.namespace, error = %e, "failed to measure disk cache");
            (0, 0)
        });

        NamespaceStats {
            enabled: self.enabled,
            ttl_seconds: self.ttl_seconds,
            entry_count,
            total_size_bytes,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            memory_entries: self.memory.len(),
        }
    }

    pub async fn cleanup(&self) -> CacheResult<CleanupReport> {
        let memory_expired = self.memory.cleanup_expired();
        let disk = Arc::clone(&self.disk);
        let report = flatten_join(tokio::task::spawn_blocking(move || disk.cleanup()).await)?;
        if memory_expired > 0 {
            tracing::debug!(namespace = %self.namespace, memory_expired, "memory tier expired entries dropped");
        }
        Ok(report)
    }
}

/// All namespaces, constructed once per process
pub struct CacheRegistry {
    caches: Vec<Arc<NamespaceCache>>,
}

impl CacheRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        let caches = Namespace::ALL
            .iter()
            .map(|&namespace| {
                let settings = config.namespace(namespace);
                Arc::new(NamespaceCache::new(
                    namespace,
                    settings.enabled,
                    settings.ttl_seconds,
                    MemoryTier::new(config.max_memory_items),
                    DiskTier::new(
                        namespace,
                        config.namespace_dir(namespace),
                        config.max_disk_bytes(),
                    ),
                ))
            })
            .collect();

        tracing::info!(
            dir = %config.cache_dir.display(),
            max_memory_items = config.max_memory_items,
            max_disk_size_mb = config.max_disk_size_mb,
            "cache registry initialized"
        );

        Self { caches }
    }

    /// The cache for `namespace`; every namespace always exists
    pub fn namespace(&self, namespace: Namespace) -> &Arc<NamespaceCache> {
        // `caches` is built from Namespace::ALL, whose order matches the
        // enum discriminants.
        &self.caches[namespace as usize]
    }

    pub fn enabled_namespaces(&self) -> Vec<Namespace> {
        self.caches
            .iter()
            .filter(|cache| cache.is_enabled())
            .map(|cache| cache.namespace())
            .collect()
    }

    pub async fn get(&self, namespace: Namespace, key: &str) -> Option<CacheValue> {
        self.namespace(namespace).get(key).await
    }

    pub async fn put(&self, namespace: Namespace, key: &str, value: CacheValue) {
        self.namespace(namespace).put(key, value).await
    }

    pub async fn invalidate(&self, namespace: Namespace, key: &str) -> bool {
        self.namespace(namespace).invalidate(key).await
    }

    /// The system prompt cached for `fingerprint`, built and stored on a miss
    pub async fn prompt_or_build<F>(&self, fingerprint: &WorkspaceFingerprint, build: F) -> String
    where
        F: FnOnce() -> String,
    {
        let key = KeyCodec::prompt_key(fingerprint);
        if let Some(record) = self
            .get(Namespace::Prompt, &key)
            .await
            .and_then(CacheValue::into_prompt)
        {
            return record.prompt;
        }

        let prompt = build();
        self.put(
            Namespace::Prompt,
            &key,
            CacheValue::Prompt(PromptRecord {
                prompt: prompt.clone(),
            }),
        )
        .await;
        prompt
    }

    pub async fn clear(&self, target: ClearTarget) -> CacheResult<ClearReport> {
        let mut report = ClearReport::default();
        for namespace in target.namespaces() {
            let counts = self.namespace(namespace).clear().await?;
            report.total_removed += counts.disk;
            report.cleared.insert(namespace, counts);
        }
        tracing::info!(%target, removed = report.total_removed, "cache cleared");
        Ok(report)
    }

    pub async fn stats(&self, target: ClearTarget) -> StatsReport {
        let mut report = StatsReport::default();
        for namespace in target.namespaces() {
            let stats = self.namespace(namespace).stats().await;
            report.totals.entry_count += stats.entry_count;
            report.totals.total_size_bytes += stats.total_size_bytes;
            report.totals.hit_count += stats.hit_count;
            report.totals.miss_count += stats.miss_count;
            report.namespaces.insert(namespace, stats);
        }
        report
    }

    /// Clean every enabled namespace; one failing namespace does not stop
    /// the others.
    pub async fn cleanup(&self) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        for namespace in self.enabled_namespaces() {
            match self.namespace(namespace).cleanup().await {
                Ok(report) => {
                    if report.expired_count > 0 || report.evicted_count > 0 {
                        tracing::info!(
                            %namespace,
                            expired = report.expired_count,
                            evicted = report.evicted_count,
                            "cache cleanup removed entries"
                        );
                    }
                    summary.namespaces.insert(namespace, report);
                }
                Err(e) => {
                    tracing::warn!(%namespace, error = %e, "cache cleanup failed");
                    summary.errors.insert(namespace, e.to_string());
                }
            }
        }
        summary
    }
}

fn flatten_join<T>(
    joined: Result<CacheResult<T>, tokio::task::JoinError>,
) -> CacheResult<T> {
    joined.map_err(|e| CacheError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::ToolRecord;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            max_memory_items: 4,
            ..Default::default()
        }
    }

    fn tool_value(output: &str) -> CacheValue {
        CacheValue::Tool(ToolRecord {
            tool: "bash".to_string(),
            output: output.to_string(),
        })
    }

    #[tokio::test]
    async fn test_write_through_and_promotion() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new(&config(&dir));
        let key = KeyCodec::tool_key("bash", &serde_json::json!({"cmd": "ls"}));

        registry.put(Namespace::Tool, &key, tool_value("a.txt")).await;

        let cache = registry.namespace(Namespace::Tool);
        assert!(cache.memory().contains(&key));
        assert!(cache.disk().entry_path(&key).exists());

        // Force an L2-only hit
        cache.memory().clear();
        assert!(!cache.memory().contains(&key));

        let value = registry.get(Namespace::Tool, &key).await;
        assert_eq!(value, Some(tool_value("a.txt")));
        assert!(cache.memory().contains(&key), "disk hit should promote into memory");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disk_read_never_shadows_concurrent_put() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(CacheRegistry::new(&config(&dir)));
        let key = "racing-key";

        for round in 0..200 {
            let old = tool_value(&format!("old-{}", round));
            let new = tool_value(&format!("new-{}", round));
            registry.put(Namespace::Tool, key, old).await;
            registry.namespace(Namespace::Tool).memory().clear();

            let reader = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get(Namespace::Tool, key).await })
            };
            registry.put(Namespace::Tool, key, new.clone()).await;
            reader.await.unwrap();

            assert_eq!(
                registry.get(Namespace::Tool, key).await,
                Some(new),
                "round {} served a stale value",
                round
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disk_read_never_revives_invalidated_key() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(CacheRegistry::new(&config(&dir)));
        let key = "short-lived";

        for round in 0..200 {
            registry.put(Namespace::Tool, key, tool_value("v")).await;
            registry.namespace(Namespace::Tool).memory().clear();

            let reader = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get(Namespace::Tool, key).await })
            };
            registry.invalidate(Namespace::Tool, key).await;
            reader.await.unwrap();

            assert!(
                registry.get(Namespace::Tool, key).await.is_none(),
                "round {} revived an invalidated key",
                round
            );
        }
    }

    #[tokio::test]
    async fn test_hit_and_miss_counters() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new(&config(&dir));

        assert!(registry.get(Namespace::Tool, "missing").await.is_none());
        registry.put(Namespace::Tool, "present", tool_value("x")).await;
        assert!(registry.get(Namespace::Tool, "present").await.is_some());

        let stats = registry.stats(ClearTarget::One(Namespace::Tool)).await;
        let tool = &stats.namespaces[&Namespace::Tool];
        assert_eq!(tool.hit_count, 1);
        assert_eq!(tool.miss_count, 1);
        assert_eq!(tool.entry_count, 1);
        assert!(tool.total_size_bytes > 0);
        assert_eq!(stats.totals.hit_count, 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new(&config(&dir));

        registry.put(Namespace::Tool, "same-key", tool_value("tool")).await;
        assert!(registry.get(Namespace::Prompt, "same-key").await.is_none());
        assert!(registry.get(Namespace::Tool, "same-key").await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_namespace_is_transparent() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.tool.enabled = false;
        let registry = CacheRegistry::new(&config);

        registry.put(Namespace::Tool, "k", tool_value("x")).await;
        assert!(registry.get(Namespace::Tool, "k").await.is_none());
        assert!(!registry.enabled_namespaces().contains(&Namespace::Tool));
        assert_eq!(registry.namespace(Namespace::Tool).disk().len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_value_is_not_stored() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new(&config(&dir));
        let prompt = CacheValue::Prompt(PromptRecord {
            prompt: "p".to_string(),
        });

        registry.put(Namespace::Tool, "k", prompt).await;
        assert!(registry.get(Namespace::Tool, "k").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_twice() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new(&config(&dir));
        registry.put(Namespace::Tool, "a", tool_value("1")).await;
        registry.put(Namespace::Tool, "b", tool_value("2")).await;

        let first = registry.clear(ClearTarget::All).await.unwrap();
        assert_eq!(first.total_removed, 2);
        assert_eq!(first.cleared[&Namespace::Tool], ClearCounts { memory: 2, disk: 2 });

        let second = registry.clear(ClearTarget::All).await.unwrap();
        assert_eq!(second.total_removed, 0);
        assert!(registry.get(Namespace::Tool, "a").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_both_tiers() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new(&config(&dir));
        registry.put(Namespace::Tool, "k", tool_value("1")).await;

        assert!(registry.invalidate(Namespace::Tool, "k").await);
        assert!(!registry.invalidate(Namespace::Tool, "k").await);
        assert!(registry.get(Namespace::Tool, "k").await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_only_touches_enabled_namespaces() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.url.enabled = false;
        let registry = CacheRegistry::new(&config);

        let summary = registry.cleanup().await;
        assert!(summary.is_ok());
        assert!(summary.namespaces.contains_key(&Namespace::Tool));
        assert!(!summary.namespaces.contains_key(&Namespace::Url));
    }

    #[tokio::test]
    async fn test_prompt_rebuilt_when_workspace_changes() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new(&config(&dir));
        let soul = dir.path().join("SOUL.md");
        std::fs::write(&soul, "be kind").unwrap();

        let fingerprint = || WorkspaceFingerprint::for_workspace(dir.path(), &["SOUL.md"], None);
        let first = registry
            .prompt_or_build(&fingerprint(), || "prompt v1".to_string())
            .await;
        let second = registry
            .prompt_or_build(&fingerprint(), || panic!("should be cached"))
            .await;
        assert_eq!(first, "prompt v1");
        assert_eq!(second, "prompt v1");

        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(&soul)
            .unwrap()
            .set_modified(later)
            .unwrap();
        let rebuilt = registry
            .prompt_or_build(&fingerprint(), || "prompt v2".to_string())
            .await;
        assert_eq!(rebuilt, "prompt v2");
    }

    #[test]
    fn test_clear_target_parsing() {
        assert_eq!("all".parse::<ClearTarget>().unwrap(), ClearTarget::All);
        assert_eq!(
            "url".parse::<ClearTarget>().unwrap(),
            ClearTarget::One(Namespace::Url)
        );
        assert!("everything".parse::<ClearTarget>().is_err());
    }
}

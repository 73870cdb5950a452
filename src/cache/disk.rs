//! Persistent L2 tier: one JSON file per entry, sharded by key prefix
//!
//! Layout is `<root>/<key[0..2]>/<key>.json`. Each file holds the whole
//! [`CacheEntry`] (value and metadata) as pretty-printed JSON so an operator
//! can inspect it directly. Files are written to a temporary name in the
//! shard directory and renamed into place, so a reader never observes a
//! partially written entry.
//!
//! Every mutation of an existing file made on behalf of a read or a cleanup
//! pass (metadata refresh, expiry removal, eviction) re-reads the file under
//! the tier's write gate and only proceeds if it still holds the version
//! that was inspected. A concurrent `put` therefore always survives.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::entry::{CacheEntry, CacheValue, Namespace};
use super::memory::short;
use crate::error::{CacheError, CacheResult};

const ENTRY_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp-";

/// Temp files older than this are leftovers of a crashed write
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

/// Result of a cleanup pass over one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired_count: usize,
    pub evicted_count: usize,
    pub remaining_bytes: u64,
}

enum Loaded {
    Missing,
    Corrupt(String),
    Entry(CacheEntry),
}

/// Disk-backed store for one namespace
pub struct DiskTier {
    namespace: Namespace,
    root: PathBuf,
    max_bytes: u64,
    write_gate: Mutex<()>,
}

impl DiskTier {
    pub fn new(namespace: Namespace, root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            namespace,
            root: root.into(),
            max_bytes,
            write_gate: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// File that stores `key`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let stem = file_stem(key);
        let shard: String = stem.chars().take(2).collect();
        self.root
            .join(shard)
            .join(format!("{}.{}", stem, ENTRY_EXTENSION))
    }

    /// Read a valid entry, refreshing its access metadata on disk.
    ///
    /// Corrupt and expired files are removed and reported as a miss.
    pub fn get_entry(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let entry = match self.load_checked(&path, key)? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if entry.is_expired_at(Utc::now()) {
            tracing::debug!(namespace = %self.namespace, key = %short(key), "disk entry expired");
            self.remove_if_unchanged(&path, &entry)?;
            return Ok(None);
        }

        let mut touched = entry.clone();
        touched.touch();
        {
            let _gate = self.write_gate.lock();
            if let Loaded::Entry(current) = load(&path)? {
                if same_version(&current, &entry) {
                    // Access metadata is advisory; losing it in a crash is harmless
                    write_atomic(&path, &touched, false)?;
                }
            }
        }
        Ok(Some(touched))
    }

    pub fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        Ok(self.get_entry(key)?.map(|entry| entry.value))
    }

    pub fn put(&self, key: &str, value: CacheValue, ttl_seconds: u64) -> CacheResult<()> {
        self.store(&CacheEntry::new(key, value, ttl_seconds))
    }

    /// Write a prepared entry as-is, replacing any previous version
    pub fn store(&self, entry: &CacheEntry) -> CacheResult<()> {
        if !entry.value.belongs_to(self.namespace) {
            return Err(CacheError::NamespaceMismatch {
                namespace: self.namespace,
                found: entry.value.namespace().to_string(),
            });
        }
        let path = self.entry_path(&entry.key);
        let _gate = self.write_gate.lock();
        write_atomic(&path, entry, true)
    }

    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        let path = self.entry_path(key);
        let _gate = self.write_gate.lock();
        remove_file(&path)
    }

    /// Remove every entry, returning how many were removed
    pub fn clear(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for path in self.files()? {
            let is_entry = is_entry_file(&path);
            if remove_file(&path)? && is_entry {
                removed += 1;
            }
        }
        self.prune_empty_shards();
        tracing::info!(namespace = %self.namespace, removed, "disk cache cleared");
        Ok(removed)
    }

    /// Number of entry files, including expired ones not yet swept
    pub fn len(&self) -> CacheResult<usize> {
        Ok(self.files()?.iter().filter(|p| is_entry_file(p)).count())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Total bytes used by this namespace on disk
    pub fn size_bytes(&self) -> CacheResult<u64> {
        let mut total = 0;
        for path in self.files()? {
            total += file_size(&path);
        }
        Ok(total)
    }

    /// Remove expired entries, then evict least recently accessed entries
    /// until the namespace fits under its byte ceiling.
    pub fn cleanup(&self) -> CacheResult<CleanupReport> {
        let now = Utc::now();
        let mut report = CleanupReport::default();
        let mut survivors: Vec<(CacheEntry, PathBuf, u64)> = Vec::new();
        let mut total: u64 = 0;

        for path in self.files()? {
            if !is_entry_file(&path) {
                if is_stale_temp(&path) {
                    let _ = remove_file(&path);
                } else {
                    total += file_size(&path);
                }
                continue;
            }

            let size = file_size(&path);
            match load(&path)? {
                Loaded::Missing => {}
                Loaded::Corrupt(reason) => {
                    tracing::debug!(path = %path.display(), %reason, "removing corrupt cache file");
                    self.remove_if_still_corrupt(&path)?;
                }
                Loaded::Entry(entry) => {
                    if entry.is_expired_at(now) {
                        if self.remove_if_unchanged(&path, &entry)? {
                            report.expired_count += 1;
                        } else {
                            total += size;
                        }
                    } else {
                        total += size;
                        survivors.push((entry, path, size));
                    }
                }
            }
        }

        if total > self.max_bytes {
            survivors.sort_by_key(|(entry, _, _)| entry.last_accessed_at);
            for (entry, path, size) in &survivors {
                if total <= self.max_bytes {
                    break;
                }
                if self.remove_if_unchanged(path, entry)? {
                    total = total.saturating_sub(*size);
                    report.evicted_count += 1;
                }
            }
        }

        self.prune_empty_shards();
        report.remaining_bytes = total;
        tracing::debug!(
            namespace = %self.namespace,
            expired = report.expired_count,
            evicted = report.evicted_count,
            remaining_bytes = total,
            "disk cache cleanup finished"
        );
        Ok(report)
    }

    /// Load and validate the entry for `key`, removing it if corrupt
    fn load_checked(&self, path: &Path, key: &str) -> CacheResult<Option<CacheEntry>> {
        match load(path)? {
            Loaded::Missing => Ok(None),
            Loaded::Corrupt(reason) => {
                tracing::debug!(namespace = %self.namespace, key = %short(key), %reason, "corrupt disk entry treated as miss");
                self.remove_if_still_corrupt(path)?;
                Ok(None)
            }
            Loaded::Entry(entry) => {
                if entry.key != key || !entry.value.belongs_to(self.namespace) {
                    tracing::debug!(
                        namespace = %self.namespace,
                        key = %short(key),
                        found = %entry.value.namespace(),
                        "disk entry does not match its location, removing"
                    );
                    self.remove_if_unchanged(path, &entry)?;
                    return Ok(None);
                }
                Ok(Some(entry))
            }
        }
    }

    fn remove_if_unchanged(&self, path: &Path, expected: &CacheEntry) -> CacheResult<bool> {
        let _gate = self.write_gate.lock();
        match load(path)? {
            Loaded::Entry(current) if same_version(&current, expected) => remove_file(path),
            _ => Ok(false),
        }
    }

    fn remove_if_still_corrupt(&self, path: &Path) -> CacheResult<bool> {
        let _gate = self.write_gate.lock();
        match load(path)? {
            Loaded::Corrupt(_) => remove_file(path),
            _ => Ok(false),
        }
    }

    /// All regular files below the root; a missing root is an empty tier
    fn files(&self) -> CacheResult<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for item in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            match item {
                Ok(item) if item.file_type().is_file() => files.push(item.into_path()),
                Ok(_) => {}
                Err(e) => {
                    // Entries may vanish while walking when other callers
                    // remove them.
                    if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) {
                        continue;
                    }
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "directory walk failed"));
                    return Err(CacheError::io(path, source));
                }
            }
        }
        Ok(files)
    }

    /// Held under the write gate so a store never loses its shard between
    /// creating it and renaming into it.
    fn prune_empty_shards(&self) {
        let _gate = self.write_gate.lock();
        let Ok(read_dir) = fs::read_dir(&self.root) else {
            return;
        };
        for shard in read_dir.flatten() {
            let path = shard.path();
            if path.is_dir() {
                // Fails harmlessly when the shard is not empty.
                let _ = fs::remove_dir(&path);
            }
        }
    }
}

fn load(path: &Path) -> CacheResult<Loaded> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    match serde_json::from_slice::<CacheEntry>(&data) {
        Ok(entry) => Ok(Loaded::Entry(entry)),
        Err(e) => Ok(Loaded::Corrupt(e.to_string())),
    }
}

/// Replace `path` via a sibling temp file. `durable` adds an fsync before the
/// rename; reads that only refresh access metadata skip it.
fn write_atomic(path: &Path, entry: &CacheEntry, durable: bool) -> CacheResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CacheError::io(path, std::io::Error::new(ErrorKind::InvalidInput, "entry path has no parent")))?;
    fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;

    let data = serde_json::to_vec_pretty(entry)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| CacheError::io(dir, e))?;
    tmp.write_all(&data).map_err(|e| CacheError::io(tmp.path(), e))?;
    if durable {
        tmp.as_file().sync_all().map_err(|e| CacheError::io(tmp.path(), e))?;
    }
    tmp.persist(path).map_err(|e| CacheError::io(path, e.error))?;
    Ok(())
}

fn remove_file(path: &Path) -> CacheResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

fn same_version(current: &CacheEntry, expected: &CacheEntry) -> bool {
    current.created_at == expected.created_at
        && current.last_accessed_at == expected.last_accessed_at
        && current.access_count == expected.access_count
}

fn is_entry_file(path: &Path) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX))
        .unwrap_or(false);
    !is_temp && path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION)
}

fn is_stale_temp(path: &Path) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX))
        .unwrap_or(false);
    if !is_temp {
        return false;
    }
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > STALE_TEMP_AGE)
        .unwrap_or(false)
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Keys made of safe characters are used verbatim as file names; anything
/// else is hashed so arbitrary keys cannot escape the shard directory.
fn file_stem(key: &str) -> String {
    let safe = !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        key.to_string()
    } else {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{PromptRecord, UrlRecord};
    use crate::cache::key::KeyCodec;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn prompt(text: &str) -> CacheValue {
        CacheValue::Prompt(PromptRecord {
            prompt: text.to_string(),
        })
    }

    fn tier(dir: &TempDir, max_bytes: u64) -> DiskTier {
        DiskTier::new(Namespace::Prompt, dir.path().join("prompt"), max_bytes)
    }

    fn key(n: usize) -> String {
        KeyCodec::digest(Namespace::Prompt, serde_json::json!(n))
    }

    #[test]
    fn test_disk_put_get_roundtrip_and_layout() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let k = key(1);

        tier.put(&k, prompt("hello"), 60).unwrap();

        let path = tier.entry_path(&k);
        assert!(path.exists());
        assert_eq!(
            path.parent().unwrap().file_name().unwrap().to_str().unwrap(),
            &k[..2]
        );

        // Operators can read the file directly
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["value"]["prompt"], "hello");
        assert_eq!(raw["ttl_seconds"], 60);

        assert_eq!(tier.get(&k).unwrap(), Some(prompt("hello")));
        assert_eq!(tier.len().unwrap(), 1);
    }

    #[test]
    fn test_disk_get_refreshes_access_metadata() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let k = key(2);

        let mut entry = CacheEntry::new(&k, prompt("x"), 0);
        entry.last_accessed_at = Utc::now() - ChronoDuration::hours(5);
        tier.store(&entry).unwrap();

        tier.get(&k).unwrap();
        tier.get(&k).unwrap();

        let on_disk: CacheEntry =
            serde_json::from_slice(&fs::read(tier.entry_path(&k)).unwrap()).unwrap();
        assert_eq!(on_disk.access_count, 2);
        assert!(on_disk.last_accessed_at > entry.last_accessed_at);
        assert_eq!(on_disk.created_at, entry.created_at);
    }

    #[test]
    fn test_disk_lazy_expiry() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let k = key(3);

        tier.put(&k, prompt("soon gone"), 1).unwrap();
        assert!(tier.get(&k).unwrap().is_some());

        std::thread::sleep(std::time::Duration::from_millis(2100));

        assert!(tier.get(&k).unwrap().is_none());
        assert!(!tier.entry_path(&k).exists());
    }

    #[test]
    fn test_hand_edited_huge_ttl_is_served() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let k = key(30);

        tier.put(&k, prompt("kept"), 60).unwrap();
        let path = tier.entry_path(&k);
        let mut raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        raw["ttl_seconds"] = serde_json::json!(10_000_000_000_000_000u64);
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert_eq!(tier.get(&k).unwrap(), Some(prompt("kept")));
        let report = tier.cleanup().unwrap();
        assert_eq!(report.expired_count, 0);
        assert!(path.exists());
    }

    #[test]
    fn test_remove_if_unchanged_spares_newer_version() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let k = key(31);

        let first = CacheEntry::new(&k, prompt("first"), 0);
        tier.store(&first).unwrap();

        let mut second = CacheEntry::new(&k, prompt("second"), 0);
        second.created_at = first.created_at + ChronoDuration::seconds(1);
        tier.store(&second).unwrap();

        let path = tier.entry_path(&k);
        assert!(!tier.remove_if_unchanged(&path, &first).unwrap());
        assert_eq!(tier.get(&k).unwrap(), Some(prompt("second")));

        let current: CacheEntry = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(tier.remove_if_unchanged(&path, &current).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_cleanup_and_reads_never_resurrect_replaced_entry() {
        let dir = TempDir::new().unwrap();
        // A one byte ceiling makes every cleanup pass evict everything it sees
        let tier = tier(&dir, 1);
        let k = key(32);
        let path = tier.entry_path(&k);

        for round in 0..100 {
            let old = CacheEntry::new(&k, prompt(&format!("old-{}", round)), 0);
            tier.store(&old).unwrap();
            let mut new = CacheEntry::new(&k, prompt(&format!("new-{}", round)), 0);
            new.created_at = old.created_at + ChronoDuration::seconds(1);

            std::thread::scope(|s| {
                s.spawn(|| tier.cleanup().unwrap());
                s.spawn(|| tier.get_entry(&k).unwrap());
                s.spawn(|| tier.store(&new).unwrap());
            });

            if path.exists() {
                let on_disk: CacheEntry = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
                assert_eq!(on_disk.created_at, new.created_at, "round {} kept a replaced entry", round);
                assert_eq!(on_disk.value, new.value);
            }
        }
    }

    #[test]
    fn test_corrupt_entry_is_miss_and_removed() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let k = key(4);

        tier.put(&k, prompt("fine"), 0).unwrap();
        let path = tier.entry_path(&k);
        fs::write(&path, b"{ this is not json").unwrap();

        assert!(tier.get(&k).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_wrong_namespace_value_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let value = CacheValue::Url(UrlRecord {
            url: "https://example.com".into(),
            content: "page".into(),
            content_type: None,
            fetched_at: Utc::now(),
        });
        let err = tier.put(&key(5), value, 0).unwrap_err();
        assert!(matches!(err, CacheError::NamespaceMismatch { .. }));
        assert_eq!(tier.len().unwrap(), 0);
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);

        let mut stale = CacheEntry::new(key(6), prompt("old"), 10);
        stale.created_at = Utc::now() - ChronoDuration::seconds(60);
        tier.store(&stale).unwrap();
        tier.put(&key(7), prompt("new"), 10).unwrap();
        tier.put(&key(8), prompt("forever"), 0).unwrap();

        let report = tier.cleanup().unwrap();
        assert_eq!(report.expired_count, 1);
        assert_eq!(report.evicted_count, 0);
        assert_eq!(tier.len().unwrap(), 2);
    }

    #[test]
    fn test_cleanup_enforces_ceiling_lru_first() {
        let dir = TempDir::new().unwrap();
        let seeder = tier(&dir, u64::MAX);

        // Five entries with crafted access times: key(10) oldest ... key(14) newest
        let now = Utc::now();
        for i in 0..5 {
            let mut entry = CacheEntry::new(key(10 + i), prompt(&"x".repeat(200)), 0);
            entry.last_accessed_at = now - ChronoDuration::minutes(50 - (i as i64) * 10);
            seeder.store(&entry).unwrap();
        }
        let per_entry = seeder.size_bytes().unwrap() / 5;

        // Room for roughly three entries
        let ceiling = per_entry * 3 + per_entry / 2;
        let tier = tier(&dir, ceiling);
        let report = tier.cleanup().unwrap();

        assert_eq!(report.evicted_count, 2);
        assert!(tier.size_bytes().unwrap() <= ceiling);
        assert!(report.remaining_bytes <= ceiling);
        assert!(!tier.entry_path(&key(10)).exists());
        assert!(!tier.entry_path(&key(11)).exists());
        for i in 12..15 {
            assert!(tier.entry_path(&key(i)).exists());
        }
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        tier.put(&key(20), prompt("a"), 0).unwrap();
        tier.put(&key(21), prompt("b"), 0).unwrap();

        assert_eq!(tier.clear().unwrap(), 2);
        assert_eq!(tier.clear().unwrap(), 0);
        assert_eq!(tier.len().unwrap(), 0);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(Namespace::Prompt, dir.path().join("never-created"), 10);
        assert_eq!(tier.len().unwrap(), 0);
        assert_eq!(tier.size_bytes().unwrap(), 0);
        assert_eq!(tier.cleanup().unwrap(), CleanupReport::default());
        assert!(tier.get("abc").unwrap().is_none());
    }

    #[test]
    fn test_unsafe_keys_are_hashed() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, u64::MAX);
        let path = tier.entry_path("../../etc/passwd");
        assert!(path.starts_with(tier.root()));
        tier.put("../../etc/passwd", prompt("p"), 0).unwrap();
        assert_eq!(tier.get("../../etc/passwd").unwrap(), Some(prompt("p")));
    }
}

//! Persistent per-(indicator, platform) cache of fetched datasets.
//!
//! # Layout
//! ```text
//! <root>/<platform>/<indicator_code>.json   entry metadata (CacheEntry)
//! <root>/<platform>/<indicator_code>.csv    payload as returned by the platform
//! ```
//!
//! Both files are written to a temporary sibling and renamed into place, so
//! a reader never sees a half-written entry. Entries are superseded, never
//! versioned. An unreadable or corrupt entry is reported as absent so the
//! caller re-fetches; caching only ever saves work.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::error::HarnessError;
use crate::models::{CacheEntry, Platform};

const ENTRY_EXTENSION: &str = "json";
const PAYLOAD_EXTENSION: &str = "csv";

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of live entries (one per key)
    pub total_entries: u64,
    /// Bytes used by metadata and payload files
    pub size_bytes: u64,
    /// Entry count per platform
    pub per_platform_counts: BTreeMap<Platform, u64>,
}

type KeyLocks = HashMap<(String, Platform), Arc<tokio::sync::Mutex<()>>>;

/// Exclusive access to one cache key.
///
/// Dropping the guard removes the key's lock from the map once no other
/// task holds or waits on it, so the map only tracks keys in use.
struct KeyGuard<'a> {
    locks: &'a Mutex<KeyLocks>,
    key: (String, Platform),
    held: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only taken under the map lock, so a count of one is final
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// File-backed cache owned by the harness.
///
/// Writers for the same key are serialized through a per-key async mutex;
/// different keys proceed independently.
#[derive(Debug)]
pub struct CacheManager {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    locks: Mutex<KeyLocks>,
}

impl CacheManager {
    /// Creates a cache rooted at `root` using wall-clock time.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    /// Creates a cache with an injected clock.
    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a live entry exists and is no older than `max_age`.
    pub async fn has_fresh(&self, indicator_code: &str, platform: Platform, max_age: Duration) -> bool {
        self.fresh_entry(indicator_code, platform, max_age)
            .await
            .is_some()
    }

    /// Returns the entry only if it is no older than `max_age`.
    pub async fn fresh_entry(
        &self,
        indicator_code: &str,
        platform: Platform,
        max_age: Duration,
    ) -> Option<CacheEntry> {
        self.get(indicator_code, platform)
            .await
            .filter(|entry| entry.age(self.clock.now()) <= max_age)
    }

    /// Returns the entry for a key, expired or not.
    ///
    /// Missing, unreadable and corrupt entries all come back as `None`.
    pub async fn get(&self, indicator_code: &str, platform: Platform) -> Option<CacheEntry> {
        if let Err(e) = validate_cache_key(indicator_code) {
            tracing::debug!("Cache lookup skipped: {}", e);
            return None;
        }

        let entry_path = self.entry_path(indicator_code, platform);
        let bytes = match tokio::fs::read(&entry_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable cache entry {}: {}",
                    entry_path.display(),
                    e
                );
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    "Ignoring corrupt cache entry {}: {}",
                    entry_path.display(),
                    e
                );
                return None;
            }
        };

        if entry.indicator_code != indicator_code || entry.platform != platform {
            tracing::warn!(
                "Ignoring cache entry {} recorded for {}/{}",
                entry_path.display(),
                entry.platform,
                entry.indicator_code
            );
            return None;
        }

        if !tokio::fs::try_exists(&entry.payload_location)
            .await
            .unwrap_or(false)
        {
            tracing::warn!(
                "Ignoring cache entry {}: payload {} is missing",
                entry_path.display(),
                entry.payload_location.display()
            );
            return None;
        }

        Some(entry)
    }

    /// Stores a dataset, replacing any previous entry for the key.
    ///
    /// `fetched_at` never moves backwards for a key, even if the clock does.
    pub async fn put(
        &self,
        indicator_code: &str,
        platform: Platform,
        row_count: u64,
        column_names: Vec<String>,
        payload: &[u8],
    ) -> Result<CacheEntry> {
        validate_cache_key(indicator_code)?;

        let _guard = self.lock_key(indicator_code, platform).await;

        let dir = self.platform_dir(platform);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| HarnessError::io(format!("Failed to create {}", dir.display()), e))?;

        let now = self.clock.now();
        let fetched_at = match self.get(indicator_code, platform).await {
            Some(previous) if previous.fetched_at > now => previous.fetched_at,
            _ => now,
        };

        let payload_location = self.payload_path(indicator_code, platform);
        write_atomic(&payload_location, payload).await?;

        let entry = CacheEntry {
            indicator_code: indicator_code.to_string(),
            platform,
            fetched_at,
            row_count,
            column_names,
            payload_location,
        };

        let metadata = serde_json::to_vec_pretty(&entry)
            .map_err(|e| HarnessError::serialization("Cache entry serialization", e))?;
        write_atomic(&self.entry_path(indicator_code, platform), &metadata).await?;

        tracing::debug!(
            "Cached {} rows for {}/{}",
            entry.row_count,
            platform,
            indicator_code
        );

        Ok(entry)
    }

    /// Reads the stored payload of an entry.
    pub async fn read_payload(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        tokio::fs::read(&entry.payload_location).await.map_err(|e| {
            HarnessError::io(
                format!("Failed to read cached payload {}", entry.payload_location.display()),
                e,
            )
        })
    }

    /// Removes entries.
    ///
    /// - neither argument: everything
    /// - `indicator_code` only: that indicator on every platform
    /// - `platform` only: every indicator on that platform
    /// - both: the single entry
    ///
    /// Returns the number of entries removed.
    pub async fn clear(&self, indicator_code: Option<&str>, platform: Option<Platform>) -> Result<usize> {
        if let Some(code) = indicator_code {
            validate_cache_key(code)?;
        }

        let platforms: Vec<Platform> = match platform {
            Some(p) => vec![p],
            None => Platform::ALL.to_vec(),
        };

        let mut removed = 0usize;
        for platform in platforms {
            let codes = match indicator_code {
                Some(code) => vec![code.to_string()],
                None => self.list_codes(platform).await?,
            };

            for code in codes {
                let _guard = self.lock_key(&code, platform).await;

                if remove_if_exists(&self.entry_path(&code, platform)).await? {
                    removed = removed.saturating_add(1);
                }
                remove_if_exists(&self.payload_path(&code, platform)).await?;
            }
        }

        tracing::info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    /// Counts entries and bytes on disk.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();

        for platform in Platform::ALL {
            let dir = self.platform_dir(platform);
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(HarnessError::io(
                        format!("Failed to list {}", dir.display()),
                        e,
                    ));
                }
            };

            let mut count = 0u64;
            while let Some(item) = read_dir
                .next_entry()
                .await
                .map_err(|e| HarnessError::io(format!("Failed to list {}", dir.display()), e))?
            {
                let path = item.path();
                let Ok(meta) = item.metadata().await else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                stats.size_bytes = stats.size_bytes.saturating_add(meta.len());
                if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                    count = count.saturating_add(1);
                }
            }

            if count > 0 {
                stats.per_platform_counts.insert(platform, count);
            }
            stats.total_entries = stats.total_entries.saturating_add(count);
        }

        Ok(stats)
    }

    fn platform_dir(&self, platform: Platform) -> PathBuf {
        self.root.join(platform.as_str())
    }

    fn entry_path(&self, indicator_code: &str, platform: Platform) -> PathBuf {
        self.platform_dir(platform)
            .join(format!("{}.{}", indicator_code, ENTRY_EXTENSION))
    }

    fn payload_path(&self, indicator_code: &str, platform: Platform) -> PathBuf {
        self.platform_dir(platform)
            .join(format!("{}.{}", indicator_code, PAYLOAD_EXTENSION))
    }

    async fn lock_key(&self, indicator_code: &str, platform: Platform) -> KeyGuard<'_> {
        let key = (indicator_code.to_string(), platform);
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        KeyGuard {
            locks: &self.locks,
            key,
            held: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn list_codes(&self, platform: Platform) -> Result<Vec<String>> {
        let dir = self.platform_dir(platform);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HarnessError::io(format!("Failed to list {}", dir.display()), e));
            }
        };

        let mut codes = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| HarnessError::io(format!("Failed to list {}", dir.display()), e))?
        {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                codes.push(stem.to_string());
            }
        }
        Ok(codes)
    }
}

/// Rejects codes that cannot safely become a file name.
pub fn validate_cache_key(indicator_code: &str) -> Result<()> {
    let unsafe_code = indicator_code.is_empty()
        || indicator_code.starts_with('.')
        || indicator_code.contains("..")
        || indicator_code
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c == ':');

    if unsafe_code {
        return Err(HarnessError::invalid_input(format!(
            "Indicator code '{}' cannot be used as a cache key",
            indicator_code.escape_default()
        )));
    }
    Ok(())
}

/// Writes `bytes` to a temporary sibling, then renames it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HarnessError::invalid_input(format!("Invalid cache path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| HarnessError::io(format!("Failed to write {}", tmp.display()), e))?;

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(HarnessError::io(
            format!("Failed to move cache file into {}", path.display()),
            e,
        ));
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(HarnessError::io(format!("Failed to remove {}", path.display()), e)),
    }
}

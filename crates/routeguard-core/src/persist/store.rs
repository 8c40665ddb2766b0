use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{
    entry_hash, CacheManifest, PersistentEntry, DEFAULT_FLUSH_EVERY, MANIFEST_FILE,
    MANIFEST_VERSION, MAX_ENTRIES,
};
use crate::error::PersistenceError;
use crate::obs;

/// Rough per-entry JSON overhead beyond the string fields.
const ENTRY_OVERHEAD_BYTES: usize = 96;

/// Bounds and debounce for a [`PersistentCacheStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub max_entries: usize,
    /// Flush to disk after this many `record` calls. `0` disables auto-flush.
    pub flush_every: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_entries: MAX_ENTRIES,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

/// What `load` found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded { entries: usize },
    Missing,
    /// Unreadable, unparsable or wrong version; replaced by an empty manifest.
    Reset { reason: String },
}

/// Result of a successful `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub written: usize,
    pub evicted: usize,
}

/// Derived view of the store, computed without I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentCacheStats {
    pub path: PathBuf,
    pub entries: usize,
    pub approx_bytes: usize,
    pub oldest_age_ms: Option<i64>,
    pub newest_age_ms: Option<i64>,
}

/// Best-effort JSON manifest of prior compiles, shared across runs.
///
/// Layout: `<dir>/manifest.json`, written atomically (temp file + rename).
/// Mutations land in memory immediately and reach disk every
/// `flush_every` inserts or on an explicit `save`.
///
/// Processes sharing a directory are not coordinated: the last `save` wins.
#[derive(Debug)]
pub struct PersistentCacheStore {
    dir: PathBuf,
    manifest: CacheManifest,
    options: StoreOptions,
    unsaved: usize,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl PersistentCacheStore {
    /// Create an empty store rooted at `dir` without touching the disk.
    pub fn new(dir: impl AsRef<Path>, options: StoreOptions) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            manifest: CacheManifest::fresh(now_ms()),
            options,
            unsaved: 0,
        }
    }

    /// Create a store and load any existing manifest. Never fails.
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> Self {
        let mut store = Self::new(dir, options);
        let status = store.load();
        debug!(path = %store.path().display(), status = ?status, "persistent cache opened");
        store
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn manifest(&self) -> &CacheManifest {
        &self.manifest
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Inserts recorded since the last successful save.
    pub fn unsaved(&self) -> usize {
        self.unsaved
    }

    pub fn contains(&self, base: &str, pattern: &str) -> bool {
        self.manifest
            .entries
            .contains_key(&entry_hash(base, pattern))
    }

    pub fn get(&self, base: &str, pattern: &str) -> Option<&PersistentEntry> {
        self.manifest.entries.get(&entry_hash(base, pattern))
    }

    /// Replace the in-memory manifest with the one on disk.
    ///
    /// A missing file, parse error or version mismatch leaves a fresh empty
    /// manifest in place.
    pub fn load(&mut self) -> LoadStatus {
        self.unsaved = 0;
        let path = self.path();

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.manifest = CacheManifest::fresh(now_ms());
                return LoadStatus::Missing;
            }
            Err(e) => return self.reset(format!("read failed: {e}")),
        };

        match serde_json::from_slice::<CacheManifest>(&raw) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => {
                let entries = manifest.len();
                self.manifest = manifest;
                LoadStatus::Loaded { entries }
            }
            Ok(manifest) => self.reset(format!(
                "version {} != {}",
                manifest.version, MANIFEST_VERSION
            )),
            Err(e) => self.reset(format!("parse failed: {e}")),
        }
    }

    fn reset(&mut self, reason: String) -> LoadStatus {
        debug!(path = %self.path().display(), reason = %reason, "persistent cache reset");
        self.manifest = CacheManifest::fresh(now_ms());
        LoadStatus::Reset { reason }
    }

    /// Upsert an observation. Flushes every `flush_every` inserts; a failed
    /// flush is logged and the entry stays in memory.
    pub fn record(&mut self, pattern: &str, base: &str, duration_ns: u64) {
        let hash = entry_hash(base, pattern);
        self.manifest.entries.insert(
            hash.clone(),
            PersistentEntry {
                pattern: pattern.to_string(),
                base: base.to_string(),
                compiled_at_epoch_ms: now_ms(),
                compile_duration_ns: duration_ns,
                hash,
            },
        );
        self.unsaved += 1;

        if self.options.flush_every > 0 && self.unsaved >= self.options.flush_every {
            if let Err(e) = self.save() {
                obs::emit_persist_error("flush", &e);
            }
        }
    }

    /// Evict down to `max_entries`, then write atomically.
    ///
    /// Eviction happens in memory first, so the bound holds even when the
    /// write fails.
    pub fn save(&mut self) -> Result<SaveOutcome, PersistenceError> {
        let evicted = self.manifest.evict_to(self.options.max_entries).len();
        self.manifest.updated_epoch_ms = now_ms();

        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_vec_pretty(&self.manifest)?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&content)?;
        tmp.persist(self.path())?;

        self.unsaved = 0;
        Ok(SaveOutcome {
            written: self.manifest.len(),
            evicted,
        })
    }

    /// Save if anything was recorded since the last save. Errors are logged.
    pub fn flush_if_dirty(&mut self) -> Option<SaveOutcome> {
        if self.unsaved == 0 {
            return None;
        }
        match self.save() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                obs::emit_persist_error("flush", &e);
                None
            }
        }
    }

    /// Drop every entry and persist the empty manifest immediately.
    /// Returns how many entries were cleared.
    pub fn clear(&mut self) -> usize {
        let cleared = self.manifest.len();
        self.manifest = CacheManifest::fresh(now_ms());
        if let Err(e) = self.save() {
            obs::emit_persist_error("clear", &e);
        }
        cleared
    }

    pub fn stats(&self) -> PersistentCacheStats {
        let now = now_ms();
        let approx_bytes = self
            .manifest
            .entries
            .values()
            .map(|e| e.pattern.len() + e.base.len() + 2 * e.hash.len() + ENTRY_OVERHEAD_BYTES)
            .sum();
        let oldest = self
            .manifest
            .entries
            .values()
            .map(|e| e.compiled_at_epoch_ms)
            .min();
        let newest = self
            .manifest
            .entries
            .values()
            .map(|e| e.compiled_at_epoch_ms)
            .max();

        PersistentCacheStats {
            path: self.path(),
            entries: self.manifest.len(),
            approx_bytes,
            oldest_age_ms: oldest.map(|t| (now - t).max(0)),
            newest_age_ms: newest.map(|t| (now - t).max(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store(options: StoreOptions) -> (tempfile::TempDir, PersistentCacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistentCacheStore::open(dir.path(), options);
        (dir, store)
    }

    #[test]
    fn load_missing_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistentCacheStore::new(dir.path(), StoreOptions::default());
        assert_eq!(store.load(), LoadStatus::Missing);
        assert!(store.is_empty());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let (dir, mut store) = make_store(StoreOptions::default());
        store.record("/items/:id", "https://x.test", 1_500);
        let outcome = store.save().unwrap();
        assert_eq!(outcome.written, 1);
        assert_eq!(store.unsaved(), 0);

        let reopened = PersistentCacheStore::open(dir.path(), StoreOptions::default());
        let entry = reopened.get("https://x.test", "/items/:id").unwrap();
        assert_eq!(entry.compile_duration_ns, 1_500);
        assert_eq!(entry.hash, entry_hash("https://x.test", "/items/:id"));
    }

    #[test]
    fn corrupt_manifest_resets_silently() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{ not json").unwrap();
        let mut store = PersistentCacheStore::new(dir.path(), StoreOptions::default());
        assert!(matches!(store.load(), LoadStatus::Reset { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn version_mismatch_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut old = CacheManifest::fresh(1);
        old.version = MANIFEST_VERSION + 1;
        old.entries.insert(
            "h".to_string(),
            PersistentEntry {
                pattern: "/a".to_string(),
                base: String::new(),
                compiled_at_epoch_ms: 1,
                compile_duration_ns: 1,
                hash: "h".to_string(),
            },
        );
        fs::write(
            dir.path().join(MANIFEST_FILE),
            serde_json::to_vec(&old).unwrap(),
        )
        .unwrap();

        let mut store = PersistentCacheStore::new(dir.path(), StoreOptions::default());
        match store.load() {
            LoadStatus::Reset { reason } => assert!(reason.contains("version")),
            other => panic!("expected Reset, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn record_is_upsert() {
        let (_dir, mut store) = make_store(StoreOptions::default());
        store.record("/a", "", 10);
        store.record("/a", "", 20);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("", "/a").unwrap().compile_duration_ns, 20);
    }

    #[test]
    fn record_flushes_every_n_inserts() {
        let options = StoreOptions {
            max_entries: MAX_ENTRIES,
            flush_every: 3,
        };
        let (dir, mut store) = make_store(options);
        store.record("/a", "", 1);
        store.record("/b", "", 1);
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert_eq!(store.unsaved(), 2);

        store.record("/c", "", 1);
        assert!(dir.path().join(MANIFEST_FILE).exists());
        assert_eq!(store.unsaved(), 0);
    }

    #[test]
    fn save_enforces_bound() {
        let options = StoreOptions {
            max_entries: 2,
            flush_every: 0,
        };
        let (_dir, mut store) = make_store(options);
        for p in ["/a", "/b", "/c", "/d"] {
            store.record(p, "", 1);
        }
        let outcome = store.save().unwrap();
        assert_eq!(outcome.evicted, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_persists_immediately() {
        let (dir, mut store) = make_store(StoreOptions::default());
        store.record("/a", "", 1);
        store.record("/b", "", 1);
        assert_eq!(store.clear(), 2);

        let reopened = PersistentCacheStore::open(dir.path(), StoreOptions::default());
        assert!(reopened.is_empty());
    }

    #[test]
    fn flush_if_dirty_skips_clean_store() {
        let (_dir, mut store) = make_store(StoreOptions::default());
        assert!(store.flush_if_dirty().is_none());
        store.record("/a", "", 1);
        assert_eq!(store.flush_if_dirty().unwrap().written, 1);
    }

    #[test]
    fn save_failure_is_reported_not_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let mut store = PersistentCacheStore::new(&blocker, StoreOptions::default());
        store.record("/a", "", 1);
        assert!(store.save().is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn stats_without_io() {
        let (_dir, mut store) = make_store(StoreOptions::default());
        assert_eq!(store.stats().oldest_age_ms, None);
        store.record("/items/:id", "", 1);
        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert!(stats.approx_bytes > ENTRY_OVERHEAD_BYTES);
        assert!(stats.oldest_age_ms.unwrap() >= 0);
        assert!(stats.path.ends_with(MANIFEST_FILE));
    }
}

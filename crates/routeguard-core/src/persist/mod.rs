pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::CacheKey;

pub use store::{
    LoadStatus, PersistentCacheStats, PersistentCacheStore, SaveOutcome, StoreOptions,
};

/// Schema version of `manifest.json`. A mismatch resets the manifest.
pub const MANIFEST_VERSION: u32 = 1;

/// File name of the manifest inside the cache directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Upper bound on manifest entries after any save.
pub const MAX_ENTRIES: usize = 10_000;

/// Inserts between automatic flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 50;

/// Stable short hash identifying `(base, pattern)` in the manifest.
///
/// First 16 hex chars of SHA-256 over the cache key.
pub fn entry_hash(base: &str, pattern: &str) -> String {
    let digest = Sha256::digest(CacheKey::new(base, pattern).as_str().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// One prior compile observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentEntry {
    pub pattern: String,
    #[serde(rename = "baseUrl")]
    pub base: String,
    #[serde(rename = "compiledAt")]
    pub compiled_at_epoch_ms: i64,
    #[serde(rename = "compileTimeNs")]
    pub compile_duration_ns: u64,
    pub hash: String,
}

/// On-disk record of compiles across process runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    #[serde(rename = "created")]
    pub created_epoch_ms: i64,
    #[serde(rename = "updated")]
    pub updated_epoch_ms: i64,
    pub entries: BTreeMap<String, PersistentEntry>,
}

impl CacheManifest {
    /// Empty manifest stamped with `now_ms`.
    pub fn fresh(now_ms: i64) -> Self {
        Self {
            version: MANIFEST_VERSION,
            created_epoch_ms: now_ms,
            updated_epoch_ms: now_ms,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest entries (by `compiled_at`, ties by hash) until at
    /// most `limit` remain. Returns the evicted hashes, oldest first.
    pub fn evict_to(&mut self, limit: usize) -> Vec<String> {
        if self.entries.len() <= limit {
            return Vec::new();
        }
        let excess = self.entries.len() - limit;

        let mut by_age: Vec<(i64, &String)> = self
            .entries
            .iter()
            .map(|(hash, e)| (e.compiled_at_epoch_ms, hash))
            .collect();
        by_age.sort();

        let victims: Vec<String> = by_age
            .into_iter()
            .take(excess)
            .map(|(_, hash)| hash.clone())
            .collect();
        for hash in &victims {
            self.entries.remove(hash);
        }
        victims
    }
}

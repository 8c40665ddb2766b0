//! Persistent manifest: eviction bound, reload, and cross-run reuse.

use std::sync::{Arc, Mutex};

use routeguard_core::persist::MANIFEST_FILE;
use routeguard_core::{
    entry_hash, Analyzer, CacheManifest, CompilationCache, LoadStatus, PersistentCacheStore,
    PersistentEntry, RegexPatternCompiler, StoreOptions, MAX_ENTRIES,
};

fn entry(i: usize) -> PersistentEntry {
    let pattern = format!("/p/{i}");
    PersistentEntry {
        hash: entry_hash("", &pattern),
        pattern,
        base: String::new(),
        compiled_at_epoch_ms: 1_700_000_000_000 + i as i64,
        compile_duration_ns: 10_000,
    }
}

#[test]
fn save_over_limit_evicts_exactly_the_oldest() {
    let dir = tempfile::tempdir().unwrap();

    let mut manifest = CacheManifest::fresh(0);
    for i in 0..=MAX_ENTRIES {
        let e = entry(i);
        manifest.entries.insert(e.hash.clone(), e);
    }
    assert_eq!(manifest.len(), MAX_ENTRIES + 1);
    std::fs::write(
        dir.path().join(MANIFEST_FILE),
        serde_json::to_vec(&manifest).unwrap(),
    )
    .unwrap();

    let mut store = PersistentCacheStore::new(dir.path(), StoreOptions::default());
    assert_eq!(
        store.load(),
        LoadStatus::Loaded {
            entries: MAX_ENTRIES + 1
        }
    );

    let outcome = store.save().unwrap();
    assert_eq!(outcome.evicted, 1);
    assert_eq!(outcome.written, MAX_ENTRIES);

    let reloaded = PersistentCacheStore::open(dir.path(), StoreOptions::default());
    assert_eq!(reloaded.len(), MAX_ENTRIES);
    assert!(!reloaded.contains("", "/p/0"));
    assert!(reloaded.contains("", "/p/1"));
    assert!(reloaded.contains("", &format!("/p/{MAX_ENTRIES}")));
}

#[test]
fn auto_flush_respects_configured_bound() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions {
        max_entries: 5,
        flush_every: 4,
    };
    let mut store = PersistentCacheStore::open(dir.path(), options);
    for i in 0..8 {
        store.record(&format!("/r/{i}"), "", 1);
    }
    // two automatic flushes, each bounded to five entries
    assert_eq!(store.unsaved(), 0);
    assert!(store.len() <= 5);

    let on_disk = PersistentCacheStore::open(dir.path(), options);
    assert_eq!(on_disk.len(), 5);
}

#[tokio::test]
async fn later_runs_see_earlier_compiles() {
    let dir = tempfile::tempdir().unwrap();
    let patterns: Vec<String> = ["/a", "/b/:id", "/c/*"].iter().map(|p| p.to_string()).collect();

    let open = || {
        let store = PersistentCacheStore::open(dir.path(), StoreOptions::default());
        CompilationCache::with_store(Arc::new(RegexPatternCompiler), Arc::new(Mutex::new(store)))
    };

    let first = Analyzer::new(open()).analyze(&patterns, "https://api.test").await;
    assert_eq!(first.known_from_previous_runs, 0);
    assert!(dir.path().join(MANIFEST_FILE).exists());

    let second = Analyzer::new(open()).analyze(&patterns, "https://api.test").await;
    assert_eq!(second.known_from_previous_runs, 3);
    assert_eq!(second.assessments, first.assessments);
}

#[test]
fn unwritable_directory_never_panics() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let options = StoreOptions {
        max_entries: 10,
        flush_every: 1,
    };
    let mut store = PersistentCacheStore::open(&blocker, options);
    store.record("/a", "", 1);
    assert!(store.contains("", "/a"));
    assert!(store.save().is_err());
    assert_eq!(store.flush_if_dirty(), None);
}

//! Compilation cache with hybrid synchronous/asynchronous resolution.
//!
//! Each [`CacheKey`] owns at most one compile for the lifetime of the cache.
//! A slot is either pending (an in-flight [`Shared`] future) or settled
//! (the terminal outcome, success or failure). Settled lookups return
//! without suspending; only the first compile of a key is allowed to.
//!
//! The lookup-then-insert sequence in [`CompilationCache::resolve`] runs
//! under one mutex, so concurrent callers never compile a key twice.

pub mod stats;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};

use crate::error::CompileError;
use crate::matcher::{Matcher, PatternCompiler};
use crate::obs;
use crate::persist::PersistentCacheStore;

pub use stats::{CacheStats, CacheStatsSnapshot};

/// Persistent store shared between the cache and its owner.
pub type SharedStore = Arc<Mutex<PersistentCacheStore>>;

/// Terminal result of compiling one key.
pub type CompileOutcome = Result<Arc<CompiledPatternEntry>, CompileError>;

/// In-flight compile that any number of callers can await.
pub type PendingCompile = Shared<BoxFuture<'static, CompileOutcome>>;

/// Deterministic key: `base + "::" + pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(base: &str, pattern: &str) -> Self {
        Self(format!("{base}::{pattern}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A successful compile. Created once per key and never mutated.
#[derive(Debug)]
pub struct CompiledPatternEntry {
    pub pattern: String,
    pub base: String,
    pub matcher: Arc<Matcher>,
    pub compiled_at_epoch_ms: i64,
    pub compile_duration_ns: u64,
}

/// How a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// The key was already settled; value returned without suspension.
    Sync,
    /// The key was being compiled; caller must await the shared future.
    Async,
    /// The key was absent; a compile was started by this call.
    Miss,
}

enum ResolutionState {
    Settled(CompileOutcome),
    Pending(PendingCompile),
}

/// Answer to a [`CompilationCache::resolve`] call.
pub struct Resolution {
    mode: ResolveMode,
    state: ResolutionState,
}

impl Resolution {
    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    /// The settled outcome, available only when `mode() == Sync`.
    pub fn cached(&self) -> Option<&CompileOutcome> {
        match &self.state {
            ResolutionState::Settled(outcome) => Some(outcome),
            ResolutionState::Pending(_) => None,
        }
    }

    /// The in-flight compile, available for `Async` and `Miss`.
    pub fn pending(&self) -> Option<&PendingCompile> {
        match &self.state {
            ResolutionState::Settled(_) => None,
            ResolutionState::Pending(fut) => Some(fut),
        }
    }

    /// Wait for the outcome. Returns immediately for settled lookups.
    pub async fn outcome(self) -> CompileOutcome {
        match self.state {
            ResolutionState::Settled(outcome) => outcome,
            ResolutionState::Pending(fut) => fut.await,
        }
    }
}

enum Slot {
    Pending(PendingCompile),
    Settled(CompileOutcome),
}

struct Inner {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    stats: CacheStats,
    store: Option<SharedStore>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn settle(&self, key: &CacheKey, outcome: CompileOutcome) {
        lock(&self.slots).insert(key.clone(), Slot::Settled(outcome));
    }

    fn record_persistent(&self, pattern: &str, base: &str, duration_ns: u64) {
        if let Some(store) = &self.store {
            lock(store).record(pattern, base, duration_ns);
        }
    }
}

/// Counts from a [`CompilationCache::pre_warm`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreWarmSummary {
    pub requested: usize,
    pub compiled: usize,
    pub failed: usize,
}

/// Memoizes one compiled matcher per `(pattern, base)`.
///
/// Cheap to clone; clones share slots, stats and store.
#[derive(Clone)]
pub struct CompilationCache {
    compiler: Arc<dyn PatternCompiler>,
    inner: Arc<Inner>,
}

impl CompilationCache {
    pub fn new(compiler: Arc<dyn PatternCompiler>) -> Self {
        Self::build(compiler, None)
    }

    /// Cache that records every successful compile into `store`.
    pub fn with_store(compiler: Arc<dyn PatternCompiler>, store: SharedStore) -> Self {
        Self::build(compiler, Some(store))
    }

    fn build(compiler: Arc<dyn PatternCompiler>, store: Option<SharedStore>) -> Self {
        Self {
            compiler,
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                stats: CacheStats::new(),
                store,
            }),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    pub fn store(&self) -> Option<&SharedStore> {
        self.inner.store.as_ref()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pattern: &str, base: &str) -> bool {
        lock(&self.inner.slots).contains_key(&CacheKey::new(base, pattern))
    }

    /// Look up `(pattern, base)`, starting a compile on first sight.
    ///
    /// - settled key: `Sync`, counts a hit and a sync hit
    /// - in-flight key: `Async`, counts a hit
    /// - absent key: `Miss`; the new in-flight compile is stored before
    ///   this call returns so no second compile can start for the key
    pub fn resolve(&self, pattern: &str, base: &str) -> Resolution {
        let key = CacheKey::new(base, pattern);
        let mut slots = lock(&self.inner.slots);

        if let Some(slot) = slots.get_mut(&key) {
            // A pending future that already completed is promoted in place.
            let finished = match slot {
                Slot::Pending(fut) => fut.peek().cloned(),
                Slot::Settled(_) => None,
            };
            if let Some(outcome) = finished {
                *slot = Slot::Settled(outcome);
            }

            return match slot {
                Slot::Settled(outcome) => {
                    self.inner.stats.record_sync_hit();
                    Resolution {
                        mode: ResolveMode::Sync,
                        state: ResolutionState::Settled(outcome.clone()),
                    }
                }
                Slot::Pending(fut) => {
                    self.inner.stats.record_async_hit();
                    Resolution {
                        mode: ResolveMode::Async,
                        state: ResolutionState::Pending(fut.clone()),
                    }
                }
            };
        }

        self.inner.stats.record_miss();
        let fut = self.start_compile(key.clone(), pattern, base);
        slots.insert(key, Slot::Pending(fut.clone()));
        Resolution {
            mode: ResolveMode::Miss,
            state: ResolutionState::Pending(fut),
        }
    }

    /// Build the shared compile future for `key`.
    ///
    /// Inside a Tokio runtime the compile is spawned so it settles on its
    /// own; otherwise the first awaiter drives it.
    fn start_compile(&self, key: CacheKey, pattern: &str, base: &str) -> PendingCompile {
        let compiler = Arc::clone(&self.compiler);
        let inner = Arc::clone(&self.inner);
        let pattern = pattern.to_string();
        let base = base.to_string();

        let work = async move {
            let started = Instant::now();
            let result = compiler.compile(&pattern, &base).await;
            let duration_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

            let outcome = match result {
                Ok(matcher) => {
                    obs::emit_pattern_compiled(&key, duration_ns);
                    inner.record_persistent(&pattern, &base, duration_ns);
                    Ok(Arc::new(CompiledPatternEntry {
                        pattern,
                        base,
                        matcher: Arc::new(matcher),
                        compiled_at_epoch_ms: chrono::Utc::now().timestamp_millis(),
                        compile_duration_ns: duration_ns,
                    }))
                }
                Err(err) => {
                    inner.stats.record_error();
                    obs::emit_pattern_compile_failed(&key, &err);
                    Err(err)
                }
            };

            inner.settle(&key, outcome.clone());
            outcome
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(work);
                async move {
                    task.await
                        .unwrap_or_else(|e| Err(CompileError::Aborted(e.to_string())))
                }
                .boxed()
                .shared()
            }
            Err(_) => work.boxed().shared(),
        }
    }

    /// Resolve every pattern and wait for all compiles to settle.
    ///
    /// Afterwards every `resolve` over the same set answers `Sync`.
    pub async fn pre_warm<I, S>(&self, patterns: I, base: &str) -> PreWarmSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut requested = 0;
        let mut pending = Vec::new();
        for pattern in patterns {
            requested += 1;
            if let Some(fut) = self.resolve(pattern.as_ref(), base).pending() {
                pending.push(fut.clone());
            }
        }

        let mut summary = PreWarmSummary {
            requested,
            ..PreWarmSummary::default()
        };
        for outcome in join_all(pending).await {
            match outcome {
                Ok(_) => summary.compiled += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Resolve to a usable matcher, substituting the sentinel on failure.
    pub async fn resolve_matcher(&self, pattern: &str, base: &str) -> Arc<Matcher> {
        match self.resolve(pattern, base).outcome().await {
            Ok(entry) => Arc::clone(&entry.matcher),
            Err(_) => Arc::new(Matcher::sentinel(pattern, base)),
        }
    }

    /// Race a resolution against `limit`.
    ///
    /// `None` means the compile did not settle in time. The in-flight
    /// compile keeps running and the cache is left untouched, so a later
    /// lookup still finds it.
    pub async fn resolve_with_timeout(
        &self,
        pattern: &str,
        base: &str,
        limit: Duration,
    ) -> Option<CompileOutcome> {
        let resolution = self.resolve(pattern, base);
        if let Some(outcome) = resolution.cached() {
            return Some(outcome.clone());
        }
        tokio::time::timeout(limit, resolution.outcome()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::RegexPatternCompiler;

    fn cache() -> CompilationCache {
        CompilationCache::new(Arc::new(RegexPatternCompiler))
    }

    #[test]
    fn test_cache_key_format() {
        let key = CacheKey::new("https://example.com", "/items/:id");
        assert_eq!(key.as_str(), "https://example.com::/items/:id");
        assert_eq!(CacheKey::new("", "/a").to_string(), "::/a");
    }

    #[tokio::test]
    async fn test_first_resolve_is_miss_then_sync() {
        let cache = cache();
        let first = cache.resolve("/items/:id", "");
        assert_eq!(first.mode(), ResolveMode::Miss);
        assert!(first.cached().is_none());
        let entry = first.outcome().await.unwrap();

        let second = cache.resolve("/items/:id", "");
        assert_eq!(second.mode(), ResolveMode::Sync);
        let again = second.cached().unwrap().as_ref().unwrap();
        assert!(Arc::ptr_eq(&entry, again));
    }

    #[tokio::test]
    async fn test_pending_lookup_is_async() {
        let cache = cache();
        let first = cache.resolve("/a/:b", "");
        let second = cache.resolve("/a/:b", "");
        assert_eq!(first.mode(), ResolveMode::Miss);
        assert_eq!(second.mode(), ResolveMode::Async);

        let (a, b) = futures::join!(first.outcome(), second.outcome());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));

        let stats = cache.stats().snapshot();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.async_hits, 1);
        assert_eq!(stats.sync_hits, 0);
    }

    #[tokio::test]
    async fn test_failed_compile_is_terminal() {
        let cache = cache();
        let err = cache.resolve("/(broken", "").outcome().await.unwrap_err();
        assert!(matches!(err, CompileError::InvalidSyntax { .. }));

        let again = cache.resolve("/(broken", "");
        assert_eq!(again.mode(), ResolveMode::Sync);
        assert!(again.cached().unwrap().is_err());
        assert_eq!(cache.stats().errors(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn test_resolve_matcher_substitutes_sentinel() {
        let cache = cache();
        let m = cache.resolve_matcher("/(broken", "").await;
        assert!(m.is_sentinel());
        let ok = cache.resolve_matcher("/ok", "").await;
        assert!(ok.is_match("/ok"));
    }

    #[tokio::test]
    async fn test_pre_warm_counts() {
        let cache = cache();
        let summary = cache.pre_warm(["/a", "/b", "/(bad"], "").await;
        assert_eq!(summary.requested, 3);
        assert_eq!(summary.compiled, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_resolve_without_runtime_is_driven_by_awaiter() {
        let cache = cache();
        let res = cache.resolve("/lazy/:id", "");
        assert_eq!(res.mode(), ResolveMode::Miss);
        let entry = futures::executor::block_on(res.outcome()).unwrap();
        assert_eq!(entry.pattern, "/lazy/:id");
        assert_eq!(cache.resolve("/lazy/:id", "").mode(), ResolveMode::Sync);
    }
}

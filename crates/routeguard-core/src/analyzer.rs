//! Analysis pipeline: pre-warm, resolve, score, aggregate.
//!
//! The cache is injected, so one long-lived cache (and its stats) can be
//! shared by several analyzers or reused across runs in tests.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheStatsSnapshot, CompilationCache, PreWarmSummary, ResolveMode};
use crate::matcher::Matcher;
use crate::obs;
use crate::risk::{assess, LevelSummary, RiskAssessment};

/// A pattern that could not be compiled and was scored from its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileFailure {
    pub pattern: String,
    pub error: String,
}

/// Aggregate of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: String,
    pub base: String,
    /// One per input pattern, in input order.
    pub assessments: Vec<RiskAssessment>,
    pub cache: CacheStatsSnapshot,
    pub compile_failures: Vec<CompileFailure>,
    /// Patterns whose compile did not settle within the timeout.
    pub timed_out: Vec<String>,
    /// Patterns already present in the persistent manifest at start.
    pub known_from_previous_runs: usize,
    pub duration_ms: u64,
}

impl AnalysisReport {
    pub fn summary(&self) -> LevelSummary {
        LevelSummary::from_assessments(&self.assessments)
    }
}

pub struct Analyzer {
    cache: CompilationCache,
    compile_timeout: Option<Duration>,
}

impl Analyzer {
    pub fn new(cache: CompilationCache) -> Self {
        Self {
            cache,
            compile_timeout: None,
        }
    }

    /// Bound the total time one run spends waiting on compiles. Pre-warm and
    /// the main pass share a single deadline. Unsettled patterns are scored
    /// from their text and listed in `timed_out`.
    pub fn with_compile_timeout(mut self, limit: Duration) -> Self {
        self.compile_timeout = Some(limit);
        self
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub async fn analyze(&self, patterns: &[String], base: &str) -> AnalysisReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::analysis_span(&run_id);
        self.run(run_id, patterns, base).instrument(span).await
    }

    async fn run(&self, run_id: String, patterns: &[String], base: &str) -> AnalysisReport {
        let started = Instant::now();
        obs::emit_analysis_started(&run_id, patterns.len(), base);
        self.cache.stats().reset();

        let known_from_previous_runs = self.count_known(patterns, base);
        let deadline = self.compile_timeout.map(|limit| tokio::time::Instant::now() + limit);
        let warm = self.pre_warm(patterns, base, deadline).await;
        tracing::debug!(
            requested = warm.requested,
            compiled = warm.compiled,
            failed = warm.failed,
            "pre-warm complete"
        );

        let mut assessments = Vec::with_capacity(patterns.len());
        let mut compile_failures = Vec::new();
        let mut timed_out = Vec::new();

        for pattern in patterns {
            let outcome = match deadline {
                Some(deadline) => {
                    let remaining =
                        deadline.saturating_duration_since(tokio::time::Instant::now());
                    self.cache.resolve_with_timeout(pattern, base, remaining).await
                }
                None => {
                    let resolution = self.cache.resolve(pattern, base);
                    if resolution.mode() != ResolveMode::Sync {
                        tracing::debug!(%pattern, mode = ?resolution.mode(), "main pass suspended");
                    }
                    Some(resolution.outcome().await)
                }
            };

            let matcher = match outcome {
                Some(Ok(entry)) => Arc::clone(&entry.matcher),
                Some(Err(err)) => {
                    compile_failures.push(CompileFailure {
                        pattern: pattern.clone(),
                        error: err.to_string(),
                    });
                    Arc::new(Matcher::sentinel(pattern, base))
                }
                None => {
                    tracing::warn!(%pattern, "compile timed out; scoring pattern text");
                    timed_out.push(pattern.clone());
                    Arc::new(Matcher::sentinel(pattern, base))
                }
            };
            assessments.push(assess(&matcher));
        }

        self.flush_store();
        self.cache.stats().flush();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        obs::emit_analysis_finished(&run_id, duration_ms, patterns.len(), compile_failures.len());

        AnalysisReport {
            run_id,
            base: base.to_string(),
            assessments,
            cache: self.cache.stats().snapshot(),
            compile_failures,
            timed_out,
            known_from_previous_runs,
            duration_ms,
        }
    }

    /// Give the compiles that timed out in `report` up to `grace` to settle,
    /// then save what they recorded. Compiles still pending after `grace`
    /// are dropped.
    pub async fn settle_timed_out(
        &self,
        report: &AnalysisReport,
        grace: Duration,
    ) -> PreWarmSummary {
        if report.timed_out.is_empty() {
            return PreWarmSummary::default();
        }
        let warm = self.cache.pre_warm(&report.timed_out, &report.base);
        let summary = match tokio::time::timeout(grace, warm).await {
            Ok(summary) => summary,
            Err(_) => {
                tracing::warn!(
                    pending = report.timed_out.len(),
                    "timed-out compiles still pending; dropping them"
                );
                PreWarmSummary {
                    requested: report.timed_out.len(),
                    ..PreWarmSummary::default()
                }
            }
        };
        self.flush_store();
        summary
    }

    fn flush_store(&self) {
        if let Some(store) = self.cache.store() {
            let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(saved) = store.flush_if_dirty() {
                tracing::debug!(written = saved.written, evicted = saved.evicted, "manifest saved");
            }
        }
    }

    async fn pre_warm(
        &self,
        patterns: &[String],
        base: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> PreWarmSummary {
        let warm = self.cache.pre_warm(patterns, base);
        match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, warm).await {
                Ok(summary) => summary,
                Err(_) => {
                    tracing::warn!("pre-warm hit the compile deadline");
                    PreWarmSummary {
                        requested: patterns.len(),
                        ..PreWarmSummary::default()
                    }
                }
            },
            None => warm.await,
        }
    }

    fn count_known(&self, patterns: &[String], base: &str) -> usize {
        let Some(store) = self.cache.store() else {
            return 0;
        };
        let store = store.lock().unwrap_or_else(PoisonError::into_inner);
        patterns.iter().filter(|p| store.contains(base, p)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::CompileError;
    use crate::matcher::{compile_pattern, PatternCompiler, RegexPatternCompiler};
    use crate::persist::{PersistentCacheStore, StoreOptions};
    use crate::risk::RiskLevel;

    struct SlowCompiler(Duration);

    #[async_trait]
    impl PatternCompiler for SlowCompiler {
        async fn compile(&self, pattern: &str, base: &str) -> Result<Matcher, CompileError> {
            tokio::time::sleep(self.0).await;
            compile_pattern(pattern, base)
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(CompilationCache::new(Arc::new(RegexPatternCompiler)))
    }

    fn owned(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_main_pass_is_all_sync() {
        let a = analyzer();
        let report = a.analyze(&owned(&["/a", "/b/:id", "/a"]), "").await;

        assert_eq!(report.assessments.len(), 3);
        // pre-warm: 2 misses + 1 async hit on the duplicate; main pass: 3 sync hits
        assert_eq!(report.cache.misses, 2);
        assert_eq!(report.cache.sync_hits, 3);
        assert_eq!(report.cache.hits, report.cache.sync_hits + report.cache.async_hits);
        assert!(report.compile_failures.is_empty());
    }

    #[tokio::test]
    async fn test_compile_failure_uses_sentinel() {
        let a = analyzer();
        let report = a.analyze(&owned(&["/bad(", "/files/*"]), "").await;

        assert_eq!(report.compile_failures.len(), 1);
        assert_eq!(report.compile_failures[0].pattern, "/bad(");
        assert_eq!(report.assessments[0].pattern, "/bad(");
        assert_eq!(report.assessments[1].level, RiskLevel::Medium);
        assert_eq!(report.cache.errors, 1);
    }

    #[tokio::test]
    async fn test_summary_and_order() {
        let a = analyzer();
        let report = a
            .analyze(&owned(&["/items/:id", "/*/*/*", "/files/*"]), "https://api.test")
            .await;
        let s = report.summary();
        assert_eq!((s.low, s.medium, s.high), (1, 1, 1));
        assert_eq!(report.assessments[1].pattern, "/*/*/*");
        assert_eq!(report.base, "https://api.test");
    }

    #[tokio::test]
    async fn test_stats_reset_per_run() {
        let a = analyzer();
        a.analyze(&owned(&["/a"]), "").await;
        let second = a.analyze(&owned(&["/a"]), "").await;
        // already compiled by the first run: no misses this time
        assert_eq!(second.cache.misses, 0);
        assert_eq!(second.cache.sync_hits, 2);
    }

    #[tokio::test]
    async fn test_timeout_path_still_scores() {
        let a = analyzer().with_compile_timeout(Duration::from_secs(5));
        let report = a.analyze(&owned(&["/files/*"]), "").await;
        assert!(report.timed_out.is_empty());
        assert_eq!(report.assessments[0].level, RiskLevel::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_one_deadline_for_the_run() {
        let cache = CompilationCache::new(Arc::new(SlowCompiler(Duration::from_secs(10))));
        let a = Analyzer::new(cache).with_compile_timeout(Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let report = a.analyze(&owned(&["/a", "/b", "/c"]), "").await;

        assert_eq!(report.timed_out.len(), 3);
        assert_eq!(report.assessments.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_compiles_are_saved_after_settling() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistentCacheStore::open(dir.path(), StoreOptions::default());
        let cache = CompilationCache::with_store(
            Arc::new(SlowCompiler(Duration::from_millis(500))),
            Arc::new(Mutex::new(store)),
        );
        let a = Analyzer::new(cache).with_compile_timeout(Duration::from_millis(100));

        let report = a.analyze(&owned(&["/late"]), "").await;
        assert_eq!(report.timed_out, vec!["/late".to_string()]);

        let settled = a.settle_timed_out(&report, Duration::from_secs(5)).await;
        assert_eq!(settled.compiled, 1);

        let reopened = PersistentCacheStore::open(dir.path(), StoreOptions::default());
        assert!(reopened.contains("", "/late"));
    }
}

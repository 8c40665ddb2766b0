//! Structured observability hooks for routeguard analysis runs.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `AnalysisSpan` RAII guard
//! - Emission functions for key events: analysis start/finish, compiles,
//!   persistence failures, gate and baseline verdicts, remediation
//!
//! Events are emitted at `info!` level unless noted (filter with `RUST_LOG`).

use tracing::{debug, info, warn};

use crate::cache::CacheKey;

/// RAII guard that enters a run-scoped span for the duration of an analysis.
///
/// # Example
///
/// ```ignore
/// let _span = AnalysisSpan::enter("6f1c...");
/// // every event below is tagged with run_id = "6f1c..."
/// ```
pub struct AnalysisSpan {
    _span: tracing::span::EnteredSpan,
}

impl AnalysisSpan {
    /// Create and enter a span tagged with the run id.
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: analysis_span(run_id).entered(),
        }
    }
}

/// The run-scoped span, for instrumenting futures.
pub fn analysis_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("routeguard.analysis", run_id = %run_id)
}

/// Emit event: analysis started over `pattern_count` patterns.
pub fn emit_analysis_started(run_id: &str, pattern_count: usize, base: &str) {
    info!(
        event = "analysis.started",
        run_id = %run_id,
        pattern_count = pattern_count,
        base = %base,
    );
}

/// Emit event: analysis finished.
pub fn emit_analysis_finished(run_id: &str, duration_ms: u64, patterns: usize, failures: usize) {
    info!(
        event = "analysis.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        patterns = patterns,
        compile_failures = failures,
    );
}

/// Emit event: first compile of a cache key completed (debug level).
pub fn emit_pattern_compiled(key: &CacheKey, duration_ns: u64) {
    debug!(event = "pattern.compiled", key = %key, duration_ns = duration_ns);
}

/// Emit event: a pattern failed to compile. A sentinel matcher takes its place.
pub fn emit_pattern_compile_failed(key: &CacheKey, error: &dyn std::fmt::Display) {
    warn!(event = "pattern.compile_failed", key = %key, error = %error);
}

/// Emit event: best-effort persistence failed; the run continues in memory.
pub fn emit_persist_error(operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "persist.error", operation = %operation, error = %error);
}

/// Emit event: CI gate evaluated.
pub fn emit_gate_evaluated(threshold: &str, total: usize, violations: usize, passed: bool) {
    info!(
        event = "gate.evaluated",
        threshold = %threshold,
        total_patterns = total,
        violations = violations,
        passed = passed,
    );
}

/// Emit event: current run compared against a baseline.
pub fn emit_baseline_compared(matches: bool, new: usize, removed: usize, changed: usize) {
    info!(
        event = "baseline.compared",
        matches = matches,
        new_patterns = new,
        removed_patterns = removed,
        risk_changes = changed,
    );
}

/// Emit event: remediation rewrote or annotated a pattern.
pub fn emit_remediation_applied(pattern: &str, changes: usize, score_before: u32, score_after: u32) {
    info!(
        event = "remediation.applied",
        pattern = %pattern,
        changes = changes,
        score_before = score_before,
        score_after = score_after,
    );
}

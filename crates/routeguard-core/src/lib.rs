//! Routeguard Core Library
//!
//! Compiles route patterns through a memoizing cache, scores them for
//! security risk, rewrites risky ones, and gates CI on the result.

pub mod analyzer;
pub mod baseline;
pub mod cache;
pub mod ci_gate;
pub mod config;
pub mod error;
pub mod matcher;
pub mod obs;
pub mod patterns;
pub mod persist;
pub mod remediation;
pub mod reporting;
pub mod risk;
pub mod telemetry;

pub use analyzer::{AnalysisReport, Analyzer, CompileFailure};
pub use baseline::{
    compare, load_baseline, snapshot, write_baseline, BaselineComparison, BaselinePattern,
    BaselineSnapshot, RiskChange, SummaryDrift,
};
pub use cache::{
    CacheKey, CacheStats, CacheStatsSnapshot, CompilationCache, CompileOutcome,
    CompiledPatternEntry, PreWarmSummary, Resolution, ResolveMode, SharedStore,
};
pub use ci_gate::{evaluate, CIGateResult, CIGateViolation, GateOutcome};
pub use config::RouteguardConfig;
pub use error::{BaselineError, CompileError, PersistenceError, Result, RouteguardError};
pub use matcher::{Matcher, PatternCompiler, PatternFacts, RegexPatternCompiler};
pub use patterns::{load_patterns, parse_patterns};
pub use persist::{
    entry_hash, CacheManifest, LoadStatus, PersistentCacheStats, PersistentCacheStore,
    PersistentEntry, SaveOutcome, StoreOptions, MAX_ENTRIES,
};
pub use remediation::{remediate, remediate_all, RemediationResult};
pub use reporting::{
    default_fixed_path, render_remediated, render_text_report, write_remediated,
    write_report_json, RunReport,
};
pub use risk::{
    score_pattern, score_text, LevelSummary, RiskAssessment, RiskCategory, RiskFinding, RiskLevel,
};

/// Crate version, kept in lockstep with the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

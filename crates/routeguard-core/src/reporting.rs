use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::AnalysisReport;
use crate::ci_gate::GateOutcome;
use crate::remediation::RemediationResult;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Machine-readable artifact for one `analyze` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub analysis: AnalysisReport,
    pub gate: Option<GateOutcome>,
    pub remediation: Vec<RemediationResult>,
}

impl RunReport {
    pub fn new(analysis: AnalysisReport) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            analysis,
            gate: None,
            remediation: Vec::new(),
        }
    }

    pub fn with_gate(mut self, gate: GateOutcome) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_remediation(mut self, remediation: Vec<RemediationResult>) -> Self {
        self.remediation = remediation;
        self
    }
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &RunReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Plain-text summary for terminals and CI logs.
pub fn render_text_report(report: &RunReport) -> String {
    let analysis = &report.analysis;
    let summary = analysis.summary();
    let mut out = String::new();

    let _ = writeln!(out, "routeguard run {}", analysis.run_id);
    for a in &analysis.assessments {
        let _ = writeln!(out, "[{:<6}] {:>2}  {}", a.level.as_str(), a.score, a.pattern);
        for f in &a.findings {
            let _ = writeln!(out, "           - {} ({}): {}", f.rule_id, f.severity, f.message);
        }
    }
    for failure in &analysis.compile_failures {
        let _ = writeln!(out, "compile failed: {} ({})", failure.pattern, failure.error);
    }
    for pattern in &analysis.timed_out {
        let _ = writeln!(out, "compile timed out: {pattern}");
    }
    let _ = writeln!(
        out,
        "summary: low={} medium={} high={} (patterns={}, cache hits={} misses={}, {}ms)",
        summary.low,
        summary.medium,
        summary.high,
        analysis.assessments.len(),
        analysis.cache.hits,
        analysis.cache.misses,
        analysis.duration_ms
    );

    if let Some(outcome) = &report.gate {
        let gate = &outcome.gate;
        let _ = writeln!(
            out,
            "gate: {} (threshold={}, violations={})",
            if gate.passed { "PASS" } else { "FAIL" },
            gate.threshold,
            gate.violations.len()
        );
        for v in &gate.violations {
            let _ = writeln!(out, "  #{} [{}] {}", v.index, v.level, v.pattern);
        }
        if let Some(err) = &outcome.baseline_error {
            let _ = writeln!(out, "baseline skipped: {err}");
        }
        if let Some(cmp) = &outcome.comparison {
            let _ = writeln!(
                out,
                "baseline: {} (new={}, removed={}, changed={})",
                if cmp.matches { "match" } else { "DRIFT" },
                cmp.new_patterns.len(),
                cmp.removed_patterns.len(),
                cmp.risk_changes.len()
            );
        }
    }

    let fixed = report.remediation.iter().filter(|r| r.changed()).count();
    if !report.remediation.is_empty() {
        let _ = writeln!(out, "remediation: {fixed} of {} rewritten", report.remediation.len());
    }
    out
}

/// Remediated output: one block per input pattern. Review notes and change
/// descriptions come first as `# ` comment lines.
pub fn render_remediated(results: &[RemediationResult]) -> String {
    let mut out = String::new();
    for r in results {
        for note in &r.review_notes {
            let _ = writeln!(out, "# {note}");
        }
        for change in &r.applied_changes {
            let _ = writeln!(out, "# {change}");
        }
        if r.changed() {
            let _ = writeln!(
                out,
                "# was: {} (score {} -> {})",
                r.original, r.score_before, r.score_after
            );
        }
        let _ = writeln!(out, "{}", r.fixed);
    }
    out
}

/// `<input>.fixed.txt` next to the input.
pub fn default_fixed_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".fixed.txt");
    PathBuf::from(name)
}

pub fn write_remediated(path: &Path, results: &[RemediationResult]) -> Result<()> {
    std::fs::write(path, render_remediated(results)).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

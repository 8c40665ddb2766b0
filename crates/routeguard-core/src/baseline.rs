//! Baseline snapshots and drift comparison.

use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::BaselineError;
use crate::obs;
use crate::risk::{LevelSummary, RiskAssessment, RiskLevel};

/// One pattern as captured in a baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselinePattern {
    pub pattern: String,
    pub level: RiskLevel,
    pub score: u32,
}

/// Serializable projection of a batch, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub patterns: Vec<BaselinePattern>,
    pub summary: LevelSummary,
    pub threshold: RiskLevel,
}

/// Signed per-level difference, current minus baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDrift {
    pub low: i64,
    pub medium: i64,
    pub high: i64,
}

impl SummaryDrift {
    pub fn is_zero(&self) -> bool {
        self.low == 0 && self.medium == 0 && self.high == 0
    }
}

/// A pattern present in both snapshots whose level moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskChange {
    pub pattern: String,
    pub from: RiskLevel,
    pub to: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineComparison {
    /// Deep, order-sensitive equality of patterns and summary.
    pub matches: bool,
    pub summary_drift: SummaryDrift,
    /// In current, not in baseline (current order).
    pub new_patterns: Vec<String>,
    /// In baseline, not in current (baseline order).
    pub removed_patterns: Vec<String>,
    pub risk_changes: Vec<RiskChange>,
}

pub fn snapshot(assessments: &[RiskAssessment], threshold: RiskLevel) -> BaselineSnapshot {
    BaselineSnapshot {
        patterns: assessments
            .iter()
            .map(|a| BaselinePattern {
                pattern: a.pattern.clone(),
                level: a.level,
                score: a.score,
            })
            .collect(),
        summary: LevelSummary::from_assessments(assessments),
        threshold,
    }
}

/// Compare `current` against `baseline`. The threshold is a run parameter
/// and does not take part in `matches`.
pub fn compare(current: &BaselineSnapshot, baseline: &BaselineSnapshot) -> BaselineComparison {
    let matches = current.patterns == baseline.patterns && current.summary == baseline.summary;

    let current_set: BTreeSet<&str> = current.patterns.iter().map(|p| p.pattern.as_str()).collect();
    let baseline_set: BTreeSet<&str> =
        baseline.patterns.iter().map(|p| p.pattern.as_str()).collect();

    let new_patterns = ordered_difference(&current.patterns, &baseline_set);
    let removed_patterns = ordered_difference(&baseline.patterns, &current_set);

    let mut risk_changes = Vec::new();
    let mut seen = BTreeSet::new();
    for cur in &current.patterns {
        if !seen.insert(cur.pattern.as_str()) {
            continue;
        }
        if let Some(old) = baseline.patterns.iter().find(|b| b.pattern == cur.pattern) {
            if old.level != cur.level {
                risk_changes.push(RiskChange {
                    pattern: cur.pattern.clone(),
                    from: old.level,
                    to: cur.level,
                });
            }
        }
    }

    let drift = |level: RiskLevel| {
        current.summary.count(level) as i64 - baseline.summary.count(level) as i64
    };
    let comparison = BaselineComparison {
        matches,
        summary_drift: SummaryDrift {
            low: drift(RiskLevel::Low),
            medium: drift(RiskLevel::Medium),
            high: drift(RiskLevel::High),
        },
        new_patterns,
        removed_patterns,
        risk_changes,
    };

    obs::emit_baseline_compared(
        comparison.matches,
        comparison.new_patterns.len(),
        comparison.removed_patterns.len(),
        comparison.risk_changes.len(),
    );
    comparison
}

fn ordered_difference(from: &[BaselinePattern], exclude: &BTreeSet<&str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    from.iter()
        .map(|p| p.pattern.as_str())
        .filter(|p| !exclude.contains(p) && seen.insert(*p))
        .map(str::to_string)
        .collect()
}

pub fn load_baseline(path: &Path) -> Result<BaselineSnapshot, BaselineError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BaselineError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(BaselineError::Io(e)),
    };
    serde_json::from_str(&content).map_err(|source| BaselineError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `snapshot` as pretty JSON via temp file and rename.
pub fn write_baseline(path: &Path, snapshot: &BaselineSnapshot) -> Result<(), BaselineError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let content = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&content)?;
    tmp.persist(path).map_err(|e| BaselineError::Io(e.error))?;
    Ok(())
}

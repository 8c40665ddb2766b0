//! CI gate over a batch of risk assessments.
//!
//! Evaluates assessments against a [`RiskLevel`] threshold to produce a
//! [`CIGateResult`]. A pattern violates when its level rank is at or above
//! the threshold rank. [`GateOutcome`] folds in an optional baseline
//! comparison and owns the process exit contract.

use serde::{Deserialize, Serialize};

use crate::baseline::BaselineComparison;
use crate::obs;
use crate::risk::{LevelSummary, RiskAssessment, RiskLevel};

// ---------------------------------------------------------------------------
// Gate result
// ---------------------------------------------------------------------------

/// A pattern at or above the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CIGateViolation {
    /// Position in the input batch.
    pub index: usize,
    pub pattern: String,
    pub level: RiskLevel,
    pub score: u32,
}

/// The outcome of gating one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CIGateResult {
    /// Whether no pattern reached the threshold.
    pub passed: bool,
    pub threshold: RiskLevel,
    pub total_patterns: usize,
    /// Violations in input order (empty when passed).
    pub violations: Vec<CIGateViolation>,
    /// Counts of every level, violating or not.
    pub summary: LevelSummary,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluate `assessments` against `threshold`.
pub fn evaluate(assessments: &[RiskAssessment], threshold: RiskLevel) -> CIGateResult {
    let violations: Vec<CIGateViolation> = assessments
        .iter()
        .enumerate()
        .filter(|(_, a)| a.level.rank() >= threshold.rank())
        .map(|(index, a)| CIGateViolation {
            index,
            pattern: a.pattern.clone(),
            level: a.level,
            score: a.score,
        })
        .collect();

    let result = CIGateResult {
        passed: violations.is_empty(),
        threshold,
        total_patterns: assessments.len(),
        violations,
        summary: LevelSummary::from_assessments(assessments),
    };

    obs::emit_gate_evaluated(
        threshold.as_str(),
        result.total_patterns,
        result.violations.len(),
        result.passed,
    );
    result
}

// ---------------------------------------------------------------------------
// Overall outcome
// ---------------------------------------------------------------------------

/// Gate result combined with the optional baseline check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate: CIGateResult,
    /// Present when a baseline was loaded and compared.
    pub comparison: Option<BaselineComparison>,
    /// Why a requested baseline could not be used; gating still applies.
    pub baseline_error: Option<String>,
}

impl GateOutcome {
    pub fn new(gate: CIGateResult) -> Self {
        Self {
            gate,
            comparison: None,
            baseline_error: None,
        }
    }

    pub fn with_comparison(mut self, comparison: BaselineComparison) -> Self {
        self.comparison = Some(comparison);
        self
    }

    pub fn with_baseline_error(mut self, error: impl Into<String>) -> Self {
        self.baseline_error = Some(error.into());
        self
    }

    /// `gate.passed` and, when a baseline was compared, `matches`.
    pub fn passed(&self) -> bool {
        self.gate.passed && self.comparison.as_ref().map_or(true, |c| c.matches)
    }

    /// 0 on overall pass, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}

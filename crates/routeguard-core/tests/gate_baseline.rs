//! CI gate and baseline comparator over real scored patterns.

use routeguard_core::{
    compare, evaluate, load_baseline, score_text, snapshot, write_baseline, GateOutcome,
    RiskAssessment, RiskLevel,
};

fn score_all(patterns: &[&str]) -> Vec<RiskAssessment> {
    patterns.iter().map(|p| score_text(p)).collect()
}

/// Three low, two medium, one high.
fn mixed() -> Vec<RiskAssessment> {
    let batch = score_all(&["/a", "/files/*", "/b/:id", "/*/*/*", "/docs/*", "/c"]);
    let levels: Vec<RiskLevel> = batch.iter().map(|a| a.level).collect();
    assert_eq!(
        levels,
        vec![
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::Low,
            RiskLevel::High,
            RiskLevel::Medium,
            RiskLevel::Low
        ]
    );
    batch
}

#[test]
fn medium_threshold_fails_with_three_violations() {
    let result = evaluate(&mixed(), RiskLevel::Medium);
    assert!(!result.passed);
    assert_eq!(result.violations.len(), 3);
    assert_eq!(
        (result.summary.low, result.summary.medium, result.summary.high),
        (3, 2, 1)
    );
    assert_eq!(GateOutcome::new(result).exit_code(), 1);
}

#[test]
fn passed_iff_no_level_reaches_threshold() {
    let batch = mixed();
    for threshold in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
        let result = evaluate(&batch, threshold);
        let any = batch.iter().any(|a| a.level.rank() >= threshold.rank());
        assert_eq!(result.passed, !any, "{threshold}");
    }
}

#[test]
fn snapshot_compares_equal_to_itself() {
    let batch = mixed();
    let snap = snapshot(&batch, RiskLevel::Medium);
    let cmp = compare(&snapshot(&batch, RiskLevel::High), &snap);
    assert!(cmp.matches);
    assert!(cmp.new_patterns.is_empty() && cmp.removed_patterns.is_empty());
}

#[test]
fn new_and_removed_are_exact_set_differences() {
    let old = snapshot(&score_all(&["/a", "/b", "/c"]), RiskLevel::Medium);
    let new = snapshot(&score_all(&["/c", "/d", "/a", "/e"]), RiskLevel::Medium);
    let cmp = compare(&new, &old);

    assert_eq!(cmp.new_patterns, vec!["/d", "/e"]);
    assert_eq!(cmp.removed_patterns, vec!["/b"]);
    assert!(!cmp.matches);
    assert_eq!(cmp.summary_drift.low, 1);
}

#[test]
fn overall_outcome_combines_gate_and_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baseline.json");

    let batch = score_all(&["/a", "/files/*"]);
    write_baseline(&path, &snapshot(&batch, RiskLevel::High)).unwrap();
    let baseline = load_baseline(&path).unwrap();

    let same = GateOutcome::new(evaluate(&batch, RiskLevel::High))
        .with_comparison(compare(&snapshot(&batch, RiskLevel::High), &baseline));
    assert_eq!(same.exit_code(), 0);

    let drifted_batch = score_all(&["/a", "/files/*", "/*/*/*"]);
    let drifted = GateOutcome::new(evaluate(&drifted_batch, RiskLevel::High))
        .with_comparison(compare(&snapshot(&drifted_batch, RiskLevel::High), &baseline));
    assert!(!drifted.gate.passed);
    assert_eq!(drifted.exit_code(), 1);

    // Drift alone fails even when the gate passes.
    let quiet_batch = score_all(&["/a"]);
    let quiet = GateOutcome::new(evaluate(&quiet_batch, RiskLevel::High))
        .with_comparison(compare(&snapshot(&quiet_batch, RiskLevel::High), &baseline));
    assert!(quiet.gate.passed);
    assert_eq!(quiet.exit_code(), 1);
}

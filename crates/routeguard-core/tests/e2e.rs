//! End-to-end scenarios through the analyzer.

use std::sync::Arc;

use routeguard_core::risk::rule;
use routeguard_core::{
    evaluate, remediate, Analyzer, CompilationCache, RegexPatternCompiler, RiskLevel,
};

fn analyzer() -> Analyzer {
    Analyzer::new(CompilationCache::new(Arc::new(RegexPatternCompiler)))
}

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

#[tokio::test]
async fn alternation_is_not_command_injection() {
    let report = analyzer()
        .analyze(&owned(&["/items/:id", "/(items|products)/:id"]), "")
        .await;

    for a in &report.assessments {
        assert_eq!(a.level, RiskLevel::Low, "{}: {:?}", a.pattern, a.findings);
        assert!(!a.has_rule(rule::COMMAND_INJECTION));
    }
    assert!(evaluate(&report.assessments, RiskLevel::Medium).passed);
}

#[tokio::test]
async fn dynamic_host_wildcard_is_remediated() {
    let pattern = "https://:subdomain.example.com/:path*";
    let report = analyzer().analyze(&owned(&[pattern]), "").await;
    let assessment = &report.assessments[0];
    assert!(assessment.has_rule(rule::WILDCARD_DANGER));

    let fixed = remediate(pattern);
    assert!(!fixed.fixed.contains(":path*"));
    assert!(fixed.fixed.ends_with(":path(allowed1|allowed2|allowed3)"));
    assert_eq!(fixed.score_before, assessment.score);
    assert!(fixed.score_after < fixed.score_before);

    // The rewritten pattern still compiles and matches the listed values.
    let again = analyzer().analyze(&[fixed.fixed.clone()], "").await;
    assert!(again.compile_failures.is_empty());
    assert_eq!(again.assessments[0].score, fixed.score_after);
}

#[tokio::test]
async fn invalid_pattern_does_not_abort_batch() {
    let report = analyzer()
        .analyze(&owned(&["/ok", "/broken(", "/files/*"]), "https://api.test")
        .await;
    assert_eq!(report.assessments.len(), 3);
    assert_eq!(report.compile_failures.len(), 1);
    assert_eq!(report.summary().medium, 1);
}

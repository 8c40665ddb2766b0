//! Risk scoring for route patterns.
//!
//! Scoring is a pure function of the pattern text and the matcher facts.
//! Every rule in the table is evaluated (no early exit) and each rule that
//! fires adds its fixed weight. The level follows fixed cut points:
//! score >= 5 is high, score >= 2 is medium, anything lower is low.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RouteguardError;
use crate::matcher::{Matcher, PatternFacts};

/// Rule identifiers, shared with remediation.
pub mod rule {
    pub const INJECTED_INPUT: &str = "injected-input";
    pub const PATH_TRAVERSAL: &str = "path-traversal";
    pub const OPEN_REDIRECT: &str = "open-redirect";
    pub const SSRF_INTERNAL_HOST: &str = "ssrf-internal-host";
    pub const SSRF_DYNAMIC_HOST: &str = "ssrf-dynamic-host";
    pub const REDOS_QUANTIFIER: &str = "redos-quantifier";
    pub const WILDCARD_DANGER: &str = "wildcard-danger";
    pub const WILDCARD_EXCESSIVE: &str = "wildcard-excessive";
    pub const WILDCARD_LEADING: &str = "wildcard-leading";
    pub const CREDENTIAL_SEGMENT: &str = "credential-segment";
    pub const BASIC_AUTH: &str = "basic-auth";
    pub const XSS_MARKER: &str = "xss-marker";
    pub const SQL_INJECTION: &str = "sql-injection";
    pub const COMMAND_INJECTION: &str = "command-injection";
}

/// Wildcards at or above this count are excessive.
pub const EXCESSIVE_WILDCARDS: usize = 3;

/// Ordered risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const HIGH_CUT: u32 = 5;
    pub const MEDIUM_CUT: u32 = 2;

    pub fn from_score(score: u32) -> Self {
        if score >= Self::HIGH_CUT {
            Self::High
        } else if score >= Self::MEDIUM_CUT {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Gate rank: low=1, medium=2, high=3.
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn from_weight(weight: u32) -> Self {
        match weight {
            0 | 1 => Self::Low,
            2 => Self::Medium,
            _ => Self::High,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = RouteguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(RouteguardError::InvalidThreshold(s.to_string())),
        }
    }
}

/// What kind of weakness a rule looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskCategory {
    InjectedInput,
    PathTraversal,
    OpenRedirect,
    Ssrf,
    Redos,
    Wildcard,
    Credential,
    Xss,
    SqlInjection,
    CommandInjection,
}

/// A rule that fired for a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFinding {
    pub rule_id: String,
    pub category: RiskCategory,
    pub severity: RiskLevel,
    pub message: String,
}

/// Scored outcome for one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub pattern: String,
    pub findings: Vec<RiskFinding>,
    pub score: u32,
    pub level: RiskLevel,
}

impl RiskAssessment {
    pub fn has_rule(&self, rule_id: &str) -> bool {
        self.findings.iter().any(|f| f.rule_id == rule_id)
    }
}

/// Count of assessments per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl LevelSummary {
    pub fn from_assessments(assessments: &[RiskAssessment]) -> Self {
        assessments.iter().fold(Self::default(), |mut acc, a| {
            acc.add(a.level);
            acc
        })
    }

    pub fn add(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::Low => self.low += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::High => self.high += 1,
        }
    }

    pub fn count(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.high
    }
}

/// One entry of the rule table.
pub struct RiskRule {
    pub id: &'static str,
    pub category: RiskCategory,
    pub weight: u32,
    pub message: &'static str,
    check: fn(&str, &PatternFacts) -> bool,
}

impl RiskRule {
    pub fn severity(&self) -> RiskLevel {
        RiskLevel::from_weight(self.weight)
    }

    pub fn fires(&self, pattern: &str, facts: &PatternFacts) -> bool {
        (self.check)(pattern, facts)
    }
}

impl fmt::Debug for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskRule")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("weight", &self.weight)
            .finish()
    }
}

fn re(src: &str) -> Regex {
    Regex::new(src).expect("rule regex is valid")
}

static INJECTED_INPUT_RE: Lazy<Regex> = Lazy::new(|| re(r"\$\{|\{\{|<%|#\{|%\{"));

/// A `..` segment: bounded by a separator or the start on the left and by
/// anything that cannot continue a segment name on the right.
static TRAVERSAL_RE: Lazy<Regex> =
    Lazy::new(|| re(r"(?:^|[/\\])\.\.(?:[^A-Za-z0-9_.\-]|$)"));

static OPEN_REDIRECT_RE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)^//|[/?&;](?:redirect(?:_?ur[il])?|return(?:_?to|_?url)?|next|goto|continue|dest(?:ination)?|callback)[/=][:*(]")
});

static SSRF_INTERNAL_HOST_RE: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)://(?:[^/@]*@)?(?:",
        r"localhost|0\.0\.0\.0|127\.\d{1,3}\.\d{1,3}\.\d{1,3}",
        r"|10\.\d{1,3}\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3}",
        r"|172\.(?:1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3}|169\.254\.\d{1,3}\.\d{1,3}",
        r"|\[::1?\]|metadata\.google\.internal|[^/:@]*\.internal|[^/:@]*\.local",
        r")(?:[^A-Za-z0-9_.\-]|$)"
    ))
});

static SSRF_DYNAMIC_HOST_RE: Lazy<Regex> =
    Lazy::new(|| re(r"://(?:[^/@]*[.@])?(?::[A-Za-z_]|\*)"));

static NESTED_QUANTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| re(r"\([^()]*[+*][^()]*\)[+*{]|\([^()]*\|[^()]*\)[+*{]"));

static LEADING_WILDCARD_RE: Lazy<Regex> =
    Lazy::new(|| re(r"^/?(?:\*|:[A-Za-z_][A-Za-z0-9_]*(?:\([^)]*\))?[*+])"));

static CREDENTIAL_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)(?:^|[/:?&=])(?:token|access[_-]?token|refresh[_-]?token|auth[_-]?token",
        r"|password|passwd|secret|client[_-]?secret|api[_-]?key|apikey|private[_-]?key",
        r"|credentials?|session[_-]?id)(?:[^A-Za-z0-9]|$)"
    ))
});

static BASIC_AUTH_RE: Lazy<Regex> = Lazy::new(|| re(r"://[^/@\s]+@"));

static XSS_RE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)<\s*(?:script|img|iframe|svg)|javascript:|on(?:error|load|click|mouseover)\s*=|%3c\s*script|&lt;\s*script")
});

static SQL_INJECTION_RE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)'\s*(?:or|and)\s|union\s+(?:all\s+)?select|;\s*(?:drop|delete|insert|update)\s|'\s*--|\bor\s+1\s*=\s*1|\bsleep\s*\(\s*\d")
});

static SHELL_META_RE: Lazy<Regex> = Lazy::new(|| re(r"[;|`]|\$\(|&&"));

/// Replace the contents of every balanced `( ... )` group with nothing,
/// keeping the parentheses. An unbalanced tail is kept verbatim.
///
/// `/(items|products)/:id` becomes `/()/:id`, so alternation pipes are not
/// mistaken for shell pipes.
pub fn strip_group_contents(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut depth = 0usize;
    let mut open_at = 0usize;
    let mut escaped = false;

    for (i, c) in pattern.char_indices() {
        if escaped {
            escaped = false;
            if depth == 0 {
                out.push(c);
            }
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                if depth == 0 {
                    out.push(c);
                }
            }
            '(' => {
                if depth == 0 {
                    open_at = i;
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    out.push_str("()");
                }
            }
            _ if depth > 0 => {}
            _ => out.push(c),
        }
    }

    if depth > 0 {
        out.push_str(&pattern[open_at..]);
    }
    out
}

fn injected_input(p: &str, _: &PatternFacts) -> bool {
    INJECTED_INPUT_RE.is_match(p)
}

fn path_traversal(p: &str, _: &PatternFacts) -> bool {
    TRAVERSAL_RE.is_match(p)
}

fn open_redirect(p: &str, _: &PatternFacts) -> bool {
    OPEN_REDIRECT_RE.is_match(p)
}

fn ssrf_internal_host(p: &str, _: &PatternFacts) -> bool {
    SSRF_INTERNAL_HOST_RE.is_match(p)
}

fn ssrf_dynamic_host(p: &str, _: &PatternFacts) -> bool {
    SSRF_DYNAMIC_HOST_RE.is_match(p)
}

fn redos_quantifier(p: &str, facts: &PatternFacts) -> bool {
    facts.has_regex_groups && NESTED_QUANTIFIER_RE.is_match(p)
}

fn wildcard_danger(_: &str, facts: &PatternFacts) -> bool {
    facts.wildcard_count > 0
}

fn wildcard_excessive(_: &str, facts: &PatternFacts) -> bool {
    facts.wildcard_count >= EXCESSIVE_WILDCARDS
}

fn wildcard_leading(p: &str, _: &PatternFacts) -> bool {
    LEADING_WILDCARD_RE.is_match(p)
}

fn credential_segment(p: &str, _: &PatternFacts) -> bool {
    CREDENTIAL_SEGMENT_RE.is_match(p)
}

fn basic_auth(p: &str, _: &PatternFacts) -> bool {
    BASIC_AUTH_RE.is_match(p)
}

fn xss_marker(p: &str, _: &PatternFacts) -> bool {
    XSS_RE.is_match(p)
}

fn sql_injection(p: &str, _: &PatternFacts) -> bool {
    SQL_INJECTION_RE.is_match(p)
}

fn command_injection(p: &str, _: &PatternFacts) -> bool {
    SHELL_META_RE.is_match(&strip_group_contents(p))
}

static RULES: &[RiskRule] = &[
    RiskRule {
        id: rule::INJECTED_INPUT,
        category: RiskCategory::InjectedInput,
        weight: 2,
        message: "template interpolation marker in pattern",
        check: injected_input,
    },
    RiskRule {
        id: rule::PATH_TRAVERSAL,
        category: RiskCategory::PathTraversal,
        weight: 3,
        message: "path traversal sequence",
        check: path_traversal,
    },
    RiskRule {
        id: rule::OPEN_REDIRECT,
        category: RiskCategory::OpenRedirect,
        weight: 2,
        message: "redirect target taken from the request",
        check: open_redirect,
    },
    RiskRule {
        id: rule::SSRF_INTERNAL_HOST,
        category: RiskCategory::Ssrf,
        weight: 3,
        message: "internal or metadata hostname",
        check: ssrf_internal_host,
    },
    RiskRule {
        id: rule::SSRF_DYNAMIC_HOST,
        category: RiskCategory::Ssrf,
        weight: 2,
        message: "hostname built from a parameter or wildcard",
        check: ssrf_dynamic_host,
    },
    RiskRule {
        id: rule::REDOS_QUANTIFIER,
        category: RiskCategory::Redos,
        weight: 3,
        message: "nested or overlapping quantifier in regex group",
        check: redos_quantifier,
    },
    RiskRule {
        id: rule::WILDCARD_DANGER,
        category: RiskCategory::Wildcard,
        weight: 2,
        message: "greedy wildcard matches arbitrary path depth",
        check: wildcard_danger,
    },
    RiskRule {
        id: rule::WILDCARD_EXCESSIVE,
        category: RiskCategory::Wildcard,
        weight: 2,
        message: "too many wildcards",
        check: wildcard_excessive,
    },
    RiskRule {
        id: rule::WILDCARD_LEADING,
        category: RiskCategory::Wildcard,
        weight: 1,
        message: "pattern starts with a wildcard",
        check: wildcard_leading,
    },
    RiskRule {
        id: rule::CREDENTIAL_SEGMENT,
        category: RiskCategory::Credential,
        weight: 2,
        message: "credential-named segment exposes secrets in URLs",
        check: credential_segment,
    },
    RiskRule {
        id: rule::BASIC_AUTH,
        category: RiskCategory::Credential,
        weight: 3,
        message: "embedded userinfo credentials",
        check: basic_auth,
    },
    RiskRule {
        id: rule::XSS_MARKER,
        category: RiskCategory::Xss,
        weight: 3,
        message: "script injection marker",
        check: xss_marker,
    },
    RiskRule {
        id: rule::SQL_INJECTION,
        category: RiskCategory::SqlInjection,
        weight: 3,
        message: "SQL injection marker",
        check: sql_injection,
    },
    RiskRule {
        id: rule::COMMAND_INJECTION,
        category: RiskCategory::CommandInjection,
        weight: 3,
        message: "shell metacharacter outside regex groups",
        check: command_injection,
    },
];

/// The ordered rule table.
pub fn rules() -> &'static [RiskRule] {
    RULES
}

/// Score a pattern given facts derived from its matcher.
pub fn score_pattern(pattern: &str, facts: &PatternFacts) -> RiskAssessment {
    let mut findings = Vec::new();
    let mut score = 0;

    for rule in RULES {
        if rule.fires(pattern, facts) {
            score += rule.weight;
            findings.push(RiskFinding {
                rule_id: rule.id.to_string(),
                category: rule.category,
                severity: rule.severity(),
                message: rule.message.to_string(),
            });
        }
    }

    RiskAssessment {
        pattern: pattern.to_string(),
        findings,
        score,
        level: RiskLevel::from_score(score),
    }
}

/// Score a resolved matcher (sentinel matchers included).
pub fn assess(matcher: &Matcher) -> RiskAssessment {
    score_pattern(matcher.pattern(), &matcher.facts())
}

/// Score a pattern from its text alone.
pub fn score_text(pattern: &str) -> RiskAssessment {
    score_pattern(pattern, &PatternFacts::scan(pattern))
}

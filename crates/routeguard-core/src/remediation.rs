//! Rule-paired rewriting of risky patterns.
//!
//! Steps run in a fixed order and each one is applied and logged on its own.
//! Text-changing steps record a change description; annotation steps record
//! a review note and leave the pattern text alone. A text change that would
//! raise the score is discarded, so `score(fixed) <= score(original)` always
//! holds.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::obs;
use crate::risk::{rule, score_text, RiskAssessment};

/// Stand-in union for a bounded set of values the operator must fill in.
pub const BOUNDED_UNION: &str = "(allowed1|allowed2|allowed3)";

/// Optional segments substituted for one `**`.
pub const DOUBLE_WILDCARD_SEGMENTS: usize = 3;

const SENSITIVE_SEGMENTS: &[&str] = &[
    "admin",
    "internal",
    "debug",
    "management",
    "actuator",
    "private",
];

static TRAILING_PARAM_WILDCARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)(?:\([^()]*\))?[*+]$").expect("valid regex")
});

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^/?#]+").expect("valid regex"));

/// Outcome of remediating one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationResult {
    pub original: String,
    pub fixed: String,
    pub applied_changes: Vec<String>,
    pub review_notes: Vec<String>,
    pub score_before: u32,
    pub score_after: u32,
}

impl RemediationResult {
    pub fn changed(&self) -> bool {
        self.original != self.fixed
    }

    pub fn needs_review(&self) -> bool {
        !self.review_notes.is_empty()
    }
}

struct Work {
    pattern: String,
    score: u32,
    changes: Vec<String>,
    notes: Vec<String>,
}

impl Work {
    /// Keep `candidate` unless it raises the score.
    fn apply(&mut self, candidate: String, change: String) {
        if candidate == self.pattern {
            return;
        }
        let score = score_text(&candidate).score;
        if score > self.score {
            tracing::debug!(
                pattern = %self.pattern,
                %change,
                "remediation step discarded: score would rise"
            );
            return;
        }
        tracing::debug!(pattern = %self.pattern, fixed = %candidate, %change, "remediation step");
        self.pattern = candidate;
        self.score = score;
        self.changes.push(change);
    }

    fn note(&mut self, note: String) {
        tracing::debug!(pattern = %self.pattern, %note, "review note");
        self.notes.push(note);
    }
}

/// Rewrite one pattern and re-score it.
pub fn remediate(pattern: &str) -> RemediationResult {
    let before = score_text(pattern);
    let mut work = Work {
        pattern: pattern.to_string(),
        score: before.score,
        changes: Vec::new(),
        notes: Vec::new(),
    };

    escape_group_pipes(&before, &mut work);
    bound_trailing_wildcard(&before, &mut work);
    expand_double_wildcard(&mut work);
    annotate_sensitive_segments(&mut work);
    encode_traversal(&before, &mut work);
    annotate_credentials(&before, &mut work);

    let score_after = score_text(&work.pattern).score;
    if !work.changes.is_empty() {
        obs::emit_remediation_applied(pattern, work.changes.len(), before.score, score_after);
    }

    RemediationResult {
        original: pattern.to_string(),
        fixed: work.pattern,
        applied_changes: work.changes,
        review_notes: work.notes,
        score_before: before.score,
        score_after,
    }
}

pub fn remediate_all<I, S>(patterns: I) -> Vec<RemediationResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| remediate(p.as_ref()))
        .collect()
}

// Step 1: escape `|` inside groups, unless a pipe is already escaped somewhere.
fn escape_group_pipes(before: &RiskAssessment, work: &mut Work) {
    if !before.has_rule(rule::COMMAND_INJECTION) || work.pattern.contains("\\|") {
        return;
    }

    let mut out = String::with_capacity(work.pattern.len() + 4);
    let mut depth = 0usize;
    let mut escaped = false;
    let mut count = 0usize;
    for c in work.pattern.chars() {
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '|' if depth > 0 => {
                out.push('\\');
                count += 1;
            }
            _ => {}
        }
        out.push(c);
    }

    if count > 0 {
        work.apply(out, format!("escaped {count} alternation pipe(s) inside groups"));
    }
}

// Step 2: a trailing greedy wildcard becomes an explicit bounded union.
fn bound_trailing_wildcard(before: &RiskAssessment, work: &mut Work) {
    if !before.has_rule(rule::WILDCARD_DANGER) {
        return;
    }

    if let Some(caps) = TRAILING_PARAM_WILDCARD_RE.captures(&work.pattern) {
        let whole = caps.get(0).map_or(0, |m| m.start());
        let name = caps.get(1).map_or("", |m| m.as_str()).to_string();
        let candidate = format!("{}:{name}{BOUNDED_UNION}", &work.pattern[..whole]);
        work.apply(
            candidate,
            format!("replaced trailing wildcard :{name} with bounded union {BOUNDED_UNION}"),
        );
        return;
    }

    if work.pattern.ends_with("/*") && !work.pattern.ends_with("**") && !is_escaped_tail(&work.pattern)
    {
        let head = &work.pattern[..work.pattern.len() - 1];
        let candidate = format!("{head}{BOUNDED_UNION}");
        work.apply(
            candidate,
            format!("replaced trailing /* with bounded union {BOUNDED_UNION}"),
        );
    }
}

fn is_escaped_tail(pattern: &str) -> bool {
    pattern.ends_with("\\*")
}

// Step 3: a `**` segment becomes a fixed run of optional named segments.
fn expand_double_wildcard(work: &mut Work) {
    let runs = double_wildcard_runs(&work.pattern);
    if runs.is_empty() {
        return;
    }

    let taken = param_names(&work.pattern);
    let mut next = 1usize;
    let mut fresh_name = || loop {
        let name = format!("seg{next}");
        next += 1;
        if !taken.contains(&name) {
            return name;
        }
    };

    let mut out = String::with_capacity(work.pattern.len() + 32);
    let mut last = 0usize;
    for &(start, end) in &runs {
        out.push_str(&work.pattern[last..start]);
        let segments: Vec<String> = (0..DOUBLE_WILDCARD_SEGMENTS)
            .map(|_| format!(":{}?", fresh_name()))
            .collect();
        out.push_str(&segments.join("/"));
        last = end;
    }
    out.push_str(&work.pattern[last..]);

    work.apply(
        out,
        format!(
            "replaced {} double wildcard(s) with {DOUBLE_WILDCARD_SEGMENTS} optional segments",
            runs.len()
        ),
    );
}

/// Byte ranges of unescaped `**` runs outside groups that fill a whole
/// path segment.
fn double_wildcard_runs(pattern: &str) -> Vec<(usize, usize)> {
    let bytes = pattern.as_bytes();
    let mut runs = Vec::new();
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'*' if depth == 0 => {
                let start = i;
                while bytes.get(i) == Some(&b'*') {
                    i += 1;
                }
                let opens = start == 0 || bytes[start - 1] == b'/';
                let closes = matches!(bytes.get(i), None | Some(b'/' | b'?' | b'#'));
                if i - start >= 2 && opens && closes {
                    runs.push((start, i));
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    runs
}

fn param_names(pattern: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut chars = pattern.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != ':' {
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, d)) = chars.peek() {
            if d.is_ascii_alphanumeric() || d == '_' {
                end = j + d.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if end > start {
            names.insert(pattern[start..end].to_string());
        }
    }
    names
}

// Step 4: internal surfaces get a review marker.
fn annotate_sensitive_segments(work: &mut Work) {
    let path = path_part(&work.pattern);
    let hits: Vec<String> = SEGMENT_RE
        .find_iter(path)
        .map(|m| m.as_str().to_ascii_lowercase())
        .filter(|s| SENSITIVE_SEGMENTS.contains(&s.as_str()))
        .collect();
    for segment in hits {
        work.note(format!(
            "REVIEW: segment '{segment}' exposes an internal surface; confirm it is access controlled"
        ));
    }
}

fn path_part(pattern: &str) -> &str {
    match pattern.find("://") {
        Some(at) => {
            let after = &pattern[at + 3..];
            after.find('/').map_or("", |slash| &after[slash..])
        }
        None => pattern,
    }
}

// Step 5: traversal sequences are percent-encoded.
fn encode_traversal(before: &RiskAssessment, work: &mut Work) {
    if !before.has_rule(rule::PATH_TRAVERSAL) {
        return;
    }

    let pattern = work.pattern.as_str();
    let bytes = pattern.as_bytes();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut last = 0usize;
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] == b'.' && bytes[i + 1] == b'.' && is_traversal_at(bytes, i) {
            out.push_str(&pattern[last..i]);
            out.push_str("%2E%2E");
            i += 2;
            last = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&pattern[last..]);

    work.apply(out, "percent-encoded path traversal sequences".to_string());
}

/// Same segment boundaries the path-traversal rule uses.
fn is_traversal_at(bytes: &[u8], at: usize) -> bool {
    let opens = at == 0 || matches!(bytes[at - 1], b'/' | b'\\');
    let closes = bytes
        .get(at + 2)
        .map_or(true, |&b| !(b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')));
    opens && closes
}

// Step 6: credential exposure gets a review marker.
fn annotate_credentials(before: &RiskAssessment, work: &mut Work) {
    if before.has_rule(rule::CREDENTIAL_SEGMENT) {
        work.note(
            "REVIEW: credential-named segment; move secrets to headers or the request body"
                .to_string(),
        );
    }
    if before.has_rule(rule::BASIC_AUTH) {
        work.note("REVIEW: embedded userinfo credentials; remove them from the URL".to_string());
    }
}

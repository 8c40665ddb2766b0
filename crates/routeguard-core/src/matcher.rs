//! Pattern matcher capability.
//!
//! Compilation is an external capability behind [`PatternCompiler`]; the
//! rest of the crate only depends on the trait and on [`Matcher`].
//! [`RegexPatternCompiler`] is the default adapter: it translates URL-pattern
//! syntax into an anchored [`regex::Regex`].
//!
//! Supported syntax:
//! - literals (`/items`, `https://example.com`)
//! - named parameters `:id`, with an optional custom regex `:id(\d+)`
//! - modifiers on parameters and groups: `?` optional, `*` zero-or-more
//!   segments, `+` one-or-more segments
//! - bare wildcards `*`
//! - regex groups `(items|products)`
//! - non-capturing braces `{/:lang}?`
//! - `\` escapes

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CompileError;

const DEFAULT_SEGMENT: &str = "[^/]+";

/// Facts about a pattern that risk scoring consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFacts {
    /// Whether the pattern embeds at least one `( ... )` regex group.
    pub has_regex_groups: bool,
    /// Bare `*` wildcards plus parameters carrying a `*`/`+` modifier.
    pub wildcard_count: usize,
}

impl PatternFacts {
    /// Derive facts lexically from the pattern text.
    ///
    /// Escaped characters and the contents of regex groups never count as
    /// wildcards.
    pub fn scan(pattern: &str) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        let mut facts = Self::default();
        let mut depth = 0usize;
        let mut in_param = false;
        // Set when the token just closed was a parameter (or a group attached to one).
        let mut after_param = false;
        let mut group_on_param = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if depth > 0 {
                match c {
                    '\\' => i += 1,
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            after_param = group_on_param;
                        }
                    }
                    _ => {}
                }
                i += 1;
                continue;
            }

            match c {
                '\\' => {
                    i += 1;
                    in_param = false;
                    after_param = false;
                }
                ':' if chars.get(i + 1).copied().is_some_and(is_ident_start) => {
                    in_param = true;
                    after_param = false;
                }
                '(' => {
                    facts.has_regex_groups = true;
                    group_on_param = in_param;
                    in_param = false;
                    after_param = false;
                    depth = 1;
                }
                '*' => {
                    facts.wildcard_count += 1;
                    in_param = false;
                    after_param = false;
                }
                '+' if in_param || after_param => {
                    facts.wildcard_count += 1;
                    in_param = false;
                    after_param = false;
                }
                c if in_param && is_ident_char(c) => {}
                _ => {
                    in_param = false;
                    after_param = false;
                }
            }
            i += 1;
        }

        facts
    }
}

/// A compiled pattern able to test and extract matches.
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: String,
    base: String,
    template: String,
    regex: Option<Regex>,
    param_names: Vec<String>,
    facts: PatternFacts,
}

impl Matcher {
    /// Fallback matcher used when compilation failed. Never matches, but
    /// still carries scanned facts so downstream scoring proceeds.
    pub fn sentinel(pattern: &str, base: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            base: base.to_string(),
            template: join_base(pattern, base),
            regex: None,
            param_names: Vec::new(),
            facts: PatternFacts::scan(pattern),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// The pattern after joining it onto the base.
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn facts(&self) -> PatternFacts {
        self.facts
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn is_sentinel(&self) -> bool {
        self.regex.is_none()
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(candidate))
    }

    /// Named parameters captured from `candidate`, or `None` on no match.
    pub fn captures(&self, candidate: &str) -> Option<BTreeMap<String, String>> {
        let re = self.regex.as_ref()?;
        let caps = re.captures(candidate)?;
        Some(
            self.param_names
                .iter()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

/// External compile capability: `compile(pattern, base) -> Matcher`, may fail.
#[async_trait]
pub trait PatternCompiler: Send + Sync {
    async fn compile(&self, pattern: &str, base: &str) -> Result<Matcher, CompileError>;
}

/// Default compiler translating URL-pattern syntax into a regex.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexPatternCompiler;

#[async_trait]
impl PatternCompiler for RegexPatternCompiler {
    async fn compile(&self, pattern: &str, base: &str) -> Result<Matcher, CompileError> {
        compile_pattern(pattern, base)
    }
}

/// Synchronous compile used by [`RegexPatternCompiler`].
pub fn compile_pattern(pattern: &str, base: &str) -> Result<Matcher, CompileError> {
    let template = join_base(pattern, base);
    let (source, param_names) = translate(&template)?;
    let regex = Regex::new(&source).map_err(|e| CompileError::InvalidRegex(e.to_string()))?;

    Ok(Matcher {
        pattern: pattern.to_string(),
        base: base.to_string(),
        template,
        regex: Some(regex),
        param_names,
        facts: PatternFacts::scan(pattern),
    })
}

/// Join a relative pattern onto `base`. Absolute patterns (with a scheme)
/// and an empty base leave the pattern untouched.
pub fn join_base(pattern: &str, base: &str) -> String {
    if base.is_empty() || pattern.contains("://") {
        return pattern.to_string();
    }
    let base = base.trim_end_matches('/');
    if pattern.starts_with('/') {
        format!("{base}{pattern}")
    } else {
        format!("{base}/{pattern}")
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Optional,
    ZeroOrMore,
    OneOrMore,
}

fn modifier_at(chars: &[char], i: usize) -> Option<Modifier> {
    match chars.get(i) {
        Some('?') => Some(Modifier::Optional),
        Some('*') => Some(Modifier::ZeroOrMore),
        Some('+') => Some(Modifier::OneOrMore),
        _ => None,
    }
}

/// Read a balanced `( ... )` body starting at `open`. Returns the body and
/// the index just past the closing paren.
fn read_group(chars: &[char], open: usize) -> Result<(String, usize), CompileError> {
    let mut depth = 0usize;
    let mut body = String::new();
    let mut i = open;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                body.push(c);
                if let Some(next) = chars.get(i + 1) {
                    body.push(*next);
                }
                i += 2;
                continue;
            }
            '(' => {
                depth += 1;
                if depth > 1 {
                    body.push(c);
                }
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if body.is_empty() {
                        return Err(CompileError::InvalidSyntax {
                            offset: open,
                            reason: "empty regex group".to_string(),
                        });
                    }
                    return Ok((body, i + 1));
                }
                body.push(c);
            }
            _ => body.push(c),
        }
        i += 1;
    }
    Err(CompileError::InvalidSyntax {
        offset: open,
        reason: "unbalanced regex group".to_string(),
    })
}

/// Emit one parameter or group, folding a preceding `/` into the optional
/// part the way path-to-regexp does.
fn emit_part(out: &mut String, name: Option<&str>, segment: &str, modifier: Option<Modifier>) {
    let capture = |body: &str| match name {
        Some(n) => format!("(?P<{n}>{body})"),
        None => format!("({body})"),
    };
    let repeated = format!("(?:{segment})(?:/(?:{segment}))*");

    match modifier {
        None => out.push_str(&capture(segment)),
        Some(m) => {
            let prefixed = out.ends_with('/');
            if prefixed {
                out.pop();
            }
            let slash = if prefixed { "/" } else { "" };
            match m {
                Modifier::Optional => {
                    out.push_str(&format!("(?:{slash}{})?", capture(segment)));
                }
                Modifier::ZeroOrMore => {
                    out.push_str(&format!("(?:{slash}{})?", capture(&repeated)));
                }
                Modifier::OneOrMore => {
                    out.push_str(&format!("{slash}{}", capture(&repeated)));
                }
            }
        }
    }
}

fn translate(template: &str) -> Result<(String, Vec<String>), CompileError> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::from("^");
    let mut names = Vec::new();
    let mut braces = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let next = chars.get(i + 1).ok_or_else(|| CompileError::InvalidSyntax {
                    offset: i,
                    reason: "dangling escape".to_string(),
                })?;
                out.push_str(&regex::escape(&next.to_string()));
                i += 2;
            }
            ':' if chars.get(i + 1).copied().is_some_and(is_ident_start) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let (segment, after) = if chars.get(end) == Some(&'(') {
                    read_group(&chars, end)?
                } else {
                    (DEFAULT_SEGMENT.to_string(), end)
                };
                let modifier = modifier_at(&chars, after);
                emit_part(&mut out, Some(&name), &segment, modifier);
                names.push(name);
                i = after + usize::from(modifier.is_some());
            }
            '(' => {
                let (body, after) = read_group(&chars, i)?;
                let modifier = modifier_at(&chars, after);
                emit_part(&mut out, None, &body, modifier);
                i = after + usize::from(modifier.is_some());
            }
            ')' => {
                return Err(CompileError::InvalidSyntax {
                    offset: i,
                    reason: "unmatched ')'".to_string(),
                });
            }
            '*' => {
                out.push_str("(.*)");
                i += 1;
            }
            '{' => {
                braces += 1;
                out.push_str("(?:");
                i += 1;
            }
            '}' => {
                if braces == 0 {
                    return Err(CompileError::InvalidSyntax {
                        offset: i,
                        reason: "unmatched '}'".to_string(),
                    });
                }
                braces -= 1;
                out.push(')');
                match modifier_at(&chars, i + 1) {
                    Some(Modifier::Optional) => out.push('?'),
                    Some(Modifier::ZeroOrMore) => out.push('*'),
                    Some(Modifier::OneOrMore) => out.push('+'),
                    None => {}
                }
                i += 1 + usize::from(modifier_at(&chars, i + 1).is_some());
            }
            _ => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }

    if braces > 0 {
        return Err(CompileError::InvalidSyntax {
            offset: chars.len(),
            reason: "unclosed '{'".to_string(),
        });
    }

    out.push('$');
    Ok((out, names))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_counts_wildcards() {
        assert_eq!(PatternFacts::scan("/items/:id").wildcard_count, 0);
        assert_eq!(PatternFacts::scan("/files/*").wildcard_count, 1);
        assert_eq!(PatternFacts::scan("/:path*").wildcard_count, 1);
        assert_eq!(PatternFacts::scan("/:path+").wildcard_count, 1);
        assert_eq!(PatternFacts::scan("/**").wildcard_count, 2);
        assert_eq!(PatternFacts::scan("/:a*/:b+/*").wildcard_count, 3);
    }

    #[test]
    fn test_scan_ignores_group_contents_and_escapes() {
        let facts = PatternFacts::scan("/(a*|b+)/\\*");
        assert!(facts.has_regex_groups);
        assert_eq!(facts.wildcard_count, 0);

        // A quantifier on a group attached to a parameter is a wildcard.
        assert_eq!(PatternFacts::scan("/:id(\\d+)+").wildcard_count, 1);
        // A literal `+` is not.
        assert_eq!(PatternFacts::scan("/a+b").wildcard_count, 0);
    }

    #[test]
    fn test_compile_named_params() {
        let m = compile_pattern("/items/:id", "").unwrap();
        assert!(m.is_match("/items/42"));
        assert!(!m.is_match("/items/42/extra"));
        let caps = m.captures("/items/42").unwrap();
        assert_eq!(caps.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_compile_alternation_group() {
        let m = compile_pattern("/(items|products)/:id", "").unwrap();
        assert!(m.is_match("/items/1"));
        assert!(m.is_match("/products/1"));
        assert!(!m.is_match("/users/1"));
        assert!(m.facts().has_regex_groups);
    }

    #[test]
    fn test_compile_modifiers() {
        let optional = compile_pattern("/posts/:id?", "").unwrap();
        assert!(optional.is_match("/posts"));
        assert!(optional.is_match("/posts/7"));

        let many = compile_pattern("/docs/:path*", "").unwrap();
        assert!(many.is_match("/docs"));
        assert!(many.is_match("/docs/a/b/c"));

        let some = compile_pattern("/docs/:path+", "").unwrap();
        assert!(!some.is_match("/docs"));
        assert!(some.is_match("/docs/a/b"));
    }

    #[test]
    fn test_compile_braces_and_custom_regex() {
        let m = compile_pattern("/books{/:lang}?/:id(\\d+)", "").unwrap();
        assert!(m.is_match("/books/42"));
        assert!(m.is_match("/books/en/42"));
        assert!(!m.is_match("/books/en/abc"));
    }

    #[test]
    fn test_compile_joins_base() {
        let m = compile_pattern("/api/:v", "https://example.com/").unwrap();
        assert_eq!(m.template(), "https://example.com/api/:v");
        assert!(m.is_match("https://example.com/api/v1"));
    }

    #[test]
    fn test_absolute_pattern_ignores_base() {
        let m = compile_pattern("https://:sub.example.com/", "https://other.test").unwrap();
        assert!(m.is_match("https://api.example.com/"));
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            compile_pattern("/items/(unclosed", ""),
            Err(CompileError::InvalidSyntax { .. })
        ));
        assert!(matches!(
            compile_pattern("/a)", ""),
            Err(CompileError::InvalidSyntax { .. })
        ));
        assert!(matches!(
            compile_pattern("/:id/:id", ""),
            Err(CompileError::InvalidRegex(_))
        ));
        assert!(matches!(
            compile_pattern("/x/\\", ""),
            Err(CompileError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_sentinel_never_matches() {
        let m = Matcher::sentinel("/files/*", "");
        assert!(m.is_sentinel());
        assert!(!m.is_match("/files/a"));
        assert_eq!(m.facts().wildcard_count, 1);
    }
}

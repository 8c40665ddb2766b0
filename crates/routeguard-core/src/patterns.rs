//! Pattern list input.

use std::fs;
use std::path::Path;

use crate::error::{Result, RouteguardError};

/// Parse newline-delimited patterns.
///
/// Lines are trimmed. Blank lines and lines starting with `#` or `//` are
/// skipped; order is preserved.
pub fn parse_patterns(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .map(str::to_string)
        .collect()
}

pub fn load_patterns(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|source| RouteguardError::PatternFile {
        path: path.to_path_buf(),
        source,
    })?;
    let patterns = parse_patterns(&text);
    tracing::debug!(path = %path.display(), count = patterns.len(), "loaded patterns");
    Ok(patterns)
}

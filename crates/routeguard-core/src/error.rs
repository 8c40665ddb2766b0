//! Error taxonomy for routeguard.
//!
//! Only [`RouteguardError`] is ever surfaced as a hard failure. Compile,
//! persistence and baseline errors are data-dependent and degrade into typed
//! results or log lines at the call site.

/// Failure to compile a pattern into a matcher.
///
/// Cloneable because a single failed compile is shared by every waiter on
/// the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("invalid pattern syntax at offset {offset}: {reason}")]
    InvalidSyntax { offset: usize, reason: String },

    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("compilation aborted: {0}")]
    Aborted(String),
}

/// Errors from the on-disk manifest. Never propagated past the store's caller.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("atomic rename failed: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Errors reading a baseline snapshot.
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("baseline not found: {0}")]
    NotFound(std::path::PathBuf),

    #[error("malformed baseline {path}: {source}")]
    Malformed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("baseline encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract violations and unrecoverable input errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteguardError {
    #[error("invalid threshold '{0}': expected one of low, medium, high")]
    InvalidThreshold(String),

    #[error("cannot read pattern file {path}: {source}")]
    PatternFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for routeguard operations that can fail hard.
pub type Result<T> = std::result::Result<T, RouteguardError>;

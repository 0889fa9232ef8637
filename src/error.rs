//! Error types for the test intelligence engine.
//!
//! Every fallible operation returns [`Result`]. Store failures carry the
//! repo/branch/commit they happened under so that CI logs point at the
//! exact scope that needs a retry.

use std::path::PathBuf;

/// Top-level error enum for `ti_engine`.
#[derive(Debug, thiserror::Error)]
pub enum TiError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A callgraph dump line could not be decoded.
    #[error("failed to parse {file}:{line}: {message}")]
    Parse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("callgraph file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A store round-trip failed; `context` names the operation and scope.
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: Box<TiError>,
    },

    #[error("request cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("config error: {0}")]
    Config(String),

    /// A blocking worker panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Stable classification of a [`TiError`] for transport layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Store,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Store => "store",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TiError {
    /// Wrap a store failure with the scope it happened in. Cancellation
    /// passes through unchanged.
    pub fn store(err: impl Into<TiError>, msg: &str, repo: &str, branch: &str, commit: &str) -> Self {
        match err.into() {
            cancelled @ TiError::Cancelled { .. } => cancelled,
            other => TiError::Store {
                context: format!("{msg}, repo: {repo}, in branch: {branch}, commit: {commit}"),
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } | Self::MissingFile { .. } | Self::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Sqlite(_) | Self::Store { .. } => ErrorKind::Store,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Json(_) | Self::Io(_) | Self::Config(_) | Self::Task(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller should retry the whole call. Upload and merge
    /// converge on retry, so store and cancellation failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Store | ErrorKind::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, TiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_names_scope() {
        let err = TiError::store(
            rusqlite::Error::QueryReturnedNoRows,
            "failed to merge relations",
            "github.com/acme/app",
            "main",
            "abc123",
        );
        let msg = err.to_string();
        assert!(msg.contains("repo: github.com/acme/app"));
        assert!(msg.contains("in branch: main"));
        assert!(msg.contains("commit: abc123"));
        assert!(err.is_retryable());
    }

    #[test]
    fn cancellation_is_not_wrapped() {
        let err = TiError::store(
            TiError::Cancelled {
                stage: "move nodes".into(),
            },
            "failed to merge nodes",
            "repo",
            "main",
            "abc123",
        );
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn input_errors_are_not_retryable() {
        let err = TiError::InvalidInput("bad glob".into());
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!err.is_retryable());
        assert_eq!(err.kind().to_string(), "invalid_input");
    }

    #[test]
    fn parse_error_identifies_line() {
        let err = TiError::Parse {
            file: PathBuf::from("cg/part-0.json"),
            line: 7,
            message: "expected value".into(),
        };
        assert_eq!(err.to_string(), "failed to parse cg/part-0.json:7: expected value");
    }
}

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for passim operations
#[derive(Error, Debug)]
pub enum PassimError {
    #[error("failed to open {path}: {source}")]
    IoOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    RecordParse(String),

    #[error("VarByte decode error: {0}")]
    Decode(String),

    #[error("index inconsistency: {0}")]
    Consistency(String),

    #[error("precondition violated: {0}")]
    Precondition(String),
}

/// Result type alias for passim operations
pub type Result<T> = std::result::Result<T, PassimError>;

impl PassimError {
    /// Wrap an open failure with the path that could not be opened.
    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PassimError::IoOpen {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts a run. Only open and precondition failures
    /// are fatal; everything else is contained per record or per term.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PassimError::IoOpen { .. } | PassimError::Precondition(_)
        )
    }
}

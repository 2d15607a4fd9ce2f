//! Export error types.

use thiserror::Error;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Coarse classification callers use to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid input. Fatal before any work starts.
    Configuration,
    /// Remote collection read failed. Aborts the run; resume from persisted state.
    Fetch,
    /// Destination rejected an insert. Logged per row-group, the run continues.
    Insert,
    /// Existence query failed. The record is treated as absent and inserted.
    DedupCheck,
    /// Loading state could not be read or written.
    State,
    /// Destination connection or pool failure.
    Database,
    /// Processing step supplied by a caller failed.
    Processing,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to fetch dataset {dataset_id} (offset {offset}): {message}")]
    Fetch {
        dataset_id: String,
        offset: u64,
        message: String,
    },

    #[error("Insert into {table} failed: {source}")]
    Insert {
        table: String,
        #[source]
        source: diesel::result::Error,
    },

    #[error("Existence check on {table}.{attr} failed: {source}")]
    DedupCheck {
        table: String,
        attr: String,
        #[source]
        source: diesel::result::Error,
    },

    #[error("Loading state error: {0}")]
    State(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Processing failed for dataset {dataset_id} (offset {offset}): {message}")]
    Processing {
        dataset_id: String,
        offset: u64,
        message: String,
    },
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Configuration(_) => ErrorKind::Configuration,
            ExportError::Fetch { .. } => ErrorKind::Fetch,
            ExportError::Insert { .. } => ErrorKind::Insert,
            ExportError::DedupCheck { .. } => ErrorKind::DedupCheck,
            ExportError::State(_) => ErrorKind::State,
            ExportError::Database(_) => ErrorKind::Database,
            ExportError::Processing { .. } => ErrorKind::Processing,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ExportError::Configuration(message.into())
    }

    pub fn fetch(dataset_id: &str, offset: u64, message: impl std::fmt::Display) -> Self {
        ExportError::Fetch {
            dataset_id: dataset_id.to_string(),
            offset,
            message: message.to_string(),
        }
    }

    /// Whether restarting the run with persisted loading state can recover.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Fetch | ErrorKind::Processing | ErrorKind::Database
        )
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::State(e.to_string())
    }
}

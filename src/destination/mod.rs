//! Destination database access.
//!
//! The insert path only needs two things from a destination: run one SQL
//! statement, and answer whether a row with a given attribute value exists.
//! [`DbPool`] provides both over diesel-async.

mod connection;
mod pool;
mod util;

use async_trait::async_trait;
use thiserror::Error;

pub use connection::{ConnectionConfig, Driver, DEFAULT_CONNECTION_LIMIT};
pub use pool::DbPool;
pub use util::{redact_url_password, to_diesel_error};

use crate::error::ExportError;
use crate::sql::{Dialect, ExistenceQuery};

/// Error type of the underlying database layer.
pub type DbError = diesel::result::Error;

/// Why a destination operation failed.
#[derive(Debug, Error)]
pub enum DestinationError {
    /// No connection could be checked out or opened.
    #[error("destination unavailable: {0}")]
    Unavailable(#[source] DbError),
    /// The database received the statement and rejected it.
    #[error("{0}")]
    Rejected(#[source] DbError),
}

impl DestinationError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DestinationError::Unavailable(_))
    }

    pub fn into_inner(self) -> DbError {
        match self {
            DestinationError::Unavailable(e) | DestinationError::Rejected(e) => e,
        }
    }
}

impl From<DestinationError> for ExportError {
    fn from(e: DestinationError) -> Self {
        ExportError::Database(e.into_inner())
    }
}

#[async_trait]
pub trait Destination: Send + Sync {
    /// SQL dialect statements for this destination are written in.
    fn dialect(&self) -> Dialect;

    /// Execute one statement, returning the number of affected rows.
    async fn execute(&self, statement: &str) -> Result<usize, DestinationError>;

    /// Whether at least one row matches the query.
    async fn exists(&self, query: &ExistenceQuery) -> Result<bool, DestinationError>;
}

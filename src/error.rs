use thiserror::Error;

use crate::database::manager::DatabaseError;
use crate::types::Operation;

/// Errors returned by [`crate::database::Repository`].
///
/// `NotFound` is the only kind this layer synthesizes. Everything else is the
/// backend's own error, passed through untouched.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{message}")]
    NotFound {
        message: String,
        #[source]
        cause: Option<DatabaseError>,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl RepositoryError {
    pub fn not_found(table: &str, operation: Operation) -> Self {
        RepositoryError::NotFound {
            message: format!("Record not found in {} ({})", table, operation),
            cause: None,
        }
    }

    pub fn not_found_caused_by(table: &str, operation: Operation, cause: DatabaseError) -> Self {
        RepositoryError::NotFound {
            message: format!("Record not found in {} ({})", table, operation),
            cause: Some(cause),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;

//! Structured error types for courier-db.
//!
//! Every variant is surfaced to the caller unmodified; nothing is retried
//! inside the store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A referenced user or message does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A parent reference would dangle or form a cycle, or a unique key clashes
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Input rejected before touching the database
    #[error("validation error: {0}")]
    Validation(String),

    /// The write (with its derived rows) could not complete and was rolled back
    #[error("transaction failure: {0}")]
    TransactionFailure(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

use thiserror::Error;

use courier_db::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The blocking database task panicked or was cancelled
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ServiceError {
    pub fn store(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            Self::Join(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.store().is_some_and(StoreError::is_not_found)
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

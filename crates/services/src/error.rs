//! Shared error types for the services crate.

use thiserror::Error;

use kasten_core::MasteryError;
use storage::repository::StorageError;

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    /// No record or view row matches the request.
    #[error("{0}")]
    NotFound(String),

    #[error("card index {index} is out of range for {len} cards")]
    IndexOutOfRange { index: i64, len: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A bulk operation stopped at its first failure.
    ///
    /// `completed` items were already applied and stay applied.
    #[error("stopped after {completed} completed items: {source}")]
    Interrupted {
        completed: usize,
        #[source]
        source: Box<ProgressError>,
    },
}

impl ProgressError {
    /// True for a missing record, whether the service or the store noticed it.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Storage(StorageError::NotFound)
        )
    }

    /// Number of items a bulk operation applied before failing, `0` for
    /// errors from single-item operations.
    #[must_use]
    pub fn completed(&self) -> usize {
        match self {
            Self::Interrupted { completed, .. } => *completed,
            _ => 0,
        }
    }
}

impl From<MasteryError> for ProgressError {
    fn from(err: MasteryError) -> Self {
        match err {
            MasteryError::IndexOutOfRange { index, len } => Self::IndexOutOfRange { index, len },
        }
    }
}

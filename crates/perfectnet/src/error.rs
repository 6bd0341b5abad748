//! Error types for the coordinator facade.

use perfectnet_arith::ArithError;
use perfectnet_kernel::KernelError;
use perfectnet_storage::StorageError;
use perfectnet_types::{ErrorClass, ValidationError};

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Errors returned by [`crate::Coordinator`].
#[derive(thiserror::Error, Debug)]
pub enum CoordinatorError {
    /// The kernel rejected the command; state is unchanged.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("invalid input: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Arith(#[from] ArithError),

    /// A write could not be made durable, or an earlier one failed and the
    /// coordinator stopped accepting mutations.
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),

    /// Recovery or compaction failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed for {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// How a caller should react.
    pub fn class(&self) -> ErrorClass {
        match self {
            CoordinatorError::Kernel(e) => e.class(),
            CoordinatorError::Invalid(_)
            | CoordinatorError::Arith(_)
            | CoordinatorError::Unauthorized(_) => ErrorClass::Data,
            CoordinatorError::Unavailable(_) | CoordinatorError::Storage(_) => {
                ErrorClass::Durability
            }
            CoordinatorError::Io(_) | CoordinatorError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// The kernel error, if the kernel is what refused.
    pub fn as_kernel(&self) -> Option<&KernelError> {
        match self {
            CoordinatorError::Kernel(e) => Some(e),
            _ => None,
        }
    }
}

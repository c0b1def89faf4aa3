//! Error taxonomy shared by all services.

use thiserror::Error;

/// Failure classes for a service operation.
///
/// `InvalidInput` is raised at the handler boundary before any backend
/// call and its message is echoed to the caller. `Backend` wraps an
/// external model/binary failure; the full error is logged server-side and
/// only a short message travels back. `Unavailable` means the backing
/// model never became ready.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Backend(String),

    #[error("{0}")]
    Unavailable(String),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

//! Service store errors

use thiserror::Error;

/// Errors that can occur when reading or creating Services
#[derive(Debug, Error)]
pub enum ServiceClientError {
    /// The Service (or its namespace) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A Service with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The store could not be reached
    #[error("Service store unavailable: {0}")]
    Unavailable(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}


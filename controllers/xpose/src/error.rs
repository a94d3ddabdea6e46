//! Controller-specific error types.
//!
//! This module defines error types specific to the xpose controller
//! that are not covered by upstream library errors.

use service_client::ServiceClientError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the xpose controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Service store error
    #[error("Service store error: {0}")]
    ServiceClient(#[from] ServiceClientError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object that cannot be reconciled as-is
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Initial list of Deployments did not complete in time
    #[error("Timed out after {0:?} waiting for Deployment cache to sync")]
    CacheSyncTimeout(Duration),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

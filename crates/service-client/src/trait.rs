//! ServiceClient trait for mocking
//!
//! This trait abstracts the Service store so reconcilers can be unit tested.
//! The concrete `ServiceClient` talks to the Kubernetes API; tests use
//! `MockServiceClient`.

use crate::error::ServiceClientError;
use k8s_openapi::api::core::v1::Service;

/// Trait for Service store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ServiceClientTrait: Send + Sync {
    /// Fetch a Service by namespace and name.
    ///
    /// Returns `ServiceClientError::NotFound` when no such Service exists.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ServiceClientError>;

    /// Create a Service in `namespace`.
    ///
    /// Returns `ServiceClientError::AlreadyExists` when a Service with the same
    /// name was created concurrently.
    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ServiceClientError>;
}

//! Kubernetes-backed Service store.

use crate::error::ServiceClientError;
use crate::service_trait::ServiceClientTrait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::debug;

/// Field manager recorded on objects created by this client.
pub const FIELD_MANAGER: &str = "xpose-controller";

/// Service store backed by the Kubernetes API.
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
}

impl ServiceClient {
    /// Creates a new client from an established Kubernetes connection.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Maps API status codes onto the store's error taxonomy.
fn classify(err: kube::Error, namespace: &str, name: &str) -> ServiceClientError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            ServiceClientError::NotFound(format!("{namespace}/{name}: {}", response.message))
        }
        kube::Error::Api(response) if response.code == 409 => {
            ServiceClientError::AlreadyExists(format!("{namespace}/{name}: {}", response.message))
        }
        other => ServiceClientError::Kube(other),
    }
}

#[async_trait::async_trait]
impl ServiceClientTrait for ServiceClient {
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Service, ServiceClientError> {
        debug!("GET Service {}/{}", namespace, name);
        match self.api(namespace).get_opt(name).await {
            Ok(Some(service)) => Ok(service),
            Ok(None) => Err(ServiceClientError::NotFound(format!("{namespace}/{name}"))),
            Err(e) => Err(classify(e, namespace, name)),
        }
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ServiceClientError> {
        let name = service.metadata.name.as_deref().ok_or_else(|| {
            ServiceClientError::InvalidRequest("Service is missing metadata.name".to_string())
        })?;
        debug!("POST Service {}/{}", namespace, name);

        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        };
        self.api(namespace)
            .create(&pp, service)
            .await
            .map_err(|e| classify(e, namespace, name))
    }
}

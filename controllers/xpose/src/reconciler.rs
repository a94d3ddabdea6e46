//! Reconciliation logic for Deployments.
//!
//! Every Deployment gets a Service with the same name and namespace that
//! selects the Deployment's pods on port 80. The Service is created once and
//! never updated or deleted afterwards.

use crate::cache::LocalCache;
use crate::error::ControllerError;
use crate::key::ResourceKey;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use service_client::{ServiceClientError, ServiceClientTrait};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Label put on every Service this controller creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY: &str = "xpose-controller";
/// Name of the single port exposed by derived Services.
pub const SERVICE_PORT_NAME: &str = "http";
/// Port exposed by derived Services.
pub const SERVICE_PORT: i32 = 80;

/// What a successful [`Reconciler::sync`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The Deployment is gone; nothing to do
    PrimaryGone,
    /// A Service was created
    Created,
    /// The Service already existed and was left untouched
    Unchanged,
    /// Another writer created the Service first
    AlreadyExists,
}

/// Pod-template labels of `deployment`, used as the Service selector.
pub fn pod_template_labels(deployment: &Deployment) -> BTreeMap<String, String> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.clone())
        .unwrap_or_default()
}

/// Builds the Service that should exist for `deployment`.
pub fn desired_service(key: &ResourceKey, deployment: &Deployment) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())])),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(pod_template_labels(deployment)),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_string()),
                port: SERVICE_PORT,
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// Reconciles Deployments into Services.
pub struct Reconciler<S> {
    cache: LocalCache,
    services: S,
}

impl<S: ServiceClientTrait> Reconciler<S> {
    /// Creates a new reconciler instance.
    pub fn new(cache: LocalCache, services: S) -> Self {
        Self { cache, services }
    }

    /// Reconciles the Deployment at `key`.
    ///
    /// This method:
    /// 1. Reads the Deployment from the cache (absent means deleted)
    /// 2. Computes the desired Service
    /// 3. Looks the Service up in the store
    /// 4. Creates it if it is missing
    ///
    /// `NotFound` and `AlreadyExists` from the store count as success; every
    /// other store error is returned so the caller can retry.
    pub async fn sync(&self, key: &ResourceKey) -> Result<SyncOutcome, ControllerError> {
        let Some(deployment) = self.cache.get(key) else {
            // Services are create-only; one left behind by a deleted Deployment stays.
            debug!("Deployment {} not in cache, nothing to reconcile", key);
            return Ok(SyncOutcome::PrimaryGone);
        };

        debug!("Reconciling Deployment {}", key);
        let desired = desired_service(key, &deployment);

        match self.services.get_service(&key.namespace, &key.name).await {
            Ok(_) => {
                debug!("Service {} already exists", key);
                return Ok(SyncOutcome::Unchanged);
            }
            Err(ServiceClientError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match self.services.create_service(&key.namespace, &desired).await {
            Ok(_) => {
                info!("Created Service {} for Deployment", key);
                Ok(SyncOutcome::Created)
            }
            Err(ServiceClientError::AlreadyExists(_)) => {
                info!("Service {} was created concurrently", key);
                Ok(SyncOutcome::AlreadyExists)
            }
            Err(ServiceClientError::NotFound(msg)) => {
                debug!("Namespace of {} vanished during reconcile: {}", key, msg);
                Ok(SyncOutcome::PrimaryGone)
            }
            Err(e) => Err(e.into()),
        }
    }
}

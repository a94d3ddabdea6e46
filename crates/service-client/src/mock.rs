//! Mock ServiceClient for unit testing
//!
//! Stores Services in memory and can be scripted to fail, to answer slowly,
//! and to report how many calls for the same object overlapped in time.

use crate::error::ServiceClientError;
use crate::service_trait::ServiceClientTrait;
use k8s_openapi::api::core::v1::Service;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type ObjectKey = (String, String);

/// Failure to inject into the next call of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Answer with `ServiceClientError::NotFound`
    NotFound,
    /// Answer with `ServiceClientError::AlreadyExists`
    AlreadyExists,
    /// Answer with `ServiceClientError::Unavailable` (a transient failure)
    Unavailable,
}

impl MockFailure {
    fn into_error(self, namespace: &str, name: &str) -> ServiceClientError {
        let what = format!("{namespace}/{name}");
        match self {
            Self::NotFound => ServiceClientError::NotFound(what),
            Self::AlreadyExists => ServiceClientError::AlreadyExists(what),
            Self::Unavailable => {
                ServiceClientError::Unavailable(format!("injected failure for {what}"))
            }
        }
    }
}

#[derive(Default)]
struct MockState {
    services: HashMap<ObjectKey, Service>,
    get_failures: VecDeque<MockFailure>,
    create_failures: VecDeque<MockFailure>,
    get_calls: usize,
    create_calls: usize,
    in_flight: HashMap<ObjectKey, usize>,
    max_in_flight_per_key: usize,
    next_version: u64,
}

/// Mock Service store for testing
#[derive(Clone, Default)]
pub struct MockServiceClient {
    state: Arc<Mutex<MockState>>,
    latency: Option<Duration>,
}

impl MockServiceClient {
    /// Create an empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` (useful to widen race windows)
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a Service to the mock store (for test setup)
    pub fn add_service(&self, namespace: &str, service: Service) {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.lock().services.insert((namespace.to_string(), name), service);
    }

    /// Make the next `get_service` call fail
    pub fn fail_next_get(&self, failure: MockFailure) {
        self.lock().get_failures.push_back(failure);
    }

    /// Make the next `create_service` call fail
    pub fn fail_next_create(&self, failure: MockFailure) {
        self.lock().create_failures.push_back(failure);
    }

    /// Look up a stored Service
    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock().services.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Number of stored Services
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.lock().services.len()
    }

    /// Number of `get_service` calls so far
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    /// Number of `create_service` calls so far
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Highest number of simultaneous calls observed for a single object
    #[must_use]
    pub fn max_in_flight_per_key(&self) -> usize {
        self.lock().max_in_flight_per_key
    }

    fn enter(&self, key: &ObjectKey) {
        let mut state = self.lock();
        let count = state.in_flight.entry(key.clone()).or_insert(0);
        *count += 1;
        let current = *count;
        state.max_in_flight_per_key = state.max_in_flight_per_key.max(current);
    }

    fn leave(&self, key: &ObjectKey) {
        let mut state = self.lock();
        if let Some(count) = state.in_flight.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl ServiceClientTrait for MockServiceClient {
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Service, ServiceClientError> {
        let key = (namespace.to_string(), name.to_string());
        self.enter(&key);
        self.pause().await;
        let result = {
            let mut state = self.lock();
            state.get_calls += 1;
            if let Some(failure) = state.get_failures.pop_front() {
                Err(failure.into_error(namespace, name))
            } else {
                state
                    .services
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ServiceClientError::NotFound(format!("{namespace}/{name}")))
            }
        };
        self.leave(&key);
        result
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ServiceClientError> {
        let name = service.metadata.name.clone().ok_or_else(|| {
            ServiceClientError::InvalidRequest("Service is missing metadata.name".to_string())
        })?;
        let key = (namespace.to_string(), name.clone());
        self.enter(&key);
        self.pause().await;
        let result = {
            let mut state = self.lock();
            state.create_calls += 1;
            if let Some(failure) = state.create_failures.pop_front() {
                Err(failure.into_error(namespace, &name))
            } else if state.services.contains_key(&key) {
                Err(ServiceClientError::AlreadyExists(format!("{namespace}/{name}")))
            } else {
                state.next_version += 1;
                let mut stored = service.clone();
                stored.metadata.namespace = Some(namespace.to_string());
                stored.metadata.resource_version = Some(state.next_version.to_string());
                state.services.insert(key.clone(), stored.clone());
                Ok(stored)
            }
        };
        self.leave(&key);
        result
    }
}

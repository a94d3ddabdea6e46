//! Service store client
//!
//! Reads and creates Kubernetes `Service` objects on behalf of the xpose
//! controller. The controller only ever talks to the store through
//! [`ServiceClientTrait`], so reconcilers can be exercised against
//! [`MockServiceClient`] (feature `test-util`) without a cluster.
//!
//! # Example
//!
//! ```no_run
//! use service_client::{ServiceClient, ServiceClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let services = ServiceClient::new(client);
//!
//! match services.get_service("default", "web").await {
//!     Ok(svc) => println!("found {:?}", svc.metadata.name),
//!     Err(e) => println!("lookup failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod service_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{ServiceClient, FIELD_MANAGER};
pub use error::ServiceClientError;
pub use service_trait::ServiceClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockFailure, MockServiceClient};

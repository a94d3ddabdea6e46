//! Object identity shared by a Deployment and the Service derived from it.

use crate::error::ControllerError;
use kube::{Resource, ResourceExt};
use std::fmt;

/// Namespace used when an object carries none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// `(namespace, name)` identity of a Deployment and of its Service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ResourceKey {
    /// Creates a key from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derives the key of a watched object.
    ///
    /// Objects without a name cannot be keyed; a missing namespace falls back
    /// to `default`.
    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self, ControllerError> {
        let name = obj.meta().name.clone().ok_or_else(|| {
            ControllerError::InvalidResource("object is missing metadata.name".to_string())
        })?;
        let namespace = obj.namespace().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_key_from_deployment() {
        let dep = Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let key = ResourceKey::from_resource(&dep).unwrap();
        assert_eq!(key, ResourceKey::new("ns1", "web"));
        assert_eq!(key.to_string(), "ns1/web");
    }

    #[test]
    fn test_missing_namespace_defaults() {
        let dep = Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let key = ResourceKey::from_resource(&dep).unwrap();
        assert_eq!(key.namespace, "default");
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let err = ResourceKey::from_resource(&Deployment::default()).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidResource(_)));
    }
}

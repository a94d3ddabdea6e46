//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test Deployments and for driving
//! the controller with a hand-fed watch stream.

#[cfg(test)]
use futures::channel::mpsc;
#[cfg(test)]
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
#[cfg(test)]
use k8s_openapi::api::core::v1::PodTemplateSpec;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
#[cfg(test)]
use kube_runtime::watcher;
#[cfg(test)]
use std::collections::BTreeMap;

/// Item type of a Deployment watch feed
#[cfg(test)]
pub type FeedItem = Result<watcher::Event<Deployment>, watcher::Error>;

/// Helper to create a test Deployment whose pod template carries `labels`
#[cfg(test)]
pub fn create_test_deployment(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Deployment {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Watch feed the test pushes events into by hand
#[cfg(test)]
pub fn test_feed() -> (mpsc::UnboundedSender<FeedItem>, mpsc::UnboundedReceiver<FeedItem>) {
    mpsc::unbounded()
}

/// Events of an initial list containing `deployments`
#[cfg(test)]
pub fn initial_list(deployments: Vec<Deployment>) -> Vec<FeedItem> {
    let mut events = vec![Ok(watcher::Event::Init)];
    events.extend(deployments.into_iter().map(|d| Ok(watcher::Event::InitApply(d))));
    events.push(Ok(watcher::Event::InitDone));
    events
}

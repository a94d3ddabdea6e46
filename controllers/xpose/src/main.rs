//! Xpose Controller
//!
//! Level-triggered controller that gives every Deployment a Service of the
//! same name, selecting the Deployment's pods on port 80.
//!
//! Deployments are list-watched into a local cache; changed keys go through a
//! deduplicating, rate-limited work queue to a pool of reconcile workers.

mod backoff;
mod cache;
mod config;
mod controller;
mod error;
mod key;
mod queue;
mod reconciler;
mod watcher;

#[cfg(test)]
mod controller_test;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use kube_runtime::{watcher as kube_watcher, WatchStreamExt};
use service_client::ServiceClient;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Xpose Controller");

    // Load configuration from environment variables
    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", config.workers);
    info!("  Cache sync timeout: {:?}", config.cache_sync_timeout);
    info!(
        "  Requeue backoff: {:?}..{:?}, {} qps (burst {})",
        config.rate_limiter.base_delay,
        config.rate_limiter.max_delay,
        config.rate_limiter.qps,
        config.rate_limiter.burst
    );

    let client = Client::try_default().await?;
    let deployments: Api<Deployment> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let feed = kube_watcher(deployments, kube_watcher::Config::default()).default_backoff();

    // Initialize and run controller
    let controller = Controller::new(config, ServiceClient::new(client));
    controller.run(feed, shutdown_signal()).await?;

    info!("Xpose Controller stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Deployment
//! watcher, the local cache, the work queue and the reconcile workers
//! together, and owns their startup and shutdown ordering:
//!
//! 1. start the watch feed and wait (bounded) for the initial list
//! 2. start the worker tasks
//! 3. on shutdown stop the feed, shut the queue down and join every worker

use crate::cache::LocalCache;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::queue::EventQueue;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use futures::Stream;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::watcher;
use service_client::ServiceClientTrait;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Name of the work queue, as it appears in logs.
pub const QUEUE_NAME: &str = "xpose";

/// Main controller for Deployment exposure.
pub struct Controller<S> {
    config: ControllerConfig,
    cache: LocalCache,
    queue: EventQueue,
    reconciler: Arc<Reconciler<S>>,
}

impl<S: ServiceClientTrait + 'static> Controller<S> {
    /// Creates a new controller instance.
    pub fn new(config: ControllerConfig, services: S) -> Self {
        let cache = LocalCache::new();
        let queue = EventQueue::new(QUEUE_NAME, &config.rate_limiter);
        let reconciler = Arc::new(Reconciler::new(cache.clone(), services));
        Self {
            config,
            cache,
            queue,
            reconciler,
        }
    }

    /// Runs the controller until `shutdown` resolves.
    ///
    /// Fails with [`ControllerError::CacheSyncTimeout`] (before any worker is
    /// started) if `feed` does not finish its initial list within the
    /// configured timeout, and with [`ControllerError::Watch`] if `feed` ends.
    pub async fn run<F, Sh>(self, feed: F, shutdown: Sh) -> Result<(), ControllerError>
    where
        F: Stream<Item = Result<watcher::Event<Deployment>, watcher::Error>> + Send + 'static,
        Sh: Future<Output = ()> + Send,
    {
        info!("Starting xpose controller with {} worker(s)", self.config.workers);

        let watcher = {
            let queue = self.queue.clone();
            Watcher::new(self.cache.clone(), move |key| queue.add(key))
        };
        let mut watch_task: JoinHandle<()> = tokio::spawn(async move { watcher.run(feed).await });

        let mut shutdown = std::pin::pin!(shutdown);
        let timeout = self.config.cache_sync_timeout;

        info!("Waiting up to {:?} for Deployment cache to sync", timeout);
        let synced = tokio::select! {
            res = tokio::time::timeout(timeout, self.cache.wait_until_synced()) => res.is_ok(),
            () = &mut shutdown => {
                info!("Shutdown requested before cache sync");
                watch_task.abort();
                self.queue.shut_down();
                return Ok(());
            }
        };
        if !synced {
            error!("Deployment cache did not sync within {:?}, aborting", timeout);
            watch_task.abort();
            self.queue.shut_down();
            return Err(ControllerError::CacheSyncTimeout(timeout));
        }
        info!("Deployment cache synced, starting workers");

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| {
                let queue = self.queue.clone();
                let reconciler = Arc::clone(&self.reconciler);
                tokio::spawn(async move { run_worker(id, queue, reconciler).await })
            })
            .collect();

        let outcome = tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
            res = &mut watch_task => match res {
                Ok(()) => Err(ControllerError::Watch("Deployment watch feed ended".to_string())),
                Err(e) => Err(ControllerError::Watch(format!("Deployment watcher panicked: {e}"))),
            },
        };

        watch_task.abort();
        info!(
            "Stopping queue '{}' ({} queued, {} in flight)",
            self.queue.name(),
            self.queue.len(),
            self.queue.in_flight()
        );
        self.queue.shut_down();

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker panicked: {}", e);
            }
        }
        info!("All workers stopped");

        outcome
    }
}

async fn run_worker<S: ServiceClientTrait>(
    id: usize,
    queue: EventQueue,
    reconciler: Arc<Reconciler<S>>,
) {
    debug!("Worker {} started", id);
    while process_next_item(&queue, &reconciler).await {}
    debug!("Worker {} exiting", id);
}

/// Takes one key off the queue and reconciles it.
///
/// Returns `false` once the queue is shutting down. A failed reconcile is
/// rescheduled with backoff and never stops the worker.
pub async fn process_next_item<S: ServiceClientTrait>(
    queue: &EventQueue,
    reconciler: &Reconciler<S>,
) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    match reconciler.sync(&key).await {
        Ok(outcome) => {
            debug!("Reconciled {}: {:?}", key, outcome);
            queue.forget(&key);
        }
        Err(e) => {
            warn!(
                "Reconcile of {} failed (attempt {}), requeueing: {}",
                key,
                queue.num_requeues(&key) + 1,
                e
            );
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
    true
}

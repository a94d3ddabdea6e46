//! Deployment watcher.
//!
//! Consumes the list/watch feed for Deployments, keeps the [`LocalCache`] up
//! to date and tells the registered subscriber which key changed. Only the
//! key is handed on; whoever processes it re-reads the cache, so a stale event
//! payload is never acted upon.

use crate::cache::LocalCache;
use crate::key::ResourceKey;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::watcher;
use tracing::{debug, info, warn};

/// Callback invoked with the key of every Deployment that changed.
pub type ChangeHandler = Box<dyn Fn(ResourceKey) + Send + Sync>;

/// Feeds watch events into the cache and notifies the change subscriber.
pub struct Watcher {
    cache: LocalCache,
    on_change: ChangeHandler,
}

impl Watcher {
    /// Creates a watcher writing to `cache` and reporting changed keys to
    /// `on_change`.
    pub fn new<F>(cache: LocalCache, on_change: F) -> Self
    where
        F: Fn(ResourceKey) + Send + Sync + 'static,
    {
        Self {
            cache,
            on_change: Box::new(on_change),
        }
    }

    /// Consumes `feed` until it ends.
    ///
    /// Feed errors are logged and skipped: the feed itself is expected to
    /// back off and reconnect (see `WatchStreamExt::default_backoff`).
    pub async fn run<S>(&self, feed: S)
    where
        S: Stream<Item = Result<watcher::Event<Deployment>, watcher::Error>>,
    {
        info!("Starting Deployment watcher");

        let mut feed = std::pin::pin!(feed);
        while let Some(event) = feed.next().await {
            match event {
                Ok(event) => self.handle_event(event),
                Err(e) => warn!("Deployment watch error, waiting for feed to recover: {}", e),
            }
        }

        info!("Deployment watch feed ended");
    }

    /// Applies one watch event to the cache, then emits the affected key(s).
    pub fn handle_event(&self, event: watcher::Event<Deployment>) {
        match event {
            watcher::Event::Init => {
                debug!("Deployment list started");
                self.cache.begin_relist();
            }
            watcher::Event::InitApply(deployment) | watcher::Event::Apply(deployment) => {
                self.store(deployment);
            }
            watcher::Event::InitDone => {
                for key in self.cache.finish_relist() {
                    info!("Deployment {} no longer listed, treating as deleted", key);
                    (self.on_change)(key);
                }
                info!("Deployment cache synced with {} objects", self.cache.len());
            }
            watcher::Event::Delete(deployment) => {
                let key = match ResourceKey::from_resource(&deployment) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("Ignoring deleted Deployment: {}", e);
                        return;
                    }
                };
                match self.cache.remove(&key) {
                    Some(entry) => debug!(
                        "Deployment {} deleted (last seen at resourceVersion {:?}, {})",
                        key, entry.resource_version, entry.observed_at
                    ),
                    None => debug!("Deployment {} deleted before it was cached", key),
                }
                (self.on_change)(key);
            }
        }
    }

    fn store(&self, deployment: Deployment) {
        let key = match ResourceKey::from_resource(&deployment) {
            Ok(key) => key,
            Err(e) => {
                warn!("Ignoring Deployment: {}", e);
                return;
            }
        };
        match self.cache.entry(&key) {
            Some(previous) => debug!(
                "Deployment {} updated (resourceVersion {:?} -> {:?}, previous seen at {})",
                key,
                previous.resource_version,
                deployment.metadata.resource_version,
                previous.observed_at
            ),
            None => debug!("Deployment {} added", key),
        }
        self.cache.apply(key.clone(), deployment);
        (self.on_change)(key);
    }
}

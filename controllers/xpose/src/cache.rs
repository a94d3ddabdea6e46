//! Local snapshot of watched Deployments.
//!
//! The cache is written only by the [`Watcher`](crate::watcher::Watcher) and
//! read by reconcile workers. Entries are immutable `Arc` snapshots that are
//! replaced wholesale on every update, so a reader never observes a partially
//! applied change.

use crate::key::ResourceKey;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// A cached Deployment plus the marker describing how fresh it is.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The object as last observed
    pub resource: Arc<Deployment>,
    /// `metadata.resourceVersion` of the observed object
    pub resource_version: Option<String>,
    /// When the watcher stored this snapshot
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<ResourceKey, CacheEntry>,
    /// Keys seen since the current (re)list started, `None` outside a relist
    relisting: Option<HashSet<ResourceKey>>,
}

/// Read-through snapshot of Deployments, shared between watcher and workers.
#[derive(Clone)]
pub struct LocalCache {
    state: Arc<RwLock<CacheState>>,
    synced: Arc<watch::Sender<bool>>,
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCache {
    /// Creates an empty, not yet synced cache.
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            state: Arc::new(RwLock::new(CacheState::default())),
            synced: Arc::new(synced),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current snapshot of the Deployment at `key`, if any.
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<Deployment>> {
        self.read().entries.get(key).map(|entry| Arc::clone(&entry.resource))
    }

    /// Current entry at `key`, including its freshness marker.
    pub fn entry(&self, key: &ResourceKey) -> Option<CacheEntry> {
        self.read().entries.get(key).cloned()
    }

    /// Number of cached Deployments.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the initial listing has completed.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the initial listing has completed.
    pub async fn wait_until_synced(&self) {
        if self.has_synced() {
            return;
        }
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    /// Starts a (re)list: keys not applied before [`finish_relist`] are
    /// treated as deleted.
    ///
    /// [`finish_relist`]: Self::finish_relist
    pub(crate) fn begin_relist(&self) {
        self.write().relisting = Some(HashSet::new());
    }

    /// Ends a (re)list, drops entries that were not seen during it and marks
    /// the cache synced. Returns the keys that were dropped.
    pub(crate) fn finish_relist(&self) -> Vec<ResourceKey> {
        let removed = {
            let mut state = self.write();
            let seen = state.relisting.take().unwrap_or_default();
            let mut removed: Vec<_> = state
                .entries
                .keys()
                .filter(|key| !seen.contains(*key))
                .cloned()
                .collect();
            for key in &removed {
                state.entries.remove(key);
            }
            removed.sort();
            removed
        };
        self.synced.send_replace(true);
        removed
    }

    /// Stores `deployment` under `key`, replacing any previous snapshot.
    pub(crate) fn apply(&self, key: ResourceKey, deployment: Deployment) {
        let entry = CacheEntry {
            resource_version: deployment.metadata.resource_version.clone(),
            resource: Arc::new(deployment),
            observed_at: Utc::now(),
        };
        let mut state = self.write();
        if let Some(seen) = state.relisting.as_mut() {
            seen.insert(key.clone());
        }
        state.entries.insert(key, entry);
    }

    /// Drops the snapshot at `key`.
    pub(crate) fn remove(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let mut state = self.write();
        if let Some(seen) = state.relisting.as_mut() {
            seen.remove(key);
        }
        state.entries.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_deployment;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new("ns1", name)
    }

    #[test]
    fn test_get_missing_is_none() {
        let cache = LocalCache::new();
        assert!(cache.get(&key("web")).is_none());
        assert_eq!(cache.len(), 0);
        assert!(!cache.has_synced());
    }

    #[test]
    fn test_apply_replaces_whole_entry() {
        let cache = LocalCache::new();
        let mut first = create_test_deployment("ns1", "web", &[("app", "web")]);
        first.metadata.resource_version = Some("1".to_string());
        cache.apply(key("web"), first);
        let before = cache.get(&key("web")).unwrap();

        let mut second = create_test_deployment("ns1", "web", &[("app", "web2")]);
        second.metadata.resource_version = Some("2".to_string());
        cache.apply(key("web"), second);

        let current = cache.entry(&key("web")).unwrap();
        assert_eq!(current.resource_version.as_deref(), Some("2"));
        assert_eq!(current.resource.metadata.resource_version.as_deref(), Some("2"));
        assert_eq!(cache.len(), 1);
        // A snapshot handed out earlier is unaffected by the update
        assert_eq!(before.metadata.resource_version.as_deref(), Some("1"));
    }

    #[test]
    fn test_remove_drops_entry() {
        let cache = LocalCache::new();
        cache.apply(key("web"), create_test_deployment("ns1", "web", &[]));
        let removed = cache.remove(&key("web")).unwrap();
        assert_eq!(removed.resource.metadata.name.as_deref(), Some("web"));
        assert!(cache.get(&key("web")).is_none());
        assert!(cache.remove(&key("web")).is_none());
    }

    #[test]
    fn test_relist_drops_unseen_entries_and_marks_synced() {
        let cache = LocalCache::new();
        cache.apply(key("old"), create_test_deployment("ns1", "old", &[]));
        cache.apply(key("kept"), create_test_deployment("ns1", "kept", &[]));

        cache.begin_relist();
        cache.apply(key("kept"), create_test_deployment("ns1", "kept", &[]));
        cache.apply(key("new"), create_test_deployment("ns1", "new", &[]));
        let removed = cache.finish_relist();

        assert_eq!(removed, vec![key("old")]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("kept")).is_some());
        assert!(cache.get(&key("new")).is_some());
        assert!(cache.get(&key("old")).is_none());
        assert!(cache.has_synced());
    }

    #[tokio::test]
    async fn test_wait_until_synced_returns_after_first_list() {
        let cache = LocalCache::new();
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_until_synced().await })
        };
        cache.begin_relist();
        cache.finish_relist();
        waiter.await.unwrap();
        assert!(cache.has_synced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_synced_returns_at_once_when_already_synced() {
        let cache = LocalCache::new();
        cache.begin_relist();
        cache.finish_relist();

        tokio::time::timeout(std::time::Duration::from_millis(1), cache.wait_until_synced())
            .await
            .expect("synced cache must not block");
    }
}

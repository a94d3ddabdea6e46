//! Deduplicating, rate-limited work queue of resource keys.
//!
//! Level-triggered semantics: only the latest state of an object matters, so
//! a key that is already waiting is never queued twice, and a key that is
//! changed while a worker holds it is marked dirty and handed out again once
//! that worker calls [`EventQueue::done`]. A key is never given to two
//! workers at the same time.

use crate::backoff::{RateLimiter, RateLimiterConfig};
use crate::key::ResourceKey;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, in FIFO order
    queue: VecDeque<ResourceKey>,
    /// Keys that need processing (queued, or changed while processing)
    dirty: HashSet<ResourceKey>,
    /// Keys currently held by a worker
    processing: HashSet<ResourceKey>,
    shutting_down: bool,
}

struct QueueInner {
    name: String,
    state: Mutex<QueueState>,
    limiter: Mutex<RateLimiter>,
    notify: Notify,
}

/// Cloneable handle to a shared work queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    /// Creates an empty queue named `name` (used in logs).
    pub fn new(name: impl Into<String>, limiter: &RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                limiter: Mutex::new(RateLimiter::new(limiter)),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.inner.limiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Marks `key` as needing processing.
    ///
    /// No-op if the key is already waiting. If a worker currently holds the
    /// key it is only marked dirty and re-queued by [`done`](Self::done).
    pub fn add(&self, key: ResourceKey) {
        let mut state = self.state();
        if state.shutting_down {
            trace!("[{}] dropping {} after shutdown", self.inner.name, key);
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!("[{}] {} already pending", self.inner.name, key);
            return;
        }
        if state.processing.contains(&key) {
            debug!("[{}] {} changed while processing, will requeue", self.inner.name, key);
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key.
    ///
    /// Returns `None` once the queue is shutting down, including for calls
    /// already blocked at that moment. Every `Some` must be paired with one
    /// call to [`done`](Self::done).
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            // Register interest before inspecting state so a concurrent
            // add/shut_down between the check and the await is not missed.
            let notified = self.inner.notify.notified();
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on; permits do not accumulate.
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as no longer being processed.
    pub fn done(&self, key: &ResourceKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.shutting_down || !state.dirty.contains(key) {
            return;
        }
        state.queue.push_back(key.clone());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed.
    pub fn add_after(&self, key: ResourceKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Adds `key` after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, key: ResourceKey) {
        let delay = self.limiter().when(&key);
        debug!("[{}] requeue {} in {:?}", self.inner.name, key, delay);
        self.add_after(key, delay);
    }

    /// Resets the failure history of `key`.
    pub fn forget(&self, key: &ResourceKey) {
        self.limiter().forget(key);
    }

    /// Consecutive rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.limiter().num_requeues(key)
    }

    /// Stops the queue: pending and future `get` calls return `None`.
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!("[{}] shutting down", self.inner.name);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Number of keys currently held by workers.
    pub fn in_flight(&self) -> usize {
        self.state().processing.len()
    }
}

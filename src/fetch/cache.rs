//! Single-flight fetch result cache.
//!
//! Two maps, both keyed by normalized entity path:
//!
//! - `completed`: successful results with a conditional expiry
//! - `in_progress`: the shared future of the one fetch running for a key
//!
//! The in-progress marker is registered inside the same critical section that
//! found no completed result, before anything yields. The fetch itself runs in
//! a spawned task, so it settles and populates the cache even if every waiter
//! stops listening. On settle the result is cached first and the marker is
//! removed second, so a key is never observed with neither.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::fetch::FetchOutcome;
use crate::models::FetchResult;

/// Outcome of a (possibly shared) fetch, as seen by every waiter.
#[derive(Debug, Clone)]
pub enum FetchReply {
    Fetched(Arc<FetchResult>),
    Skipped { outcome: String, message: String },
    Failed(Arc<AppError>),
}

/// Decides whether an expired entry may be evicted.
pub type EvictionHook = Arc<dyn Fn(&str, &Arc<FetchResult>) -> bool + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, FetchReply>>;

struct CachedResult {
    result: Arc<FetchResult>,
    expires_at: Instant,
}

/// Process-wide fetch result cache with in-flight coalescing.
pub struct FetchResultCache {
    ttl: Duration,
    completed: Mutex<HashMap<String, CachedResult>>,
    in_progress: Mutex<HashMap<String, SharedFetch>>,
    evict_when: EvictionHook,
}

/// Clears the in-progress marker when the fetch task ends, panics included.
struct InProgressGuard {
    cache: Arc<FetchResultCache>,
    key: String,
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.cache.in_progress().remove(&self.key);
    }
}

impl FetchResultCache {
    /// Cache whose expired entries are kept while any request still holds them.
    pub fn new(ttl: Duration) -> Self {
        Self::with_eviction_hook(ttl, Arc::new(|_, result| !result.is_in_use()))
    }

    pub fn with_eviction_hook(ttl: Duration, evict_when: EvictionHook) -> Self {
        Self {
            ttl,
            completed: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashMap::new()),
            evict_when,
        }
    }

    fn completed(&self) -> MutexGuard<'_, HashMap<String, CachedResult>> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_progress(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.in_progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached result for `key`.
    ///
    /// An expired entry is evicted when the hook allows it; otherwise its expiry is renewed.
    pub fn get(&self, key: &str) -> Option<Arc<FetchResult>> {
        let evicted;
        {
            let mut completed = self.completed();
            let entry = completed.get_mut(key)?;
            if entry.expires_at > Instant::now() {
                return Some(Arc::clone(&entry.result));
            }
            if !(self.evict_when)(key, &entry.result) {
                entry.expires_at = Instant::now() + self.ttl;
                return Some(Arc::clone(&entry.result));
            }
            evicted = completed.remove(key);
        }
        // resources are released outside the lock
        drop(evicted);
        log::debug!("Evicted expired fetch result {}", key);
        None
    }

    /// Store a successful result.
    pub fn insert(&self, key: &str, result: Arc<FetchResult>) {
        let replaced = self.completed().insert(
            key.to_string(),
            CachedResult {
                result,
                expires_at: Instant::now() + self.ttl,
            },
        );
        drop(replaced);
        self.purge_expired();
    }

    pub fn remove(&self, key: &str) -> Option<Arc<FetchResult>> {
        self.completed().remove(key).map(|entry| entry.result)
    }

    /// Evict every expired entry the hook allows; renew the rest.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut completed = self.completed();
            let expired: Vec<String> = completed
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                let evict = completed
                    .get(&key)
                    .is_some_and(|entry| (self.evict_when)(&key, &entry.result));
                if evict {
                    if let Some(entry) = completed.remove(&key) {
                        evicted.push(entry);
                    }
                } else if let Some(entry) = completed.get_mut(&key) {
                    entry.expires_at = now + self.ttl;
                }
            }
        }
        evicted.len()
    }

    pub fn len(&self) -> usize {
        self.completed().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_progress().len()
    }

    /// Cached result, the reply of the fetch in flight, or the reply of `fetch` started now.
    ///
    /// Only successful fetches are cached. `fetch` is dropped unpolled when not needed.
    pub async fn get_or_fetch<F>(self: &Arc<Self>, key: &str, fetch: F) -> FetchReply
    where
        F: Future<Output = Result<FetchOutcome>> + Send + 'static,
    {
        if let Some(hit) = self.get(key) {
            return FetchReply::Fetched(hit);
        }

        let shared = {
            let mut in_progress = self.in_progress();
            if let Some(running) = in_progress.get(key) {
                log::debug!("Joining in-flight fetch {}", key);
                running.clone()
            } else if let Some(hit) = self.get(key) {
                // settled between the first lookup and taking the lock
                return FetchReply::Fetched(hit);
            } else {
                let shared = self.start(key, fetch);
                in_progress.insert(key.to_string(), shared.clone());
                shared
            }
        };
        shared.await
    }

    fn start<F>(self: &Arc<Self>, key: &str, fetch: F) -> SharedFetch
    where
        F: Future<Output = Result<FetchOutcome>> + Send + 'static,
    {
        let guard = InProgressGuard {
            cache: Arc::clone(self),
            key: key.to_string(),
        };
        let task = tokio::spawn(async move {
            log::debug!("Start fetch {}", guard.key);
            let reply = match fetch.await {
                Ok(FetchOutcome::Fetched(result)) => {
                    let result = Arc::new(result);
                    guard.cache.insert(&guard.key, Arc::clone(&result));
                    FetchReply::Fetched(result)
                }
                Ok(FetchOutcome::Skipped { outcome, message }) => {
                    FetchReply::Skipped { outcome, message }
                }
                Err(e) => FetchReply::Failed(Arc::new(e)),
            };
            log::debug!("End fetch {}", guard.key);
            drop(guard);
            reply
        });
        async move {
            match task.await {
                Ok(reply) => reply,
                Err(e) => FetchReply::Failed(Arc::new(AppError::from(e))),
            }
        }
        .boxed()
        .shared()
    }
}

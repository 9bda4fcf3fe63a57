//! Per-URL processing locks shared by the workers of one process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// A held lock. Only the holder's token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlLock {
    pub url: String,
    token: Uuid,
}

/// Table of URL locks that lapse after their TTL.
///
/// A lock left behind by a worker that died mid-request stops blocking the
/// URL once it expires.
#[derive(Debug, Default)]
pub struct UrlLocks {
    held: Mutex<HashMap<String, (Uuid, Instant)>>,
}

impl UrlLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, (Uuid, Instant)>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock `url` for `ttl`. `None` while someone else holds it.
    pub fn try_lock(&self, url: &str, ttl: Duration) -> Option<UrlLock> {
        let now = Instant::now();
        let mut held = self.held();
        if let Some((_, expires)) = held.get(url) {
            if *expires > now {
                return None;
            }
        }
        let token = Uuid::new_v4();
        held.insert(url.to_string(), (token, now + ttl));
        Some(UrlLock {
            url: url.to_string(),
            token,
        })
    }

    /// Release `lock`. A lock that expired and was taken over stays with its new holder.
    pub fn unlock(&self, lock: &UrlLock) {
        let mut held = self.held();
        if held.get(&lock.url).is_some_and(|(token, _)| *token == lock.token) {
            held.remove(&lock.url);
        }
    }

    pub fn is_locked(&self, url: &str) -> bool {
        self.held()
            .get(url)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "cd:/npm/npmjs/-/left-pad/1.3.0";

    #[tokio::test]
    async fn test_second_lock_on_same_url_fails() {
        let locks = UrlLocks::new();
        let lock = locks.try_lock(URL, Duration::from_secs(60)).unwrap();
        assert!(locks.try_lock(URL, Duration::from_secs(60)).is_none());
        assert!(locks.try_lock("cd:/npm/npmjs/-/pad-left/1.0.0", Duration::from_secs(60)).is_some());

        locks.unlock(&lock);
        assert!(!locks.is_locked(URL));
        assert!(locks.try_lock(URL, Duration::from_secs(60)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_taken_over() {
        let locks = UrlLocks::new();
        let stale = locks.try_lock(URL, Duration::from_secs(60)).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let fresh = locks.try_lock(URL, Duration::from_secs(60)).unwrap();
        locks.unlock(&stale);
        assert!(locks.is_locked(URL));

        locks.unlock(&fresh);
        assert!(!locks.is_locked(URL));
    }
}

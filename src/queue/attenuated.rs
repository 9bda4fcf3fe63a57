//! Duplicate push suppression.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;
use crate::models::Request;
use crate::queue::{CrawlQueue, QueueInfo};

/// Drops pushes of a request already pushed within the last `ttl`.
///
/// Requests are keyed by attempt count, type and URL, so a requeue (one more
/// attempt) is never mistaken for a duplicate. Acknowledging a request forgets
/// its key.
pub struct AttenuatedQueue {
    inner: Arc<dyn CrawlQueue>,
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl AttenuatedQueue {
    pub fn new(inner: Arc<dyn CrawlQueue>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn key(request: &Request) -> String {
        format!("{}:{}@{}", request.attempt_count, request.kind, request.url)
    }

    fn seen(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Split off the requests not pushed recently, remembering their keys.
    fn admit(&self, requests: Vec<Request>) -> (Vec<Request>, Vec<String>) {
        let now = Instant::now();
        let mut seen = self.seen();
        seen.retain(|_, pushed_at| now.duration_since(*pushed_at) < self.ttl);

        let mut admitted = Vec::with_capacity(requests.len());
        let mut keys = Vec::with_capacity(requests.len());
        for request in requests {
            let key = Self::key(&request);
            if seen.contains_key(&key) {
                log::debug!("Attenuated {}", key);
                continue;
            }
            seen.insert(key.clone(), now);
            keys.push(key);
            admitted.push(request);
        }
        (admitted, keys)
    }
}

#[async_trait]
impl CrawlQueue for AttenuatedQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn push(&self, requests: Vec<Request>) -> Result<()> {
        let (admitted, keys) = self.admit(requests);
        if admitted.is_empty() {
            return Ok(());
        }
        let result = self.inner.push(admitted).await;
        if result.is_err() {
            // a failed push must not block the retry
            let mut seen = self.seen();
            for key in &keys {
                seen.remove(key);
            }
        }
        result
    }

    async fn pop(&self) -> Result<Option<Request>> {
        self.inner.pop().await
    }

    async fn done(&self, request: &Request) -> Result<()> {
        self.inner.done(request).await?;
        self.seen().remove(&Self::key(request));
        Ok(())
    }

    async fn abandon(&self, request: &Request) -> Result<()> {
        self.inner.abandon(request).await
    }

    async fn subscribe(&self) -> Result<()> {
        self.inner.subscribe().await
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.inner.unsubscribe().await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    async fn info(&self) -> Result<QueueInfo> {
        self.inner.info().await
    }

    async fn recover(&self, max: usize) -> Result<usize> {
        self.inner.recover(max).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::queue::InMemoryQueue;

    fn attenuated() -> (AttenuatedQueue, Arc<InMemoryQueue>) {
        let inner = Arc::new(InMemoryQueue::new("normal"));
        (
            AttenuatedQueue::new(inner.clone(), Duration::from_secs(1)),
            inner,
        )
    }

    async fn count(queue: &InMemoryQueue) -> usize {
        queue.info().await.unwrap().count
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_push_within_ttl_is_dropped() {
        let (queue, inner) = attenuated();
        queue
            .push(vec![
                Request::new("npm", "cd:/npm/npmjs/-/a/1"),
                Request::new("npm", "cd:/npm/npmjs/-/a/1"),
                Request::new("npm", "cd:/npm/npmjs/-/b/1"),
            ])
            .await
            .unwrap();
        assert_eq!(count(&inner).await, 2);

        queue.push_one(Request::new("npm", "cd:/npm/npmjs/-/a/1")).await.unwrap();
        assert_eq!(count(&inner).await, 2);

        tokio::time::advance(Duration::from_millis(1001)).await;
        queue.push_one(Request::new("npm", "cd:/npm/npmjs/-/a/1")).await.unwrap();
        assert_eq!(count(&inner).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_is_not_a_duplicate() {
        let (queue, inner) = attenuated();
        let mut retry = Request::new("npm", "cd:/npm/npmjs/-/a/1");
        retry.attempt_count = 1;
        queue
            .push(vec![Request::new("npm", "cd:/npm/npmjs/-/a/1"), retry])
            .await
            .unwrap();
        assert_eq!(count(&inner).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_forgets_the_key() {
        let (queue, inner) = attenuated();
        queue.push_one(Request::new("npm", "cd:/npm/npmjs/-/a/1")).await.unwrap();
        let request = queue.pop().await.unwrap().unwrap();
        queue.done(&request).await.unwrap();

        queue.push_one(Request::new("npm", "cd:/npm/npmjs/-/a/1")).await.unwrap();
        assert_eq!(count(&inner).await, 1);
    }

    struct FailingQueue;

    #[async_trait]
    impl CrawlQueue for FailingQueue {
        fn name(&self) -> &str {
            "failing"
        }

        async fn push(&self, _requests: Vec<Request>) -> Result<()> {
            Err(AppError::queue("unavailable"))
        }

        async fn pop(&self) -> Result<Option<Request>> {
            Ok(None)
        }

        async fn done(&self, _request: &Request) -> Result<()> {
            Ok(())
        }

        async fn abandon(&self, _request: &Request) -> Result<()> {
            Ok(())
        }

        async fn subscribe(&self) -> Result<()> {
            Ok(())
        }

        async fn unsubscribe(&self) -> Result<()> {
            Ok(())
        }

        async fn flush(&self) -> Result<()> {
            Ok(())
        }

        async fn info(&self) -> Result<QueueInfo> {
            Ok(QueueInfo {
                name: "failing".into(),
                count: 0,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_can_be_retried() {
        let queue = AttenuatedQueue::new(Arc::new(FailingQueue), Duration::from_secs(1));
        for _ in 0..2 {
            let result = queue.push_one(Request::new("npm", "cd:/npm/npmjs/-/a/1")).await;
            assert!(matches!(result, Err(AppError::Queue(_))));
        }
    }
}

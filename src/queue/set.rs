//! Weighted priority tiers over named queues.
//!
//! Each pop picks a starting tier from a weighted start map, then walks the
//! remaining tiers in order until one yields a request. A tier weighing `n`
//! owns `n` slots of the map, so it is the first one asked `n` times as often
//! as a tier weighing 1.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use rand::Rng;

use crate::error::{AppError, Result};
use crate::models::Request;
use crate::queue::{CrawlQueue, QueueInfo};

/// Priority-ordered set of queues presented as one.
///
/// Pushes land on the first tier unless routed with [`QueueSet::push_to`].
/// Popped requests remember their tier, so `done` and `abandon` go back to it.
pub struct QueueSet {
    name: String,
    queues: Vec<Arc<dyn CrawlQueue>>,
    start_map: Vec<usize>,
}

impl QueueSet {
    /// Fails when `queues` is empty or two queues share a name.
    pub fn new(
        name: impl Into<String>,
        queues: Vec<Arc<dyn CrawlQueue>>,
        weights: &BTreeMap<String, u32>,
    ) -> Result<Self> {
        if queues.is_empty() {
            return Err(AppError::config("Queue set needs at least one queue"));
        }
        for (i, queue) in queues.iter().enumerate() {
            if queues[..i].iter().any(|other| other.name() == queue.name()) {
                return Err(AppError::config(format!(
                    "Duplicate queue name: {}",
                    queue.name()
                )));
            }
        }
        let start_map = Self::start_map(&queues, weights);
        Ok(Self {
            name: name.into(),
            queues,
            start_map,
        })
    }

    fn start_map(queues: &[Arc<dyn CrawlQueue>], weights: &BTreeMap<String, u32>) -> Vec<usize> {
        queues
            .iter()
            .enumerate()
            .flat_map(|(i, queue)| {
                let weight = weights.get(queue.name()).copied().unwrap_or(1).max(1);
                std::iter::repeat_n(i, weight as usize)
            })
            .collect()
    }

    pub fn queue(&self, name: &str) -> Result<&Arc<dyn CrawlQueue>> {
        self.queues
            .iter()
            .find(|queue| queue.name() == name)
            .ok_or_else(|| AppError::queue(format!("Queue not found: {name}")))
    }

    pub fn tiers(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|queue| queue.name())
    }

    /// Push onto the tier called `name`.
    pub async fn push_to(&self, name: &str, requests: Vec<Request>) -> Result<()> {
        self.queue(name)?.push(requests).await
    }

    /// Pop, starting from tier `start` and wrapping around.
    pub async fn pop_from(&self, start: usize) -> Result<Option<Request>> {
        for offset in 0..self.queues.len() {
            let queue = &self.queues[(start + offset) % self.queues.len()];
            if let Some(mut request) = queue.pop().await? {
                request.origin_queue.get_or_insert_with(|| queue.name().to_string());
                return Ok(Some(request));
            }
        }
        Ok(None)
    }

    fn origin_of(&self, request: &Request) -> Result<&Arc<dyn CrawlQueue>> {
        match request.origin_queue.as_deref() {
            Some(name) => self.queue(name),
            None => Err(AppError::queue(format!(
                "{request} was not popped from queue set {}",
                self.name
            ))),
        }
    }

    async fn settle_all<'a, F>(&'a self, context: &str, op: F) -> Result<()>
    where
        F: Fn(&'a Arc<dyn CrawlQueue>) -> future::BoxFuture<'a, Result<()>>,
    {
        let results = future::join_all(self.queues.iter().map(op)).await;
        AppError::settle(
            format!("{context} {}", self.name),
            results.into_iter().filter_map(Result::err).collect(),
        )
    }
}

#[async_trait]
impl CrawlQueue for QueueSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, requests: Vec<Request>) -> Result<()> {
        self.queues[0].push(requests).await
    }

    async fn pop(&self) -> Result<Option<Request>> {
        let slot = rand::rng().random_range(0..self.start_map.len());
        self.pop_from(self.start_map[slot]).await
    }

    async fn done(&self, request: &Request) -> Result<()> {
        self.origin_of(request)?.done(request).await
    }

    async fn abandon(&self, request: &Request) -> Result<()> {
        self.origin_of(request)?.abandon(request).await
    }

    async fn subscribe(&self) -> Result<()> {
        self.settle_all("Failed to subscribe", |queue| queue.subscribe())
            .await
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.settle_all("Failed to unsubscribe", |queue| queue.unsubscribe())
            .await
    }

    async fn flush(&self) -> Result<()> {
        self.settle_all("Failed to flush", |queue| queue.flush()).await
    }

    async fn info(&self) -> Result<QueueInfo> {
        let mut count = 0;
        for queue in &self.queues {
            count += queue.info().await?.count;
        }
        Ok(QueueInfo {
            name: self.name.clone(),
            count,
        })
    }

    async fn recover(&self, max: usize) -> Result<usize> {
        let mut recovered = 0;
        for queue in &self.queues {
            if recovered >= max {
                break;
            }
            recovered += queue.recover(max - recovered).await?;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;

    fn tiers(names: &[&str]) -> Vec<Arc<dyn CrawlQueue>> {
        names
            .iter()
            .map(|name| Arc::new(InMemoryQueue::new(*name)) as Arc<dyn CrawlQueue>)
            .collect()
    }

    fn set(weights: &[(&str, u32)]) -> QueueSet {
        let weights = weights
            .iter()
            .map(|(name, weight)| (name.to_string(), *weight))
            .collect();
        QueueSet::new("crawl", tiers(&["immediate", "normal", "later"]), &weights).unwrap()
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let result = QueueSet::new("crawl", tiers(&["normal", "normal"]), &BTreeMap::new());
        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(QueueSet::new("crawl", Vec::new(), &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_start_map_follows_weights() {
        let set = set(&[("immediate", 3), ("later", 0)]);
        assert_eq!(set.start_map, vec![0, 0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_pop_walks_tiers_from_the_start_slot() {
        let set = set(&[]);
        set.push_to("immediate", vec![Request::new("npm", "cd:/a")]).await.unwrap();
        set.push_to("later", vec![Request::new("npm", "cd:/c")]).await.unwrap();

        // starting at "normal" skips the empty tier and wraps past "later"
        let first = set.pop_from(1).await.unwrap().unwrap();
        assert_eq!(first.url, "cd:/c");
        assert_eq!(first.origin_queue.as_deref(), Some("later"));

        let second = set.pop_from(1).await.unwrap().unwrap();
        assert_eq!(second.url, "cd:/a");
        assert_eq!(second.origin_queue.as_deref(), Some("immediate"));
        assert!(set.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_defaults_to_first_tier() {
        let set = set(&[]);
        set.push_one(Request::new("npm", "cd:/a")).await.unwrap();
        assert_eq!(set.queue("immediate").unwrap().info().await.unwrap().count, 1);
        assert_eq!(set.info().await.unwrap().count, 1);
        assert!(set.push_to("missing", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_abandon_returns_to_origin_tier() {
        let set = set(&[]);
        set.push_to("later", vec![Request::new("npm", "cd:/c")]).await.unwrap();
        let request = set.pop().await.unwrap().unwrap();

        set.abandon(&request).await.unwrap();
        assert_eq!(set.queue("later").unwrap().info().await.unwrap().count, 1);
        set.done(&request).await.unwrap();

        let stray = Request::new("npm", "cd:/x");
        assert!(matches!(set.done(&stray).await, Err(AppError::Queue(_))));
    }

    #[tokio::test]
    async fn test_flush_clears_every_tier() {
        let set = set(&[]);
        set.push_to("immediate", vec![Request::new("npm", "cd:/a")]).await.unwrap();
        set.push_to("later", vec![Request::new("npm", "cd:/c")]).await.unwrap();
        set.flush().await.unwrap();
        assert_eq!(set.info().await.unwrap().count, 0);
    }
}

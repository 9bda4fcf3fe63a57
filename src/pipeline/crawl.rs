// src/pipeline/crawl.rs

//! Crawler assembly from configuration, and the crawl entry point.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future;

use crate::error::{AppError, Result};
use crate::fetch::{
    FetchDispatcher, FetchResultCache, Fetcher, Fetchers, HttpFetcher, PassthroughProcessor,
    Processor, Processors, StandardFilter,
};
use crate::models::{Config, Request};
use crate::pipeline::{CrawlSummary, Crawler, UrlLocks};
use crate::queue::{
    AttenuatedQueue, CrawlQueue, DurableQueue, HybridQueue, InMemoryQueue, MemoryDurableQueue,
    QueueSet,
};
use crate::storage::{
    AttachmentStore, DocumentStore, HashedContentStore, LocalStorage, QueueNotifierStore,
    StoreDispatcher, WebhookStore,
};
use crate::utils::http::create_async_client;

/// Every shared collaborator of a set of workers.
pub struct CrawlerSystem {
    config: Config,
    pub queue: Arc<dyn CrawlQueue>,
    pub dispatcher: Arc<FetchDispatcher>,
    pub processors: Arc<Processors>,
    pub store: Arc<dyn DocumentStore>,
    pub deadletters: Arc<dyn DocumentStore>,
    /// Receives `{type, url}` of every stored document when `storage.notify_queue` is set
    pub notifications: Option<Arc<dyn DurableQueue>>,
    pub locks: Arc<UrlLocks>,
}

impl CrawlerSystem {
    /// Wire queue, fetchers, processors and stores as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let client = create_async_client(&config.fetch)?;

        let fetchers: Vec<Arc<dyn Fetcher>> = config
            .fetchers
            .iter()
            .map(|fetcher| Arc::new(HttpFetcher::new(fetcher, client.clone())) as Arc<dyn Fetcher>)
            .collect();
        let kinds: BTreeSet<&str> = config.fetchers.iter().map(|f| f.kind.as_str()).collect();
        let processors: Vec<Arc<dyn Processor>> = kinds
            .into_iter()
            .map(|kind| Arc::new(PassthroughProcessor::new(kind)) as Arc<dyn Processor>)
            .collect();
        let processors = Arc::new(Processors::new(processors));

        let notifications = config
            .storage
            .notify_queue
            .then(|| Arc::new(MemoryDurableQueue::new()) as Arc<dyn DurableQueue>);
        let store: Arc<dyn DocumentStore> = Arc::new(Self::document_stores(
            config,
            &client,
            notifications.clone(),
        ));
        let deadletters: Arc<dyn DocumentStore> = Arc::new(
            LocalStorage::new(config.storage.deadletter_path()).named("deadletter"),
        );

        let dispatcher = Arc::new(FetchDispatcher::new(
            store.clone(),
            Arc::new(Fetchers::new(fetchers)),
            processors.clone(),
            Arc::new(StandardFilter::new(processors.clone())),
            Arc::new(FetchResultCache::new(config.fetch.cache_ttl())),
        ));

        let queue = Self::queue_set(config)?;

        Ok(Self {
            config: config.clone(),
            queue,
            dispatcher,
            processors,
            store,
            deadletters,
            notifications,
            locks: Arc::new(UrlLocks::new()),
        })
    }

    /// One hybrid queue per tier, each behind push attenuation when enabled.
    fn queue_set(config: &Config) -> Result<Arc<dyn CrawlQueue>> {
        let settings = &config.queue;
        let tiers: Vec<Arc<dyn CrawlQueue>> = settings
            .tier_names()
            .into_iter()
            .map(|tier| {
                let hybrid: Arc<dyn CrawlQueue> = Arc::new(HybridQueue::with_config(
                    Arc::new(InMemoryQueue::new(tier)),
                    Arc::new(MemoryDurableQueue::new()),
                    settings,
                ));
                if settings.attenuation_ttl_ms == 0 {
                    hybrid
                } else {
                    Arc::new(AttenuatedQueue::new(hybrid, settings.attenuation_ttl()))
                        as Arc<dyn CrawlQueue>
                }
            })
            .collect();
        Ok(Arc::new(QueueSet::new(
            settings.name.as_str(),
            tiers,
            &settings.weights,
        )?))
    }

    fn document_stores(
        config: &Config,
        client: &reqwest::Client,
        notifications: Option<Arc<dyn DurableQueue>>,
    ) -> StoreDispatcher {
        let storage = &config.storage;
        let local: Arc<dyn DocumentStore> = Arc::new(LocalStorage::new(&storage.root_dir));
        let mut stores: Vec<Arc<dyn DocumentStore>> = Vec::new();
        if storage.attachments {
            stores.push(Arc::new(AttachmentStore::new(local.clone())));
        } else {
            stores.push(local.clone());
        }
        if storage.hashed_content {
            stores.push(Arc::new(HashedContentStore::new(local)));
        }
        if let Some(url) = &storage.webhook_url {
            stores.push(Arc::new(WebhookStore::new(
                url.as_str(),
                storage.webhook_token.clone(),
                client.clone(),
            )));
        }
        if let Some(queue) = notifications {
            stores.push(Arc::new(QueueNotifierStore::new(queue)));
        }
        StoreDispatcher::new(stores)
    }

    /// A worker over the shared collaborators.
    pub fn crawler(&self, name: impl Into<String>) -> Crawler {
        Crawler::new(
            self.config.crawler.clone(),
            self.queue.clone(),
            self.dispatcher.clone(),
            self.processors.clone(),
            self.store.clone(),
            self.deadletters.clone(),
        )
        .with_locks(self.locks.clone())
        .named(name)
    }

    pub async fn connect(&self) -> Result<()> {
        self.store.connect().await?;
        self.deadletters.connect().await?;
        self.queue.subscribe().await
    }

    pub async fn close(&self) -> Result<()> {
        let results = [
            self.queue.unsubscribe().await,
            self.store.close().await,
            self.deadletters.close().await,
        ];
        AppError::settle(
            "Failed to close crawler system",
            results.into_iter().filter_map(Result::err).collect(),
        )
    }

    /// Run the configured number of workers until the queue stays empty.
    pub async fn run_until_drained(&self) -> Result<CrawlSummary> {
        let name = &self.config.crawler.name;
        let crawlers: Vec<Crawler> = (0..self.config.crawler.workers.max(1))
            .map(|i| self.crawler(format!("{name}-{i}")))
            .collect();

        let mut summary = CrawlSummary::default();
        loop {
            let results = future::join_all(crawlers.iter().map(Crawler::run_until_drained)).await;
            let mut errors = Vec::new();
            for result in results {
                match result {
                    Ok(worker) => summary += worker,
                    Err(e) => errors.push(e),
                }
            }
            AppError::settle("Crawler workers failed", errors)?;

            // a worker may have queued successors after the others drained,
            // and lapsed deliveries only come back through recovery
            let recovered = self.queue.recover(self.config.crawler.recover_batch).await?;
            if recovered == 0 && self.queue.info().await?.count == 0 {
                return Ok(summary);
            }
        }
    }
}

/// Crawl `seeds` and everything they lead to.
pub async fn run_crawler(config: &Config, seeds: Vec<Request>) -> Result<CrawlSummary> {
    let system = CrawlerSystem::from_config(config)?;
    system.connect().await?;

    log::info!("Queueing {} seed request(s)", seeds.len());
    system.queue.push(seeds).await?;
    let summary = system.run_until_drained().await;
    system.close().await?;
    let summary = summary?;

    log::info!(
        "Crawl finished: {} processed, {} skipped, {} requeued, {} dead",
        summary.processed,
        summary.skipped,
        summary.requeued,
        summary.dead
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::models::{FetcherConfig, StorageConfig};
    use crate::storage::MemoryStore;

    fn config(dir: &TempDir) -> Config {
        Config {
            storage: StorageConfig {
                root_dir: dir.path().join("storage"),
                ..StorageConfig::default()
            },
            fetchers: vec![
                FetcherConfig {
                    kind: "npm".into(),
                    url_template: "https://registry.npmjs.com/{namespace/}{name}/{revision}".into(),
                },
                FetcherConfig {
                    kind: "npm".into(),
                    url_template: "https://mirror.example.com/{name}".into(),
                },
            ],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_one_processor_per_kind() {
        let dir = TempDir::new().unwrap();
        let system = CrawlerSystem::from_config(&config(&dir)).unwrap();
        assert_eq!(system.processors.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_tiers_follow_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.queue.tiers = vec!["immediate".into(), "normal".into()];
        let system = CrawlerSystem::from_config(&config).unwrap();

        system.queue.push_one(Request::new("npm", "cd:/npm/npmjs/-/a/1")).await.unwrap();
        // attenuated within the default window
        system.queue.push_one(Request::new("npm", "cd:/npm/npmjs/-/a/1")).await.unwrap();
        assert_eq!(system.queue.info().await.unwrap().count, 1);

        let request = system.queue.pop().await.unwrap().unwrap();
        assert_eq!(request.origin_queue.as_deref(), Some("immediate"));
        system.queue.done(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.crawler.workers = 0;
        assert!(CrawlerSystem::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_malformed_seed_is_deadlettered() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let summary = run_crawler(&config, vec![Request::new("npm", "garbage")])
            .await
            .unwrap();
        assert_eq!(summary.dead, 1);

        let deadletters = LocalStorage::new(config.storage.deadletter_path());
        assert_eq!(deadletters.count("deadletter").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_notify_queue_receives_stored_documents() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        assert!(CrawlerSystem::from_config(&config).unwrap().notifications.is_none());

        config.storage.notify_queue = true;
        let system = CrawlerSystem::from_config(&config).unwrap();
        system.connect().await.unwrap();
        let document = json!({
            "name": "left-pad",
            "_metadata": {
                "type": "npm",
                "url": "cd:/npm/npmjs/-/left-pad/1.3.0",
                "links": { "self": { "href": "urn:npm:npmjs:-:left-pad:revision:1.3.0", "type": "resource" } },
            },
        });
        system.store.upsert(&document).await.unwrap();

        let notifications = system.notifications.as_ref().unwrap();
        let received = notifications.receive(10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, "npm");
        assert_eq!(received[0].url, "cd:/npm/npmjs/-/left-pad/1.3.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_lapsed_deliveries() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.queue.remain_local_visibility_secs = 3600;
        config.queue.processing_visibility_secs = 3600;
        let system = CrawlerSystem::from_config(&config).unwrap();

        // first pushed copy went to a local queue that is gone; only the durable copy is left
        let durable = Arc::new(MemoryDurableQueue::new());
        let lost = HybridQueue::with_config(
            Arc::new(InMemoryQueue::new("lost")),
            durable.clone(),
            &config.queue,
        );
        lost.push_one(Request::new("npm", "garbage")).await.unwrap();
        let deadletters = Arc::new(MemoryStore::new());
        let system = CrawlerSystem {
            queue: Arc::new(HybridQueue::with_config(
                Arc::new(InMemoryQueue::new("normal")),
                durable.clone(),
                &config.queue,
            )),
            deadletters: deadletters.clone(),
            ..system
        };
        tokio::time::advance(Duration::from_secs(3601)).await;

        let summary = system.run_until_drained().await.unwrap();
        assert_eq!(summary.dead, 1);
        assert_eq!(deadletters.count("deadletter").await.unwrap(), Some(1));
        assert!(durable.is_empty());
    }

    #[tokio::test]
    async fn test_empty_seed_list_finishes() {
        let dir = TempDir::new().unwrap();
        let summary = run_crawler(&config(&dir), Vec::new()).await.unwrap();
        assert_eq!(summary, CrawlSummary::default());
    }
}

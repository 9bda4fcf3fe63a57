//! Push, pop, dispatch and complete through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use serde_json::json;

use cd_crawler::error::Result;
use cd_crawler::fetch::{
    FetchDispatcher, FetchOutcome, FetchResultCache, Fetcher, Fetchers, Handler,
    PassthroughProcessor, Processor, Processors, StandardFilter,
};
use cd_crawler::models::{CrawlerConfig, EntitySpec, FetchResult, Policy, ProcessControl, Request};
use cd_crawler::pipeline::Crawler;
use cd_crawler::queue::{CrawlQueue, HybridQueue, InMemoryQueue, MemoryDurableQueue};
use cd_crawler::storage::{DocumentStore, MemoryStore, StoreDispatcher};

const URL: &str = "cd:/npm/npmjs/-/left-pad/1.3.0";
const CACHE_KEY: &str = "npm/npmjs/-/left-pad/1.3.0";

#[derive(Default)]
struct CountingNpmFetcher {
    calls: AtomicUsize,
}

impl CountingNpmFetcher {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Handler for CountingNpmFetcher {
    fn name(&self) -> &str {
        "npm"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.kind == "npm"
    }
}

#[async_trait]
impl Fetcher for CountingNpmFetcher {
    async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let spec = EntitySpec::from_url(&request.url)?;
        Ok(FetchOutcome::Fetched(
            FetchResult::new(json!({ "name": spec.name, "version": spec.revision }))
                .with_etag("\"1.3.0\""),
        ))
    }
}

struct Setup {
    queue: Arc<HybridQueue>,
    durable: Arc<MemoryDurableQueue>,
    fetcher: Arc<CountingNpmFetcher>,
    cache: Arc<FetchResultCache>,
    crawlers: Vec<Crawler>,
}

fn setup(stores: Vec<Arc<dyn DocumentStore>>, workers: usize) -> Setup {
    let durable = Arc::new(MemoryDurableQueue::new());
    let queue = Arc::new(HybridQueue::new(
        Arc::new(InMemoryQueue::new("normal")),
        durable.clone(),
    ));
    let fetcher = Arc::new(CountingNpmFetcher::default());
    let cache = Arc::new(FetchResultCache::new(Duration::from_secs(3600)));
    let store: Arc<dyn DocumentStore> = Arc::new(StoreDispatcher::new(stores));
    let processors = Arc::new(Processors::new(vec![
        Arc::new(PassthroughProcessor::new("npm")) as Arc<dyn Processor>
    ]));
    let dispatcher = Arc::new(FetchDispatcher::new(
        store.clone(),
        Arc::new(Fetchers::new(vec![fetcher.clone() as Arc<dyn Fetcher>])),
        processors.clone(),
        Arc::new(StandardFilter::new(processors.clone())),
        cache.clone(),
    ));
    let crawlers = (0..workers)
        .map(|i| {
            Crawler::new(
                CrawlerConfig::default(),
                queue.clone(),
                dispatcher.clone(),
                processors.clone(),
                store.clone(),
                Arc::new(MemoryStore::new()),
            )
            .named(format!("worker-{i}"))
        })
        .collect();
    Setup {
        queue,
        durable,
        fetcher,
        cache,
        crawlers,
    }
}

#[tokio::test]
async fn second_cycle_is_served_from_the_fetch_cache() {
    // no backing stores, so only the cache can spare the second fetch
    let s = setup(Vec::new(), 1);
    let crawler = &s.crawlers[0];

    s.queue.push_one(Request::new("npm", URL)).await.unwrap();
    assert_eq!(s.durable.len(), 1);

    let outcome = crawler.process_one().await.unwrap().unwrap();
    assert_eq!(outcome.control, ProcessControl::Normal);
    assert_eq!(s.fetcher.calls(), 1);
    assert!(s.cache.get(CACHE_KEY).is_some());
    assert!(s.durable.is_empty());

    s.queue.push_one(Request::new("npm", URL)).await.unwrap();
    let outcome = crawler.process_one().await.unwrap().unwrap();
    assert_eq!(outcome.control, ProcessControl::Normal);
    assert_eq!(s.fetcher.calls(), 1);
    assert!(s.durable.is_empty());
    assert!(crawler.process_one().await.unwrap().is_none());
}

#[tokio::test]
async fn stale_stored_document_is_refreshed_from_the_cache() {
    let store = Arc::new(MemoryStore::new());
    let s = setup(vec![store.clone()], 1);
    let crawler = &s.crawlers[0];

    s.queue
        .push_one(Request::new("npm", URL).with_policy(Policy::always()))
        .await
        .unwrap();
    crawler.process_one().await.unwrap();
    assert_eq!(store.count("npm").await.unwrap(), Some(1));

    s.queue
        .push_one(Request::new("npm", URL).with_policy(Policy::always()))
        .await
        .unwrap();
    crawler.process_one().await.unwrap();
    assert_eq!(s.fetcher.calls(), 1);

    let stored = store
        .get("npm", "urn:npm:npmjs:-:left-pad:revision:1.3.0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["name"], json!("left-pad"));
    assert_eq!(stored["_metadata"]["etag"], json!("\"1.3.0\""));
}

#[tokio::test]
async fn concurrent_workers_share_one_origin_fetch() {
    let s = setup(Vec::new(), 3);
    let requests = (0..6).map(|_| Request::new("npm", URL)).collect();
    s.queue.push(requests).await.unwrap();

    let summaries =
        future::join_all(s.crawlers.iter().map(Crawler::run_until_drained)).await;
    let processed: usize = summaries
        .into_iter()
        .map(|summary| summary.unwrap().processed)
        .sum();

    assert_eq!(processed, 6);
    assert_eq!(s.fetcher.calls(), 1);
    assert_eq!(s.cache.in_flight(), 0);
    assert!(s.durable.is_empty());
}

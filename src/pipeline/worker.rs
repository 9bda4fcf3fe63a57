// src/pipeline/worker.rs

//! Crawl worker loop.
//!
//! One cycle: pop, fetch, convert, process, store, complete.
//!
//! ## Completion
//!
//! - requeue: push a fresh copy with one more attempt (or deadletter once the
//!   attempt budget is spent), then acknowledge the popped delivery
//! - dead: write a deadletter document, then acknowledge
//! - otherwise: push successors, release resources, acknowledge
//!
//! When completion itself fails the request is abandoned back onto the local
//! queue rather than acknowledged.

use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::fetch::{FetchDispatcher, Processors};
use crate::models::{
    ContentOrigin, CrawlerConfig, DeadletterPolicy, EntitySpec, ProcessControl, Request,
    self_link,
};
use crate::pipeline::{UrlLock, UrlLocks};
use crate::queue::CrawlQueue;
use crate::storage::DocumentStore;

/// What happened to one popped request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub kind: String,
    pub url: String,
    pub control: ProcessControl,
    pub outcome: String,
    pub message: Option<String>,
}

/// Counts of request outcomes over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub processed: usize,
    pub skipped: usize,
    pub requeued: usize,
    pub dead: usize,
}

impl CrawlSummary {
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.requeued + self.dead
    }

    fn record(&mut self, outcome: &RequestOutcome) {
        match outcome.control {
            ProcessControl::Normal => self.processed += 1,
            ProcessControl::Skip => self.skipped += 1,
            ProcessControl::Requeue => self.requeued += 1,
            ProcessControl::Dead => self.dead += 1,
        }
    }
}

impl AddAssign for CrawlSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.requeued += other.requeued;
        self.dead += other.dead;
    }
}

/// A worker draining one queue.
pub struct Crawler {
    name: String,
    config: CrawlerConfig,
    queue: Arc<dyn CrawlQueue>,
    dispatcher: Arc<FetchDispatcher>,
    processors: Arc<Processors>,
    store: Arc<dyn DocumentStore>,
    deadletters: Arc<dyn DocumentStore>,
    locks: Option<Arc<UrlLocks>>,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        queue: Arc<dyn CrawlQueue>,
        dispatcher: Arc<FetchDispatcher>,
        processors: Arc<Processors>,
        store: Arc<dyn DocumentStore>,
        deadletters: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            config,
            queue,
            dispatcher,
            processors,
            store,
            deadletters,
            locks: None,
        }
    }

    /// Lock each request URL in `locks` while it is processed.
    pub fn with_locks(mut self, locks: Arc<UrlLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Rename this worker in log lines.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Process the next request. `None` when the queue is drained.
    pub async fn process_one(&self) -> Result<Option<RequestOutcome>> {
        let Some(mut request) = self.queue.pop().await? else {
            return Ok(None);
        };
        let start = Instant::now();
        request.add_meta("loopName", self.name.as_str());

        let mut lock = None;
        if request.attempt_count > self.config.max_requeue_attempts {
            let reason = format!("Exceeded attempt count for {request}");
            request.mark_dead("Deadletter", &reason);
        } else {
            if request.attempt_count > 0 {
                tokio::time::sleep(self.config.requeue_delay() * request.attempt_count).await;
            }
            lock = self.acquire_lock(&mut request);
            if !request.should_skip() {
                if let Err(e) = self.process(&mut request).await {
                    self.handle_error(&mut request, e);
                }
            }
        }
        let completed = self.complete(&mut request).await;
        if let (Some(locks), Some(lock)) = (&self.locks, &lock) {
            locks.unlock(lock);
        }
        if let Err(e) = completed {
            log::error!("Failed to complete {}: {}", request, e);
            if let Err(e) = self.queue.abandon(&request).await {
                log::error!("Failed to abandon {}: {}", request, e);
            }
        }
        Ok(Some(self.log_outcome(&mut request, start)))
    }

    /// Loop until `stop` is set.
    ///
    /// A drained queue first tries to recover redelivered requests, and only
    /// pauses for the polling delay when there were none.
    pub async fn run(&self, stop: &AtomicBool) -> CrawlSummary {
        let mut summary = CrawlSummary::default();
        while !stop.load(Ordering::SeqCst) {
            match self.process_one().await {
                Ok(Some(outcome)) => summary.record(&outcome),
                Ok(None) => match self.queue.recover(self.config.recover_batch).await {
                    Ok(recovered) if recovered > 0 => continue,
                    Ok(_) => {
                        log::debug!("{}: drained, waiting {:?}", self.name, self.config.polling_delay());
                        tokio::time::sleep(self.config.polling_delay()).await;
                    }
                    Err(e) => {
                        log::error!("{}: recovery failed: {}", self.name, e);
                        tokio::time::sleep(self.config.polling_delay()).await;
                    }
                },
                Err(e) => {
                    log::error!("{}: {}", self.name, e);
                    tokio::time::sleep(self.config.polling_delay()).await;
                }
            }
        }
        summary
    }

    /// Process until the queue reports nothing left and nothing is recoverable.
    pub async fn run_until_drained(&self) -> Result<CrawlSummary> {
        let mut summary = CrawlSummary::default();
        loop {
            let Some(outcome) = self.process_one().await? else {
                if self.queue.recover(self.config.recover_batch).await? > 0 {
                    continue;
                }
                return Ok(summary);
            };
            summary.record(&outcome);
        }
    }

    /// Requeues the request when another worker holds its URL.
    fn acquire_lock(&self, request: &mut Request) -> Option<UrlLock> {
        let locks = self.locks.as_ref()?;
        if !request.has_url() {
            return None;
        }
        let lock = locks.try_lock(&request.url, self.config.lock_ttl());
        if lock.is_none() {
            request.mark_requeue("Collision", "Could not lock");
        }
        lock
    }

    async fn process(&self, request: &mut Request) -> Result<()> {
        self.filter(request);
        if request.should_skip() {
            return Ok(());
        }
        self.dispatcher.dispatch(request).await?;
        if request.should_skip() {
            return Ok(());
        }
        self.convert_to_document(request);
        self.process_document(request).await?;
        self.store_document(request).await
    }

    fn filter(&self, request: &mut Request) {
        if !request.has_url() || EntitySpec::from_url(&request.url).is_err() {
            let reason = format!("Detected malformed request {request}");
            request.mark_dead("Deadletter", &reason);
        }
    }

    fn handle_error(&self, request: &mut Request, error: AppError) {
        log::error!("{}: {}", request, error);
        let message = error.to_string();
        request.error = Some(message.clone());
        if error.is_transient() {
            request.mark_requeue("Error", &message);
        } else {
            request.mark_dead("Error", &message);
        }
    }

    /// Wrap the fetched payload in a document with fresh `_metadata`.
    fn convert_to_document(&self, request: &mut Request) {
        let mut metadata = json!({
            "type": request.kind,
            "url": request.url,
            "fetchedAt": Utc::now().to_rfc3339(),
            "links": {},
        });
        if let Some(etag) = &request.etag {
            metadata["etag"] = json!(etag);
        }
        if request.content_origin == Some(ContentOrigin::Storage) {
            let previous = request.document.as_ref().and_then(|d| d.get("_metadata"));
            for field in ["fetchedAt", "processedAt", "version"] {
                if let Some(value) = previous.and_then(|m| m.get(field)) {
                    metadata[field] = value.clone();
                }
            }
        }

        let mut document = match request.document.take() {
            Some(Value::Object(fields)) => Value::Object(fields),
            Some(Value::Array(elements)) => json!({ "elements": elements }),
            None | Some(Value::Null) => json!({}),
            Some(other) => json!({ "content": other }),
        };
        document["_metadata"] = metadata;
        request.document = Some(document);
    }

    async fn process_document(&self, request: &mut Request) -> Result<()> {
        let processor = self.processors.resolve_one(request)?;

        if !processor.should_process(request) {
            if !processor.should_traverse(request) {
                request.mark_skip("Excluded", "Traversal policy excluded this resource");
                return Ok(());
            }
            request.mark_no_save();
        }

        let start = Instant::now();
        processor.handle(request).await?;
        request.add_meta("process", start.elapsed().as_millis() as u64);
        if let Some(metadata) = request
            .document
            .as_mut()
            .and_then(|document| document.get_mut("_metadata"))
            .and_then(Value::as_object_mut)
        {
            metadata.insert("processedAt".into(), json!(Utc::now().to_rfc3339()));
        }
        if !request.should_save() {
            request.set_outcome_if_unset("Traversed");
        }
        Ok(())
    }

    async fn store_document(&self, request: &mut Request) -> Result<()> {
        if request.should_skip() || !request.should_save() {
            return Ok(());
        }
        let Some(document) = request.document.as_ref() else {
            return Ok(());
        };
        let start = Instant::now();
        self.store.upsert(document).await?;
        request.add_meta("write", start.elapsed().as_millis() as u64);
        Ok(())
    }

    async fn complete(&self, request: &mut Request) -> Result<()> {
        if request.should_requeue() {
            self.requeue(request).await?;
        } else if request.is_dead() {
            self.store_deadletter(request).await?;
        } else {
            let successors = request.take_successors();
            if !successors.is_empty() {
                log::debug!("{}: queueing {} successor(s)", request, successors.len());
                self.queue.push(successors).await?;
            }
        }
        request.run_cleanups();
        self.queue.done(request).await
    }

    /// Queue another attempt, or deadletter once the attempt budget is spent.
    async fn requeue(&self, request: &mut Request) -> Result<()> {
        let attempts = request.attempt_count + 1;
        if attempts > self.config.max_requeue_attempts {
            let reason = format!("Exceeded attempt count for {request}");
            return self.write_deadletter(request, &reason).await;
        }
        let mut retry = Request::from_entry(request.envelope());
        retry.receipt = None;
        retry.attempt_count = attempts;
        retry.add_meta("attempt", attempts);
        self.queue.push_one(retry).await
    }

    async fn store_deadletter(&self, request: &Request) -> Result<()> {
        let reason = request.message().unwrap_or("Dead").to_string();
        if self.config.deadletter_policy == DeadletterPolicy::ExcludeNotFound
            && reason.to_lowercase().contains("status 404")
        {
            log::info!("{}: not storing deadletter due to configured policy", request);
            return Ok(());
        }
        self.write_deadletter(request, &reason).await
    }

    async fn write_deadletter(&self, request: &Request, reason: &str) -> Result<()> {
        let document = deadletter_document(request, reason)?;
        self.deadletters.upsert(&document).await?;
        Ok(())
    }

    fn log_outcome(&self, request: &mut Request, start: Instant) -> RequestOutcome {
        let outcome = request.outcome().unwrap_or("Processed").trim().to_string();
        request.add_meta("outcome", outcome.as_str());
        request.add_meta("time", start.elapsed().as_millis() as u64);
        log::info!(
            "{} {}@{} {}",
            outcome,
            request.kind,
            request.url,
            request.message().unwrap_or_default()
        );
        RequestOutcome {
            kind: request.kind.clone(),
            url: request.url.clone(),
            control: request.process_control(),
            outcome,
            message: request.message().map(str::to_string),
        }
    }
}

/// Document recording a request that will not be retried.
pub fn deadletter_document(request: &Request, reason: &str) -> Result<Value> {
    let mut entry = request.envelope();
    entry.receipt = None;
    let mut document = serde_json::to_value(entry)?;
    let now = Utc::now().to_rfc3339();
    let mut metadata = json!({
        "type": "deadletter",
        "url": request.url.replacen("//", "//deadletter.", 1),
        "version": 1,
        "fetchedAt": now,
        "processedAt": now,
        "links": self_link(&format!("urn:deadletter:{}", Uuid::new_v4())),
        "meta": request.meta,
        "extra": { "type": request.kind, "url": request.url, "reason": reason },
    });
    if let Some(error) = &request.error {
        metadata["errorMessage"] = json!(error);
    }
    document["_metadata"] = metadata;
    Ok(document)
}

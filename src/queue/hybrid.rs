//! Local queue backed by a durable remote queue.
//!
//! ## Delivery protocol
//!
//! - `push`: durable write first (hidden for the remain-local window), then local.
//!   A crash between the two loses only the local copy; the durable copy
//!   resurfaces once its visibility lapses.
//! - `pop`: local pop, then shorten the durable visibility to the processing
//!   window. A stale receipt means someone else owns the message; it is
//!   discarded and the next local item is tried.
//! - `done`: local first, then durable delete. A stale receipt is tolerated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{QueueConfig, Receipt, Request};
use crate::queue::{CrawlQueue, DurableQueue, QueueInfo};

/// Hybrid local/durable queue.
pub struct HybridQueue {
    local: Arc<dyn CrawlQueue>,
    durable: Arc<dyn DurableQueue>,
    remain_local_visibility: Duration,
    processing_visibility: Duration,
}

impl HybridQueue {
    pub fn new(local: Arc<dyn CrawlQueue>, durable: Arc<dyn DurableQueue>) -> Self {
        Self::with_config(local, durable, &QueueConfig::default())
    }

    pub fn with_config(
        local: Arc<dyn CrawlQueue>,
        durable: Arc<dyn DurableQueue>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            local,
            durable,
            remain_local_visibility: config.remain_local_visibility(),
            processing_visibility: config.processing_visibility(),
        }
    }

    fn receipt_of(request: &Request) -> Result<&Receipt> {
        request
            .receipt
            .as_ref()
            .ok_or_else(|| AppError::queue(format!("{request} has no delivery receipt")))
    }

    /// Extend durable visibility for a popped request.
    ///
    /// Returns false when the receipt turned out to be stale.
    async fn hide_in_durable(&self, request: &mut Request) -> Result<bool> {
        let receipt = Self::receipt_of(request)?;
        match self
            .durable
            .update_visibility_timeout(receipt, self.processing_visibility)
            .await
        {
            Ok(fresh) => {
                request.receipt = Some(fresh);
                Ok(true)
            }
            Err(e) if self.durable.is_message_not_found(&e) => {
                log::debug!("Failed to update stale message {}", request);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn done_in_durable(&self, request: &Request) -> Result<()> {
        let receipt = Self::receipt_of(request)?;
        match self.durable.done(receipt).await {
            Ok(()) => Ok(()),
            Err(e) if self.durable.is_message_not_found(&e) => {
                log::debug!("Failed to remove stale message {}", request);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CrawlQueue for HybridQueue {
    fn name(&self) -> &str {
        self.local.name()
    }

    async fn push(&self, mut requests: Vec<Request>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let entries: Vec<_> = requests.iter().map(Request::envelope).collect();
        let receipts = self
            .durable
            .push(&entries, self.remain_local_visibility)
            .await?;
        if receipts.len() != requests.len() {
            return Err(AppError::queue(format!(
                "durable push returned {} receipts for {} requests",
                receipts.len(),
                requests.len()
            )));
        }
        for (request, receipt) in requests.iter_mut().zip(receipts) {
            request.receipt = Some(receipt);
        }
        self.local.push(requests).await
    }

    async fn pop(&self) -> Result<Option<Request>> {
        while let Some(mut request) = self.local.pop().await? {
            if self.hide_in_durable(&mut request).await? {
                return Ok(Some(request));
            }
        }
        Ok(None)
    }

    async fn done(&self, request: &Request) -> Result<()> {
        self.local.done(request).await?;
        self.done_in_durable(request).await
    }

    async fn abandon(&self, request: &Request) -> Result<()> {
        self.local.abandon(request).await
    }

    async fn subscribe(&self) -> Result<()> {
        self.local.subscribe().await?;
        self.durable.subscribe().await
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.local.unsubscribe().await?;
        self.durable.unsubscribe().await
    }

    async fn flush(&self) -> Result<()> {
        let count = self.info().await?.count;
        let mut errors = Vec::new();
        for _ in 0..count {
            match self.pop().await {
                Ok(Some(request)) => {
                    if let Err(e) = self.done(&request).await {
                        errors.push(e);
                    }
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
        AppError::settle("Failed to flush", errors)
    }

    async fn info(&self) -> Result<QueueInfo> {
        self.local.info().await
    }

    /// Pull lapsed durable messages back into the local layer.
    ///
    /// Every delivery by the durable queue counts as another attempt, so a
    /// request that keeps taking its worker down still reaches the attempt cap.
    async fn recover(&self, max: usize) -> Result<usize> {
        let entries = self
            .durable
            .receive(max, self.remain_local_visibility)
            .await?;
        let count = entries.len();
        let requests = entries
            .into_iter()
            .map(|entry| {
                let deliveries = entry.receipt.as_ref().map_or(1, |r| r.dequeue_count.max(1));
                let mut request = Request::from_entry(entry);
                request.attempt_count += deliveries;
                request
            })
            .collect();
        self.local.push(requests).await?;
        if count > 0 {
            log::info!("Recovered {} redelivered request(s)", count);
        }
        Ok(count)
    }
}

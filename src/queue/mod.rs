//! Queue abstractions.
//!
//! Two layers cooperate to deliver crawl requests:
//!
//! - **Local** ([`CrawlQueue`], e.g. [`InMemoryQueue`]): authoritative record of
//!   what work exists, with low-latency pops.
//! - **Durable** ([`DurableQueue`], e.g. [`MemoryDurableQueue`]): authoritative
//!   record of delivery, redelivering anything whose visibility lapses.
//!
//! [`HybridQueue`] stacks the two. [`AttenuatedQueue`] drops repeated pushes,
//! and [`QueueSet`] presents weighted priority tiers as a single queue.

pub mod attenuated;
pub mod durable;
pub mod hybrid;
pub mod memory;
pub mod set;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{QueueEntry, Receipt, Request};

pub use attenuated::AttenuatedQueue;
pub use durable::MemoryDurableQueue;
pub use hybrid::HybridQueue;
pub use memory::InMemoryQueue;
pub use set::QueueSet;

/// Snapshot of a queue's state.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub count: usize,
}

/// Queue semantics consumed by the crawler.
#[async_trait]
pub trait CrawlQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, requests: Vec<Request>) -> Result<()>;

    /// Pop the next request, or `None` when empty. Never blocks waiting for work.
    async fn pop(&self) -> Result<Option<Request>>;

    async fn done(&self, request: &Request) -> Result<()>;

    /// Put a popped request back at the front without acknowledging it.
    async fn abandon(&self, request: &Request) -> Result<()>;

    async fn subscribe(&self) -> Result<()>;

    async fn unsubscribe(&self) -> Result<()>;

    /// Discard everything currently queued.
    async fn flush(&self) -> Result<()>;

    async fn info(&self) -> Result<QueueInfo>;

    /// Pull up to `max` redelivered requests back into this queue. Returns how many.
    ///
    /// Queues without a durable layer have nothing to recover.
    async fn recover(&self, _max: usize) -> Result<usize> {
        Ok(0)
    }

    async fn push_one(&self, request: Request) -> Result<()> {
        self.push(vec![request]).await
    }
}

/// Durable remote queue provider.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Store `entries`, hidden for `visibility_timeout`; one receipt per entry, in order.
    async fn push(&self, entries: &[QueueEntry], visibility_timeout: Duration)
    -> Result<Vec<Receipt>>;

    /// Hide the message for another `visibility_timeout` and issue a fresh receipt.
    async fn update_visibility_timeout(
        &self,
        receipt: &Receipt,
        visibility_timeout: Duration,
    ) -> Result<Receipt>;

    /// Delete the message.
    async fn done(&self, receipt: &Receipt) -> Result<()>;

    /// Messages whose visibility lapsed, hidden again for `visibility_timeout`.
    ///
    /// Each receipt carries the message's delivery count so far.
    async fn receive(&self, max: usize, visibility_timeout: Duration) -> Result<Vec<QueueEntry>>;

    /// Whether `error` is the expected "receipt no longer valid" race.
    fn is_message_not_found(&self, error: &AppError) -> bool;

    async fn subscribe(&self) -> Result<()>;

    async fn unsubscribe(&self) -> Result<()>;
}

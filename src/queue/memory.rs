//! In-process FIFO queue used as the local layer.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{QueueEntry, Request};
use crate::queue::{CrawlQueue, QueueInfo};

/// In-memory queue of request envelopes.
///
/// Requests are stored in envelope form so every pop yields a fresh,
/// independently owned request.
pub struct InMemoryQueue {
    name: String,
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CrawlQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, requests: Vec<Request>) -> Result<()> {
        let mut entries = self.entries();
        entries.extend(requests.iter().map(Request::envelope));
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Request>> {
        Ok(self.entries().pop_front().map(Request::from_entry))
    }

    async fn done(&self, _request: &Request) -> Result<()> {
        Ok(())
    }

    async fn abandon(&self, request: &Request) -> Result<()> {
        self.entries().push_front(request.envelope());
        Ok(())
    }

    async fn subscribe(&self) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.entries().clear();
        Ok(())
    }

    async fn info(&self) -> Result<QueueInfo> {
        Ok(QueueInfo {
            name: self.name.clone(),
            count: self.entries().len(),
        })
    }
}

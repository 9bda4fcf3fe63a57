//! Durable-queue notification of upserted documents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, DocumentMetadata, DocumentSummary, QueueEntry};
use crate::queue::DurableQueue;
use crate::storage::DocumentStore;

/// Pushes `{type, url}` of every upserted document onto a durable queue.
pub struct QueueNotifierStore {
    queue: Arc<dyn DurableQueue>,
}

impl QueueNotifierStore {
    pub fn new(queue: Arc<dyn DurableQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl DocumentStore for QueueNotifierStore {
    fn name(&self) -> &str {
        "queue-notifier"
    }

    async fn connect(&self) -> Result<()> {
        self.queue.subscribe().await
    }

    async fn upsert(&self, document: &Document) -> Result<Option<String>> {
        let metadata = DocumentMetadata::of(document)?;
        let entry = QueueEntry::new(metadata.kind, metadata.url);
        self.queue.push(&[entry], Duration::ZERO).await?;
        Ok(None)
    }

    async fn get(&self, _kind: &str, _key: &str) -> Result<Option<Document>> {
        Ok(None)
    }

    async fn etag(&self, _kind: &str, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn list(&self, _kind: &str) -> Result<Option<Vec<DocumentSummary>>> {
        Ok(None)
    }

    async fn count(&self, _kind: &str) -> Result<Option<usize>> {
        Ok(None)
    }

    async fn delete(&self, _kind: &str, _key: &str) -> Result<Option<bool>> {
        Ok(None)
    }

    async fn close(&self) -> Result<()> {
        self.queue.unsubscribe().await
    }
}

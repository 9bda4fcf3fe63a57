//! Content-addressed file content store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, DocumentSummary};
use crate::storage::DocumentStore;
use crate::storage::attachment::{entries, extracted_document};

/// Writes only the `_fileContent[]` entries of each document, as `content` documents.
///
/// The document itself is left to the other backends. Reads go to the base store.
pub struct HashedContentStore {
    base: Arc<dyn DocumentStore>,
}

impl HashedContentStore {
    pub fn new(base: Arc<dyn DocumentStore>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl DocumentStore for HashedContentStore {
    fn name(&self) -> &str {
        "hashed-content"
    }

    async fn connect(&self) -> Result<()> {
        self.base.connect().await
    }

    async fn upsert(&self, document: &Document) -> Result<Option<String>> {
        for entry in entries(document, "_fileContent") {
            let content = extracted_document("content", "content", entry, document)?;
            self.base.upsert(&content).await?;
        }
        Ok(None)
    }

    async fn get(&self, kind: &str, key: &str) -> Result<Option<Document>> {
        self.base.get(kind, key).await
    }

    async fn etag(&self, kind: &str, key: &str) -> Result<Option<String>> {
        self.base.etag(kind, key).await
    }

    async fn list(&self, kind: &str) -> Result<Option<Vec<DocumentSummary>>> {
        self.base.list(kind).await
    }

    async fn count(&self, kind: &str) -> Result<Option<usize>> {
        self.base.count(kind).await
    }

    async fn delete(&self, kind: &str, key: &str) -> Result<Option<bool>> {
        self.base.delete(kind, key).await
    }

    async fn close(&self) -> Result<()> {
        self.base.close().await
    }
}

//! Document store abstractions.
//!
//! Every backend implements [`DocumentStore`]. [`StoreDispatcher`] presents an
//! ordered list of backends as one store:
//!
//! ```text
//! StoreDispatcher
//! ├── AttachmentStore ──► LocalStorage   # documents + extracted attachments
//! ├── HashedContentStore ─► LocalStorage # content-addressed file content
//! ├── WebhookStore                       # notify only
//! └── QueueNotifierStore                 # notify only
//! ```
//!
//! Read-shaped operations return `None` when a backend has nothing to say,
//! which is distinct from an error.

pub mod attachment;
pub mod dispatcher;
pub mod hashed_content;
pub mod local;
pub mod memory;
pub mod notifier;
pub mod webhook;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, DocumentSummary};

// Re-export for convenience
pub use attachment::AttachmentStore;
pub use dispatcher::StoreDispatcher;
pub use hashed_content::HashedContentStore;
pub use local::LocalStorage;
pub use memory::MemoryStore;
pub use notifier::QueueNotifierStore;
pub use webhook::WebhookStore;

/// Trait for document store backends.
///
/// `kind` is the document type; `key` is either its URN or its request URL.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Write `document`, returning the key it was stored under, if any.
    async fn upsert(&self, document: &Document) -> Result<Option<String>>;

    async fn get(&self, kind: &str, key: &str) -> Result<Option<Document>>;

    async fn etag(&self, kind: &str, key: &str) -> Result<Option<String>>;

    async fn list(&self, kind: &str) -> Result<Option<Vec<DocumentSummary>>>;

    async fn count(&self, kind: &str) -> Result<Option<usize>>;

    /// Remove a document, returning whether anything was removed, if known.
    async fn delete(&self, kind: &str, key: &str) -> Result<Option<bool>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Content token: lowercase hex SHA-256 of `content`.
pub fn content_token(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(content))
}

//! Extraction of embedded attachments into their own documents.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{Document, DocumentSummary, self_link};
use crate::storage::{DocumentStore, content_token};

/// Build a standalone `kind` document for one extracted entry of `source`.
///
/// The entry is addressed by `token`, which defaults to the SHA-256 of its content.
pub(crate) fn extracted_document(
    kind: &str,
    field: &str,
    entry: &Value,
    source: &Document,
) -> Result<Document> {
    let content = entry
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation(format!("{kind} entry has no {field}")))?;
    let token = entry
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| content_token(content.as_bytes()));
    let metadata = source.get("_metadata");
    let copied = |name: &str| metadata.and_then(|m| m.get(name)).cloned().unwrap_or(Value::Null);

    let mut document = json!({
        "_metadata": {
            "type": kind,
            "url": format!("cd:/{kind}/{token}"),
            "links": self_link(&format!("urn:{kind}:{token}")),
            "fetchedAt": copied("fetchedAt"),
            "processedAt": copied("processedAt"),
            "version": 1,
        },
    });
    document[field] = Value::String(content.to_string());
    Ok(document)
}

/// Entries of the array `field` of `document`, if any.
pub(crate) fn entries<'a>(document: &'a Document, field: &str) -> &'a [Value] {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Writes each document plus every `_attachments[]` entry as an `attachment` document.
pub struct AttachmentStore {
    base: Arc<dyn DocumentStore>,
}

impl AttachmentStore {
    pub fn new(base: Arc<dyn DocumentStore>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl DocumentStore for AttachmentStore {
    fn name(&self) -> &str {
        "attachment"
    }

    async fn connect(&self) -> Result<()> {
        self.base.connect().await
    }

    async fn upsert(&self, document: &Document) -> Result<Option<String>> {
        for entry in entries(document, "_attachments") {
            let attachment = extracted_document("attachment", "attachment", entry, document)?;
            self.base.upsert(&attachment).await?;
        }
        self.base.upsert(document).await
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

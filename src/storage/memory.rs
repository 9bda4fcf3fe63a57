//! In-process document store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Document, DocumentMetadata, DocumentSummary};
use crate::storage::DocumentStore;

#[derive(Default)]
struct Collection {
    /// URN -> document
    by_urn: BTreeMap<String, Document>,
    /// request URL -> URN
    urls: HashMap<String, String>,
}

impl Collection {
    fn resolve<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if self.by_urn.contains_key(key) {
            return Some(key);
        }
        self.urls.get(key).map(String::as_str)
    }
}

/// Documents held in memory, addressable by URN or URL.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collections(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
        self.collections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, document: &Document) -> Result<Option<String>> {
        let metadata = DocumentMetadata::of(document)?;
        let urn = metadata
            .urn()
            .ok_or_else(|| AppError::store("memory", format!("{} has no self link", metadata.url)))?
            .to_string();
        let mut collections = self.collections();
        let collection = collections.entry(metadata.kind.clone()).or_default();
        collection.urls.insert(metadata.url.clone(), urn.clone());
        collection.by_urn.insert(urn.clone(), document.clone());
        Ok(Some(urn))
    }

    async fn get(&self, kind: &str, key: &str) -> Result<Option<Document>> {
        let collections = self.collections();
        Ok(collections.get(kind).and_then(|collection| {
            collection
                .resolve(key)
                .and_then(|urn| collection.by_urn.get(urn))
                .cloned()
        }))
    }

    async fn etag(&self, kind: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(kind, key)
            .await?
            .and_then(|document| DocumentMetadata::of(&document).ok())
            .and_then(|metadata| metadata.etag))
    }

    async fn list(&self, kind: &str) -> Result<Option<Vec<DocumentSummary>>> {
        let collections = self.collections();
        let Some(collection) = collections.get(kind) else {
            return Ok(Some(Vec::new()));
        };
        let summaries = collection
            .by_urn
            .values()
            .map(DocumentSummary::of)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(summaries))
    }

    async fn count(&self, kind: &str) -> Result<Option<usize>> {
        Ok(self.list(kind).await?.map(|summaries| summaries.len()))
    }

    async fn delete(&self, kind: &str, key: &str) -> Result<Option<bool>> {
        let mut collections = self.collections();
        let Some(collection) = collections.get_mut(kind) else {
            return Ok(Some(false));
        };
        let Some(urn) = collection.resolve(key).map(str::to_string) else {
            return Ok(Some(false));
        };
        collection.by_urn.remove(&urn);
        collection.urls.retain(|_, target| *target != urn);
        Ok(Some(true))
    }
}

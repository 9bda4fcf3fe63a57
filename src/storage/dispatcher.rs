//! Store fan-out.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::models::{Document, DocumentSummary};
use crate::storage::DocumentStore;

/// One store interface over an ordered list of backends.
///
/// Every call visits every backend in order, one at a time. The reported
/// result is the last non-`None` backend result; a `None` never erases an
/// earlier one. The first backend error aborts the call.
pub struct StoreDispatcher {
    stores: Vec<Arc<dyn DocumentStore>>,
}

impl StoreDispatcher {
    pub fn new(stores: Vec<Arc<dyn DocumentStore>>) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &[Arc<dyn DocumentStore>] {
        &self.stores
    }

    async fn perform<'a, T, F>(&'a self, operation: F) -> Result<Option<T>>
    where
        F: Fn(&'a dyn DocumentStore) -> BoxFuture<'a, Result<Option<T>>>,
    {
        let mut result = None;
        for store in &self.stores {
            if let Some(value) = operation(store.as_ref()).await? {
                result = Some(value);
            }
        }
        Ok(result)
    }

    async fn perform_all<'a, F, Fut>(&'a self, operation: F) -> Result<()>
    where
        F: Fn(&'a dyn DocumentStore) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for store in &self.stores {
            operation(store.as_ref()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for StoreDispatcher {
    fn name(&self) -> &str {
        "dispatcher"
    }

    async fn connect(&self) -> Result<()> {
        self.perform_all(|store| store.connect()).await
    }

    async fn upsert(&self, document: &Document) -> Result<Option<String>> {
        self.perform(|store| store.upsert(document)).await
    }

    async fn get(&self, kind: &str, key: &str) -> Result<Option<Document>> {
        self.perform(|store| store.get(kind, key)).await
    }

    async fn etag(&self, kind: &str, key: &str) -> Result<Option<String>> {
        self.perform(|store| store.etag(kind, key)).await
    }

    async fn list(&self, kind: &str) -> Result<Option<Vec<DocumentSummary>>> {
        self.perform(|store| store.list(kind)).await
    }

    async fn count(&self, kind: &str) -> Result<Option<usize>> {
        self.perform(|store| store.count(kind)).await
    }

    async fn delete(&self, kind: &str, key: &str) -> Result<Option<bool>> {
        self.perform(|store| store.delete(kind, key)).await
    }

    async fn close(&self) -> Result<()> {
        self.perform_all(|store| store.close()).await
    }
}

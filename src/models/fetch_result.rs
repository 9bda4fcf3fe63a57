//! Product of a successful fetch, shareable across requests.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::models::request::run_cleanups;
use crate::models::{Cleanup, ContentOrigin, Request};

/// A fetched document plus the temporary resources backing it.
///
/// Resources are released when the last owner (cache entry or request lease) drops it.
pub struct FetchResult {
    pub document: Value,
    pub content_origin: ContentOrigin,
    pub etag: Option<String>,
    meta: Map<String, Value>,
    cleanups: Vec<Cleanup>,
}

impl FetchResult {
    pub fn new(document: Value) -> Self {
        Self {
            document,
            content_origin: ContentOrigin::Origin,
            etag: None,
            meta: Map::new(),
            cleanups: Vec::new(),
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn add_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    pub fn track_cleanup(mut self, cleanup: Cleanup) -> Self {
        self.cleanups.push(cleanup);
        self
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// A result is in use while any request still holds a lease on it.
    pub fn is_in_use(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) > 1
    }

    /// Deep-copy this result onto `request` and give the request a lease on it.
    pub fn decorate(self: &Arc<Self>, request: &mut Request) {
        request.document = Some(self.document.clone());
        request.content_origin = Some(self.content_origin);
        if self.etag.is_some() {
            request.etag = self.etag.clone();
        }
        for (key, value) in &self.meta {
            request.meta.insert(key.clone(), value.clone());
        }
        request.hold(Arc::clone(self));
    }
}

impl Drop for FetchResult {
    fn drop(&mut self) {
        run_cleanups(std::mem::take(&mut self.cleanups), "fetch result");
    }
}

impl fmt::Debug for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResult")
            .field("content_origin", &self.content_origin)
            .field("etag", &self.etag)
            .field("meta", &self.meta)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

//! Store-or-origin fetch dispatch.

use std::sync::Arc;
use std::time::Instant;

use crate::error::{AppError, Result};
use crate::fetch::{FetchReply, FetchResultCache, Fetchers, Filter, Processors};
use crate::models::{ContentOrigin, EntitySpec, Request};
use crate::storage::DocumentStore;

/// Decides per request whether the stored document will do or origin must be fetched.
pub struct FetchDispatcher {
    store: Arc<dyn DocumentStore>,
    fetchers: Arc<Fetchers>,
    processors: Arc<Processors>,
    filter: Arc<dyn Filter>,
    cache: Arc<FetchResultCache>,
}

impl FetchDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        fetchers: Arc<Fetchers>,
        processors: Arc<Processors>,
        filter: Arc<dyn Filter>,
        cache: Arc<FetchResultCache>,
    ) -> Self {
        Self {
            store,
            fetchers,
            processors,
            filter,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<FetchResultCache> {
        &self.cache
    }

    /// Attach a document to `request`, from the store or from origin.
    ///
    /// Terminal decisions (no save, skip) are recorded on the request.
    pub async fn dispatch(&self, request: &mut Request) -> Result<()> {
        let start = Instant::now();
        let processor = self.processors.resolve_one(request)?;
        if !processor.should_fetch(request) {
            request.mark_no_save();
            return Ok(());
        }

        let key = processor.urn_for(request)?;
        match self.store.get(&request.kind, &key).await {
            Ok(Some(document)) => {
                request.add_meta("read", start.elapsed().as_millis() as u64);
                request.document = Some(document);
                request.content_origin = Some(ContentOrigin::Storage);
                self.dispatch_fetch(request, false).await
            }
            Ok(None) => self.fetch_missing(request).await,
            Err(e) => {
                log::debug!("Store read failed for {}, treating as missing: {}", request, e);
                self.fetch_missing(request).await
            }
        }
    }

    async fn fetch_missing(&self, request: &mut Request) -> Result<()> {
        if self.filter.should_fetch_missing(request) {
            return self.dispatch_fetch(request, false).await;
        }
        request.mark_skip("Unreachable for reprocessing", "document is not in the store");
        Ok(())
    }

    /// Fetch from origin through the single-flight cache.
    ///
    /// Unless `force` is set, the filter may veto the fetch; the request then
    /// keeps whatever document it already has.
    pub async fn dispatch_fetch(&self, request: &mut Request, force: bool) -> Result<()> {
        if !force && !self.filter.should_fetch(request) {
            return Ok(());
        }
        let fetcher = self
            .fetchers
            .resolve_first(request)
            .ok_or_else(|| AppError::config(format!("No fetcher found for {request}")))?;

        let key = EntitySpec::from_url(&request.url)?.to_url_path();
        let snapshot = request.snapshot();
        let fetch = async move { fetcher.fetch(&snapshot).await };

        match self.cache.get_or_fetch(&key, fetch).await {
            FetchReply::Fetched(result) => {
                result.decorate(request);
                Ok(())
            }
            FetchReply::Skipped { outcome, message } => {
                request.mark_skip(&outcome, &message);
                Ok(())
            }
            FetchReply::Failed(source) => Err(AppError::Fetch {
                context: key,
                source,
            }),
        }
    }
}

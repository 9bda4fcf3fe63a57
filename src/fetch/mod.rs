//! Fetch layer: collaborator traits, handler registry and the dispatcher.
//!
//! A request's document comes either from the store or from an origin
//! [`Fetcher`]. [`FetchDispatcher`] makes that decision and coalesces
//! concurrent origin fetches for the same entity through [`FetchResultCache`].

pub mod cache;
pub mod dispatcher;
pub mod filter;
pub mod http;
pub mod processor;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{EntitySpec, FetchResult, Request};

pub use cache::{FetchReply, FetchResultCache};
pub use dispatcher::FetchDispatcher;
pub use filter::StandardFilter;
pub use http::HttpFetcher;
pub use processor::PassthroughProcessor;

/// Capability shared by fetchers and processors: a name and a selection predicate.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, request: &Request) -> bool;
}

/// What a fetcher produced.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(FetchResult),
    /// Nothing to fetch (e.g. missing upstream). Terminal for the request, never cached.
    Skipped { outcome: String, message: String },
}

impl FetchOutcome {
    pub fn missing(message: impl Into<String>) -> Self {
        Self::Skipped {
            outcome: "Missing".to_string(),
            message: message.into(),
        }
    }
}

/// Retrieves documents from an origin registry.
#[async_trait]
pub trait Fetcher: Handler {
    /// Fetch the document for `request`.
    ///
    /// The request is a snapshot; fetchers communicate only through the outcome.
    async fn fetch(&self, request: &Request) -> Result<FetchOutcome>;
}

/// Turns a fetched document into the stored one.
#[async_trait]
pub trait Processor: Handler {
    /// Schema version stamped on processed documents.
    fn schema_version(&self) -> u64 {
        1
    }

    fn should_fetch(&self, _request: &Request) -> bool {
        true
    }

    fn should_process(&self, request: &Request) -> bool {
        request
            .policy
            .should_process(request.document.as_ref(), self.schema_version())
    }

    fn should_traverse(&self, request: &Request) -> bool {
        request.policy.should_traverse()
    }

    /// Storage key of the request's document.
    fn urn_for(&self, request: &Request) -> Result<String> {
        Ok(EntitySpec::from_url(&request.url)?.to_urn())
    }

    async fn handle(&self, request: &mut Request) -> Result<()>;
}

/// Eligibility gates consulted by the dispatcher.
pub trait Filter: Send + Sync {
    fn should_fetch(&self, request: &Request) -> bool;

    fn should_fetch_missing(&self, request: &Request) -> bool;

    fn should_process(&self, request: &Request) -> bool;
}

/// Ordered set of handlers selected by their `can_handle` predicate.
pub struct HandlerRegistry<H: ?Sized> {
    handlers: Vec<Arc<H>>,
}

impl<H: Handler + ?Sized> HandlerRegistry<H> {
    pub fn new(handlers: Vec<Arc<H>>) -> Self {
        Self { handlers }
    }

    pub fn register(&mut self, handler: Arc<H>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// First handler accepting `request`.
    pub fn resolve_first(&self, request: &Request) -> Option<Arc<H>> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle(request))
            .cloned()
    }

    /// The single handler accepting `request`.
    ///
    /// Zero or several matches is a wiring error.
    pub fn resolve_one(&self, request: &Request) -> Result<Arc<H>> {
        let mut matches = self.handlers.iter().filter(|handler| handler.can_handle(request));
        let first = matches
            .next()
            .ok_or_else(|| AppError::config(format!("No handler found for {request}")))?;
        if let Some(second) = matches.next() {
            return Err(AppError::config(format!(
                "Multiple handlers found for {request}: {}, {}",
                first.name(),
                second.name()
            )));
        }
        Ok(Arc::clone(first))
    }
}

impl<H: ?Sized> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

/// Fetchers selected per request.
pub type Fetchers = HandlerRegistry<dyn Fetcher>;

/// Processors selected per request; exactly one must match.
pub type Processors = HandlerRegistry<dyn Processor>;

//! Policy-driven eligibility gates.

use std::sync::Arc;

use crate::fetch::{Filter, Processors};
use crate::models::Request;

/// Filter deferring to the request policy and the matching processor.
pub struct StandardFilter {
    processors: Arc<Processors>,
}

impl StandardFilter {
    pub fn new(processors: Arc<Processors>) -> Self {
        Self { processors }
    }
}

impl Filter for StandardFilter {
    /// Fetch when there is no document yet, or the one at hand is stale.
    fn should_fetch(&self, request: &Request) -> bool {
        request.document.is_none() || self.should_process(request)
    }

    fn should_fetch_missing(&self, request: &Request) -> bool {
        request.policy.should_fetch_missing()
    }

    fn should_process(&self, request: &Request) -> bool {
        self.processors
            .resolve_one(request)
            .ok()
            .is_none_or(|processor| processor.should_process(request))
    }
}

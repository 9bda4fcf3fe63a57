//! Crawl request, its terminal-state machine and its queue envelope.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{FetchResult, Policy};

/// Processing control of a request. Anything but `Normal` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessControl {
    #[default]
    Normal,
    Skip,
    Requeue,
    Dead,
}

/// Where the current document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentOrigin {
    Origin,
    Storage,
}

/// Delivery receipt issued by the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub message_id: String,
    pub pop_receipt: String,
    /// Times the durable queue has redelivered this message
    #[serde(default)]
    pub dequeue_count: u32,
}

/// Serialized form of a request as held by a queue layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

impl QueueEntry {
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            policy: Policy::default(),
            attempt_count: 0,
            meta: Map::new(),
            receipt: None,
        }
    }
}

/// A tracked release of a temporary resource. Runs at most once.
pub struct Cleanup(Box<dyn FnOnce() -> std::io::Result<()> + Send + Sync>);

impl Cleanup {
    pub fn new(f: impl FnOnce() -> std::io::Result<()> + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn run(self) -> std::io::Result<()> {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Run every cleanup, logging failures against `owner`.
pub(crate) fn run_cleanups(cleanups: Vec<Cleanup>, owner: &str) {
    for cleanup in cleanups {
        if let Err(e) = cleanup.run() {
            log::info!("Cleanup  Problem cleaning up after {}: {}", owner, e);
        }
    }
}

/// A unit of crawl work.
#[derive(Debug)]
pub struct Request {
    /// Resource kind (e.g. "npm", "source")
    pub kind: String,
    /// Canonical locator, `cd:/type/provider/namespace/name/revision`
    pub url: String,
    pub policy: Policy,
    pub document: Option<Value>,
    pub content_origin: Option<ContentOrigin>,
    pub etag: Option<String>,
    pub meta: Map<String, Value>,
    pub attempt_count: u32,
    /// Durable queue transport metadata
    pub receipt: Option<Receipt>,
    /// Error detail carried into the deadletter document
    pub error: Option<String>,
    /// Tier of a queue set this request was popped from. Not part of the envelope.
    pub origin_queue: Option<String>,
    process_control: ProcessControl,
    outcome: Option<String>,
    message: Option<String>,
    save: Option<bool>,
    successors: Vec<Request>,
    cleanups: Vec<Cleanup>,
    leases: Vec<Arc<FetchResult>>,
}

impl Request {
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            policy: Policy::default(),
            document: None,
            content_origin: None,
            etag: None,
            meta: Map::new(),
            attempt_count: 0,
            receipt: None,
            error: None,
            origin_queue: None,
            process_control: ProcessControl::Normal,
            outcome: None,
            message: None,
            save: None,
            successors: Vec::new(),
            cleanups: Vec::new(),
            leases: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Rebuild a request from its queue envelope.
    pub fn from_entry(entry: QueueEntry) -> Self {
        let mut request = Self::new(entry.kind, entry.url);
        request.policy = entry.policy;
        request.attempt_count = entry.attempt_count;
        request.meta = entry.meta;
        request.receipt = entry.receipt;
        request
    }

    /// Queue envelope of this request. Working state is not carried.
    pub fn envelope(&self) -> QueueEntry {
        QueueEntry {
            kind: self.kind.clone(),
            url: self.url.clone(),
            policy: self.policy,
            attempt_count: self.attempt_count,
            meta: self.meta.clone(),
            receipt: self.receipt.clone(),
        }
    }

    /// Independent copy for collaborators that must not touch this request's resources.
    pub fn snapshot(&self) -> Self {
        let mut copy = Self::from_entry(self.envelope());
        copy.document = self.document.clone();
        copy.content_origin = self.content_origin;
        copy.etag = self.etag.clone();
        copy
    }

    pub fn has_url(&self) -> bool {
        !self.kind.is_empty() && !self.url.is_empty()
    }

    pub fn add_meta(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    // --- terminal state machine ---

    pub fn process_control(&self) -> ProcessControl {
        self.process_control
    }

    pub fn outcome(&self) -> Option<&str> {
        self.outcome.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Set outcome/message unless they were already set.
    pub fn set_outcome_if_unset(&mut self, outcome: &str) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome.to_string());
        }
    }

    fn mark(&mut self, control: ProcessControl, outcome: Option<&str>, message: Option<&str>) {
        if self.should_skip() {
            return;
        }
        self.process_control = control;
        self.outcome = outcome.map(str::to_string);
        self.message = message.map(str::to_string);
    }

    pub fn mark_skip(&mut self, outcome: &str, message: &str) -> &mut Self {
        self.mark(ProcessControl::Skip, Some(outcome), Some(message));
        self
    }

    /// Skip without diagnostics. Later marks still cannot overwrite it.
    pub fn mark_skip_silently(&mut self) -> &mut Self {
        self.mark(ProcessControl::Skip, None, None);
        self
    }

    pub fn mark_requeue(&mut self, outcome: &str, message: &str) -> &mut Self {
        self.mark(ProcessControl::Requeue, Some(outcome), Some(message));
        self
    }

    pub fn mark_dead(&mut self, outcome: &str, message: &str) -> &mut Self {
        self.mark(ProcessControl::Dead, Some(outcome), Some(message));
        self
    }

    pub fn should_skip(&self) -> bool {
        self.process_control != ProcessControl::Normal
    }

    pub fn should_requeue(&self) -> bool {
        self.process_control == ProcessControl::Requeue
    }

    pub fn is_dead(&self) -> bool {
        self.process_control == ProcessControl::Dead
    }

    pub fn mark_no_save(&mut self) -> &mut Self {
        self.save = Some(false);
        self
    }

    pub fn should_save(&self) -> bool {
        self.document.is_some() && self.save != Some(false)
    }

    // --- successors ---

    /// Queue a follow-on request under this request's successor policy.
    ///
    /// Returns false when the policy does not traverse.
    pub fn queue_successor(&mut self, kind: &str, url: &str) -> bool {
        match self.policy.successor() {
            Some(policy) => {
                self.successors.push(Request::new(kind, url).with_policy(policy));
                true
            }
            None => false,
        }
    }

    pub fn take_successors(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.successors)
    }

    // --- resources ---

    pub fn track_cleanup(&mut self, cleanup: Cleanup) -> &mut Self {
        self.cleanups.push(cleanup);
        self
    }

    pub fn tracked_cleanups(&self) -> usize {
        self.cleanups.len() + self.leases.len()
    }

    /// Keep a shared fetch result alive for as long as this request holds its document.
    pub(crate) fn hold(&mut self, result: Arc<FetchResult>) {
        self.leases.push(result);
    }

    /// Release every tracked resource. Safe to call more than once.
    pub fn run_cleanups(&mut self) {
        let owner = self.to_string();
        run_cleanups(std::mem::take(&mut self.cleanups), &owner);
        self.leases.clear();
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.cleanups.is_empty() || !self.leases.is_empty() {
            self.run_cleanups();
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.url)
    }
}

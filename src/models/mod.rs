// src/models/mod.rs

//! Domain models for the crawler.
//!
//! This module contains the data structures shared by the queue, fetch and
//! storage layers, organized by their primary purpose.

mod config;
mod document;
mod fetch_result;
mod policy;
pub(crate) mod request;
mod spec;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, DeadletterPolicy, FetchConfig, FetcherConfig, LoggingConfig,
    QueueConfig, StorageConfig,
};
pub use document::{Document, DocumentMetadata, DocumentSummary, self_link};
pub use fetch_result::FetchResult;
pub use policy::{FetchMode, Freshness, Policy, Transitivity, has_expired};
pub use request::{Cleanup, ContentOrigin, ProcessControl, QueueEntry, Receipt, Request};
pub use spec::EntitySpec;

//! Crawl pipeline.
//!
//! - `Crawler`: one worker loop over a shared queue
//! - `UrlLocks`: keeps two workers off the same URL
//! - `CrawlerSystem`: queue, fetch and store collaborators wired from configuration
//! - `run_crawler`: crawl a set of seed requests to completion

pub mod crawl;
pub mod lock;
pub mod worker;

pub use crawl::{CrawlerSystem, run_crawler};
pub use lock::{UrlLock, UrlLocks};
pub use worker::{CrawlSummary, Crawler, RequestOutcome, deadletter_document};

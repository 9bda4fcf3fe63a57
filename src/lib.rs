// src/lib.rs

//! Crawl orchestration core.
//!
//! - [`queue`]: hybrid local/durable work queue with at-least-once delivery
//! - [`fetch`]: store-or-origin fetch dispatch behind a single-flight cache
//! - [`storage`]: document stores and the fan-out over several of them
//! - [`pipeline`]: the worker loop tying the three together

pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod utils;

pub use error::{AppError, Result};

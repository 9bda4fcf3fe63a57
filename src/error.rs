// src/error.rs

//! Unified error handling for the crawler.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Origin answered with a non-success status
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Wiring or configuration error. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Queue layer error
    #[error("Queue error: {0}")]
    Queue(String),

    /// The durable queue no longer knows the message for this receipt
    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    /// Store backend error
    #[error("Store error in {store}: {message}")]
    Store { store: String, message: String },

    /// A spawned task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A shared fetch failed; every waiter receives the same cause
    #[error("Fetch failed for {context}: {source}")]
    Fetch {
        context: String,
        #[source]
        source: Arc<AppError>,
    },

    /// Several independent operations failed
    #[error("{context}: {} error(s), first: {}", errors.len(), errors.first().map(ToString::to_string).unwrap_or_default())]
    Aggregate {
        context: String,
        errors: Vec<AppError>,
    },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a queue error.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Create a store error with the store name as context.
    pub fn store(store: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Store {
            store: store.into(),
            message: message.to_string(),
        }
    }

    /// Create a "message not found" error.
    pub fn message_not_found(message_id: impl Into<String>) -> Self {
        Self::MessageNotFound {
            message_id: message_id.into(),
        }
    }

    /// Whether a later redelivery may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Http(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Fetch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Collapse the errors of a settle-all operation.
    ///
    /// Returns `Ok(())` when nothing failed and the lone error when exactly one did.
    pub fn settle(context: impl Into<String>, mut errors: Vec<AppError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate {
                context: context.into(),
                errors,
            }),
        }
    }
}

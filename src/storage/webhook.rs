//! Webhook notification of upserted documents.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use crate::error::Result;
use crate::models::{Document, DocumentSummary};
use crate::storage::DocumentStore;

const TOKEN_HEADER: &str = "x-crawler";

/// POSTs every upserted document to a webhook. Failures are logged, never raised.
pub struct WebhookStore {
    url: String,
    token: String,
    client: Client,
}

impl WebhookStore {
    pub fn new(url: impl Into<String>, token: Option<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            token: token.unwrap_or_else(|| "secret".to_string()),
            client,
        }
    }
}

#[async_trait]
impl DocumentStore for WebhookStore {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn upsert(&self, document: &Document) -> Result<Option<String>> {
        let body = serde_json::to_vec(document)?;
        let response = self
            .client
            .post(&self.url)
            .header(TOKEN_HEADER, &self.token)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => log::info!("Failure  Firing webhook failed: {}", response.status()),
            Err(e) => log::info!("Failure  Firing webhook failed: {}", e),
        }
        Ok(None)
    }

    async fn get(&self, _kind: &str, _key: &str) -> Result<Option<Document>> {
        Ok(None)
    }

    async fn etag(&self, _kind: &str, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn list(&self, _kind: &str) -> Result<Option<Vec<DocumentSummary>>> {
        Ok(None)
    }

    async fn count(&self, _kind: &str) -> Result<Option<usize>> {
        Ok(None)
    }

    async fn delete(&self, _kind: &str, _key: &str) -> Result<Option<bool>> {
        Ok(None)
    }
}

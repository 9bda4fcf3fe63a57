// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::FetchConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &FetchConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// A JSON body with the response's entity tag.
#[derive(Debug)]
pub struct JsonResponse {
    pub body: Value,
    pub etag: Option<String>,
}

/// GET `url` and parse the body as JSON.
///
/// Returns `None` on 404; any other non-success status is an error.
pub async fn get_json(client: &Client, url: &str) -> Result<Option<JsonResponse>> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(AppError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let text = response.text().await?;
    Ok(Some(JsonResponse {
        body: serde_json::from_str(&text)?,
        etag,
    }))
}

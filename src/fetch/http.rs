//! Generic JSON-over-HTTP origin fetcher.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::fetch::{FetchOutcome, Fetcher, Handler};
use crate::models::{EntitySpec, FetchResult, FetcherConfig, Request};
use crate::utils::http::get_json;

/// Fetches one request type from an origin URL template.
///
/// Template placeholders: `{type}`, `{provider}`, `{namespace/}` (namespace
/// followed by a slash, or nothing), `{name}` and `{revision}`.
pub struct HttpFetcher {
    name: String,
    kind: String,
    url_template: String,
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig, client: Client) -> Self {
        Self {
            name: format!("{}-http", config.kind),
            kind: config.kind.clone(),
            url_template: config.url_template.clone(),
            client,
        }
    }

    /// Origin URL for `spec`.
    pub fn origin_url(&self, spec: &EntitySpec) -> String {
        let namespace = spec
            .namespace
            .as_deref()
            .map(|ns| format!("{ns}/"))
            .unwrap_or_default();
        self.url_template
            .replace("{type}", &spec.kind)
            .replace("{provider}", &spec.provider)
            .replace("{namespace/}", &namespace)
            .replace("{name}", &spec.name)
            .replace("{revision}", spec.revision.as_deref().unwrap_or_default())
    }
}

impl Handler for HttpFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.kind == self.kind
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        let spec = EntitySpec::from_url(&request.url)?;
        let url = self.origin_url(&spec);
        url::Url::parse(&url)
            .map_err(|e| AppError::validation(format!("Bad origin url {url}: {e}")))?;

        let start = Instant::now();
        let Some(response) = get_json(&self.client, &url).await? else {
            log::debug!("{} not found at {}", request, url);
            return Ok(FetchOutcome::missing(format!("{url} returned 404")));
        };

        let mut result = FetchResult::new(response.body)
            .add_meta("fetch", start.elapsed().as_millis() as u64);
        if let Some(etag) = response.etag {
            result = result.with_etag(etag);
        }
        Ok(FetchOutcome::Fetched(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(template: &str) -> HttpFetcher {
        HttpFetcher::new(
            &FetcherConfig {
                kind: "npm".into(),
                url_template: template.into(),
            },
            Client::new(),
        )
    }

    #[test]
    fn test_origin_url_without_namespace() {
        let fetcher = fetcher("https://registry.npmjs.com/{namespace/}{name}/{revision}");
        let spec = EntitySpec::from_url("cd:/npm/npmjs/-/left-pad/1.3.0").unwrap();
        assert_eq!(
            fetcher.origin_url(&spec),
            "https://registry.npmjs.com/left-pad/1.3.0"
        );
    }

    #[test]
    fn test_origin_url_with_namespace() {
        let fetcher = fetcher("https://registry.npmjs.com/{namespace/}{name}/{revision}");
        let spec = EntitySpec::from_url("cd:/npm/npmjs/@babel/core/7.0.0").unwrap();
        assert_eq!(
            fetcher.origin_url(&spec),
            "https://registry.npmjs.com/@babel/core/7.0.0"
        );
    }

    #[test]
    fn test_handles_only_its_type() {
        let fetcher = fetcher("https://example.com/{name}");
        assert!(fetcher.can_handle(&Request::new("npm", "cd:/npm/npmjs/-/a/1")));
        assert!(!fetcher.can_handle(&Request::new("pypi", "cd:/pypi/pypi/-/a/1")));
    }

    #[tokio::test]
    async fn test_malformed_request_url_fails() {
        let fetcher = fetcher("https://example.com/{name}");
        let result = fetcher.fetch(&Request::new("npm", "not-a-coordinate")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}

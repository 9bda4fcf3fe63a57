//! Stored document shape helpers.
//!
//! Documents are JSON objects carrying a `_metadata` block:
//!
//! ```text
//! { "_metadata": { "type", "url", "version", "etag", "fetchedAt", "processedAt",
//!                  "links": { "self": { "href": "urn:..", "type": "resource" } } },
//!   ...payload }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AppError, Result};

/// Stored document.
pub type Document = Value;

/// The `_metadata` block of a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
    #[serde(default)]
    pub links: Value,
}

impl DocumentMetadata {
    /// Read the metadata block of `document`.
    pub fn of(document: &Document) -> Result<Self> {
        let metadata = document
            .get("_metadata")
            .ok_or_else(|| AppError::validation("document has no _metadata"))?;
        Ok(serde_json::from_value(metadata.clone())?)
    }

    /// The `links.self.href` URN, if present.
    pub fn urn(&self) -> Option<&str> {
        self.links
            .get("self")
            .and_then(|link| link.get("href"))
            .and_then(Value::as_str)
    }
}

/// Summary row returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub urn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
}

impl DocumentSummary {
    pub fn of(document: &Document) -> Result<Self> {
        let metadata = DocumentMetadata::of(document)?;
        let urn = metadata
            .urn()
            .ok_or_else(|| AppError::validation(format!("{} has no self link", metadata.url)))?
            .to_string();
        Ok(Self {
            kind: metadata.kind,
            url: metadata.url,
            urn,
            version: metadata.version,
            etag: metadata.etag,
            fetched_at: metadata.fetched_at,
            processed_at: metadata.processed_at,
        })
    }
}

/// `links` value with a self link to `urn`.
pub fn self_link(urn: &str) -> Value {
    json!({ "self": { "href": urn, "type": "resource" } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_and_summary() {
        let document = json!({
            "_metadata": {
                "type": "npm",
                "url": "cd:/npm/npmjs/-/left-pad/1.3.0",
                "version": 1,
                "etag": "abc",
                "links": self_link("urn:npm:npmjs:-:left-pad:revision:1.3.0"),
            },
            "name": "left-pad",
        });
        let metadata = DocumentMetadata::of(&document).unwrap();
        assert_eq!(metadata.urn(), Some("urn:npm:npmjs:-:left-pad:revision:1.3.0"));

        let summary = DocumentSummary::of(&document).unwrap();
        assert_eq!(summary.kind, "npm");
        assert_eq!(summary.etag.as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_metadata() {
        assert!(DocumentMetadata::of(&json!({ "name": "x" })).is_err());
        let no_link = json!({ "_metadata": { "type": "npm", "url": "cd:/x/y/-/z" } });
        assert!(DocumentSummary::of(&no_link).is_err());
    }
}

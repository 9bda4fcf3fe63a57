//! Processor storing fetched documents as-is.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::fetch::{Handler, Processor};
use crate::models::{Request, self_link};

/// Stamps schema version and self link onto the document of one request type.
pub struct PassthroughProcessor {
    name: String,
    kind: String,
    schema_version: u64,
}

impl PassthroughProcessor {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            name: format!("{kind}-passthrough"),
            kind,
            schema_version: 1,
        }
    }

    pub fn with_schema_version(mut self, schema_version: u64) -> Self {
        self.schema_version = schema_version;
        self
    }
}

impl Handler for PassthroughProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.kind == self.kind
    }
}

#[async_trait]
impl Processor for PassthroughProcessor {
    fn schema_version(&self) -> u64 {
        self.schema_version
    }

    async fn handle(&self, request: &mut Request) -> Result<()> {
        let urn = self.urn_for(request)?;
        let Some(Value::Object(fields)) = request.document.as_mut() else {
            return Err(AppError::validation(format!(
                "{urn} has no document object to process"
            )));
        };
        let metadata = fields.entry("_metadata").or_insert_with(|| json!({}));
        if let Value::Object(metadata) = metadata {
            metadata.insert("version".into(), json!(self.schema_version));
            let links = metadata.entry("links").or_insert_with(|| json!({}));
            match links {
                Value::Object(links) => {
                    links.insert("self".into(), self_link(&urn)["self"].clone());
                }
                other => *other = self_link(&urn),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stamps_version_and_self_link() {
        let processor = PassthroughProcessor::new("npm").with_schema_version(3);
        let mut request = Request::new("npm", "cd:/npm/npmjs/-/left-pad/1.3.0");
        request.document = Some(json!({ "_metadata": { "type": "npm" }, "name": "left-pad" }));
        processor.handle(&mut request).await.unwrap();

        let metadata = &request.document.as_ref().unwrap()["_metadata"];
        assert_eq!(metadata["version"], json!(3));
        assert_eq!(metadata["type"], json!("npm"));
        assert_eq!(
            metadata["links"]["self"]["href"],
            json!("urn:npm:npmjs:-:left-pad:revision:1.3.0")
        );
    }

    #[tokio::test]
    async fn test_requires_document() {
        let processor = PassthroughProcessor::new("npm");
        let mut request = Request::new("npm", "cd:/npm/npmjs/-/left-pad/1.3.0");
        assert!(processor.handle(&mut request).await.is_err());
    }
}

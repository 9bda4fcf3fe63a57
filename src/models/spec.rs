//! Entity coordinates parsed from request URLs.
//!
//! URL form: `cd:/{type}/{provider}/{namespace|-}/{name}[/{revision}][/tool/{tool}[/{toolVersion}]]`
//! URN form: `urn:{type}:{provider}:{namespace|-}:{name}[:revision:{revision}][:tool:{tool}][:{toolVersion}]`

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

static URL_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^.*:/*([^/]+)/([^/]+)/([^/]+)/([^/]+)/?([^/]+)?(/tool/.+)?$")
});

/// Coordinates of a crawlable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntitySpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub provider: String,
    pub namespace: Option<String>,
    pub name: String,
    pub revision: Option<String>,
    pub tool: Option<String>,
    pub tool_version: Option<String>,
}

impl EntitySpec {
    /// Build a spec, normalizing case and the `-` namespace placeholder.
    pub fn new(
        kind: &str,
        provider: &str,
        namespace: Option<&str>,
        name: &str,
        revision: Option<&str>,
    ) -> Self {
        Self {
            kind: kind.to_lowercase(),
            provider: provider.to_lowercase(),
            namespace: namespace.filter(|ns| *ns != "-").map(str::to_string),
            name: name.to_string(),
            revision: revision.map(str::to_string),
            tool: None,
            tool_version: None,
        }
    }

    /// Attach tool coordinates.
    pub fn with_tool(mut self, tool: &str, tool_version: Option<&str>) -> Self {
        self.tool = Some(tool.to_lowercase());
        self.tool_version = tool_version.map(str::to_lowercase);
        self
    }

    /// Parse a request URL. One trailing slash is ignored.
    pub fn from_url(url: &str) -> Result<Self> {
        let pattern = URL_PATTERN
            .as_ref()
            .map_err(|e| AppError::config(format!("entity url pattern: {e}")))?;
        let caps = pattern
            .captures(url.strip_suffix('/').unwrap_or(url))
            .ok_or_else(|| AppError::validation(format!("Malformed entity url: {url}")))?;
        let group = |i: usize| caps.get(i).map(|m| m.as_str());

        let (kind, provider, namespace, name) = match (group(1), group(2), group(3), group(4)) {
            (Some(k), Some(p), Some(ns), Some(n)) => (k, p, ns, n),
            _ => {
                return Err(AppError::validation(format!(
                    "Malformed entity url: {url}"
                )));
            }
        };

        let mut spec = Self::new(kind, provider, Some(namespace), name, group(5));
        if let Some(tool_spec) = group(6) {
            let mut parts = tool_spec.split('/').skip(2);
            if let Some(tool) = parts.next().filter(|t| !t.is_empty()) {
                spec = spec.with_tool(tool, parts.next());
            }
        }
        Ok(spec)
    }

    /// `urn:` form used as the storage key.
    pub fn to_urn(&self) -> String {
        let mut urn = format!(
            "urn:{}:{}:{}:{}",
            self.kind,
            self.provider,
            self.namespace.as_deref().unwrap_or("-"),
            self.name
        );
        if let Some(revision) = &self.revision {
            urn.push_str(&format!(":revision:{revision}"));
        }
        if let Some(tool) = &self.tool {
            urn.push_str(&format!(":tool:{tool}"));
        }
        if let Some(tool_version) = &self.tool_version {
            urn.push_str(&format!(":{tool_version}"));
        }
        urn
    }

    /// `cd:/` form.
    pub fn to_url(&self) -> String {
        format!("cd:/{}", self.to_url_path())
    }

    /// Normalized path, also the fetch cache key.
    pub fn to_url_path(&self) -> String {
        let mut path = format!(
            "{}/{}/{}/{}",
            self.kind,
            self.provider,
            self.namespace.as_deref().unwrap_or("-"),
            self.name
        );
        if let Some(revision) = &self.revision {
            path.push('/');
            path.push_str(revision);
        }
        if let Some(tool) = &self.tool {
            path.push_str("/tool/");
            path.push_str(tool);
        }
        if let Some(tool_version) = &self.tool_version {
            path.push('/');
            path.push_str(tool_version);
        }
        path
    }
}

impl fmt::Display for EntitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

//! Local filesystem document store.
//!
//! One JSON file per document, named after its URN.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── npm/
//! │   └── npmjs/-/left-pad/revision/
//! │       └── 1.3.0.json        # urn:npm:npmjs:-:left-pad:revision:1.3.0
//! └── deadletter/
//!     └── {uuid}.json           # urn:deadletter:{uuid}
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Document, DocumentMetadata, DocumentSummary};
use crate::storage::DocumentStore;

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    name: String,
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "local".to_string(),
            root_dir: root_dir.into(),
        }
    }

    /// Same store under another name in logs and errors.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Relative file key for a URN.
    fn urn_key(&self, urn: &str) -> Result<String> {
        let segments: Vec<&str> = urn.split(':').skip(1).collect();
        let invalid = segments.is_empty()
            || segments.iter().any(|segment| {
                segment.is_empty() || *segment == "." || *segment == ".." || segment.contains(['/', '\\'])
            });
        if !urn.starts_with("urn:") || invalid {
            return Err(AppError::store(&self.name, format!("Invalid document urn {urn}")));
        }
        Ok(format!("{}.json", segments.join("/")))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every `.json` file under `dir`, depth first.
    async fn json_files(&self, dir: PathBuf) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(AppError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl DocumentStore for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        Ok(())
    }

    async fn upsert(&self, document: &Document) -> Result<Option<String>> {
        let metadata = DocumentMetadata::of(document)?;
        let urn = metadata
            .urn()
            .ok_or_else(|| AppError::store(&self.name, format!("{} has no self link", metadata.url)))?;
        let key = self.urn_key(urn)?;
        self.write_json(&key, document).await?;
        log::debug!("Stored {} at {}", urn, key);
        Ok(Some(urn.to_string()))
    }

    async fn get(&self, _kind: &str, key: &str) -> Result<Option<Document>> {
        self.read_json(&self.urn_key(key)?).await
    }

    async fn etag(&self, kind: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(kind, key)
            .await?
            .and_then(|document| DocumentMetadata::of(&document).ok())
            .and_then(|metadata| metadata.etag))
    }

    async fn list(&self, kind: &str) -> Result<Option<Vec<DocumentSummary>>> {
        let mut summaries = Vec::new();
        for path in self.json_files(self.path(kind)).await? {
            let bytes = tokio::fs::read(&path).await?;
            let document: Document = serde_json::from_slice(&bytes)?;
            match DocumentSummary::of(&document) {
                Ok(summary) => summaries.push(summary),
                Err(e) => log::warn!("Skipping unreadable document {:?}: {}", path, e),
            }
        }
        Ok(Some(summaries))
    }

    async fn count(&self, kind: &str) -> Result<Option<usize>> {
        Ok(Some(self.json_files(self.path(kind)).await?.len()))
    }

    async fn delete(&self, _kind: &str, key: &str) -> Result<Option<bool>> {
        match tokio::fs::remove_file(self.path(&self.urn_key(key)?)).await {
            Ok(()) => Ok(Some(true)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Some(false)),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::self_link;
    use serde_json::json;
    use tempfile::TempDir;

    fn document(name: &str) -> Document {
        json!({
            "_metadata": {
                "type": "npm",
                "url": format!("cd:/npm/npmjs/-/{name}/1.3.0"),
                "etag": "\"abc\"",
                "links": self_link(&format!("urn:npm:npmjs:-:{name}:revision:1.3.0")),
            },
            "name": name,
        })
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
        let missing = storage
            .get("npm", "urn:npm:npmjs:-:nope:revision:1.0.0")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_upsert_lays_out_by_urn() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let urn = storage.upsert(&document("left-pad")).await.unwrap();
        assert_eq!(urn.as_deref(), Some("urn:npm:npmjs:-:left-pad:revision:1.3.0"));
        assert!(tmp.path().join("npm/npmjs/-/left-pad/revision/1.3.0.json").exists());

        let loaded = storage
            .get("npm", "urn:npm:npmjs:-:left-pad:revision:1.3.0")
            .await
            .unwrap();
        assert_eq!(loaded, Some(document("left-pad")));
        assert_eq!(
            storage
                .etag("npm", "urn:npm:npmjs:-:left-pad:revision:1.3.0")
                .await
                .unwrap()
                .as_deref(),
            Some("\"abc\"")
        );
    }

    #[tokio::test]
    async fn test_list_count_delete() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.upsert(&document("a")).await.unwrap();
        storage.upsert(&document("b")).await.unwrap();

        assert_eq!(storage.count("npm").await.unwrap(), Some(2));
        assert_eq!(storage.count("pypi").await.unwrap(), Some(0));
        let listed = storage.list("npm").await.unwrap().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].urn, "urn:npm:npmjs:-:a:revision:1.3.0");

        let urn = "urn:npm:npmjs:-:a:revision:1.3.0";
        assert_eq!(storage.delete("npm", urn).await.unwrap(), Some(true));
        assert_eq!(storage.delete("npm", urn).await.unwrap(), Some(false));
        assert_eq!(storage.count("npm").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_rejects_path_escaping_urn() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(storage.get("npm", "urn:npm:..:etc").await.is_err());
        assert!(storage.get("npm", "cd:/npm/npmjs/-/a/1").await.is_err());
    }
}

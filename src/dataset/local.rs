//! Datasets stored in a local storage directory.
//!
//! Layout follows the platform's local emulation: `<storage>/datasets/<id>/`
//! holds one JSON file per item (`000000001.json`, ...). A file may also hold
//! an array of items. Files are read in filename order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{project_fields, DatasetClient, ListOptions};
use crate::error::{ExportError, ExportResult};
use crate::models::Record;

pub struct LocalDatasetClient {
    datasets_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Vec<Record>>>>,
}

impl LocalDatasetClient {
    /// Create a client over `<storage_dir>/datasets`.
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            datasets_dir: storage_dir.join("datasets"),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn items(&self, dataset_id: &str) -> ExportResult<Arc<Vec<Record>>> {
        let mut cache = self.cache.lock().await;
        if let Some(items) = cache.get(dataset_id) {
            return Ok(items.clone());
        }

        let dir = self.datasets_dir.join(dataset_id);
        let items = Arc::new(read_dataset_dir(&dir).await.map_err(|e| {
            ExportError::fetch(dataset_id, 0, format!("{}: {}", dir.display(), e))
        })?);
        tracing::debug!(
            "Loaded {} items from local dataset {}",
            items.len(),
            dir.display()
        );
        cache.insert(dataset_id.to_string(), items.clone());
        Ok(items)
    }
}

async fn read_dataset_dir(dir: &Path) -> std::io::Result<Vec<Record>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    let mut items = Vec::new();
    for path in files {
        let content = tokio::fs::read(&path).await?;
        let value: serde_json::Value = serde_json::from_slice(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        match value {
            serde_json::Value::Object(record) => items.push(record),
            serde_json::Value::Array(values) => {
                for value in values {
                    if let serde_json::Value::Object(record) = value {
                        items.push(record);
                    } else {
                        tracing::warn!("Skipping non-object item in {}", path.display());
                    }
                }
            }
            _ => tracing::warn!("Skipping non-object item file {}", path.display()),
        }
    }
    Ok(items)
}

#[async_trait]
impl DatasetClient for LocalDatasetClient {
    async fn item_count(&self, dataset_id: &str) -> ExportResult<u64> {
        Ok(self.items(dataset_id).await?.len() as u64)
    }

    async fn list_items(
        &self,
        dataset_id: &str,
        options: &ListOptions,
    ) -> ExportResult<Vec<Record>> {
        let items = self.items(dataset_id).await?;
        Ok(items
            .iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .cloned()
            .map(|r| project_fields(r, options.fields.as_deref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_reads_items_in_filename_order() {
        let storage = tempfile::tempdir().unwrap();
        let dir = storage.path().join("datasets").join("default");
        std::fs::create_dir_all(&dir).unwrap();
        write(&dir, "000000002.json", r#"{"n": 2}"#);
        write(&dir, "000000001.json", r#"{"n": 1}"#);
        write(&dir, "000000003.json", r#"[{"n": 3}, {"n": 4}]"#);
        write(&dir, "notes.txt", "ignored");

        let client = LocalDatasetClient::new(storage.path());
        assert_eq!(client.item_count("default").await.unwrap(), 4);

        let page = client
            .list_items(
                "default",
                &ListOptions {
                    offset: 1,
                    limit: 2,
                    fields: None,
                },
            )
            .await
            .unwrap();
        let ns: Vec<_> = page.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_missing_dataset_is_fetch_error() {
        let storage = tempfile::tempdir().unwrap();
        let client = LocalDatasetClient::new(storage.path());
        let err = client.item_count("nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fetch);
    }
}

//! Dataset clients: paginated, read-only access to remote item collections.

mod apify;
mod local;

pub use apify::{ApifyClient, DEFAULT_API_BASE_URL};
pub use local::LocalDatasetClient;

use async_trait::async_trait;

use crate::error::ExportResult;
use crate::models::Record;

/// Options for a single paginated read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub offset: u64,
    pub limit: u64,
    /// Restrict returned items to these fields.
    pub fields: Option<Vec<String>>,
}

/// Read access to datasets.
#[async_trait]
pub trait DatasetClient: Send + Sync {
    /// Total number of items in the dataset.
    async fn item_count(&self, dataset_id: &str) -> ExportResult<u64>;

    /// Items in `[offset, offset + limit)`, in stored order.
    async fn list_items(&self, dataset_id: &str, options: &ListOptions)
        -> ExportResult<Vec<Record>>;
}

/// Keep only the requested fields of a record, in the requested order.
pub(crate) fn project_fields(record: Record, fields: Option<&[String]>) -> Record {
    match fields {
        None => record,
        Some(fields) => {
            let mut record = record;
            fields
                .iter()
                .filter_map(|f| record.remove(f).map(|v| (f.clone(), v)))
                .collect()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory dataset client used by loader tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::error::ExportError;

    #[derive(Default)]
    pub struct MemoryDatasetClient {
        datasets: HashMap<String, Vec<Record>>,
        /// Artificial latency per offset, used to shuffle completion order.
        delays: HashMap<u64, Duration>,
        fail_offsets: Vec<u64>,
        pub requests: Mutex<Vec<(String, u64, u64)>>,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl MemoryDatasetClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_dataset(mut self, id: &str, items: Vec<Record>) -> Self {
            self.datasets.insert(id.to_string(), items);
            self
        }

        pub fn with_delay(mut self, offset: u64, delay: Duration) -> Self {
            self.delays.insert(offset, delay);
            self
        }

        pub fn failing_at(mut self, offset: u64) -> Self {
            self.fail_offsets.push(offset);
            self
        }

        pub fn into_arc(self) -> Arc<Self> {
            Arc::new(self)
        }

        pub fn requested_offsets(&self) -> Vec<u64> {
            let mut offsets: Vec<u64> = self
                .requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, o, _)| *o)
                .collect();
            offsets.sort_unstable();
            offsets
        }
    }

    pub fn numbered(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| {
                let mut r = Record::new();
                r.insert("n".to_string(), serde_json::json!(i));
                r
            })
            .collect()
    }

    #[async_trait]
    impl DatasetClient for MemoryDatasetClient {
        async fn item_count(&self, dataset_id: &str) -> ExportResult<u64> {
            self.datasets
                .get(dataset_id)
                .map(|items| items.len() as u64)
                .ok_or_else(|| ExportError::fetch(dataset_id, 0, "dataset not found"))
        }

        async fn list_items(
            &self,
            dataset_id: &str,
            options: &ListOptions,
        ) -> ExportResult<Vec<Record>> {
            self.requests.lock().unwrap().push((
                dataset_id.to_string(),
                options.offset,
                options.limit,
            ));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self
                .delays
                .get(&options.offset)
                .copied()
                .unwrap_or(Duration::from_millis(1));
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_offsets.contains(&options.offset) {
                return Err(ExportError::fetch(dataset_id, options.offset, "injected"));
            }

            let items = self
                .datasets
                .get(dataset_id)
                .ok_or_else(|| ExportError::fetch(dataset_id, options.offset, "not found"))?;
            Ok(items
                .iter()
                .skip(options.offset as usize)
                .take(options.limit as usize)
                .cloned()
                .map(|r| project_fields(r, options.fields.as_deref()))
                .collect())
        }
    }
}

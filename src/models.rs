//! Core data types shared by the loader and the insert generator.

use serde::{Deserialize, Serialize};

/// A single dataset item. Field order is preserved as delivered.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Fields starting with this marker are metadata and never become columns.
pub const RESERVED_FIELD_PREFIX: char = '#';

/// Check whether a field name is reserved metadata.
pub fn is_reserved_field(name: &str) -> bool {
    name.starts_with(RESERVED_FIELD_PREFIX)
}

/// One bounded offset/limit fetch against a single dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub dataset_id: String,
    /// Position of the dataset in the requested id list.
    pub dataset_index: usize,
    /// Chunk index within the dataset (`chunk start = index * batch_size`).
    pub window_index: usize,
    pub offset: u64,
    pub limit: u64,
}

impl Window {
    /// Exclusive end of the item range covered by this window.
    pub fn end(&self) -> u64 {
        self.offset + self.limit
    }

    pub fn context(&self) -> WindowContext {
        WindowContext {
            dataset_id: self.dataset_id.clone(),
            dataset_offset: self.offset,
        }
    }
}

/// Identifies the window a batch of items came from, handed to processing steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowContext {
    pub dataset_id: String,
    pub dataset_offset: u64,
}

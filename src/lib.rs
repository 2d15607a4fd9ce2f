//! dsexport - export crawl/scrape datasets into a SQL table.
//!
//! Datasets are split into fixed-size windows and loaded concurrently; every
//! window is turned into multi-row INSERT statements as it arrives. A
//! persisted loading state lets an interrupted export resume without
//! re-inserting finished windows.

pub mod config;
pub mod dataset;
pub mod destination;
pub mod error;
pub mod export;
pub mod loader;
pub mod models;
pub mod sql;
pub mod tunnel;

pub use error::{ErrorKind, ExportError, ExportResult};

//! Resumable loading state: which windows have been fully processed.
//!
//! The state maps `dataset id -> window offset -> {done}` and is stored as JSON
//! under a single key-value record so a restarted run skips finished windows.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::dataset::ApifyClient;
use crate::error::{ExportError, ExportResult};
use crate::models::Window;

/// Default key-value record holding the loading state.
pub const DEFAULT_STATE_KEY: &str = "PROCESS-FN-LOADING-STATE";

/// Default interval between periodic flushes.
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadingState {
    datasets: BTreeMap<String, BTreeMap<u64, WindowState>>,
}

impl LoadingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self, dataset_id: &str, offset: u64) -> bool {
        self.datasets
            .get(dataset_id)
            .and_then(|windows| windows.get(&offset))
            .is_some_and(|w| w.done)
    }

    pub fn mark_done(&mut self, dataset_id: &str, offset: u64) {
        self.datasets
            .entry(dataset_id.to_string())
            .or_default()
            .entry(offset)
            .or_default()
            .done = true;
    }

    /// Register a planned window. Returns `false` when it was already processed.
    pub fn register(&mut self, window: &Window) -> bool {
        let entry = self
            .datasets
            .entry(window.dataset_id.clone())
            .or_default()
            .entry(window.offset)
            .or_default();
        !entry.done
    }

    /// Register every window and keep those that still need processing.
    pub fn retain_pending(&mut self, windows: Vec<Window>) -> (Vec<Window>, usize) {
        let total = windows.len();
        let pending: Vec<Window> = windows
            .into_iter()
            .filter(|w| {
                let pending = self.register(w);
                if !pending {
                    tracing::info!(
                        "Batch for dataset {}, offset: {} was already processed, skipping...",
                        w.dataset_id,
                        w.offset
                    );
                }
                pending
            })
            .collect();
        let skipped = total - pending.len();
        (pending, skipped)
    }

    pub fn done_count(&self) -> usize {
        self.datasets
            .values()
            .flat_map(|windows| windows.values())
            .filter(|w| w.done)
            .count()
    }

    pub fn window_count(&self) -> usize {
        self.datasets.values().map(|w| w.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Durable slot for the loading state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> ExportResult<Option<LoadingState>>;
    async fn save(&self, state: &LoadingState) -> ExportResult<()>;
    async fn clear(&self) -> ExportResult<()>;
}

/// JSON file in a local key-value store directory.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<storage>/key_value_stores/default/<key>.json`
    pub fn in_storage(storage_dir: &Path, key: &str) -> Self {
        Self::new(
            storage_dir
                .join("key_value_stores")
                .join("default")
                .join(format!("{key}.json")),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> ExportResult<Option<LoadingState>> {
        match tokio::fs::read(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExportError::State(format!("{}: {}", self.path.display(), e))),
        }
    }

    async fn save(&self, state: &LoadingState) -> ExportResult<()> {
        let io_err = |e: std::io::Error| ExportError::State(format!("{}: {}", self.path.display(), e));
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = serde_json::to_vec_pretty(state)?;
        // Write then rename so a crash mid-write never leaves a truncated record
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)
    }

    async fn clear(&self) -> ExportResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(ExportError::State(format!("{}: {}", self.path.display(), e)))
            }
            _ => Ok(()),
        }
    }
}

/// Record in a platform key-value store.
pub struct ApifyKeyValueStore {
    client: ApifyClient,
    store_id: String,
    key: String,
}

impl ApifyKeyValueStore {
    pub fn new(client: ApifyClient, store_id: &str, key: &str) -> Self {
        Self {
            client,
            store_id: store_id.to_string(),
            key: key.to_string(),
        }
    }

    fn record_url(&self) -> url::Url {
        self.client
            .endpoint(&["key-value-stores", &self.store_id, "records", &self.key])
    }
}

#[async_trait]
impl StateStore for ApifyKeyValueStore {
    async fn load(&self) -> ExportResult<Option<LoadingState>> {
        let state_err = |e: reqwest::Error| ExportError::State(e.to_string());
        let response = self
            .client
            .get(self.record_url())
            .send()
            .await
            .map_err(state_err)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let state = response
            .error_for_status()
            .map_err(state_err)?
            .json::<Option<LoadingState>>()
            .await
            .map_err(state_err)?;
        Ok(state)
    }

    async fn save(&self, state: &LoadingState) -> ExportResult<()> {
        self.client
            .put(self.record_url())
            .json(state)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| ExportError::State(e.to_string()))
    }

    async fn clear(&self) -> ExportResult<()> {
        let response = self
            .client
            .delete(self.record_url())
            .send()
            .await
            .map_err(|e| ExportError::State(e.to_string()))?;
        // Already gone
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| ExportError::State(e.to_string()))
    }
}

/// In-process store, useful for tests and for runs that never restart.
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<LoadingState>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LoadingState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Default::default(),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Option<LoadingState> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> ExportResult<Option<LoadingState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &LoadingState) -> ExportResult<()> {
        *self.state.lock().await = Some(state.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> ExportResult<()> {
        *self.state.lock().await = None;
        Ok(())
    }
}

/// Background task flushing the shared state on a fixed interval.
///
/// Stopped with [`PersistTask::finish`], which performs the single final flush.
pub struct PersistTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    state: Arc<Mutex<LoadingState>>,
    store: Arc<dyn StateStore>,
}

impl PersistTask {
    pub fn spawn(
        state: Arc<Mutex<LoadingState>>,
        store: Arc<dyn StateStore>,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task_state = state.clone();
        let task_store = store.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = task_state.lock().await.clone();
                        if let Err(e) = task_store.save(&snapshot).await {
                            tracing::warn!("Failed to persist loading state: {}", e);
                        } else {
                            tracing::debug!(
                                "Persisted loading state ({} windows done)",
                                snapshot.done_count()
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Self {
            shutdown,
            handle,
            state,
            store,
        }
    }

    /// Stop the periodic flush and write the final state.
    pub async fn finish(self) -> ExportResult<()> {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Loading state flush task ended abnormally: {}", e);
        }
        let snapshot = self.state.lock().await.clone();
        self.store.save(&snapshot).await?;
        tracing::info!(
            "Saved loading state: {}/{} windows done",
            snapshot.done_count(),
            snapshot.window_count()
        );
        Ok(())
    }
}

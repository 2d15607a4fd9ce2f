//! Parallel dataset loader.
//!
//! Splits datasets into fixed-size windows, fetches them concurrently under a
//! cap, and either reassembles every item in order (collect mode) or hands each
//! window to a [`BatchProcessor`] as soon as it arrives (process mode). Process
//! mode can persist a [`LoadingState`] so a restarted run skips finished windows.

mod assemble;
pub mod plan;
mod progress;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::Mutex;

pub use assemble::{Assembler, LoadedItems};
pub use plan::{plan_windows, PlanOptions, DEFAULT_BATCH_SIZE, DEFAULT_LIMIT};
pub use progress::LoadProgress;
pub use state::{LoadingState, PersistTask, StateStore, DEFAULT_PERSIST_INTERVAL};

use crate::dataset::{DatasetClient, ListOptions};
use crate::error::{ExportError, ExportResult};
use crate::models::{Record, Window, WindowContext};

/// Default number of windows fetched at the same time.
pub const DEFAULT_PARALLEL_LOADS: usize = 20;

/// Per-window processing step for process mode.
///
/// Windows arrive in no particular order; implementations must not assume a
/// window is processed after its numeric predecessor.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, items: Vec<Record>, window: &WindowContext) -> ExportResult<()>;
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub parallel_loads: usize,
    pub plan: PlanOptions,
    pub fields: Option<Vec<String>>,
    /// Collect mode: flatten the windows of each dataset.
    pub concat_items: bool,
    /// Collect mode: flatten across datasets.
    pub concat_datasets: bool,
    pub debug_log: bool,
    pub persist_interval: Duration,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            parallel_loads: DEFAULT_PARALLEL_LOADS,
            plan: PlanOptions::default(),
            fields: None,
            concat_items: true,
            concat_datasets: true,
            debug_log: false,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
        }
    }
}

/// Summary of a process-mode run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub windows_planned: usize,
    pub windows_skipped: usize,
    pub windows_processed: usize,
    pub items_loaded: u64,
    pub elapsed: Duration,
}

pub struct ParallelLoader {
    client: Arc<dyn DatasetClient>,
    options: LoaderOptions,
    state_store: Option<Arc<dyn StateStore>>,
    progress: Option<Arc<LoadProgress>>,
}

impl ParallelLoader {
    pub fn new(client: Arc<dyn DatasetClient>, options: LoaderOptions) -> Self {
        Self {
            client,
            options,
            state_store: None,
            progress: None,
        }
    }

    /// Track finished windows in `store` (process mode only).
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Report counters into a caller-owned progress handle.
    pub fn with_progress(mut self, progress: Arc<LoadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Resolve every dataset's item count, then plan its windows.
    ///
    /// Fails without a partial plan when any dataset cannot be resolved.
    pub async fn plan(&self, dataset_ids: &[String]) -> ExportResult<Vec<Window>> {
        let mut counts = Vec::with_capacity(dataset_ids.len());
        for dataset_id in dataset_ids {
            let item_count = self.client.item_count(dataset_id).await?;
            if self.options.debug_log {
                tracing::info!("Dataset {} has {} items", dataset_id, item_count);
            }
            counts.push((dataset_id.clone(), item_count));
        }
        Ok(plan_windows(&counts, &self.options.plan))
    }

    /// Collect mode: load every requested item and reassemble it in order.
    pub async fn load(&self, dataset_ids: &[String]) -> ExportResult<LoadedItems> {
        let started = Instant::now();
        let windows = self.plan(dataset_ids).await?;
        let progress = self.progress_for(dataset_ids.len());
        progress.set_planned(windows.len());
        if self.options.debug_log {
            tracing::info!("Number of requests to do: {}", windows.len());
        }

        let mut assembler = Assembler::new(dataset_ids.len());
        let mut fetches = stream::iter(windows.iter())
            .map(|window| {
                let progress = progress.clone();
                async move {
                    let items = self.fetch_window(window, &progress).await?;
                    Ok::<_, ExportError>((window, items))
                }
            })
            .buffer_unordered(self.parallel_loads());

        while let Some((window, items)) = fetches.try_next().await? {
            assembler.insert(window, items);
            progress.window_done();
        }

        self.log_elapsed(started);
        Ok(assembler.finish(self.options.concat_items, self.options.concat_datasets))
    }

    /// Process mode: hand each window to `processor` as it arrives.
    ///
    /// With a state store, windows already marked done are skipped and each
    /// window is marked done only after `processor` succeeds. The state is
    /// flushed periodically and once more when the run ends, even on error.
    pub async fn process(
        &self,
        dataset_ids: &[String],
        processor: &dyn BatchProcessor,
    ) -> ExportResult<LoadStats> {
        let started = Instant::now();
        let progress = self.progress_for(dataset_ids.len());

        let mut state = match &self.state_store {
            Some(store) => store.load().await?.unwrap_or_default(),
            None => LoadingState::new(),
        };

        let planned = self.plan(dataset_ids).await?;
        let windows_planned = planned.len();
        let (windows, windows_skipped) = if self.state_store.is_some() {
            state.retain_pending(planned)
        } else {
            (planned, 0)
        };
        progress.set_planned(windows.len());
        if self.options.debug_log {
            tracing::info!("Number of requests to do: {}", windows.len());
        }

        let state = Arc::new(Mutex::new(state));
        let persist = self.state_store.as_ref().map(|store| {
            PersistTask::spawn(state.clone(), store.clone(), self.options.persist_interval)
        });
        let tracking = persist.is_some();

        let result = stream::iter(windows.into_iter().map(Ok::<Window, ExportError>))
            .try_for_each_concurrent(self.parallel_loads(), |window| {
                let state = state.clone();
                let progress = progress.clone();
                async move {
                    let items = self.fetch_window(&window, &progress).await?;
                    processor.process(items, &window.context()).await?;
                    if tracking {
                        state
                            .lock()
                            .await
                            .mark_done(&window.dataset_id, window.offset);
                    }
                    progress.window_done();
                    Ok(())
                }
            })
            .await;

        // Final flush happens exactly once, whether the run completed or not
        let flushed = match persist {
            Some(task) => task.finish().await,
            None => Ok(()),
        };
        if let Err(e) = &result {
            tracing::error!("Loading aborted: {}", e);
        }
        result?;
        flushed?;

        self.log_elapsed(started);
        Ok(LoadStats {
            windows_planned,
            windows_skipped,
            windows_processed: progress.windows_done(),
            items_loaded: progress.total_items(),
            elapsed: started.elapsed(),
        })
    }

    async fn fetch_window(
        &self,
        window: &Window,
        progress: &LoadProgress,
    ) -> ExportResult<Vec<Record>> {
        let options = ListOptions {
            offset: window.offset,
            limit: window.limit,
            fields: self.options.fields.clone(),
        };
        let items = self
            .client
            .list_items(&window.dataset_id, &options)
            .await?;

        let (dataset_total, total) =
            progress.record_items(window.dataset_index, items.len() as u64);
        if self.options.debug_log {
            tracing::info!(
                "Items loaded from dataset {}: {}, offset: {}, total loaded from dataset {}: {}, total loaded: {}",
                window.dataset_id,
                items.len(),
                window.offset,
                window.dataset_id,
                dataset_total,
                total
            );
        }
        Ok(items)
    }

    fn progress_for(&self, dataset_count: usize) -> Arc<LoadProgress> {
        self.progress
            .clone()
            .unwrap_or_else(|| Arc::new(LoadProgress::new(dataset_count)))
    }

    fn parallel_loads(&self) -> usize {
        self.options.parallel_loads.max(1)
    }

    fn log_elapsed(&self, started: Instant) {
        if self.options.debug_log {
            tracing::info!("Loading took {} seconds", started.elapsed().as_secs());
        }
    }
}

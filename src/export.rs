//! Export orchestration: validated input in, rows in the destination table out.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{ExportInput, Settings};
use crate::dataset::{ApifyClient, DatasetClient, LocalDatasetClient};
use crate::destination::{redact_url_password, ConnectionConfig, DbPool, Destination};
use crate::error::{ExportError, ExportResult};
use crate::loader::state::{ApifyKeyValueStore, FileStateStore};
use crate::loader::{
    BatchProcessor, LoadProgress, LoadStats, LoaderOptions, ParallelLoader, PlanOptions,
    StateStore,
};
use crate::models::{Record, WindowContext};
use crate::sql::{create_insert, InsertOptions};
use crate::tunnel::ProxyTunnel;

/// Counters for everything the inserter attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub row_groups: usize,
    pub statements: usize,
    pub rows_inserted: usize,
    pub skipped_existing: usize,
    pub failed_groups: usize,
}

impl InsertSummary {
    fn add(&mut self, other: &InsertSummary) {
        self.row_groups += other.row_groups;
        self.statements += other.statements;
        self.rows_inserted += other.rows_inserted;
        self.skipped_existing += other.skipped_existing;
        self.failed_groups += other.failed_groups;
    }
}

/// Splits records into row-groups and writes each as one INSERT.
pub struct RowInserter {
    destination: Arc<dyn Destination>,
    options: InsertOptions,
    row_split: usize,
    totals: Mutex<InsertSummary>,
}

impl RowInserter {
    pub fn new(destination: Arc<dyn Destination>, options: InsertOptions, row_split: usize) -> Self {
        Self {
            destination,
            options,
            row_split: row_split.max(1),
            totals: Mutex::new(InsertSummary::default()),
        }
    }

    /// Insert `rows` group by group.
    ///
    /// A rejected statement is logged with its SQL and the next group is
    /// attempted. Losing the destination itself aborts with a
    /// [`ErrorKind::Database`](crate::ErrorKind::Database) error, since every
    /// following group would fail the same way.
    pub async fn insert_all(&self, rows: &[Record]) -> ExportResult<InsertSummary> {
        let mut summary = InsertSummary::default();
        let result = self.insert_groups(rows, &mut summary).await;
        if let Ok(mut totals) = self.totals.lock() {
            totals.add(&summary);
        }
        result.map(|()| summary)
    }

    async fn insert_groups(&self, rows: &[Record], summary: &mut InsertSummary) -> ExportResult<()> {
        let table = self.options.table.as_str();

        for group in rows.chunks(self.row_split) {
            summary.row_groups += 1;
            let generated = create_insert(group, &self.options, self.destination.as_ref()).await;
            summary.skipped_existing += generated.skipped_existing;

            let Some(statement) = generated.statement else {
                tracing::info!("Nothing to insert into {} for this row-group", table);
                continue;
            };

            tracing::info!("{}", statement.sql);
            summary.statements += 1;
            match self.destination.execute(&statement.sql).await {
                Ok(affected) => {
                    tracing::info!("Inserted {} rows into {}", affected, table);
                    summary.rows_inserted += affected;
                }
                Err(e) if e.is_unavailable() => {
                    summary.failed_groups += 1;
                    return Err(e.into());
                }
                Err(e) => {
                    let err = ExportError::Insert {
                        table: table.to_string(),
                        source: e.into_inner(),
                    };
                    tracing::warn!("{}", err);
                    summary.failed_groups += 1;
                }
            }
        }
        Ok(())
    }

    /// Totals over every call so far.
    pub fn summary(&self) -> InsertSummary {
        self.totals
            .lock()
            .map(|totals| totals.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BatchProcessor for RowInserter {
    async fn process(&self, items: Vec<Record>, window: &WindowContext) -> ExportResult<()> {
        tracing::debug!(
            "Inserting {} items from dataset {} (offset {})",
            items.len(),
            window.dataset_id,
            window.dataset_offset
        );
        self.insert_all(&items).await?;
        Ok(())
    }
}

/// Outcome of a finished export.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    /// `None` for inline rows.
    pub load: Option<LoadStats>,
    pub insert: InsertSummary,
}

/// Runs one export job.
pub struct Exporter {
    settings: Settings,
    input: ExportInput,
    multirow: Option<String>,
    progress: Option<Arc<LoadProgress>>,
}

impl Exporter {
    pub fn new(settings: Settings, input: ExportInput) -> Self {
        Self {
            settings,
            input,
            multirow: std::env::var("MULTIROW").ok(),
            progress: None,
        }
    }

    /// Override the `MULTIROW` value read from the environment.
    pub fn with_multirow(mut self, multirow: Option<String>) -> Self {
        self.multirow = multirow;
        self
    }

    pub fn with_progress(mut self, progress: Arc<LoadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn input(&self) -> &ExportInput {
        &self.input
    }

    pub async fn run(&self) -> ExportResult<ExportReport> {
        self.input.validate()?;

        // Held until the export is done; dropping it closes the listener
        let (connection, _tunnel) = self.connection().await?;
        let pool = DbPool::connect(&connection)?;
        // The first connection doubles as the connectivity check
        pool.check().await?;
        tracing::debug!("Destination {} is reachable", pool.driver());
        let inserter = RowInserter::new(
            Arc::new(pool),
            self.insert_options(),
            self.input.row_split(self.multirow.as_deref()),
        );

        let dataset_ids = self.input.dataset_ids();
        let load = if !dataset_ids.is_empty() {
            let loader = self.loader()?;
            Some(loader.process(&dataset_ids, &inserter).await?)
        } else if let Some(rows) = &self.input.rows {
            inserter.insert_all(rows).await?;
            None
        } else {
            None
        };

        let insert = inserter.summary();
        if let Some(stats) = &load {
            tracing::info!(
                "Loaded {} items in {} windows ({} already done) in {:.1}s",
                stats.items_loaded,
                stats.windows_processed,
                stats.windows_skipped,
                stats.elapsed.as_secs_f64()
            );
        }
        tracing::info!(
            "Inserted {} rows in {} statements; {} duplicates skipped, {} of {} row-groups failed",
            insert.rows_inserted,
            insert.statements,
            insert.skipped_existing,
            insert.failed_groups,
            insert.row_groups
        );

        Ok(ExportReport { load, insert })
    }

    /// Connection parameters, rewritten to a local tunnel when a proxy is set.
    async fn connection(&self) -> ExportResult<(ConnectionConfig, Option<ProxyTunnel>)> {
        let connection = self.input.connection.clone();
        let Some(proxy_url) = self.input.proxy_url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok((connection, None));
        };

        let (host, port) = connection.endpoint().ok_or_else(|| {
            ExportError::config("proxyUrl needs a network connection with a host")
        })?;
        let tunnel = ProxyTunnel::open(proxy_url, &host, port).await?;
        let connection = connection.with_endpoint(&tunnel.host(), tunnel.port())?;
        if let Ok(url) = connection.database_url() {
            tracing::info!("New proxied connection details: {}", redact_url_password(&url));
        }
        Ok((connection, Some(tunnel)))
    }

    pub fn insert_options(&self) -> InsertOptions {
        InsertOptions {
            table: self.input.table().to_string(),
            static_params: self.input.static_param.clone(),
            exists_attr: self.input.exists_attr.clone(),
        }
    }

    pub fn loader_options(&self) -> LoaderOptions {
        let defaults = PlanOptions::default();
        LoaderOptions {
            parallel_loads: self.input.parallel_loads(),
            plan: PlanOptions {
                batch_size: self.input.batch_size(),
                offset: self.input.offset.unwrap_or(defaults.offset),
                limit: self.input.limit.unwrap_or(defaults.limit),
            },
            fields: self.input.fields.clone(),
            debug_log: self.input.debug_log,
            persist_interval: self.settings.persist_interval,
            ..LoaderOptions::default()
        }
    }

    /// Remote datasets on the platform, local storage otherwise.
    pub fn dataset_client(&self) -> ExportResult<Arc<dyn DatasetClient>> {
        if self.settings.is_at_home {
            Ok(Arc::new(apify_client(&self.settings)?))
        } else {
            Ok(Arc::new(LocalDatasetClient::new(&self.settings.storage_dir)))
        }
    }

    pub fn state_store(&self) -> ExportResult<Arc<dyn StateStore>> {
        open_state_store(&self.settings)
    }

    pub fn loader(&self) -> ExportResult<ParallelLoader> {
        let mut loader = ParallelLoader::new(self.dataset_client()?, self.loader_options());
        if self.input.persist_loading_state() {
            loader = loader.with_state_store(self.state_store()?);
        }
        if let Some(progress) = &self.progress {
            loader = loader.with_progress(progress.clone());
        }
        Ok(loader)
    }
}

fn apify_client(settings: &Settings) -> ExportResult<ApifyClient> {
    ApifyClient::new(
        &settings.api_base_url,
        settings.token.clone(),
        settings.request_timeout,
    )
}

/// Where the loading state lives for this environment.
///
/// On the platform with a key-value store id: that store. Otherwise a JSON
/// record in the local storage directory.
pub fn open_state_store(settings: &Settings) -> ExportResult<Arc<dyn StateStore>> {
    match (&settings.key_value_store_id, settings.is_at_home) {
        (Some(store_id), true) => Ok(Arc::new(ApifyKeyValueStore::new(
            apify_client(settings)?,
            store_id,
            &settings.state_key,
        ))),
        _ => Ok(Arc::new(FileStateStore::in_storage(
            &settings.storage_dir,
            &settings.state_key,
        ))),
    }
}

//! `dsexport export`

use std::path::Path;
use std::sync::Arc;

use console::style;

use dsexport::config::{ExportInput, Settings};
use dsexport::export::Exporter;
use dsexport::loader::LoadProgress;

use crate::cli::progress::ExportProgress;

pub async fn cmd_export(
    settings: &Settings,
    input_path: Option<&Path>,
    show_progress: bool,
) -> anyhow::Result<()> {
    let input = ExportInput::load(input_path, settings).await?;
    let dataset_count = input.dataset_ids().len();

    let progress = Arc::new(LoadProgress::new(dataset_count));
    let exporter = Exporter::new(settings.clone(), input).with_progress(progress.clone());
    let bar = (show_progress && dataset_count > 0).then(|| ExportProgress::start(progress));

    let result = exporter.run().await;
    if let Some(bar) = bar {
        bar.finish();
    }

    match result {
        Ok(report) => {
            let summary = &report.insert;
            println!(
                "{} Inserted {} rows into {} ({} duplicates skipped)",
                style("✓").green(),
                summary.rows_inserted,
                exporter.input().table(),
                summary.skipped_existing
            );
            if summary.failed_groups > 0 {
                println!(
                    "{} {} of {} row-groups failed, see the log for the statements",
                    style("!").yellow(),
                    summary.failed_groups,
                    summary.row_groups
                );
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Export failed: {}", e);
            if e.is_resumable() {
                println!(
                    "{} Run the export again to resume from the saved loading state",
                    style("!").yellow()
                );
            }
            Err(e.into())
        }
    }
}

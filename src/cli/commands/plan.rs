//! `dsexport plan`

use std::path::Path;

use console::style;

use dsexport::config::{ExportInput, Settings};
use dsexport::export::Exporter;

pub async fn cmd_plan(settings: &Settings, input_path: Option<&Path>) -> anyhow::Result<()> {
    let input = ExportInput::load(input_path, settings).await?;
    let dataset_ids = input.dataset_ids();
    if dataset_ids.is_empty() {
        println!(
            "{} Input has no datasets; {} inline rows would be inserted directly",
            style("!").yellow(),
            input.rows.as_ref().map_or(0, Vec::len)
        );
        return Ok(());
    }

    let persist = input.persist_loading_state();
    let exporter = Exporter::new(settings.clone(), input);
    let windows = exporter.loader()?.plan(&dataset_ids).await?;
    let state = if persist {
        exporter.state_store()?.load().await?.unwrap_or_default()
    } else {
        Default::default()
    };

    println!(
        "{:<24} {:>7} {:>12} {:>10}  {}",
        "DATASET", "WINDOW", "OFFSET", "LIMIT", "STATUS"
    );
    let mut pending = 0;
    for window in &windows {
        let status = if state.is_done(&window.dataset_id, window.offset) {
            style("done").green()
        } else {
            pending += 1;
            style("pending").yellow()
        };
        println!(
            "{:<24} {:>7} {:>12} {:>10}  {}",
            window.dataset_id, window.window_index, window.offset, window.limit, status
        );
    }
    println!(
        "\n{} windows, {} pending",
        style(windows.len()).bold(),
        style(pending).bold()
    );
    Ok(())
}

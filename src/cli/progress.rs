//! Progress bar fed from the loader's counters.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use dsexport::loader::LoadProgress;

const REFRESH: Duration = Duration::from_millis(250);

/// Redraws a bar from [`LoadProgress`] until finished.
pub struct ExportProgress {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl ExportProgress {
    pub fn start(progress: Arc<LoadProgress>) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} windows {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        bar.set_style(style);

        let task = {
            let bar = bar.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(REFRESH);
                loop {
                    ticker.tick().await;
                    bar.set_length(progress.windows_planned() as u64);
                    bar.set_position(progress.windows_done() as u64);
                    bar.set_message(format!("{} items", progress.total_items()));
                }
            })
        };

        Self { bar, task }
    }

    pub fn finish(self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use session_janitor::{CleanupRecord, CleanupReport, CleanupReporter, RecordStatus};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Progress bar over the reclaimable sessions of a cleanup run.
#[derive(Default)]
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CleanupReporter for CliReporter {
    fn on_discovery_complete(&self, sessions_found: usize, reclaimable: usize) {
        eprintln!(
            "  \x1b[32m✓\x1b[0m Discovery complete: {} sessions, {} reclaimable",
            sessions_found, reclaimable
        );
        let pb = ProgressBar::new(reclaimable as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} Cleaning [{bar:30.cyan/dim}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        *self.bar() = Some(pb);
    }

    fn on_session_start(&self, session_id: &str, _position: usize, _total: usize) {
        if let Some(pb) = self.bar().as_ref() {
            pb.set_message(session_id.to_string());
        }
    }

    fn on_session_complete(&self, record: &CleanupRecord) {
        if let Some(pb) = self.bar().as_ref() {
            pb.inc(1);
            if record.status == RecordStatus::Failed {
                pb.println(format!(
                    "  \x1b[31m✗\x1b[0m {}: {}",
                    record.session_id,
                    record.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }

    fn on_run_complete(&self, report: &CleanupReport) {
        if let Some(pb) = self.bar().take() {
            pb.finish_and_clear();
        }
        eprintln!(
            "  \x1b[32m✓\x1b[0m Cleanup complete: {} sessions, {} freed",
            report.sessions_cleaned,
            HumanBytes(report.bytes_freed)
        );
    }
}

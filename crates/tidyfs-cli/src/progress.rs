use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tidyfs_core::ProgressReporter;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Spinners for the scan and similarity phases. Totals are unknown up front.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        // A panicked spinner update leaves nothing worth protecting
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_spinner(&self, message: String) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICK_CHARS));
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));

        let mut slot = self.slot();
        if let Some(old) = slot.take() {
            old.finish_and_clear();
        }
        *slot = Some(pb);
    }

    fn finish_spinner(&self) {
        if let Some(pb) = self.slot().take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, root: &Path) {
        self.start_spinner(format!("Scanning {}...", root.display()));
    }

    fn on_scan_progress(&self, entries_seen: usize, _current_path: &Path) {
        if let Some(pb) = self.slot().as_ref() {
            pb.set_message(format!("Scanning... {} entries seen", entries_seen));
        }
    }

    fn on_scan_complete(&self, distinct_terms: usize, skipped: usize, duration_secs: f64) {
        self.finish_spinner();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} distinct terms, {} entries skipped in {:.2}s",
            distinct_terms, skipped, duration_secs
        );
    }

    fn on_similarity_start(&self, indexed_paths: usize) {
        self.start_spinner(format!("Comparing {} indexed paths...", indexed_paths));
    }

    fn on_similarity_complete(&self, candidate_pairs: usize, insights: usize, duration_secs: f64) {
        self.finish_spinner();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Similarity complete: {} candidate pairs, {} insights in {:.2}s",
            candidate_pairs, insights, duration_secs
        );
    }
}

use std::path::Path;

/// Trait for reporting scan and similarity progress.
///
/// The CLI implements it with indicatif spinners. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, _root: &Path) {}
    fn on_scan_progress(&self, _entries_seen: usize, _current_path: &Path) {}
    fn on_scan_complete(&self, _distinct_terms: usize, _skipped: usize, _duration_secs: f64) {}
    fn on_similarity_start(&self, _indexed_paths: usize) {}
    fn on_similarity_complete(&self, _candidate_pairs: usize, _insights: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

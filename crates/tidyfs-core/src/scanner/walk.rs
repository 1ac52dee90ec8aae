use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::terms::{TermVector, Tokenizer};
use crate::config::ExtractorConfig;
use crate::error::Error;
use crate::progress::ProgressReporter;

/// Result of extracting one path's terms.
#[derive(Debug)]
pub struct ScanOutcome {
    pub root: PathBuf,
    pub terms: TermVector,
    pub entries_seen: usize,
    /// Entries that could not be read and were left out.
    pub skipped: usize,
    pub duration: Duration,
}

pub struct TermExtractor {
    config: ExtractorConfig,
    tokenizer: Tokenizer,
    ignore_patterns: Vec<Pattern>,
}

struct WalkState<'a> {
    counts: DashMap<String, u64>,
    entries_seen: AtomicUsize,
    skipped: AtomicUsize,
    reporter: &'a dyn ProgressReporter,
}

impl TermExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        let tokenizer = Tokenizer::new(config.min_term_len, &config.extra_stopwords);
        Self {
            config,
            tokenizer,
            ignore_patterns,
        }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Build the term vector for everything beneath `root`.
    ///
    /// Only an unreadable or non-directory root is an error; unreadable entries
    /// below it are logged and counted in [`ScanOutcome::skipped`].
    pub fn extract(
        &self,
        root: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanOutcome, Error> {
        let start = Instant::now();
        let metadata = fs::metadata(root).map_err(|source| Error::Scan {
            path: root.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(Error::Scan {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }
        let entries = fs::read_dir(root).map_err(|source| Error::Scan {
            path: root.to_path_buf(),
            source,
        })?;

        reporter.on_scan_start(root);
        let state = WalkState {
            counts: DashMap::new(),
            entries_seen: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            reporter,
        };
        self.visit_entries(root, entries, 1, &state);

        let terms: TermVector = state.counts.into_iter().collect();
        let outcome = ScanOutcome {
            root: root.to_path_buf(),
            entries_seen: state.entries_seen.into_inner(),
            skipped: state.skipped.into_inner(),
            terms,
            duration: start.elapsed(),
        };
        debug!(
            "Extracted {} terms from {} entries under {} ({} skipped) in {:.2}s",
            outcome.terms.len(),
            outcome.entries_seen,
            root.display(),
            outcome.skipped,
            outcome.duration.as_secs_f64(),
        );
        reporter.on_scan_complete(
            outcome.terms.len(),
            outcome.skipped,
            outcome.duration.as_secs_f64(),
        );
        Ok(outcome)
    }

    fn visit_dir(&self, dir: &Path, depth: usize, state: &WalkState) {
        if self.config.max_depth.is_some_and(|max| depth > max) {
            return;
        }
        match fs::read_dir(dir) {
            Ok(entries) => self.visit_entries(dir, entries, depth, state),
            Err(err) => skip(state, dir, &err),
        }
    }

    fn visit_entries(&self, dir: &Path, entries: fs::ReadDir, depth: usize, state: &WalkState) {
        entries.par_bridge().for_each(|entry_result| {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    skip(state, dir, &err);
                    return;
                }
            };

            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.config.include_hidden && name.starts_with('.') {
                return;
            }
            if self
                .ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(&path))
            {
                return;
            }

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    skip(state, &path, &err);
                    return;
                }
            };
            if file_type.is_symlink() {
                return;
            }

            let seen = state.entries_seen.fetch_add(1, Ordering::Relaxed) + 1;
            if seen % 256 == 0 {
                state.reporter.on_scan_progress(seen, &path);
            }

            let mut local = TermVector::new();
            self.tokenizer.count_into(&name, &mut local);

            if file_type.is_dir() {
                self.visit_dir(&path, depth + 1, state);
            } else if self.wants_content(&path) {
                match read_prefix(&path, self.config.content_max_bytes) {
                    Ok(text) => self.tokenizer.count_into(&text, &mut local),
                    Err(err) => skip(state, &path, &err),
                }
            }

            for (term, count) in local {
                *state.counts.entry(term).or_insert(0) += count;
            }
        });
    }

    fn wants_content(&self, path: &Path) -> bool {
        if !self.config.content_scan || self.config.content_max_bytes == 0 {
            return false;
        }
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.config.content_extensions.iter().any(|e| *e == ext))
    }
}

fn skip(state: &WalkState, path: &Path, err: &io::Error) {
    warn!("Skipping {}: {}", path.display(), err);
    state.skipped.fetch_add(1, Ordering::Relaxed);
}

/// Read at most `cap` bytes of a file as lossy UTF-8.
fn read_prefix(path: &Path, cap: u64) -> io::Result<String> {
    let mut buf = Vec::new();
    File::open(path)?.take(cap).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

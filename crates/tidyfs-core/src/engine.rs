use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::analysis::{compute_insights, Insight};
use crate::config::{AppConfig, RefreshPolicy};
use crate::error::Error;
use crate::insight_cache::{InsightCache, InsightSnapshot};
use crate::listing::{self, DirEntryInfo};
use crate::locks::PathLocks;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::remediation::archive::Archiver;
use crate::remediation::{
    RemediationAction, RemediationExecutor, RemediationRequest, RemediationResult,
};
use crate::scanner::{TermExtractor, TermVector};
use crate::storage::Database;

/// Ties extraction, the index store, similarity, remediation and the insight cache together.
///
/// Safe to share across threads behind an `Arc`. Scans and listings take a read lock on
/// their path, remediations take write locks on every operand. Similarity passes are
/// excluded from the span between a remediation's first filesystem change and the end of
/// its index reconciliation.
pub struct OverlapEngine {
    config: AppConfig,
    db: Mutex<Database>,
    extractor: TermExtractor,
    executor: RemediationExecutor,
    cache: InsightCache,
    snapshot: RwLock<InsightSnapshot>,
    dirty: AtomicBool,
    locks: PathLocks,
    /// Held for writing by a remediation, for reading by a similarity pass.
    remediation_gate: RwLock<()>,
}

#[derive(Debug)]
pub struct ScanSummary {
    pub path: PathBuf,
    pub distinct_terms: usize,
    pub total_occurrences: u64,
    pub entries_seen: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl OverlapEngine {
    /// Open the index at `config.db_path` and load the last insight snapshot.
    pub fn open(config: AppConfig) -> Result<Self, Error> {
        let db = Database::open(&config.db_path)?;
        info!("Opened index store at {}", config.db_path.display());
        Ok(Self::with_database(config, db))
    }

    /// Same as [`OverlapEngine::open`] but with a throwaway in-memory index.
    pub fn open_in_memory(config: AppConfig) -> Result<Self, Error> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_database(config, db))
    }

    fn with_database(config: AppConfig, db: Database) -> Self {
        let cache = InsightCache::new(&config.insights_path);
        let snapshot = cache.load();
        let executor = RemediationExecutor::new(
            &config.archive_dir,
            config.remediation.conflict_policy,
        );
        Self {
            extractor: TermExtractor::new(config.extractor.clone()),
            executor,
            cache,
            snapshot: RwLock::new(snapshot),
            dirty: AtomicBool::new(false),
            locks: PathLocks::new(),
            remediation_gate: RwLock::new(()),
            db: Mutex::new(db),
            config,
        }
    }

    pub fn with_archiver(mut self, archiver: Box<dyn Archiver>) -> Self {
        self.executor = self.executor.with_archiver(archiver);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, Error> {
        self.db
            .lock()
            .map_err(|e| Error::Lock(format!("Failed to lock index store: {}", e)))
    }

    /// Extract `path`'s terms and replace its entry in the index.
    pub fn scan(&self, path: &Path, reporter: &dyn ProgressReporter) -> Result<ScanSummary, Error> {
        let root = fs::canonicalize(path).map_err(|source| Error::Scan {
            path: path.to_path_buf(),
            source,
        })?;
        let summary = {
            let _guard = self.locks.read(&root)?;
            self.scan_unlocked(&root, reporter)?
        };
        self.after_change(reporter)?;
        Ok(summary)
    }

    /// Caller holds a lock covering `root`, which is already canonical.
    fn scan_unlocked(
        &self,
        root: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary, Error> {
        let outcome = self.extractor.extract(root, reporter)?;
        let key = root.to_string_lossy();
        let path_id = self.db()?.upsert_path_terms(&key, &outcome.terms)?;
        self.dirty.store(true, Ordering::SeqCst);
        debug!("Indexed {} as path id {}", key, path_id);

        Ok(ScanSummary {
            path: outcome.root,
            distinct_terms: outcome.terms.len(),
            total_occurrences: outcome.terms.values().sum(),
            entries_seen: outcome.entries_seen,
            skipped: outcome.skipped,
            duration: outcome.duration,
        })
    }

    fn after_change(&self, reporter: &dyn ProgressReporter) -> Result<(), Error> {
        if self.config.similarity.refresh == RefreshPolicy::AfterUpsert {
            self.refresh_insights(reporter)?;
        }
        Ok(())
    }

    /// Current insights. Under the lazy policy a stale list is recomputed first.
    pub fn insights(&self) -> Result<Vec<Insight>, Error> {
        if self.config.similarity.refresh == RefreshPolicy::Lazy
            && self.dirty.load(Ordering::SeqCst)
        {
            return self.refresh_insights(&SilentReporter);
        }
        Ok(self.snapshot()?.insights)
    }

    pub fn snapshot(&self) -> Result<InsightSnapshot, Error> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|e| Error::Lock(format!("Failed to read insight snapshot: {}", e)))
    }

    /// Whether the index changed since insights were last computed.
    pub fn is_stale(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Recompute insights from the index and persist them.
    pub fn refresh_insights(&self, reporter: &dyn ProgressReporter) -> Result<Vec<Insight>, Error> {
        let insights = {
            let _gate = self
                .remediation_gate
                .read()
                .map_err(|e| Error::Lock(format!("Failed to wait for remediation: {}", e)))?;
            let db = self.db()?;
            self.dirty.store(false, Ordering::SeqCst);
            compute_insights(&db, &self.config.similarity, reporter).inspect_err(|_| {
                self.dirty.store(true, Ordering::SeqCst);
            })?
        };
        let snapshot = InsightSnapshot::new(insights.clone());
        if let Err(e) = self.cache.store(&snapshot) {
            warn!(
                "Insights computed but not persisted to {}: {}",
                self.cache.path().display(),
                e
            );
        }
        *self
            .snapshot
            .write()
            .map_err(|e| Error::Lock(format!("Failed to replace insight snapshot: {}", e)))? =
            snapshot;
        Ok(insights)
    }

    /// Run a merge or archive, then bring the index in line with what moved.
    ///
    /// Remediation failures land in the returned result. `Err` means the engine itself
    /// could not do its part (locks, index store); once the filesystem was touched that
    /// error is [`Error::IndexOutOfSync`] and still carries the result.
    pub fn remediate(&self, request: RemediationRequest) -> Result<RemediationResult, Error> {
        let lock_paths: Vec<PathBuf> = request
            .action
            .operands()
            .into_iter()
            .map(|p| fs::canonicalize(&p).unwrap_or(p))
            .collect();
        let lock_refs: Vec<&Path> = lock_paths.iter().map(PathBuf::as_path).collect();

        let result = {
            let _guard = self.locks.write(&lock_refs)?;
            let _gate = self
                .remediation_gate
                .write()
                .map_err(|e| Error::Lock(format!("Failed to exclude similarity passes: {}", e)))?;
            let result = self.executor.execute(&request);
            if let Err(e) = self.reconcile_index(&result) {
                self.dirty.store(true, Ordering::SeqCst);
                error!(
                    "{} applied but the index was not updated ({}): {}",
                    result.operation,
                    result.message(),
                    e
                );
                return Err(Error::IndexOutOfSync {
                    result: Box::new(result),
                    source: Box::new(e),
                });
            }
            result
        };
        if let Err(e) = self.after_change(&SilentReporter) {
            warn!("Insights left stale after {}: {}", result.operation, e);
        }
        Ok(result)
    }

    /// Parse a raw `(action, path_a, path_b)` triple and run it.
    pub fn remediate_action(
        &self,
        action: &str,
        path_a: Option<&str>,
        path_b: Option<&str>,
    ) -> Result<RemediationResult, Error> {
        let action = RemediationAction::parse(action, path_a, path_b)?;
        self.remediate(action.into())
    }

    /// Run `request` on its own thread.
    pub fn spawn_remediation(
        self: &Arc<Self>,
        request: RemediationRequest,
    ) -> std::io::Result<JoinHandle<Result<RemediationResult, Error>>> {
        let engine = Arc::clone(self);
        thread::Builder::new()
            .name(format!("remediate-{}", request.action.operation()))
            .spawn(move || engine.remediate(request))
    }

    /// Drop index entries at or under removed paths and rescan modified ones that were indexed.
    fn reconcile_index(&self, result: &RemediationResult) -> Result<(), Error> {
        if result.removed.is_empty() && result.modified.is_empty() {
            return Ok(());
        }

        let mut rescan = Vec::new();
        {
            let db = self.db()?;
            for path in &result.removed {
                let dropped = db.remove_subtree(&path.to_string_lossy())?;
                if !dropped.is_empty() {
                    debug!("Dropped {} index entries under {}", dropped.len(), path.display());
                }
            }
            for path in &result.modified {
                if db.get_path(&path.to_string_lossy())?.is_some() {
                    rescan.push(path.clone());
                }
            }
        }
        self.dirty.store(true, Ordering::SeqCst);

        if !self.config.remediation.rescan_after_merge {
            return Ok(());
        }
        for path in rescan {
            // The write lock taken by remediate already covers every modified path
            match self.scan_unlocked(&path, &SilentReporter) {
                Ok(summary) => debug!(
                    "Rescanned {}: {} distinct terms",
                    path.display(),
                    summary.distinct_terms
                ),
                Err(Error::Storage(e)) => return Err(Error::Storage(e)),
                Err(e) => {
                    warn!("Rescan of {} failed, dropping it from the index: {}", path.display(), e);
                    self.db()?.remove_path(&path.to_string_lossy())?;
                }
            }
        }
        Ok(())
    }

    /// Entries of `path`, read while no remediation holds it.
    pub fn list_directory(&self, path: &Path) -> Result<Vec<DirEntryInfo>, Error> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let _guard = self.locks.read(&canonical)?;
        listing::list_directory(path)
    }

    pub fn indexed_paths(&self) -> Result<Vec<String>, Error> {
        Ok(self.db()?.all_paths()?)
    }

    /// Stored term vector for `path`; empty if it was never scanned.
    pub fn terms_for(&self, path: &Path) -> Result<TermVector, Error> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(self.db()?.terms_for(&key.to_string_lossy())?)
    }

    /// Indexed paths containing `term`, with its frequency in each.
    pub fn paths_for(&self, term: &str) -> Result<Vec<(String, u64)>, Error> {
        Ok(self.db()?.paths_for(&term.to_lowercase())?)
    }

    /// Forget `path` without touching the filesystem.
    pub fn forget(&self, path: &Path) -> Result<bool, Error> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let removed = self.db()?.remove_path(&key.to_string_lossy())?;
        if removed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(removed)
    }

    /// Empty the index and the insight cache.
    pub fn truncate(&self) -> Result<(), Error> {
        self.db()?.truncate_all()?;
        self.dirty.store(false, Ordering::SeqCst);
        let empty = InsightSnapshot::new(Vec::new());
        self.cache.store(&empty)?;
        *self
            .snapshot
            .write()
            .map_err(|e| Error::Lock(format!("Failed to replace insight snapshot: {}", e)))? =
            empty;
        info!("Index store and insight cache truncated");
        Ok(())
    }
}

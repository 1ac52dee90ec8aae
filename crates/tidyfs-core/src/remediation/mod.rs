//! Merge and archive actions against indexed paths.
//!
//! A request moves through `Requested → Validating → Executing → {Succeeded, Failed}`.
//! Validation never touches the filesystem beyond reads; once executing, an action runs
//! to completion or stops and reports what it did. Nothing is rolled back or retried.

pub mod archive;
pub mod executor;
pub mod merge;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

pub use archive::{ArchiveManifest, Archiver, ZipArchiver};
pub use executor::RemediationExecutor;

/// What to do when an entry from the merge source already exists in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Move the entry under the first free `name_N` instead.
    #[default]
    Rename,
    /// Leave the entry in the source, which is then kept.
    Skip,
    /// Reject the whole merge before anything moves.
    Fail,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(ConflictPolicy::Rename),
            "skip" => Ok(ConflictPolicy::Skip),
            "fail" => Ok(ConflictPolicy::Fail),
            other => Err(format!(
                "unknown conflict policy '{}' (expected rename, skip or fail)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Merge,
    Archive,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Merge => write!(f, "merge"),
            Operation::Archive => write!(f, "archive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationAction {
    /// Move every direct child of `source` into `destination`, then remove `source`.
    Merge {
        destination: PathBuf,
        source: PathBuf,
    },
    /// Compress `target` into the archive directory, then remove it.
    Archive { target: PathBuf },
}

impl RemediationAction {
    /// Build an action from the UI's `(action, path_a, path_b)` triple.
    ///
    /// `merge` folds `path_b` into `path_a`. `archive` targets `path_b` when given,
    /// otherwise `path_a`. Empty strings count as absent.
    pub fn parse(
        action: &str,
        path_a: Option<&str>,
        path_b: Option<&str>,
    ) -> Result<Self, RemediationError> {
        let path_a = path_a.map(str::trim).filter(|p| !p.is_empty());
        let path_b = path_b.map(str::trim).filter(|p| !p.is_empty());
        let given: Vec<PathBuf> = path_a.iter().chain(path_b.iter()).map(PathBuf::from).collect();

        match action.trim().to_ascii_lowercase().as_str() {
            "merge" => match (path_a, path_b) {
                (Some(a), Some(b)) => Ok(RemediationAction::Merge {
                    destination: PathBuf::from(a),
                    source: PathBuf::from(b),
                }),
                _ => Err(RemediationError::InvalidOperands {
                    operation: Operation::Merge,
                    operands: given,
                    cause: "merge needs two paths".to_string(),
                }),
            },
            "archive" => match path_b.or(path_a) {
                Some(target) => Ok(RemediationAction::Archive {
                    target: PathBuf::from(target),
                }),
                None => Err(RemediationError::InvalidOperands {
                    operation: Operation::Archive,
                    operands: given,
                    cause: "archive needs a target path".to_string(),
                }),
            },
            other => Err(RemediationError::InvalidOperands {
                operation: Operation::Merge,
                operands: given,
                cause: format!("unknown action '{}' (expected merge or archive)", other),
            }),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            RemediationAction::Merge { .. } => Operation::Merge,
            RemediationAction::Archive { .. } => Operation::Archive,
        }
    }

    pub fn operands(&self) -> Vec<PathBuf> {
        match self {
            RemediationAction::Merge {
                destination,
                source,
            } => vec![destination.clone(), source.clone()],
            RemediationAction::Archive { target } => vec![target.clone()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationRequest {
    pub action: RemediationAction,
    /// Overrides the configured conflict policy for this merge.
    pub conflict_policy: Option<ConflictPolicy>,
}

impl RemediationRequest {
    pub fn merge(destination: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            action: RemediationAction::Merge {
                destination: destination.into(),
                source: source.into(),
            },
            conflict_policy: None,
        }
    }

    pub fn archive(target: impl Into<PathBuf>) -> Self {
        Self {
            action: RemediationAction::Archive {
                target: target.into(),
            },
            conflict_policy: None,
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }
}

impl From<RemediationAction> for RemediationRequest {
    fn from(action: RemediationAction) -> Self {
        Self {
            action,
            conflict_policy: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationState {
    Requested,
    Validating,
    Executing,
    Succeeded,
    Failed,
}

/// What happened to one direct child of the merge source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildStatus {
    Moved { to: PathBuf },
    Renamed { to: PathBuf },
    Skipped,
    Failed { cause: String },
    /// Not attempted because an earlier move failed.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutcome {
    pub source: PathBuf,
    pub status: ChildStatus,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemediationError {
    #[error("{operation} rejected for {}: {cause}", join_paths(.operands))]
    InvalidOperands {
        operation: Operation,
        operands: Vec<PathBuf>,
        cause: String,
    },

    #[error(
        "merge of {} stopped after {moved} of {total} entries; '{}' failed: {cause}",
        join_paths(.operands),
        .failed_entry.display()
    )]
    PartialMergeFailure {
        operands: Vec<PathBuf>,
        moved: usize,
        total: usize,
        failed_entry: PathBuf,
        cause: String,
    },

    #[error(
        "archive of '{}' to '{}' could not be verified, target left in place: {cause}",
        .target.display(),
        .archive.display()
    )]
    ArchiveVerificationFailure {
        target: PathBuf,
        archive: PathBuf,
        cause: String,
    },

    #[error("{operation} of {} finished but removing '{}' failed: {cause}", join_paths(.operands), .path.display())]
    RemovalFailure {
        operation: Operation,
        operands: Vec<PathBuf>,
        path: PathBuf,
        cause: String,
    },
}

impl RemediationError {
    pub fn operation(&self) -> Operation {
        match self {
            RemediationError::InvalidOperands { operation, .. }
            | RemediationError::RemovalFailure { operation, .. } => *operation,
            RemediationError::PartialMergeFailure { .. } => Operation::Merge,
            RemediationError::ArchiveVerificationFailure { .. } => Operation::Archive,
        }
    }

    pub fn operands(&self) -> Vec<PathBuf> {
        match self {
            RemediationError::InvalidOperands { operands, .. }
            | RemediationError::PartialMergeFailure { operands, .. }
            | RemediationError::RemovalFailure { operands, .. } => operands.clone(),
            RemediationError::ArchiveVerificationFailure { target, .. } => vec![target.clone()],
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("'{}'", p.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of one remediation request, successful or not.
#[derive(Debug, Clone)]
pub struct RemediationResult {
    pub operation: Operation,
    pub operands: Vec<PathBuf>,
    pub state: RemediationState,
    /// Per-child results of a merge, in the order they were attempted.
    pub children: Vec<ChildOutcome>,
    pub archive_path: Option<PathBuf>,
    /// Paths that no longer exist at their old location.
    pub removed: Vec<PathBuf>,
    /// Paths whose contents changed in place.
    pub modified: Vec<PathBuf>,
    pub error: Option<RemediationError>,
}

impl RemediationResult {
    pub(crate) fn requested(operation: Operation, operands: Vec<PathBuf>) -> Self {
        Self {
            operation,
            operands,
            state: RemediationState::Requested,
            children: Vec::new(),
            archive_path: None,
            removed: Vec::new(),
            modified: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn advance(&mut self, next: RemediationState) {
        debug!("{} {:?} -> {:?}", self.operation, self.state, next);
        self.state = next;
    }

    pub(crate) fn fail(&mut self, error: RemediationError) {
        self.advance(RemediationState::Failed);
        self.error = Some(error);
    }

    pub fn is_success(&self) -> bool {
        self.state == RemediationState::Succeeded
    }

    pub fn moved_count(&self) -> usize {
        self.children
            .iter()
            .filter(|c| matches!(c.status, ChildStatus::Moved { .. } | ChildStatus::Renamed { .. }))
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Path> {
        self.children
            .iter()
            .filter(|c| c.status == ChildStatus::Skipped)
            .map(|c| c.source.as_path())
    }

    /// Human-readable summary for the UI.
    pub fn message(&self) -> String {
        if let Some(error) = &self.error {
            return error.to_string();
        }
        match self.operation {
            Operation::Merge => {
                let skipped = self.skipped().count();
                if skipped > 0 {
                    format!(
                        "Paths merged: {} entries moved, {} skipped and left in place.",
                        self.moved_count(),
                        skipped
                    )
                } else {
                    format!("Paths merged: {} entries moved.", self.moved_count())
                }
            }
            Operation::Archive => match &self.archive_path {
                Some(archive) => format!("Path archived to {}.", archive.display()),
                None => "Path archived.".to_string(),
            },
        }
    }

    /// Turn a failed result into its error, for callers that want `?`.
    pub fn into_result(mut self) -> Result<Self, RemediationError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

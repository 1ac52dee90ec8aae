use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::archive::{archive_path, Archiver, ZipArchiver};
use super::merge::{conflicting_names, merge_directories};
use super::{
    ConflictPolicy, RemediationAction, RemediationError, RemediationRequest,
    RemediationResult, RemediationState,
};

/// Applies merge and archive requests to the filesystem. Holds no persistent state.
pub struct RemediationExecutor {
    archive_dir: PathBuf,
    default_policy: ConflictPolicy,
    archiver: Box<dyn Archiver>,
}

impl RemediationExecutor {
    pub fn new(archive_dir: impl Into<PathBuf>, default_policy: ConflictPolicy) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            default_policy,
            archiver: Box::new(ZipArchiver),
        }
    }

    pub fn with_archiver(mut self, archiver: Box<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    /// Validate and run `request`. Failures are reported in the result, never panicked or retried.
    pub fn execute(&self, request: &RemediationRequest) -> RemediationResult {
        let action = &request.action;
        let mut result = RemediationResult::requested(action.operation(), action.operands());

        result.advance(RemediationState::Validating);
        let validated = match self.validate(request) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("Rejected {}: {}", action.operation(), e);
                result.fail(e);
                return result;
            }
        };
        result.operands = validated.operands();

        result.advance(RemediationState::Executing);
        let outcome = match &validated {
            RemediationAction::Merge {
                destination,
                source,
            } => merge_directories(
                destination,
                source,
                request.conflict_policy.unwrap_or(self.default_policy),
                &mut result,
            ),
            RemediationAction::Archive { target } => {
                archive_path(target, &self.archive_dir, self.archiver.as_ref(), &mut result)
            }
        };

        match outcome {
            Ok(()) => {
                result.advance(RemediationState::Succeeded);
                info!("{} succeeded: {}", result.operation, result.message());
            }
            Err(e) => {
                warn!("{} failed: {}", result.operation, e);
                result.fail(e);
            }
        }
        result
    }

    /// Check preconditions and resolve operands to canonical paths. Reads only.
    fn validate(
        &self,
        request: &RemediationRequest,
    ) -> Result<RemediationAction, RemediationError> {
        let operation = request.action.operation();
        let operands = request.action.operands();
        let invalid = |cause: String| RemediationError::InvalidOperands {
            operation,
            operands: operands.clone(),
            cause,
        };

        match &request.action {
            RemediationAction::Merge {
                destination,
                source,
            } => {
                let destination = canonical_dir(destination).map_err(&invalid)?;
                let source = canonical_dir(source).map_err(&invalid)?;
                if destination == source {
                    return Err(invalid("operands refer to the same directory".to_string()));
                }
                if destination.starts_with(&source) || source.starts_with(&destination) {
                    return Err(invalid("one operand is nested inside the other".to_string()));
                }

                let policy = request.conflict_policy.unwrap_or(self.default_policy);
                if policy == ConflictPolicy::Fail {
                    let conflicts = conflicting_names(&destination, &source)
                        .map_err(|e| invalid(format!("cannot list operands: {}", e)))?;
                    if !conflicts.is_empty() {
                        let names: Vec<String> = conflicts
                            .iter()
                            .map(|n| n.to_string_lossy().into_owned())
                            .collect();
                        return Err(invalid(format!(
                            "names already present in destination: {}",
                            names.join(", ")
                        )));
                    }
                }

                Ok(RemediationAction::Merge {
                    destination,
                    source,
                })
            }
            RemediationAction::Archive { target } => {
                let target = fs::canonicalize(target).map_err(|e| {
                    invalid(format!("'{}' does not exist: {}", target.display(), e))
                })?;
                if target.parent().is_none() {
                    return Err(invalid("refusing to archive a filesystem root".to_string()));
                }
                let archive_dir = absolute_lexical(&self.archive_dir)
                    .map_err(|e| invalid(format!("cannot resolve archive directory: {}", e)))?;
                if archive_dir.starts_with(&target) {
                    return Err(invalid(format!(
                        "archive directory '{}' lies inside the target",
                        archive_dir.display()
                    )));
                }
                Ok(RemediationAction::Archive { target })
            }
        }
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf, String> {
    let canonical = fs::canonicalize(path)
        .map_err(|e| format!("'{}' does not exist: {}", path.display(), e))?;
    if !canonical.is_dir() {
        return Err(format!("'{}' is not a directory", path.display()));
    }
    Ok(canonical)
}

/// Canonical form of `path` if it exists, else its absolute form.
fn absolute_lexical(path: &Path) -> std::io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

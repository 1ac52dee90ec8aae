use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::{
    ChildOutcome, ChildStatus, ConflictPolicy, Operation, RemediationError, RemediationResult,
};

/// Whether anything, including a dangling symlink, occupies `path`.
fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Direct children of `dir`, sorted by name.
pub(crate) fn child_names(dir: &Path) -> io::Result<Vec<OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

/// Names present in both `destination` and `source`.
pub(crate) fn conflicting_names(destination: &Path, source: &Path) -> io::Result<Vec<OsString>> {
    Ok(child_names(source)?
        .into_iter()
        .filter(|name| occupied(&destination.join(name)))
        .collect())
}

/// Longest file name most filesystems accept, in bytes.
const MAX_NAME_BYTES: usize = 255;

/// `stem` cut so that `reserved` more bytes still fit in one name. Non-UTF-8 stems are kept whole.
fn fit_stem(stem: &OsStr, reserved: usize) -> OsString {
    let budget = MAX_NAME_BYTES.saturating_sub(reserved);
    match stem.to_str() {
        Some(s) if s.len() > budget => {
            let mut end = budget;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            OsString::from(&s[..end])
        }
        _ => stem.to_os_string(),
    }
}

/// First free `stem_N[.ext]` inside `dir`, N counting from 1. Directories keep their full name as stem.
///
/// The stem is shortened when the suffix would push the name past 255 bytes.
pub fn free_name(dir: &Path, name: &OsStr, is_dir: bool) -> PathBuf {
    let as_path = Path::new(name);
    let (stem, extension) = if is_dir {
        (name, None)
    } else {
        (as_path.file_stem().unwrap_or(name), as_path.extension())
    };
    let ext_bytes = extension.map_or(0, |ext| ext.len() + 1);

    let mut n: u64 = 1;
    loop {
        let suffix = format!("_{}", n);
        let mut candidate = fit_stem(stem, suffix.len() + ext_bytes);
        candidate.push(&suffix);
        if let Some(ext) = extension {
            candidate.push(".");
            candidate.push(ext);
        }
        let path = dir.join(&candidate);
        if !occupied(&path) {
            return path;
        }
        n += 1;
    }
}

/// Move every direct child of `source` into `destination`, then remove `source`.
///
/// Stops at the first failed move: children already moved stay in `destination`,
/// the rest stay in `source`, and `source` is kept.
pub(crate) fn merge_directories(
    destination: &Path,
    source: &Path,
    policy: ConflictPolicy,
    result: &mut RemediationResult,
) -> Result<(), RemediationError> {
    merge_with(destination, source, policy, result, |from, to| fs::rename(from, to))
}

fn merge_with<F>(
    destination: &Path,
    source: &Path,
    policy: ConflictPolicy,
    result: &mut RemediationResult,
    mut move_entry: F,
) -> Result<(), RemediationError>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let operands = vec![destination.to_path_buf(), source.to_path_buf()];
    let names = child_names(source).map_err(|e| RemediationError::PartialMergeFailure {
        operands: operands.clone(),
        moved: 0,
        total: 0,
        failed_entry: source.to_path_buf(),
        cause: format!("cannot list source: {}", e),
    })?;

    result.children = names
        .iter()
        .map(|name| ChildOutcome {
            source: source.join(name),
            status: ChildStatus::Pending,
        })
        .collect();
    result.modified.push(destination.to_path_buf());

    let total = names.len();
    let mut moved = 0;
    for (idx, name) in names.iter().enumerate() {
        let from = source.join(name);
        let mut to = destination.join(name);
        let mut renamed = false;

        if occupied(&to) {
            match policy {
                ConflictPolicy::Rename => {
                    let is_dir = fs::symlink_metadata(&from)
                        .map(|m| m.is_dir())
                        .unwrap_or(false);
                    to = free_name(destination, name, is_dir);
                    renamed = true;
                }
                ConflictPolicy::Skip => {
                    debug!("Skipping {}: name taken in {}", from.display(), destination.display());
                    result.children[idx].status = ChildStatus::Skipped;
                    continue;
                }
                ConflictPolicy::Fail => {
                    let cause = format!("'{}' already exists", to.display());
                    result.children[idx].status = ChildStatus::Failed {
                        cause: cause.clone(),
                    };
                    if moved > 0 {
                        result.modified.push(source.to_path_buf());
                    }
                    return Err(RemediationError::PartialMergeFailure {
                        operands,
                        moved,
                        total,
                        failed_entry: from,
                        cause,
                    });
                }
            }
        }

        match move_entry(&from, &to) {
            Ok(()) => {
                debug!("Moved {} -> {}", from.display(), to.display());
                result.removed.push(from);
                result.children[idx].status = if renamed {
                    ChildStatus::Renamed { to }
                } else {
                    ChildStatus::Moved { to }
                };
                moved += 1;
            }
            Err(e) => {
                error!("Failed to move {} -> {}: {}", from.display(), to.display(), e);
                result.children[idx].status = ChildStatus::Failed {
                    cause: e.to_string(),
                };
                if moved > 0 {
                    result.modified.push(source.to_path_buf());
                }
                return Err(RemediationError::PartialMergeFailure {
                    operands,
                    moved,
                    total,
                    failed_entry: from,
                    cause: e.to_string(),
                });
            }
        }
    }

    let skipped = result.skipped().count();
    if skipped > 0 {
        warn!(
            "Kept {}: {} conflicting entries skipped",
            source.display(),
            skipped
        );
        result.modified.push(source.to_path_buf());
    } else {
        // remove_dir refuses a non-empty directory, so anything that appeared meanwhile survives
        fs::remove_dir(source).map_err(|e| RemediationError::RemovalFailure {
            operation: Operation::Merge,
            operands: operands.clone(),
            path: source.to_path_buf(),
            cause: e.to_string(),
        })?;
        result.removed.push(source.to_path_buf());
    }

    info!(
        "Merged {} into {}: {} of {} entries moved",
        source.display(),
        destination.display(),
        moved,
        total
    );
    Ok(())
}

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{Operation, RemediationError, RemediationResult};

/// What an [`Archiver`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveManifest {
    /// Entries in the archive, directories included.
    pub entries: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Writes a compressed copy of a path.
///
/// The executor only removes the source after `write` returned, the artifact is
/// non-empty, and `verify` accepted it.
pub trait Archiver: Send + Sync {
    fn extension(&self) -> &str;

    /// Write `source` (file or directory) into `dest`, a fresh empty file owned by this call.
    fn write(&self, source: &Path, dest: File) -> io::Result<ArchiveManifest>;

    /// Re-read `dest` and check it matches `manifest`.
    fn verify(&self, _dest: &Path, _manifest: &ArchiveManifest) -> io::Result<()> {
        Ok(())
    }
}

/// Deflate-compressed zip archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiver;

impl Archiver for ZipArchiver {
    fn extension(&self) -> &str {
        "zip"
    }

    fn write(&self, source: &Path, dest: File) -> io::Result<ArchiveManifest> {
        let mut zip = ZipWriter::new(dest);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut manifest = ArchiveManifest::default();

        let metadata = fs::symlink_metadata(source)?;
        if metadata.is_file() {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            zip.start_file(name, options).map_err(io::Error::other)?;
            manifest.bytes += io::copy(&mut File::open(source)?, &mut zip)?;
            manifest.entries += 1;
            manifest.files += 1;
        } else {
            for entry in WalkDir::new(source)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry.map_err(io::Error::other)?;
                let relative = entry
                    .path()
                    .strip_prefix(source)
                    .map_err(io::Error::other)?;
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                let file_type = entry.file_type();
                if file_type.is_dir() {
                    zip.add_directory(name, options).map_err(io::Error::other)?;
                } else if file_type.is_symlink() {
                    let target = fs::read_link(entry.path())?;
                    zip.add_symlink(name, target.to_string_lossy().into_owned(), options)
                        .map_err(io::Error::other)?;
                } else {
                    zip.start_file(name, options).map_err(io::Error::other)?;
                    manifest.bytes += io::copy(&mut File::open(entry.path())?, &mut zip)?;
                    manifest.files += 1;
                }
                manifest.entries += 1;
            }
        }

        let file = zip.finish().map_err(io::Error::other)?;
        file.sync_all()?;
        Ok(manifest)
    }

    fn verify(&self, dest: &Path, manifest: &ArchiveManifest) -> io::Result<()> {
        let archive = ZipArchive::new(File::open(dest)?).map_err(io::Error::other)?;
        if archive.len() != manifest.entries {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "archive lists {} entries, expected {}",
                    archive.len(),
                    manifest.entries
                ),
            ));
        }
        Ok(())
    }
}

/// Create `<dir>/<base>_<stamp>.<ext>`, or the first free `_N` variant before the extension.
///
/// Each candidate is opened with `create_new`, so a name taken by a concurrent archive is
/// never reused or truncated.
pub fn create_archive_file(
    dir: &Path,
    base: &str,
    stamp: &str,
    extension: &str,
) -> io::Result<(PathBuf, File)> {
    let mut n: u64 = 0;
    loop {
        let name = if n == 0 {
            format!("{}_{}.{}", base, stamp, extension)
        } else {
            format!("{}_{}_{}.{}", base, stamp, n, extension)
        };
        let candidate = dir.join(name);
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

fn discard_artifact(path: &Path) {
    if fs::symlink_metadata(path).is_ok() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove unverified archive {}: {}", path.display(), e);
        }
    }
}

/// Write, verify, and only then remove `target`.
pub(crate) fn archive_path(
    target: &Path,
    archive_dir: &Path,
    archiver: &dyn Archiver,
    result: &mut RemediationResult,
) -> Result<(), RemediationError> {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    archive_with_stamp(target, archive_dir, &stamp, archiver, result)
}

fn archive_with_stamp(
    target: &Path,
    archive_dir: &Path,
    stamp: &str,
    archiver: &dyn Archiver,
    result: &mut RemediationResult,
) -> Result<(), RemediationError> {
    let verification_failure = |archive: &Path, cause: String| {
        RemediationError::ArchiveVerificationFailure {
            target: target.to_path_buf(),
            archive: archive.to_path_buf(),
            cause,
        }
    };

    fs::create_dir_all(archive_dir).map_err(|e| {
        verification_failure(archive_dir, format!("cannot create archive directory: {}", e))
    })?;

    let base = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let (dest, file) = create_archive_file(archive_dir, &base, stamp, archiver.extension())
        .map_err(|e| {
            verification_failure(archive_dir, format!("cannot create archive file: {}", e))
        })?;

    // From here on `dest` is ours, so discarding it cannot touch another archive
    let manifest = match archiver.write(target, file) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Archive write for {} failed: {}", target.display(), e);
            discard_artifact(&dest);
            return Err(verification_failure(&dest, format!("write failed: {}", e)));
        }
    };

    let size = match fs::metadata(&dest) {
        Ok(m) => m.len(),
        Err(e) => {
            return Err(verification_failure(&dest, format!("archive missing: {}", e)));
        }
    };
    if size == 0 {
        discard_artifact(&dest);
        return Err(verification_failure(&dest, "archive is empty".to_string()));
    }
    if let Err(e) = archiver.verify(&dest, &manifest) {
        discard_artifact(&dest);
        return Err(verification_failure(&dest, e.to_string()));
    }
    debug!(
        "Verified {} ({} entries, {} files, {} bytes in, {} bytes out)",
        dest.display(),
        manifest.entries,
        manifest.files,
        manifest.bytes,
        size
    );
    result.archive_path = Some(dest.clone());

    let removal = fs::symlink_metadata(target).and_then(|m| {
        if m.is_dir() {
            fs::remove_dir_all(target)
        } else {
            fs::remove_file(target)
        }
    });
    if let Err(e) = removal {
        // remove_dir_all may have deleted part of the tree before failing
        result.modified.push(target.to_path_buf());
        return Err(RemediationError::RemovalFailure {
            operation: Operation::Archive,
            operands: vec![target.to_path_buf()],
            path: target.to_path_buf(),
            cause: e.to_string(),
        });
    }
    result.removed.push(target.to_path_buf());

    info!("Archived {} to {}", target.display(), dest.display());
    Ok(())
}

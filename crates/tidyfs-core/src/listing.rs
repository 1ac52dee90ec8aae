use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Error;

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// `None` for directories.
    pub size_bytes: Option<u64>,
}

impl DirEntryInfo {
    /// `12.3KB` for files, `-` for directories.
    pub fn display_size(&self) -> String {
        match self.size_bytes {
            Some(bytes) => format!("{:.1}KB", bytes as f64 / 1024.0),
            None => "-".to_string(),
        }
    }
}

/// Direct entries of `dir`, hidden names skipped, directories first then by name.
pub fn list_directory(dir: &Path) -> Result<Vec<DirEntryInfo>, Error> {
    let entries = fs::read_dir(dir).map_err(|source| Error::Scan {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut items = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let is_dir = metadata.is_dir();
        items.push(DirEntryInfo {
            name,
            path,
            is_dir,
            size_bytes: (!is_dir).then(|| metadata.len()),
        });
    }

    items.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(items)
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::analysis::Insight;
use crate::error::Error;

/// The last computed insight list, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightSnapshot {
    pub computed_at: Option<DateTime<Utc>>,
    pub insights: Vec<Insight>,
}

impl InsightSnapshot {
    pub fn new(insights: Vec<Insight>) -> Self {
        Self {
            computed_at: Some(Utc::now()),
            insights,
        }
    }
}

/// JSON file holding the latest [`InsightSnapshot`], so insights survive restarts.
#[derive(Debug, Clone)]
pub struct InsightCache {
    path: PathBuf,
}

impl InsightCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable snapshot loads as empty; the next refresh rewrites it.
    pub fn load(&self) -> InsightSnapshot {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No insight snapshot at {}", self.path.display());
                return InsightSnapshot::default();
            }
            Err(e) => {
                warn!("Cannot read insight snapshot {}: {}", self.path.display(), e);
                return InsightSnapshot::default();
            }
        };
        match serde_json::from_slice::<InsightSnapshot>(&bytes) {
            Ok(snapshot) => {
                debug!(
                    "Loaded {} insights from {}",
                    snapshot.insights.len(),
                    self.path.display()
                );
                snapshot
            }
            Err(e) => {
                warn!("Ignoring corrupt insight snapshot {}: {}", self.path.display(), e);
                InsightSnapshot::default()
            }
        }
    }

    /// Replace the stored snapshot. Written to a sibling temp file, then renamed over.
    pub fn store(&self, snapshot: &InsightSnapshot) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| Error::Cache(format!("Serialize error: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::Io(io::Error::new(
                e.kind(),
                format!("Cannot replace {}: {}", self.path.display(), e),
            ))
        })?;
        debug!(
            "Stored {} insights to {}",
            snapshot.insights.len(),
            self.path.display()
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "insights.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

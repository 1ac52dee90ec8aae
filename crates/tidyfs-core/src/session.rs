use std::collections::VecDeque;
use std::path::{Path, PathBuf};

pub const DEFAULT_HISTORY_LEN: usize = 5;

/// Most-recently-used paths, newest first, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentPaths {
    capacity: usize,
    entries: VecDeque<PathBuf>,
}

impl RecentPaths {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Move `path` to the front, evicting the oldest entry past capacity.
    pub fn visit(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.entries.retain(|p| *p != path);
        self.entries.push_front(path);
        self.entries.truncate(self.capacity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecentPaths {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_LEN)
    }
}

/// Per-session browsing state, owned by whichever front end serves the session.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub current_root: Option<PathBuf>,
    pub history: RecentPaths,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the session connected to or explored `path`.
    pub fn enter(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.history.visit(path.clone());
        self.current_root = Some(path);
    }
}

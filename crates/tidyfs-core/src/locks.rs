use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use tracing::trace;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug)]
struct Hold {
    id: u64,
    path: PathBuf,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct Holds {
    next_id: u64,
    active: Vec<Hold>,
}

/// Reader/writer locks keyed by path.
///
/// Two holds conflict when one path equals or contains the other and at least one is a
/// write. A request for several paths is granted all at once or not at all.
#[derive(Debug, Default)]
pub struct PathLocks {
    holds: Mutex<Holds>,
    released: Condvar,
}

/// Releases its holds on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    ids: Vec<u64>,
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, path: &Path) -> Result<PathGuard<'_>, Error> {
        self.acquire(&[path], LockMode::Read)
    }

    pub fn write(&self, paths: &[&Path]) -> Result<PathGuard<'_>, Error> {
        self.acquire(paths, LockMode::Write)
    }

    /// Non-blocking variant of [`PathLocks::acquire`].
    pub fn try_acquire(
        &self,
        paths: &[&Path],
        mode: LockMode,
    ) -> Result<Option<PathGuard<'_>>, Error> {
        let mut holds = self
            .holds
            .lock()
            .map_err(|e| Error::Lock(format!("Failed to lock path registry: {}", e)))?;
        if Self::blocked(&holds, paths, mode) {
            return Ok(None);
        }
        Ok(Some(self.grant(&mut holds, paths, mode)))
    }

    /// Block until every path in `paths` can be held in `mode`.
    pub fn acquire(&self, paths: &[&Path], mode: LockMode) -> Result<PathGuard<'_>, Error> {
        let mut holds = self
            .holds
            .lock()
            .map_err(|e| Error::Lock(format!("Failed to lock path registry: {}", e)))?;
        while Self::blocked(&holds, paths, mode) {
            trace!("Waiting for {:?} lock on {:?}", mode, paths);
            holds = self
                .released
                .wait(holds)
                .map_err(|e| Error::Lock(format!("Failed to wait for path lock: {}", e)))?;
        }
        Ok(self.grant(&mut holds, paths, mode))
    }

    fn blocked(holds: &Holds, paths: &[&Path], mode: LockMode) -> bool {
        holds.active.iter().any(|hold| {
            (mode == LockMode::Write || hold.mode == LockMode::Write)
                && paths.iter().any(|p| overlaps(p, &hold.path))
        })
    }

    fn grant(&self, holds: &mut Holds, paths: &[&Path], mode: LockMode) -> PathGuard<'_> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            holds.next_id += 1;
            ids.push(holds.next_id);
            holds.active.push(Hold {
                id: holds.next_id,
                path: path.to_path_buf(),
                mode,
            });
        }
        PathGuard { locks: self, ids }
    }

    fn release(&self, ids: &[u64]) {
        // A poisoned registry still has to drop our holds or every waiter hangs
        let mut holds = match self.holds.lock() {
            Ok(holds) => holds,
            Err(poisoned) => poisoned.into_inner(),
        };
        holds.active.retain(|hold| !ids.contains(&hold.id));
        self.released.notify_all();
    }

    pub fn active_holds(&self) -> usize {
        match self.holds.lock() {
            Ok(holds) => holds.active.len(),
            Err(poisoned) => poisoned.into_inner().active.len(),
        }
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_readers_share() {
        let locks = PathLocks::new();
        let _a = locks.read(Path::new("/data/photos")).unwrap();
        let b = locks
            .try_acquire(&[Path::new("/data/photos")], LockMode::Read)
            .unwrap();
        assert!(b.is_some());
        assert_eq!(locks.active_holds(), 2);
    }

    #[test]
    fn test_write_excludes_ancestor_and_descendant() {
        let locks = PathLocks::new();
        let _w = locks.write(&[Path::new("/data/photos")]).unwrap();
        assert!(locks
            .try_acquire(&[Path::new("/data")], LockMode::Read)
            .unwrap()
            .is_none());
        assert!(locks
            .try_acquire(&[Path::new("/data/photos/2020")], LockMode::Read)
            .unwrap()
            .is_none());
        assert!(locks
            .try_acquire(&[Path::new("/data/photos-old")], LockMode::Write)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_multi_path_is_all_or_nothing() {
        let locks = PathLocks::new();
        let _r = locks.read(Path::new("/b")).unwrap();
        let attempt = locks
            .try_acquire(&[Path::new("/a"), Path::new("/b")], LockMode::Write)
            .unwrap();
        assert!(attempt.is_none());
        assert_eq!(locks.active_holds(), 1);
    }

    #[test]
    fn test_release_wakes_waiter() {
        let locks = Arc::new(PathLocks::new());
        let guard = locks.write(&[Path::new("/a")]).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _g = locks.read(Path::new("/a/sub")).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert_eq!(locks.active_holds(), 0);
    }
}

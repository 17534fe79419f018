//! Tracked repositories and their per-target lock

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A repository branch cloned locally and applied to this host
///
/// Several methods can share one target; each tracks its own tags.
/// The lock serialises ticks that touch the same clone.
#[derive(Debug)]
pub struct Target {
    name: String,
    url: String,
    branch: String,
    clone_dir: PathBuf,
    lock: Mutex<()>,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        branch: impl Into<String>,
        clone_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            branch: branch.into(),
            clone_dir: clone_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn clone_dir(&self) -> &Path {
        &self.clone_dir
    }

    /// Take the exclusive per-target lock
    ///
    /// A tick that panicked while holding the lock leaves the clone in
    /// the same state an interrupted process would, which the tags
    /// already recover from, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

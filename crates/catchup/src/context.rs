//! Apply context and cancellation

use crate::repo::Repository;
use crate::target::Target;
use crate::types::CommitId;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag that aborts ticks and not-yet-started apply tasks
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Context passed to every method apply call
pub struct ApplyContext<'a> {
    /// Target whose clone holds the change's content
    pub target: &'a Target,
    /// Commit the changeset starts from
    pub from: CommitId,
    /// Commit the changeset moves the host to
    pub to: CommitId,
    /// Tick-scoped cancellation; long-running methods should poll it
    pub cancel: &'a CancelToken,
    source: Option<(&'a dyn Repository, &'a Path)>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(target: &'a Target, from: CommitId, to: CommitId, cancel: &'a CancelToken) -> Self {
        Self {
            target,
            from,
            to,
            cancel,
            source: None,
        }
    }

    /// Let methods read files as they were at `from`, relative to `subpath`
    pub fn with_repository(mut self, repo: &'a dyn Repository, subpath: &'a Path) -> Self {
        self.source = Some((repo, subpath));
        self
    }

    /// Content of `name` at `from`
    ///
    /// `None` when `from` is the empty tree, the file did not exist there,
    /// or no repository was attached to this context.
    pub fn read_previous(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.source {
            Some((repo, subpath)) if !self.from.is_zero() => {
                repo.read_file(self.target, self.from, &subpath.join(name))
            }
            _ => Ok(None),
        }
    }

    /// Bail out of a method early if the tick was cancelled
    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("cancelled while applying to {}", self.target.name());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRepo;

    fn target() -> Target {
        Target::new("infra", "https://example.com/infra.git", "main", "/tmp/infra")
    }

    #[test]
    fn read_previous_resolves_under_subpath_at_from() {
        let repo = MemoryRepo::new();
        let b = repo.commit(&[("units/web.json", "old")]);
        let c = repo.commit(&[("units/web.json", "new")]);
        let target = target();
        let cancel = CancelToken::new();

        let ctx = ApplyContext::new(&target, b, c, &cancel)
            .with_repository(&repo, Path::new("units"));

        assert_eq!(ctx.read_previous("web.json").unwrap(), Some(b"old".to_vec()));
        assert_eq!(ctx.read_previous("gone.json").unwrap(), None);
    }

    #[test]
    fn read_previous_is_empty_without_history() {
        let repo = MemoryRepo::new();
        let b = repo.commit(&[("units/web.json", "new")]);
        let target = target();
        let cancel = CancelToken::new();

        let from_zero = ApplyContext::new(&target, CommitId::ZERO, b, &cancel)
            .with_repository(&repo, Path::new("units"));
        assert_eq!(from_zero.read_previous("web.json").unwrap(), None);

        let detached = ApplyContext::new(&target, b, b, &cancel);
        assert_eq!(detached.read_previous("web.json").unwrap(), None);
    }
}

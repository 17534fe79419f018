//! Durable progress markers stored as lightweight tags
//!
//! Each (target, method) pair owns two tags in the clone:
//! - `current-<method>`: last commit whose whole changeset was applied
//! - `progress-<method>`: commit whose changeset started applying
//!
//! A missing tag is a valid state ("never applied", "nothing in flight").
//! Read-modify-write of a tag is not atomic; callers hold the target lock.

use crate::error::{CatchUpError, Result};
use crate::repo::{Repository, TagError};
use crate::target::Target;
use crate::types::CommitId;
use std::fmt;

/// Which of the two markers a tag is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Current,
    Progress,
}

impl TagKind {
    /// Tag name for a method, e.g. `current-systemd`
    pub fn name(self, method: &str) -> String {
        format!("{self}-{method}")
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Progress => f.write_str("progress"),
        }
    }
}

/// Both markers for one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagSnapshot {
    pub current: Option<CommitId>,
    pub progress: Option<CommitId>,
}

impl TagSnapshot {
    /// A changeset began applying and was never confirmed
    pub fn is_interrupted(&self) -> bool {
        self.progress.is_some() && self.progress != self.current
    }
}

/// Tag bookkeeping for one target
pub struct TagStore<'a, R: Repository + ?Sized> {
    repo: &'a R,
    target: &'a Target,
}

impl<'a, R: Repository + ?Sized> TagStore<'a, R> {
    pub fn new(repo: &'a R, target: &'a Target) -> Self {
        Self { repo, target }
    }

    pub fn read(&self, kind: TagKind, method: &str) -> Result<Option<CommitId>> {
        let name = kind.name(method);
        self.repo
            .read_tag(self.target, &name)
            .map_err(|source| self.repository_error("tag read", source))
    }

    /// Read a tag, mapping absence to the zero commit
    pub fn read_or_zero(&self, kind: TagKind, method: &str) -> Result<CommitId> {
        Ok(self.read(kind, method)?.unwrap_or(CommitId::ZERO))
    }

    pub fn snapshot(&self, method: &str) -> Result<TagSnapshot> {
        Ok(TagSnapshot {
            current: self.read(TagKind::Current, method)?,
            progress: self.read(TagKind::Progress, method)?,
        })
    }

    /// Point a tag at `commit`, replacing any existing tag of that name
    pub fn write(&self, kind: TagKind, method: &str, commit: CommitId) -> Result<()> {
        let name = kind.name(method);
        self.delete_named(&name)?;

        match self.repo.create_tag(self.target, &name, commit) {
            Ok(()) | Err(TagError::AlreadyExists(_)) => {
                log::debug!("{}: {} -> {}", self.target.name(), name, commit.short());
                Ok(())
            }
            Err(err) => Err(self.repository_error("tag create", err.into())),
        }
    }

    pub fn delete(&self, kind: TagKind, method: &str) -> Result<()> {
        self.delete_named(&kind.name(method))
    }

    fn delete_named(&self, name: &str) -> Result<()> {
        match self.repo.delete_tag(self.target, name) {
            Ok(()) | Err(TagError::NotFound(_)) => Ok(()),
            Err(err) => Err(self.repository_error("tag delete", err.into())),
        }
    }

    fn repository_error(&self, op: &'static str, source: anyhow::Error) -> CatchUpError {
        CatchUpError::Repository {
            target: self.target.name().to_string(),
            op,
            source,
        }
    }
}

//! Repository accessor the core drives
//!
//! The core never talks to git directly. Fetching, tag storage and tree
//! diffs are provided by an implementation of [`Repository`].

use crate::change::Change;
use crate::target::Target;
use crate::types::CommitId;
use std::path::Path;
use thiserror::Error;

/// Failure of a tag operation
///
/// The two named variants let the tag store treat "already there" and
/// "already gone" as success.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag {0} already exists")]
    AlreadyExists(String),

    #[error("tag {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

/// Access to a target's local clone
pub trait Repository: Send + Sync {
    /// Fetch the target branch, check it out and return its head
    fn fetch_latest(&self, target: &Target) -> anyhow::Result<CommitId>;

    /// Commit a lightweight tag points at, `None` if the tag does not exist
    fn read_tag(&self, target: &Target, name: &str) -> anyhow::Result<Option<CommitId>>;

    /// Create a lightweight tag; must not overwrite an existing one
    fn create_tag(&self, target: &Target, name: &str, commit: CommitId) -> Result<(), TagError>;

    fn delete_tag(&self, target: &Target, name: &str) -> Result<(), TagError>;

    /// Entry-level differences between the subtrees at `subpath`
    ///
    /// [`CommitId::ZERO`] resolves to the empty tree on either side.
    /// Names in the returned changes are relative to `subpath`.
    fn diff(
        &self,
        target: &Target,
        subpath: &Path,
        from: CommitId,
        to: CommitId,
    ) -> anyhow::Result<Vec<Change>>;

    /// Blob content at `path` (repository-relative) in `commit`
    ///
    /// `None` when the path does not exist in that commit or is not a file.
    fn read_file(
        &self,
        target: &Target,
        commit: CommitId,
        path: &Path,
    ) -> anyhow::Result<Option<Vec<u8>>>;
}

//! Changes between two trees and the changesets built from them
//!
//! A [`Change`] is identified by its content (from-name, to-name), so a
//! [`Changeset`] is an ordinary ordered map rather than anything keyed by
//! object identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// What a change does to the host artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// One entry that differs between two trees
///
/// Names are paths relative to the diffed subtree. Empty names are
/// normalised to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Change {
    from: Option<String>,
    to: Option<String>,
}

impl Change {
    pub fn new(from: Option<String>, to: Option<String>) -> Self {
        Self {
            from: from.filter(|name| !name.is_empty()),
            to: to.filter(|name| !name.is_empty()),
        }
    }

    /// An entry that only exists in the "to" tree
    pub fn create(to: impl Into<String>) -> Self {
        Self::new(None, Some(to.into()))
    }

    /// An entry present in both trees with different content
    pub fn modify(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(Some(path.clone()), Some(path))
    }

    /// An entry that only exists in the "from" tree
    pub fn delete(from: impl Into<String>) -> Self {
        Self::new(Some(from.into()), None)
    }

    pub fn from_name(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn to_name(&self) -> Option<&str> {
        self.to.as_deref()
    }

    /// The name policy checks run against: "to", falling back to "from"
    pub fn name(&self) -> Option<&str> {
        self.to_name().or_else(|| self.from_name())
    }

    /// `None` for a change with neither name, which cannot be applied
    pub fn kind(&self) -> Option<ChangeKind> {
        match (&self.from, &self.to) {
            (None, Some(_)) => Some(ChangeKind::Create),
            (Some(_), Some(_)) => Some(ChangeKind::Modify),
            (Some(_), None) => Some(ChangeKind::Delete),
            (None, None) => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.kind() == Some(ChangeKind::Delete)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "from: {} to: {}",
            self.from_name().unwrap_or("<none>"),
            self.to_name().unwrap_or("<none>")
        )
    }
}

/// Where a change lands: a file to write from, or the delete sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Path of the new content inside the local clone
    Path(PathBuf),
    /// The artifact was removed; methods must not attempt a write
    Delete,
}

impl Destination {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Delete => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Delete => f.write_str("<delete>"),
        }
    }
}

/// Filtered set of changes between two commits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    entries: BTreeMap<Change, Destination>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a change, replacing the destination of an identical one
    pub fn insert(&mut self, change: Change, destination: Destination) -> Option<Destination> {
        self.entries.insert(change, destination)
    }

    pub fn get(&self, change: &Change) -> Option<&Destination> {
        self.entries.get(change)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Change, &Destination)> {
        self.entries.iter()
    }

    /// Number of entries of the given kind
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.entries
            .keys()
            .filter(|change| change.kind() == Some(kind))
            .count()
    }
}

impl FromIterator<(Change, Destination)> for Changeset {
    fn from_iter<I: IntoIterator<Item = (Change, Destination)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Changeset {
    type Item = (Change, Destination);
    type IntoIter = std::collections::btree_map::IntoIter<Change, Destination>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

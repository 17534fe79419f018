//! Change selection: diff two commits under a subpath, then filter by policy

use crate::change::{Change, Changeset, Destination};
use crate::error::{CatchUpError, Result};
use crate::repo::Repository;
use crate::target::Target;
use crate::types::CommitId;
use glob::Pattern;
use std::path::Path;

/// Pattern used when a method configures no glob; matches every path
pub const DEFAULT_GLOB: &str = "**";

/// Compiled filename policy of a method
///
/// A name passes when it ends with one of the allowed suffixes (if any
/// are configured) and matches the glob. Without a glob every name
/// matches, as if [`DEFAULT_GLOB`] had been given.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    suffixes: Option<Vec<String>>,
    pattern: Option<Pattern>,
}

impl ChangeFilter {
    pub fn new(suffixes: Option<Vec<String>>, glob: Option<&str>) -> Result<Self> {
        let pattern = glob
            .map(|glob| {
                Pattern::new(glob).map_err(|source| CatchUpError::InvalidGlob {
                    pattern: glob.to_string(),
                    source,
                })
            })
            .transpose()?;

        Ok(Self { suffixes, pattern })
    }

    /// Filter that lets every change through
    pub fn allow_all() -> Self {
        Self {
            suffixes: None,
            pattern: None,
        }
    }

    pub fn glob(&self) -> &str {
        self.pattern.as_ref().map_or(DEFAULT_GLOB, Pattern::as_str)
    }

    pub fn suffixes(&self) -> Option<&[String]> {
        self.suffixes.as_deref()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.has_allowed_suffix(name)
            && self.pattern.as_ref().is_none_or(|pattern| pattern.matches(name))
    }

    fn has_allowed_suffix(&self, name: &str) -> bool {
        match &self.suffixes {
            None => true,
            Some(suffixes) => suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())),
        }
    }
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}

/// Compute the filtered changeset that moves `target`'s `subpath` from
/// `from` to `to`
///
/// Created and modified entries point at their file in the clone
/// (`clone_dir/subpath/name`); deletions get [`Destination::Delete`].
pub fn diff_and_filter<R: Repository + ?Sized>(
    repo: &R,
    target: &Target,
    subpath: &Path,
    from: CommitId,
    to: CommitId,
    filter: &ChangeFilter,
) -> Result<Changeset> {
    let changes = repo
        .diff(target, subpath, from, to)
        .map_err(|source| CatchUpError::Repository {
            target: target.name().to_string(),
            op: "diff",
            source,
        })?;

    let base = target.clone_dir().join(subpath);
    let mut changeset = Changeset::new();

    for change in changes {
        let Some(name) = change.name() else {
            log::debug!("{}: skipping change with no name", target.name());
            continue;
        };

        if !filter.matches(name) {
            log::trace!("{}: {} filtered out", target.name(), name);
            continue;
        }

        let destination = destination_for(&base, &change);
        changeset.insert(change, destination);
    }

    log::debug!(
        "{}: {} of {} -> {} selected under {}",
        target.name(),
        changeset.len(),
        from.short(),
        to.short(),
        subpath.display()
    );

    Ok(changeset)
}

fn destination_for(base: &Path, change: &Change) -> Destination {
    match change.to_name() {
        Some(to) => Destination::Path(base.join(to)),
        None => Destination::Delete,
    }
}

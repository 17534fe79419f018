//! Core types for tag-tracked change application

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Number of bytes in a commit id
pub const COMMIT_ID_LEN: usize = 20;

/// Content-derived identifier of a point in repository history
///
/// The all-zero id is reserved: it means "no history", and resolves to
/// the empty tree when diffing.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId([u8; COMMIT_ID_LEN]);

impl CommitId {
    /// The "no history" commit
    pub const ZERO: Self = Self([0; COMMIT_ID_LEN]);

    /// Build a commit id from raw bytes, `None` if the length is wrong
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; COMMIT_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; COMMIT_ID_LEN]
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> String {
        let mut full = self.to_string();
        full.truncate(7);
        full
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.short())
    }
}

/// Error parsing a hex commit id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid commit id {input:?}: expected {expected} hex characters")]
pub struct ParseCommitIdError {
    pub input: String,
    pub expected: usize,
}

impl FromStr for CommitId {
    type Err = ParseCommitIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCommitIdError {
            input: s.to_string(),
            expected: COMMIT_ID_LEN * 2,
        };

        if s.len() != COMMIT_ID_LEN * 2 || !s.is_ascii() {
            return Err(err());
        }

        let mut raw = [0u8; COMMIT_ID_LEN];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(raw))
    }
}

/// Result of applying a single change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// Host already matched the change
    NoChange,
    /// Artifact was created on the host
    Created,
    /// Artifact was updated on the host
    Modified,
    /// Artifact was removed from the host
    Removed,
    /// Method chose not to act on this change
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents a change to the host
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Summary of one dispatched changeset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub no_change: usize,
    pub failed: usize,
}

impl ApplySummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Total number of changes dispatched
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.no_change + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} modified, {} removed, {} unchanged",
            self.created,
            self.modified,
            self.removed,
            self.no_change + self.skipped
        )
    }
}

/// Options for the concurrent dispatcher
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Upper bound on worker threads; a changeset never gets more
    /// threads than it has changes
    pub jobs: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self { jobs: 8 }
    }
}

/// Timing hints a method hands to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleInfo {
    /// Delay between ticks
    pub interval: Duration,
    /// Fixed delay before the first tick, spreads methods sharing a target
    pub jitter: Duration,
}

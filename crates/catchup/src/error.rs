//! Error types for the catch-up engine

use crate::change::{Change, Destination};
use crate::types::CommitId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a tick or an initial catch-up
#[derive(Error, Debug)]
pub enum CatchUpError {
    /// Fetch, tag or diff failure in the repository accessor
    #[error("repository {op} failed for target {target}")]
    Repository {
        target: String,
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Method's host setup failed; nothing was applied
    #[error("{method} setup failed for target {target}")]
    Prepare {
        method: String,
        target: String,
        #[source]
        source: anyhow::Error,
    },

    /// Glob pattern in a method's filter does not compile
    #[error("invalid glob pattern {pattern:?}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Some change in a changeset could not be applied
    #[error(
        "failed to apply {method} changes from {} to {} for path {} in {target}",
        .from.short(), .to.short(), .subpath.display()
    )]
    Apply {
        method: String,
        target: String,
        from: CommitId,
        to: CommitId,
        subpath: PathBuf,
        #[source]
        source: DispatchError,
    },

    /// Apply was asked to move the host to "no history"
    #[error("cannot apply changes when the desired state is empty")]
    EmptyDesiredState,

    /// The tick was cancelled before it could finish
    #[error("tick cancelled for target {0}")]
    Cancelled(String),
}

impl CatchUpError {
    /// Whether the next scheduled tick may succeed without a config change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Repository { .. }
            | Self::Prepare { .. }
            | Self::Apply { .. }
            | Self::Cancelled(_) => true,
            Self::InvalidGlob { .. } | Self::EmptyDesiredState => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled(_)
                | Self::Apply {
                    source: DispatchError::Cancelled { .. },
                    ..
                }
        )
    }
}

/// Failure of a dispatched changeset
#[derive(Error, Debug)]
pub enum DispatchError {
    /// At least one change failed; carries the first reported failure
    #[error("{failed} of {total} changes failed")]
    Failed {
        failed: usize,
        total: usize,
        #[source]
        first: ChangeFailure,
    },

    /// Cancellation stopped some changes from starting
    #[error("cancelled with {pending} of {total} changes not started")]
    Cancelled { pending: usize, total: usize },

    #[error("failed to build dispatcher thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// One change a method could not apply
#[derive(Error, Debug)]
#[error("error running method for change {change} at {destination}")]
pub struct ChangeFailure {
    pub change: Change,
    pub destination: Destination,
    #[source]
    pub source: anyhow::Error,
}

/// Result type for catch-up operations
pub type Result<T> = std::result::Result<T, CatchUpError>;

//! # Catchup
//!
//! Resumable catch-up engine for git-driven host deployment.
//!
//! A target is a git repository and branch. Each deployment method watches
//! a directory inside it and keeps two tags per target: `current-<method>`
//! names the commit the host reflects, `progress-<method>` the commit an
//! in-flight apply is moving towards. A tick brings the host from
//! `current` up to the branch head and survives being killed at any point.
//!
//! ## Core Concepts
//!
//! - **Repository**: fetch, tag and diff access to a target's clone
//! - **Method**: applies one change to the host (copy a file, restart a unit)
//! - **Changeset**: filtered diff between two commits, one destination per change
//! - **Coordinator**: the tick state machine that moves the tags
//!
//! ## Example
//!
//! ```ignore
//! use catchup::{Coordinator, DispatchOptions, Target};
//!
//! let target = Target::new("web", "https://example.com/web.git", "main", "/var/lib/anchor/web");
//! let coordinator = Coordinator::new(&repo).with_options(DispatchOptions { jobs: 4 });
//!
//! coordinator.initial_catch_up(&target, method.as_ref())?;
//! let report = coordinator.tick(&target, method.as_ref())?;
//! if let Some(applied) = report.applied {
//!     println!("{} -> {}: {}", applied.from, applied.to, applied.summary);
//! }
//! ```

pub mod change;
pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod method;
pub mod repo;
pub mod select;
pub mod tags;
pub mod target;
pub mod types;

#[cfg(test)]
mod testing;

pub use change::{Change, ChangeKind, Changeset, Destination};
pub use context::{ApplyContext, CancelToken};
pub use coordinator::{Coordinator, RangeReport, TickReport};
pub use dispatch::apply_all;
pub use error::{CatchUpError, ChangeFailure, DispatchError, Result};
pub use method::{Method, SharedMethod};
pub use repo::{Repository, TagError};
pub use select::{ChangeFilter, DEFAULT_GLOB, diff_and_filter};
pub use tags::{TagKind, TagSnapshot, TagStore};
pub use target::Target;
pub use types::{
    ApplyResult, ApplySummary, COMMIT_ID_LEN, CommitId, DispatchOptions, ParseCommitIdError,
    ScheduleInfo,
};

//! Method trait for pluggable deployment executors
//!
//! A Method turns one change in a target's repository into host state:
//! placing a file, (re)starting a unit, replacing a container. The engine
//! only ever sees `dyn Method`.

use crate::change::{Change, Destination};
use crate::context::ApplyContext;
use crate::select::ChangeFilter;
use crate::types::{ApplyResult, ScheduleInfo};
use anyhow::Result;
use std::fmt;
use std::path::Path;

/// Core trait for deployment methods
///
/// # Example
///
/// ```ignore
/// use catchup::{ApplyContext, ApplyResult, Change, ChangeFilter, Destination, Method, ScheduleInfo};
///
/// #[derive(Debug)]
/// struct Echo {
///     filter: ChangeFilter,
/// }
///
/// impl Method for Echo {
///     fn kind(&self) -> &str {
///         "echo"
///     }
///
///     fn apply(&self, change: &Change, dest: &Destination, _ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
///         println!("{change} -> {dest}");
///         Ok(ApplyResult::NoChange)
///     }
///
///     fn schedule_info(&self) -> ScheduleInfo {
///         ScheduleInfo { interval: Duration::from_secs(60), jitter: Duration::ZERO }
///     }
///
///     fn target_path(&self) -> &Path {
///         Path::new("echo")
///     }
///
///     fn filter(&self) -> &ChangeFilter {
///         &self.filter
///     }
/// }
/// ```
pub trait Method: Send + Sync + fmt::Debug {
    /// Stable identity used to namespace this method's tags
    ///
    /// Two methods on the same target must not share a kind.
    fn kind(&self) -> &str;

    /// Reconcile host state with one change
    ///
    /// `destination` is either the path of the new content inside the
    /// clone, or [`Destination::Delete`] when the artifact was removed.
    ///
    /// Must be idempotent: an interrupted tick replays its whole
    /// changeset, so the same change can arrive again after it already
    /// took effect. Detect that and return [`ApplyResult::NoChange`].
    fn apply(
        &self,
        change: &Change,
        destination: &Destination,
        ctx: &ApplyContext<'_>,
    ) -> Result<ApplyResult>;

    /// One-off host setup that does not depend on any change
    ///
    /// Runs at the start of every tick and initial catch-up, before the
    /// diff. Implementations remember success and return early afterwards.
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Timing consumed by the scheduler, not by the engine
    fn schedule_info(&self) -> ScheduleInfo;

    /// Directory inside the repository this method watches
    fn target_path(&self) -> &Path;

    /// Filename policy applied to every change before dispatch
    fn filter(&self) -> &ChangeFilter;
}

/// A shared method for type-erased storage
pub type SharedMethod = std::sync::Arc<dyn Method>;

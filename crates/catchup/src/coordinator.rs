//! Catch-up coordinator - the resumable apply state machine
//!
//! Per (target, method) the progress tag acts as a write-ahead record:
//! it is written before a changeset starts and deleted once the current
//! tag has moved, so a crash in between leaves a tag pair that the next
//! tick recognises as interrupted and replays.
//!
//! One tick:
//! 1. run the method's `prepare` hook, fetch the branch head (`latest`)
//! 2. read `current` (zero if absent) and `progress`
//! 3. interrupted (`progress` present and != `current`): replay
//!    `current -> progress`, then advance `current`
//! 4. delete `progress`
//! 5. if `latest == current` stop
//! 6. write `progress = latest`, apply `current -> latest`, advance
//!    `current`, delete `progress`
//!
//! Any failed apply deletes `progress` and leaves `current` where it was,
//! so the same range is recomputed on the next tick.

use crate::context::{ApplyContext, CancelToken};
use crate::dispatch;
use crate::error::{CatchUpError, Result};
use crate::method::Method;
use crate::repo::Repository;
use crate::select::diff_and_filter;
use crate::tags::{TagKind, TagStore};
use crate::target::Target;
use crate::types::{ApplySummary, CommitId, DispatchOptions};

/// Outcome of applying one commit range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeReport {
    pub from: CommitId,
    pub to: CommitId,
    pub summary: ApplySummary,
}

/// Outcome of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Branch head observed by this tick
    pub latest: CommitId,
    /// Interrupted changeset that was replayed first, if any
    pub recovered: Option<RangeReport>,
    /// New work applied up to `latest`, if any
    pub applied: Option<RangeReport>,
}

impl TickReport {
    /// Nothing new was applied this tick
    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_none()
    }
}

/// Drives ticks for any (target, method) over one repository accessor
pub struct Coordinator<'r, R: Repository> {
    repo: &'r R,
    options: DispatchOptions,
    cancel: CancelToken,
}

impl<'r, R: Repository> Coordinator<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self {
            repo,
            options: DispatchOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one tick for `method` on `target`, holding the target lock
    pub fn tick(&self, target: &Target, method: &dyn Method) -> Result<TickReport> {
        let _guard = target.lock();
        self.ensure_running(target)?;
        self.prepare(target, method)?;

        let kind = method.kind();
        let tags = TagStore::new(self.repo, target);

        let latest = self
            .repo
            .fetch_latest(target)
            .map_err(|source| CatchUpError::Repository {
                target: target.name().to_string(),
                op: "fetch",
                source,
            })?;
        let current = tags.read_or_zero(TagKind::Current, kind)?;
        let progress = tags.read(TagKind::Progress, kind)?;

        let (current, recovered) = self.catch_up_progress(&tags, target, method, current, progress)?;

        if latest == current {
            log::debug!(
                "{}: {} up to date at {}",
                target.name(),
                kind,
                current.short()
            );
            return Ok(TickReport {
                latest,
                recovered,
                applied: None,
            });
        }

        self.ensure_running(target)?;
        let summary = self.catch_up_latest(&tags, target, method, current, latest)?;

        Ok(TickReport {
            latest,
            recovered,
            applied: Some(RangeReport {
                from: current,
                to: latest,
                summary,
            }),
        })
    }

    /// Re-establish host state for the recorded `current` commit
    ///
    /// Applies `zero -> current` once, typically on the first run after
    /// the agent starts. Without a `current` tag there is nothing to
    /// re-establish and the regular tick does the first apply.
    pub fn initial_catch_up(
        &self,
        target: &Target,
        method: &dyn Method,
    ) -> Result<Option<RangeReport>> {
        let _guard = target.lock();
        self.ensure_running(target)?;
        self.prepare(target, method)?;

        let tags = TagStore::new(self.repo, target);
        let Some(current) = tags.read(TagKind::Current, method.kind())? else {
            log::debug!(
                "{}: no {} recorded, skipping initial catch-up",
                target.name(),
                TagKind::Current.name(method.kind())
            );
            return Ok(None);
        };

        let summary = self.apply(target, method, CommitId::ZERO, current)?;
        Ok(Some(RangeReport {
            from: CommitId::ZERO,
            to: current,
            summary,
        }))
    }

    fn catch_up_progress(
        &self,
        tags: &TagStore<'_, R>,
        target: &Target,
        method: &dyn Method,
        current: CommitId,
        progress: Option<CommitId>,
    ) -> Result<(CommitId, Option<RangeReport>)> {
        let kind = method.kind();
        let mut recovered = None;
        let mut current = current;

        if let Some(progress) = progress
            && progress != current
        {
            log::warn!(
                "{}: {} was interrupted applying {}, replaying from {}",
                target.name(),
                kind,
                progress.short(),
                current.short()
            );

            let summary = match self.apply(target, method, current, progress) {
                Ok(summary) => summary,
                Err(err) => {
                    self.discard_progress(tags, target, kind);
                    return Err(err);
                }
            };

            tags.write(TagKind::Current, kind, progress)?;
            recovered = Some(RangeReport {
                from: current,
                to: progress,
                summary,
            });
            current = progress;
        }

        tags.delete(TagKind::Progress, kind)?;
        Ok((current, recovered))
    }

    fn catch_up_latest(
        &self,
        tags: &TagStore<'_, R>,
        target: &Target,
        method: &dyn Method,
        current: CommitId,
        latest: CommitId,
    ) -> Result<ApplySummary> {
        let kind = method.kind();

        tags.write(TagKind::Progress, kind, latest)?;

        let summary = match self.apply(target, method, current, latest) {
            Ok(summary) => summary,
            Err(err) => {
                self.discard_progress(tags, target, kind);
                return Err(err);
            }
        };

        tags.write(TagKind::Current, kind, latest)?;
        tags.delete(TagKind::Progress, kind)?;

        log::info!(
            "{}: {} moved {} -> {} ({})",
            target.name(),
            kind,
            current.short(),
            latest.short(),
            summary
        );
        Ok(summary)
    }

    /// Diff, filter and dispatch one commit range
    fn apply(
        &self,
        target: &Target,
        method: &dyn Method,
        from: CommitId,
        to: CommitId,
    ) -> Result<ApplySummary> {
        if to.is_zero() {
            return Err(CatchUpError::EmptyDesiredState);
        }

        let changeset = diff_and_filter(
            self.repo,
            target,
            method.target_path(),
            from,
            to,
            method.filter(),
        )?;

        if changeset.is_empty() {
            log::debug!(
                "{}: no {} changes between {} and {}",
                target.name(),
                method.kind(),
                from.short(),
                to.short()
            );
            return Ok(ApplySummary::default());
        }

        log::info!(
            "{}: applying {} {} change(s) from {} to {}",
            target.name(),
            changeset.len(),
            method.kind(),
            from.short(),
            to.short()
        );

        let ctx = ApplyContext::new(target, from, to, &self.cancel)
            .with_repository(self.repo, method.target_path());
        dispatch::apply_all(method, &changeset, &ctx, &self.options).map_err(|source| {
            CatchUpError::Apply {
                method: method.kind().to_string(),
                target: target.name().to_string(),
                from,
                to,
                subpath: method.target_path().to_path_buf(),
                source,
            }
        })
    }

    /// Best-effort removal of the progress tag after a failed apply
    fn discard_progress(&self, tags: &TagStore<'_, R>, target: &Target, kind: &str) {
        if let Err(err) = tags.delete(TagKind::Progress, kind) {
            log::error!(
                "{}: could not delete {}: {}",
                target.name(),
                TagKind::Progress.name(kind),
                err
            );
        }
    }

    fn prepare(&self, target: &Target, method: &dyn Method) -> Result<()> {
        method.prepare().map_err(|source| CatchUpError::Prepare {
            method: method.kind().to_string(),
            target: target.name().to_string(),
            source,
        })
    }

    fn ensure_running(&self, target: &Target) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CatchUpError::Cancelled(target.name().to_string()));
        }
        Ok(())
    }
}

//! Concurrent dispatcher - applies a changeset with one task per change
//!
//! Every task runs to completion even when a sibling fails, and each task
//! reports exactly once. The first failure reported (in completion order)
//! is returned after all tasks have finished.

use crate::change::{Change, Changeset, Destination};
use crate::context::ApplyContext;
use crate::error::{ChangeFailure, DispatchError};
use crate::method::Method;
use crate::types::{ApplyResult, ApplySummary, DispatchOptions};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;

/// What one task reported back
enum TaskOutcome {
    Applied(ApplyResult),
    Failed(anyhow::Error),
    NotStarted,
}

struct TaskReport {
    change: Change,
    destination: Destination,
    outcome: TaskOutcome,
}

/// Apply every change in `changeset` through `method`
pub fn apply_all(
    method: &dyn Method,
    changeset: &Changeset,
    ctx: &ApplyContext<'_>,
    opts: &DispatchOptions,
) -> Result<ApplySummary, DispatchError> {
    let total = changeset.len();
    if total == 0 {
        return Ok(ApplySummary::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.clamp(1, total))
        .thread_name(|i| format!("dispatch-{i}"))
        .build()?;

    let (tx, rx) = mpsc::channel::<TaskReport>();

    pool.scope(|scope| {
        for (change, destination) in changeset.iter() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let outcome = run_task(method, change, destination, ctx);
                // The receiver outlives the scope, so this cannot fail
                let _ = tx.send(TaskReport {
                    change: change.clone(),
                    destination: destination.clone(),
                    outcome,
                });
            });
        }
    });
    drop(tx);

    collect_reports(method, rx.iter().take(total), total)
}

fn run_task(
    method: &dyn Method,
    change: &Change,
    destination: &Destination,
    ctx: &ApplyContext<'_>,
) -> TaskOutcome {
    if ctx.cancel.is_cancelled() {
        return TaskOutcome::NotStarted;
    }

    log::debug!(
        "{}: {} {} -> {}",
        method.kind(),
        change.kind().map_or_else(|| "?".to_string(), |k| k.to_string()),
        change.name().unwrap_or("<none>"),
        destination
    );

    match catch_unwind(AssertUnwindSafe(|| method.apply(change, destination, ctx))) {
        Ok(Ok(result)) => TaskOutcome::Applied(result),
        Ok(Err(err)) => TaskOutcome::Failed(err),
        Err(panic) => TaskOutcome::Failed(anyhow::anyhow!(
            "method panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

fn collect_reports(
    method: &dyn Method,
    reports: impl Iterator<Item = TaskReport>,
    total: usize,
) -> Result<ApplySummary, DispatchError> {
    let mut summary = ApplySummary::default();
    let mut first_failure: Option<ChangeFailure> = None;
    let mut pending = 0;

    for report in reports {
        match report.outcome {
            TaskOutcome::Applied(result) => summary.add_result(&result),
            TaskOutcome::NotStarted => pending += 1,
            TaskOutcome::Failed(source) => {
                summary.failed += 1;
                log::warn!(
                    "{}: change {} failed: {:#}",
                    method.kind(),
                    report.change,
                    source
                );
                if first_failure.is_none() {
                    first_failure = Some(ChangeFailure {
                        change: report.change,
                        destination: report.destination,
                        source,
                    });
                }
            }
        }
    }

    if let Some(first) = first_failure {
        return Err(DispatchError::Failed {
            failed: summary.failed,
            total,
            first,
        });
    }

    if pending > 0 {
        return Err(DispatchError::Cancelled { pending, total });
    }

    Ok(summary)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelToken;
    use crate::target::Target;
    use crate::testing::{RecordingMethod, commit};
    use crate::types::CommitId;

    fn target() -> Target {
        Target::new("web", "https://example.com/web", "main", "/srv/web")
    }

    fn changeset(names: &[&str]) -> Changeset {
        names
            .iter()
            .map(|name| {
                (
                    Change::create(*name),
                    Destination::Path(format!("/srv/web/{name}").into()),
                )
            })
            .collect()
    }

    #[test]
    fn empty_changeset_is_a_no_op() {
        let method = RecordingMethod::new("test");
        let target = target();
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&target, CommitId::ZERO, commit(1), &cancel);

        let summary =
            apply_all(&method, &Changeset::new(), &ctx, &DispatchOptions::default()).unwrap();
        assert_eq!(summary.total(), 0);
        assert!(method.calls().is_empty());
    }

    #[test]
    fn applies_every_change() {
        let method = RecordingMethod::new("test");
        let target = target();
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&target, CommitId::ZERO, commit(1), &cancel);

        let summary = apply_all(
            &method,
            &changeset(&["a", "b", "c"]),
            &ctx,
            &DispatchOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.created, 3);
        assert_eq!(method.calls().len(), 3);
    }

    #[test]
    fn one_failure_fails_the_set_but_all_tasks_run() {
        let method = RecordingMethod::new("test").failing_on("c");
        let target = target();
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&target, CommitId::ZERO, commit(1), &cancel);

        let err = apply_all(
            &method,
            &changeset(&["a", "b", "c", "d", "e"]),
            &ctx,
            &DispatchOptions { jobs: 2 },
        )
        .unwrap_err();

        assert_eq!(method.calls().len(), 5);
        match err {
            DispatchError::Failed {
                failed,
                total,
                first,
            } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 5);
                assert_eq!(first.change, Change::create("c"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn several_failures_report_one_error() {
        let method = RecordingMethod::new("test").failing_on("a").failing_on("b");
        let target = target();
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&target, CommitId::ZERO, commit(1), &cancel);

        let err = apply_all(
            &method,
            &changeset(&["a", "b", "c"]),
            &ctx,
            &DispatchOptions::default(),
        )
        .unwrap_err();

        assert_eq!(method.calls().len(), 3);
        assert!(matches!(err, DispatchError::Failed { failed: 2, total: 3, .. }));
    }

    #[test]
    fn panicking_method_counts_as_failure() {
        let method = RecordingMethod::new("test").panicking_on("b");
        let target = target();
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&target, CommitId::ZERO, commit(1), &cancel);

        let err = apply_all(
            &method,
            &changeset(&["a", "b"]),
            &ctx,
            &DispatchOptions::default(),
        )
        .unwrap_err();

        match err {
            DispatchError::Failed { first, .. } => {
                assert!(first.source.to_string().contains("panicked"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cancelled_tasks_do_not_start() {
        let method = RecordingMethod::new("test");
        let target = target();
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = ApplyContext::new(&target, CommitId::ZERO, commit(1), &cancel);

        let err = apply_all(
            &method,
            &changeset(&["a", "b"]),
            &ctx,
            &DispatchOptions::default(),
        )
        .unwrap_err();

        assert!(method.calls().is_empty());
        assert!(matches!(err, DispatchError::Cancelled { pending: 2, total: 2 }));
    }
}

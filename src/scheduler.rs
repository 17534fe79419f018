//! Interval scheduler: one worker thread per (target, method)
//!
//! A worker sleeps its method's skew once, re-establishes the recorded
//! state with an initial catch-up, then ticks every `interval` until the
//! shared cancel token fires. Tick failures are logged and retried on the
//! next interval; the tags make every retry start from the right commit.

use anyhow::{Context, Result};
use catchup::{CancelToken, Coordinator, DispatchOptions, Repository, SharedMethod, Target};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Deployment;

/// Granularity of cancellable sleeps
const POLL: Duration = Duration::from_millis(200);

/// Running set of worker threads
pub struct Scheduler {
    cancel: CancelToken,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn a worker for every method of every deployment
    pub fn start<R>(
        repo: Arc<R>,
        deployments: &[Deployment],
        options: DispatchOptions,
    ) -> Result<Self>
    where
        R: Repository + 'static,
    {
        let cancel = CancelToken::new();
        let mut workers = Vec::new();

        for deployment in deployments {
            for method in &deployment.methods {
                let worker = Worker {
                    repo: Arc::clone(&repo),
                    target: Arc::clone(&deployment.target),
                    method: Arc::clone(method),
                    options: options.clone(),
                    cancel: cancel.clone(),
                };
                let name = format!("{}/{}", deployment.target.name(), method.kind());
                let handle = thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || worker.run())
                    .with_context(|| format!("Failed to spawn worker {}", name))?;
                workers.push(handle);
            }
        }

        log::info!("scheduler started {} worker(s)", workers.len());
        Ok(Self { cancel, workers })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Cancel every worker and wait for in-flight ticks to stop
    pub fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{}: worker panicked", name);
            }
        }
        log::info!("scheduler stopped");
    }
}

struct Worker<R: Repository> {
    repo: Arc<R>,
    target: Arc<Target>,
    method: SharedMethod,
    options: DispatchOptions,
    cancel: CancelToken,
}

impl<R: Repository> Worker<R> {
    fn run(self) {
        let schedule = self.method.schedule_info();
        let kind = self.method.kind();
        let name = self.target.name();

        if !sleep_unless_cancelled(&self.cancel, schedule.jitter) {
            return;
        }

        let coordinator = Coordinator::new(self.repo.as_ref())
            .with_options(self.options.clone())
            .with_cancel(self.cancel.clone());

        match coordinator.initial_catch_up(&self.target, self.method.as_ref()) {
            Ok(Some(report)) => log::info!(
                "{}: {} re-established {}: {}",
                name,
                kind,
                report.to.short(),
                report.summary
            ),
            Ok(None) => {}
            Err(e) if e.is_cancelled() => return,
            Err(e) => log::error!(
                "{}: {} initial catch-up failed: {:#}",
                name,
                kind,
                anyhow::Error::new(e)
            ),
        }

        loop {
            match coordinator.tick(&self.target, self.method.as_ref()) {
                Ok(report) => {
                    if let Some(recovered) = &report.recovered {
                        log::info!(
                            "{}: {} recovered {}..{}: {}",
                            name,
                            kind,
                            recovered.from.short(),
                            recovered.to.short(),
                            recovered.summary
                        );
                    }
                    if let Some(applied) = &report.applied {
                        log::info!(
                            "{}: {} applied {}..{}: {}",
                            name,
                            kind,
                            applied.from.short(),
                            applied.to.short(),
                            applied.summary
                        );
                    }
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) if e.is_retryable() => {
                    log::warn!("{}: {} tick failed: {:#}", name, kind, anyhow::Error::new(e));
                }
                Err(e) => {
                    log::error!("{}: {} tick failed: {:#}", name, kind, anyhow::Error::new(e));
                }
            }

            if !sleep_unless_cancelled(&self.cancel, schedule.interval) {
                break;
            }
        }

        log::debug!("{}: {} worker exiting", name, kind);
    }
}

/// Sleep for `duration`; returns false as soon as `cancel` fires
pub fn sleep_unless_cancelled(cancel: &CancelToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(POLL.min(deadline - now));
    }
}

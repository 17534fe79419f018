use anyhow::{Context as _, Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use super::Agent;
use crate::Context;
use crate::scheduler::Scheduler;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let Agent {
        config,
        repo,
        runner,
    } = Agent::load(ctx)?;

    let mut deployments = Vec::new();
    for deployment in config.deployments(&runner)? {
        let target = &deployment.target;
        match repo.ensure_clone(target) {
            Ok(true) => ui::info(&format!("Cloned {}", target.name())),
            Ok(false) => {}
            Err(e) => {
                ui::error(&format!("Skipping {}: {:#}", target.name(), e));
                continue;
            }
        }
        deployments.push(deployment);
    }

    if deployments.is_empty() {
        bail!("No targets available to run");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("Failed to install signal handler")?;
    }

    let scheduler = Scheduler::start(
        Arc::new(repo),
        &deployments,
        config.dispatch_options(ctx.jobs),
    )?;

    if !ctx.quiet {
        ui::success(&format!(
            "Watching {} target(s) with {} method(s)",
            deployments.len(),
            scheduler.worker_count()
        ));
    }

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(250));
    }

    ui::info("Shutting down, waiting for running ticks...");
    scheduler.shutdown();
    Ok(())
}

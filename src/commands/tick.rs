use anyhow::{Context as _, Result, bail};
use catchup::{Coordinator, SharedMethod};
use colored::Colorize;

use super::{Agent, describe_range};
use crate::Context;
use crate::cli::TickArgs;
use crate::ui;

pub fn run(ctx: &Context, args: TickArgs) -> Result<()> {
    let agent = Agent::load(ctx)?;
    let deployment = agent.config.deployment(&args.target, &agent.runner)?;
    let target = &deployment.target;

    let methods: Vec<&SharedMethod> = match &args.method {
        Some(kind) => vec![deployment.find_method(kind).with_context(|| {
            format!("Target '{}' has no method '{}'", target.name(), kind)
        })?],
        None => deployment.methods.iter().collect(),
    };

    if agent.repo.ensure_clone(target)? && !ctx.quiet {
        ui::info(&format!("Cloned {} into {}", target.url(), target.clone_dir().display()));
    }

    let coordinator =
        Coordinator::new(&agent.repo).with_options(agent.config.dispatch_options(ctx.jobs));

    if !ctx.quiet {
        ui::header(&format!("Tick {}", target.name()));
    }

    let mut failed = 0;
    for &method in &methods {
        let kind = method.kind();
        match coordinator.tick(target, method.as_ref()) {
            Ok(report) => {
                if ctx.quiet {
                    continue;
                }
                if let Some(recovered) = &report.recovered {
                    ui::kv(&format!("{} (recovered)", kind), &describe_range(recovered));
                }
                match &report.applied {
                    Some(applied) => ui::kv(kind, &describe_range(applied)),
                    None => ui::kv(
                        kind,
                        &format!("up to date at {}", report.latest.short()).dimmed().to_string(),
                    ),
                }
            }
            Err(e) => {
                failed += 1;
                ui::error(&format!("{}: {:#}", kind, anyhow::Error::new(e)));
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} method(s) failed", failed, methods.len());
    }
    Ok(())
}

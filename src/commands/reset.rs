use anyhow::{Context as _, Result};
use catchup::{TagKind, TagStore};

use super::Agent;
use crate::Context;
use crate::cli::ResetArgs;
use crate::ui;

pub fn run(ctx: &Context, args: ResetArgs) -> Result<()> {
    let agent = Agent::load(ctx)?;
    let deployment = agent.config.deployment(&args.target, &agent.runner)?;
    let target = &deployment.target;
    let method = deployment.find_method(&args.method).with_context(|| {
        format!("Target '{}' has no method '{}'", target.name(), args.method)
    })?;

    if !target.clone_dir().exists() {
        ui::info(&format!("{} is not cloned yet, nothing to reset", target.name()));
        return Ok(());
    }

    let _guard = target.lock();
    let tags = TagStore::new(&agent.repo, target);
    tags.delete(TagKind::Progress, method.kind())?;
    tags.delete(TagKind::Current, method.kind())?;
    log::info!("{}: reset {}", target.name(), method.kind());

    if !ctx.quiet {
        ui::success(&format!(
            "Reset {} on {}; the next tick applies everything under {}",
            method.kind(),
            target.name(),
            method.target_path().display()
        ));
    }
    Ok(())
}

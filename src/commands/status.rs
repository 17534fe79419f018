use anyhow::Result;
use catchup::TagStore;
use colored::Colorize;

use super::Agent;
use crate::Context;
use crate::cli::StatusArgs;
use crate::config::Deployment;
use crate::git::GitRepository;
use crate::ui;

pub fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let agent = Agent::load(ctx)?;

    let deployments = match &args.target {
        Some(name) => vec![agent.config.deployment(name, &agent.runner)?],
        None => agent.config.deployments(&agent.runner)?,
    };

    if deployments.is_empty() {
        ui::warn("No targets configured");
        return Ok(());
    }

    ui::header("Anchor Status");
    for deployment in &deployments {
        show_target(&agent.repo, deployment, ctx.verbose > 0)?;
    }
    println!();
    Ok(())
}

fn show_target(repo: &GitRepository, deployment: &Deployment, detailed: bool) -> Result<()> {
    let target = &deployment.target;
    ui::section(target.name());
    ui::kv("URL", target.url());
    ui::kv("Branch", target.branch());
    ui::kv("Clone", &target.clone_dir().display().to_string());

    if !target.clone_dir().join(".git").exists() {
        ui::kv("State", &"not cloned".yellow().to_string());
        return Ok(());
    }

    let tags = TagStore::new(repo, target);
    for method in &deployment.methods {
        let snapshot = tags.snapshot(method.kind())?;
        let current = match snapshot.current {
            Some(commit) => commit.short().green().to_string(),
            None => "never applied".dimmed().to_string(),
        };

        let mut line = format!(
            "{} {} {}",
            current,
            "from".dimmed(),
            method.target_path().display()
        );
        if snapshot.is_interrupted()
            && let Some(progress) = snapshot.progress
        {
            line.push_str(&format!(
                " {}",
                format!("(interrupted at {})", progress.short()).yellow()
            ));
        }
        ui::kv(method.kind(), &line);

        if detailed {
            let schedule = method.schedule_info();
            let filter = method.filter();
            let suffixes = filter
                .suffixes()
                .map_or_else(|| "any".to_string(), |s| s.join(" "));
            ui::dim(&format!(
                "      every {}, skew {}, glob {}, suffixes {}",
                ui::format_duration(schedule.interval),
                ui::format_duration(schedule.jitter),
                filter.glob(),
                suffixes
            ));
        }
    }
    Ok(())
}

//! Subcommand implementations

pub mod reset;
pub mod run;
pub mod status;
pub mod tick;

use anyhow::Result;
use catchup::{ApplySummary, RangeReport};
use colored::Colorize;
use std::sync::Arc;

use crate::Context;
use crate::config::AnchorConfig;
use crate::git::GitRepository;
use crate::runner::{CommandRunner, SystemRunner};

/// Everything a command needs to act on the configured targets
pub struct Agent {
    pub config: AnchorConfig,
    pub repo: GitRepository,
    pub runner: Arc<dyn CommandRunner>,
}

impl Agent {
    pub fn load(ctx: &Context) -> Result<Self> {
        let config = AnchorConfig::load(ctx.config.as_deref())?;
        let repo = GitRepository::new(config.agent.token.clone());
        Ok(Self {
            config,
            repo,
            runner: Arc::new(SystemRunner),
        })
    }
}

/// `"3 created, 1 modified, 0 removed, 2 unchanged (abc1234..def5678)"`
fn describe_range(report: &RangeReport) -> String {
    format!(
        "{} ({}..{})",
        colorize_summary(&report.summary),
        report.from.short().dimmed(),
        report.to.short().dimmed()
    )
}

fn colorize_summary(summary: &ApplySummary) -> String {
    if summary.total_changes() == 0 {
        summary.to_string().dimmed().to_string()
    } else {
        summary.to_string().green().to_string()
    }
}

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "anchor")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "GitOps host agent - applies git repository changes to this machine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/anchor/config.toml)
    #[arg(long, global = true, env = "ANCHOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum changes applied in parallel
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Clone missing targets and keep every method in sync until interrupted
    Run,

    /// Run one tick now
    Tick(TickArgs),

    /// Show recorded commits per target and method
    Status(StatusArgs),

    /// Forget what a method applied so the next tick starts from scratch
    Reset(ResetArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct TickArgs {
    /// Target to tick
    pub target: String,

    /// Only tick this method (e.g. `systemd`, `filetransfer-certs`)
    #[arg(short, long)]
    pub method: Option<String>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Only show this target
    pub target: Option<String>,
}

#[derive(Args)]
pub struct ResetArgs {
    /// Target to reset
    pub target: String,

    /// Method whose tags are removed
    #[arg(short, long)]
    pub method: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_tick() {
        let cli = Cli::try_parse_from(["anchor", "-vv", "tick", "web", "--method", "systemd"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Tick(args) => {
                assert_eq!(args.target, "web");
                assert_eq!(args.method.as_deref(), Some("systemd"));
            }
            _ => panic!("expected tick"),
        }
    }

    #[test]
    fn test_reset_requires_method() {
        assert!(Cli::try_parse_from(["anchor", "reset", "web"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["anchor", "status", "--config", "/tmp/a.toml", "-j", "2"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.toml")));
        assert_eq!(cli.jobs, Some(2));
    }
}

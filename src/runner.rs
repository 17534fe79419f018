//! External command execution for methods that drive host tools
//! (`systemctl`, `podman`)

use anyhow::{Context, Result};
use std::fmt;
use std::process::{Command, Output};

/// Captured result of one command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl CommandOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

/// Runs host commands on behalf of a method
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run a command and capture its output; a non-zero exit is not an error
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a command and return just success/failure
    fn run_status(&self, cmd: &str, args: &[&str]) -> Result<bool> {
        Ok(self.run(cmd, args)?.success)
    }

    /// Run a command, failing with its stderr on a non-zero exit
    fn run_checked(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let output = self.run(cmd, args)?;
        if !output.success {
            anyhow::bail!(
                "Command failed: {} {}: {}",
                cmd,
                args.join(" "),
                output.stderr_str().trim()
            );
        }
        Ok(output.stdout_str().trim().to_string())
    }
}

/// Runs commands directly on this host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        log::debug!("exec: {} {}", cmd, args.join(" "));
        Command::new(cmd)
            .args(args)
            .output()
            .map(CommandOutput::from)
            .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
    }
}

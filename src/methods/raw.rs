//! Raw method - run containers from JSON/YAML specs with the podman CLI
//!
//! Example spec (`web.json`):
//!
//! ```json
//! {"Image": "docker.io/library/nginx:latest",
//!  "Name": "web",
//!  "Env": {"MODE": "prod"},
//!  "Ports": [{"HostPort": 8080, "ContainerPort": 80}]}
//! ```
//!
//! Every container is labelled with the digest of the spec that created it,
//! so replaying an unchanged spec leaves the running container alone.

use anyhow::{Context, Result, bail};
use catchup::{ApplyContext, ApplyResult, Change, ChangeFilter, Destination, Method, ScheduleInfo};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{MethodSettings, base_name};
use crate::runner::CommandRunner;

/// Suffixes the method picks up when none are configured
pub const DEFAULT_SUFFIXES: &[&str] = &[".json", ".yaml", ".yml"];

/// Label carrying the spec digest
const DIGEST_LABEL: &str = "io.anchor.spec-digest";

const PODMAN: &str = "podman";

/// A container described by one spec file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub volumes: Vec<NamedVolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortMapping {
    #[serde(default, rename = "HostIP")]
    pub host_ip: String,
    pub container_port: u16,
    /// Zero publishes on the same port as the container
    #[serde(default)]
    pub host_port: u16,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Mount {
    #[serde(alias = "Destination")]
    pub destination: String,
    #[serde(default, alias = "Source")]
    pub source: String,
    #[serde(default = "default_mount_type", rename = "type", alias = "Type")]
    pub kind: String,
    #[serde(default, alias = "Options")]
    pub options: Vec<String>,
}

fn default_mount_type() -> String {
    "bind".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamedVolume {
    pub name: String,
    pub dest: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl ContainerSpec {
    /// Parse a spec; JSON when it starts with `{`, YAML otherwise
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).context("Container spec is not UTF-8")?;
        let text = text.trim();
        if text.is_empty() {
            bail!("Container spec is empty");
        }

        let spec: Self = if text.starts_with('{') {
            serde_json::from_str(text).context("Invalid JSON container spec")?
        } else {
            serde_yaml::from_str(text).context("Invalid YAML container spec")?
        };

        if spec.image.trim().is_empty() {
            bail!("Container spec has no Image");
        }
        Ok(spec)
    }

    /// Container name, falling back to `fallback` (the spec's file stem)
    pub fn container_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback)
    }

    /// Arguments for `podman run`
    pub fn run_args(&self, name: &str, digest: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--restart".to_string(),
            "always".to_string(),
            "--label".to_string(),
            format!("{DIGEST_LABEL}={digest}"),
        ];

        for (key, value) in &self.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }

        for port in &self.ports {
            let host_port = if port.host_port == 0 {
                port.container_port
            } else {
                port.host_port
            };
            let mut publish = if port.host_ip.is_empty() {
                format!("{host_port}:{}", port.container_port)
            } else {
                format!("{}:{host_port}:{}", port.host_ip, port.container_port)
            };
            if !port.protocol.is_empty() {
                publish.push('/');
                publish.push_str(&port.protocol);
            }
            args.push("--publish".to_string());
            args.push(publish);
        }

        for mount in &self.mounts {
            let mut spec = format!("type={}", mount.kind);
            if !mount.source.is_empty() {
                spec.push_str(&format!(",source={}", mount.source));
            }
            spec.push_str(&format!(",destination={}", mount.destination));
            for option in &mount.options {
                spec.push(',');
                spec.push_str(option);
            }
            args.push("--mount".to_string());
            args.push(spec);
        }

        for volume in &self.volumes {
            let mut spec = format!("{}:{}", volume.name, volume.dest);
            if !volume.options.is_empty() {
                spec.push(':');
                spec.push_str(&volume.options.join(","));
            }
            args.push("--volume".to_string());
            args.push(spec);
        }

        args.push(self.image.clone());
        args
    }
}

/// Runs one container per spec file
#[derive(Debug)]
pub struct Raw {
    settings: MethodSettings,
    pull_image: bool,
    runner: Arc<dyn CommandRunner>,
}

impl Raw {
    pub fn new(settings: MethodSettings, pull_image: bool, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            settings,
            pull_image,
            runner,
        }
    }

    fn podman(&self, args: &[&str]) -> Result<String> {
        self.runner.run_checked(PODMAN, args)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.runner.run_status(PODMAN, &["container", "exists", name])
    }

    fn running_digest(&self, name: &str) -> Result<Option<String>> {
        if !self.exists(name)? {
            return Ok(None);
        }
        let format = format!("{{{{index .Config.Labels \"{DIGEST_LABEL}\"}}}}");
        let digest = self.podman(&["container", "inspect", "--format", &format, name])?;
        Ok(Some(digest))
    }

    fn ensure_image(&self, image: &str) -> Result<()> {
        if self.pull_image || !self.runner.run_status(PODMAN, &["image", "exists", image])? {
            log::info!("{}: pulling {}", self.settings.kind, image);
            self.podman(&["pull", image])?;
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.podman(&["rm", "--force", "--time", "10", name])?;
        log::info!("{}: removed container {}", self.settings.kind, name);
        Ok(())
    }

    /// Name of the container the spec at `ctx.from` started
    fn previous_container(&self, ctx: &ApplyContext<'_>, from: &str) -> Result<String> {
        let fallback = stem(from)?;
        let Some(bytes) = ctx.read_previous(from)? else {
            return Ok(fallback.to_string());
        };
        match ContainerSpec::parse(&bytes) {
            Ok(spec) => Ok(spec.container_name(fallback).to_string()),
            Err(err) => {
                log::warn!(
                    "{}: previous {} unreadable, assuming container {}: {:#}",
                    self.settings.kind,
                    from,
                    fallback,
                    err
                );
                Ok(fallback.to_string())
            }
        }
    }

    fn deploy(&self, source: &Path, fallback: &str, previous: Option<&str>) -> Result<ApplyResult> {
        let bytes =
            fs::read(source).with_context(|| format!("Failed to read {}", source.display()))?;
        let spec = ContainerSpec::parse(&bytes)
            .with_context(|| format!("Failed to parse {}", source.display()))?;
        let name = spec.container_name(fallback);
        let digest = blake3::hash(&bytes).to_hex().to_string();

        let mut replaced = false;
        if let Some(previous) = previous.filter(|previous| *previous != name)
            && self.exists(previous)?
        {
            self.remove(previous)?;
            replaced = true;
        }

        let existed = match self.running_digest(name)? {
            Some(running) if running == digest => {
                log::debug!("{}: container {} already matches", self.settings.kind, name);
                return Ok(if replaced {
                    ApplyResult::Modified
                } else {
                    ApplyResult::NoChange
                });
            }
            Some(_) => true,
            None => false,
        };

        self.ensure_image(&spec.image)?;
        if existed {
            self.remove(name)?;
        }

        let args = spec.run_args(name, &digest);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.podman(&args)?;
        log::info!("{}: started container {} from {}", self.settings.kind, name, spec.image);

        Ok(if existed || replaced {
            ApplyResult::Modified
        } else {
            ApplyResult::Created
        })
    }
}

/// File stem of a change name (`"pods/web.yaml"` -> `"web"`)
fn stem(name: &str) -> Result<&str> {
    let base = base_name(name)?;
    Ok(Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(base))
}

impl Method for Raw {
    fn kind(&self) -> &str {
        &self.settings.kind
    }

    fn apply(
        &self,
        change: &Change,
        destination: &Destination,
        ctx: &ApplyContext<'_>,
    ) -> Result<ApplyResult> {
        ctx.check_cancelled()?;

        match destination {
            Destination::Path(source) => {
                let to = change.to_name().context("Change has no target name")?;
                let previous = change
                    .from_name()
                    .map(|from| self.previous_container(ctx, from))
                    .transpose()?;
                self.deploy(source, stem(to)?, previous.as_deref())
            }
            Destination::Delete => {
                let from = change.from_name().context("Deletion has no source name")?;
                let name = self.previous_container(ctx, from)?;
                if !self.exists(&name)? {
                    return Ok(ApplyResult::NoChange);
                }
                self.remove(&name)?;
                Ok(ApplyResult::Removed)
            }
        }
    }

    fn schedule_info(&self) -> ScheduleInfo {
        self.settings.schedule
    }

    fn target_path(&self) -> &Path {
        &self.settings.target_path
    }

    fn filter(&self) -> &ChangeFilter {
        &self.settings.filter
    }
}

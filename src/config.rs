//! Agent configuration (`config.toml`)
//!
//! ```toml
//! [agent]
//! jobs = 8
//! clone_root = "~/.local/state/anchor/repos"
//!
//! [[targets]]
//! name = "web"
//! url = "https://github.com/example/web-config"
//!
//! [[targets.filetransfer]]
//! target_path = "etc"
//! dest_dir = "/etc/web"
//! glob = "**/*.conf"
//! ```

use anyhow::{Context, Result, bail};
use catchup::{ChangeFilter, DispatchOptions, Method, ScheduleInfo, SharedMethod, Target};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::methods::systemd::SystemdOptions;
use crate::methods::{FileTransfer, MethodSettings, Raw, Systemd, raw, systemd};
use crate::paths;
use crate::runner::CommandRunner;
use crate::ui::parse_duration;

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct AnchorConfig {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AgentConfig {
    /// Upper bound on changes applied in parallel
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Where targets without an explicit `clone_dir` are cloned
    #[serde(default)]
    pub clone_root: Option<String>,

    /// Personal access token for HTTPS remotes
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default)]
    pub clone_dir: Option<String>,

    #[serde(default)]
    pub filetransfer: Vec<FileTransferConfig>,

    #[serde(default)]
    pub systemd: Vec<SystemdConfig>,

    #[serde(default)]
    pub raw: Vec<RawConfig>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Fields shared by every method table
#[derive(Debug, Deserialize, Clone)]
pub struct MethodConfig {
    /// Distinguishes several methods of one type on a target
    #[serde(default)]
    pub name: Option<String>,

    /// Directory inside the repository to watch
    pub target_path: String,

    #[serde(default = "default_interval")]
    pub interval: String,

    /// Delay before the first tick
    #[serde(default = "default_skew")]
    pub skew: String,

    #[serde(default)]
    pub glob: Option<String>,

    /// Overrides the method's default suffix list; empty allows all
    #[serde(default)]
    pub suffixes: Option<Vec<String>>,
}

fn default_interval() -> String {
    "60s".to_string()
}

fn default_skew() -> String {
    "0s".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileTransferConfig {
    #[serde(flatten)]
    pub method: MethodConfig,
    pub dest_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SystemdConfig {
    #[serde(flatten)]
    pub method: MethodConfig,

    #[serde(default)]
    pub root: bool,

    #[serde(default)]
    pub enable: bool,

    #[serde(default)]
    pub restart: bool,

    #[serde(default)]
    pub unit_dir: Option<String>,

    /// Enable podman's auto-update timer instead of managing units
    #[serde(default)]
    pub auto_update_all: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawConfig {
    #[serde(flatten)]
    pub method: MethodConfig,

    #[serde(default)]
    pub pull_image: bool,
}

// ============================================================================
// Loading and validation
// ============================================================================

impl AnchorConfig {
    /// Load from `path`, or the default config file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => paths::config_file()?,
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::debug!("Loaded {} target(s) from {}", config.targets.len(), path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid TOML format")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.jobs == Some(0) {
            bail!("agent.jobs must be at least 1");
        }

        let clone_root = self.clone_root().ok();
        let mut names = HashSet::new();
        let mut clone_dirs = HashMap::new();
        for target in &self.targets {
            if !names.insert(target.name.as_str()) {
                bail!("Duplicate target name '{}'", target.name);
            }
            target
                .validate()
                .with_context(|| format!("Invalid target '{}'", target.name))?;

            let clone_dir = match (&target.clone_dir, &clone_root) {
                (Some(dir), _) => paths::expand(dir),
                (None, Some(root)) => root.join(&target.name),
                (None, None) => continue,
            };
            if let Some(other) = clone_dirs.insert(clone_dir, target.name.as_str()) {
                bail!("Targets '{}' and '{}' share a clone_dir", other, target.name);
            }
        }
        Ok(())
    }

    pub fn find_target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|target| target.name == name)
    }

    pub fn dispatch_options(&self, jobs_override: Option<usize>) -> DispatchOptions {
        match jobs_override.or(self.agent.jobs) {
            Some(jobs) => DispatchOptions { jobs: jobs.max(1) },
            None => DispatchOptions::default(),
        }
    }

    fn clone_root(&self) -> Result<PathBuf> {
        match &self.agent.clone_root {
            Some(root) => Ok(paths::expand(root)),
            None => paths::clone_root(),
        }
    }

    /// Build runnable deployments for every configured target
    pub fn deployments(&self, runner: &Arc<dyn CommandRunner>) -> Result<Vec<Deployment>> {
        let clone_root = self.clone_root()?;
        self.targets
            .iter()
            .map(|target| target.deployment(&clone_root, runner))
            .collect()
    }

    /// Build the deployment of a single target
    pub fn deployment(&self, name: &str, runner: &Arc<dyn CommandRunner>) -> Result<Deployment> {
        let target = self
            .find_target(name)
            .with_context(|| format!("Unknown target '{}'", name))?;
        target.deployment(&self.clone_root()?, runner)
    }
}

impl TargetConfig {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Target name cannot be empty");
        }
        if self.name.contains('/') {
            bail!("Target name cannot contain '/'");
        }
        if self.url.trim().is_empty() {
            bail!("Target URL cannot be empty");
        }
        if self.branch.trim().is_empty() {
            bail!("Target branch cannot be empty");
        }

        let methods = self.method_kinds();
        if methods.is_empty() {
            bail!("Target has no methods");
        }

        let mut kinds = HashSet::new();
        for (kind, method) in &methods {
            if !kinds.insert(kind.as_str()) {
                bail!("Duplicate method '{}'; give each one a distinct name", kind);
            }
            method
                .validate()
                .with_context(|| format!("Invalid method '{}'", kind))?;
        }
        Ok(())
    }

    fn method_kinds(&self) -> Vec<(String, &MethodConfig)> {
        let filetransfer = self.filetransfer.iter().map(|m| &m.method);
        let systemd = self.systemd.iter().map(|m| &m.method);
        let raw = self.raw.iter().map(|m| &m.method);

        filetransfer
            .map(|m| (m.kind("filetransfer"), m))
            .chain(systemd.map(|m| (m.kind("systemd"), m)))
            .chain(raw.map(|m| (m.kind("raw"), m)))
            .collect()
    }

    fn deployment(&self, clone_root: &Path, runner: &Arc<dyn CommandRunner>) -> Result<Deployment> {
        let clone_dir = match &self.clone_dir {
            Some(dir) => paths::expand(dir),
            None => clone_root.join(&self.name),
        };
        let target = Arc::new(Target::new(&self.name, &self.url, &self.branch, clone_dir));

        let mut methods: Vec<SharedMethod> = Vec::new();

        for config in &self.filetransfer {
            let settings = config.method.settings("filetransfer", &[])?;
            let method = FileTransfer::new(settings, paths::expand(&config.dest_dir));
            log::debug!(
                "{}: {} copies into {}",
                self.name,
                method.kind(),
                method.dest_dir().display()
            );
            methods.push(Arc::new(method));
        }

        for config in &self.systemd {
            let settings = config.method.settings("systemd", systemd::DEFAULT_SUFFIXES)?;
            let options = SystemdOptions {
                root: config.root,
                enable: config.enable,
                restart: config.restart,
                unit_dir: config.unit_dir.as_deref().map(paths::expand),
                auto_update_all: config.auto_update_all,
            };
            let method = Systemd::new(settings, options, runner.clone())?;
            log::debug!(
                "{}: {} places units in {}",
                self.name,
                method.kind(),
                method.unit_dir().display()
            );
            methods.push(Arc::new(method));
        }

        for config in &self.raw {
            let settings = config.method.settings("raw", raw::DEFAULT_SUFFIXES)?;
            methods.push(Arc::new(Raw::new(settings, config.pull_image, runner.clone())));
        }

        Ok(Deployment { target, methods })
    }
}

impl MethodConfig {
    /// Tag namespace: the method type, suffixed with the name if one is set
    pub fn kind(&self, method_type: &str) -> String {
        match &self.name {
            Some(name) => format!("{}-{}", method_type, name),
            None => method_type.to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name
            && (name.is_empty() || !name.chars().all(is_name_char))
        {
            bail!("Method name '{}' may only contain letters, digits, '-' and '_'", name);
        }
        let target_path = Path::new(&self.target_path);
        if target_path.is_absolute() {
            bail!("target_path must be relative to the repository root");
        }
        if !target_path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("target_path must stay inside the repository");
        }
        self.schedule()?;
        self.filter(&[])?;
        Ok(())
    }

    fn schedule(&self) -> Result<ScheduleInfo> {
        let interval = parse_duration(&self.interval)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid interval '{}'", self.interval))?;
        if interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        let jitter = parse_duration(&self.skew)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid skew '{}'", self.skew))?;
        Ok(ScheduleInfo { interval, jitter })
    }

    fn filter(&self, default_suffixes: &[&str]) -> Result<ChangeFilter> {
        let suffixes = match &self.suffixes {
            Some(suffixes) if suffixes.is_empty() => None,
            Some(suffixes) => Some(suffixes.clone()),
            None if default_suffixes.is_empty() => None,
            None => Some(default_suffixes.iter().map(ToString::to_string).collect()),
        };
        Ok(ChangeFilter::new(suffixes, self.glob.as_deref())?)
    }

    fn settings(&self, method_type: &str, default_suffixes: &[&str]) -> Result<MethodSettings> {
        Ok(MethodSettings {
            kind: self.kind(method_type),
            target_path: PathBuf::from(&self.target_path),
            schedule: self.schedule()?,
            filter: self.filter(default_suffixes)?,
        })
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

// ============================================================================
// Runtime view
// ============================================================================

/// A target with the methods applied from it
#[derive(Debug, Clone)]
pub struct Deployment {
    pub target: Arc<Target>,
    pub methods: Vec<SharedMethod>,
}

impl Deployment {
    pub fn find_method(&self, kind: &str) -> Option<&SharedMethod> {
        self.methods.iter().find(|method| method.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;
    use std::time::Duration;

    const EXAMPLE: &str = r#"
[agent]
jobs = 4
clone_root = "/var/lib/anchor/repos"

[[targets]]
name = "web"
url = "https://github.com/example/web-config"

[[targets.filetransfer]]
target_path = "etc"
dest_dir = "/etc/web"
interval = "30s"
skew = "500ms"
glob = "**/*.conf"

[[targets.filetransfer]]
name = "certs"
target_path = "certs"
dest_dir = "/etc/ssl/web"

[[targets.systemd]]
target_path = "units"
root = true
enable = true

[[targets.raw]]
target_path = "containers"
pull_image = true
"#;

    fn runner() -> Arc<dyn CommandRunner> {
        Arc::new(RecordingRunner::new())
    }

    #[test]
    fn test_parse_example() {
        let config = AnchorConfig::parse(EXAMPLE).unwrap();

        assert_eq!(config.agent.jobs, Some(4));
        let web = config.find_target("web").unwrap();
        assert_eq!(web.branch, "main");
        assert_eq!(web.filetransfer.len(), 2);
        assert_eq!(web.filetransfer[0].method.interval, "30s");
        assert_eq!(web.filetransfer[1].method.interval, "60s");
        assert!(web.systemd[0].root);
        assert!(web.raw[0].pull_image);
    }

    #[test]
    fn test_deployment_builds_every_method() {
        let config = AnchorConfig::parse(EXAMPLE).unwrap();
        let deployment = config.deployment("web", &runner()).unwrap();

        assert_eq!(
            deployment.target.clone_dir(),
            Path::new("/var/lib/anchor/repos/web")
        );
        let kinds: Vec<&str> = deployment.methods.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["filetransfer", "filetransfer-certs", "systemd", "raw"]);

        let etc = deployment.find_method("filetransfer").unwrap();
        assert_eq!(
            etc.schedule_info(),
            ScheduleInfo {
                interval: Duration::from_secs(30),
                jitter: Duration::from_millis(500),
            }
        );
        assert_eq!(etc.filter().glob(), "**/*.conf");
        assert_eq!(etc.target_path(), Path::new("etc"));

        let units = deployment.find_method("systemd").unwrap();
        assert_eq!(units.filter().suffixes(), Some(&[".service".to_string()][..]));
        assert!(units.filter().matches("web.service"));
        assert!(!units.filter().matches("README.md"));
    }

    #[test]
    fn test_empty_suffixes_allow_everything() {
        let config = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"

[[targets.raw]]
target_path = "containers"
suffixes = []
"#,
        )
        .unwrap();
        let deployment = config.deployment("web", &runner()).unwrap();
        assert!(deployment.methods[0].filter().suffixes().is_none());
    }

    #[test]
    fn test_dispatch_options() {
        let config = AnchorConfig::parse(EXAMPLE).unwrap();
        assert_eq!(config.dispatch_options(None).jobs, 4);
        assert_eq!(config.dispatch_options(Some(2)).jobs, 2);
        assert_eq!(AnchorConfig::default().dispatch_options(None).jobs, 8);
    }

    #[test]
    fn test_rejects_duplicate_targets() {
        let err = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/a.git"
[[targets.raw]]
target_path = "a"

[[targets]]
name = "web"
url = "https://example.com/b.git"
[[targets.raw]]
target_path = "b"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate target name 'web'"));
    }

    #[test]
    fn test_rejects_target_without_methods() {
        let err = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Target has no methods"));
    }

    #[test]
    fn test_rejects_duplicate_method_kinds() {
        let err = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"
[[targets.filetransfer]]
target_path = "a"
dest_dir = "/tmp/a"
[[targets.filetransfer]]
target_path = "b"
dest_dir = "/tmp/b"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate method 'filetransfer'"));
    }

    #[test]
    fn test_rejects_bad_glob_and_interval() {
        let bad_glob = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"
[[targets.raw]]
target_path = "c"
glob = "[unclosed"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", bad_glob).contains("[unclosed"));

        let bad_interval = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"
[[targets.raw]]
target_path = "c"
interval = "soon"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", bad_interval).contains("Invalid interval 'soon'"));
    }

    #[test]
    fn test_rejects_absolute_target_path() {
        let err = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"
[[targets.raw]]
target_path = "/containers"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("target_path must be relative"));
    }

    #[test]
    fn test_rejects_target_path_leaving_the_clone() {
        let err = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"
[[targets.systemd]]
target_path = "../units"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("target_path must stay inside the repository"));

        let nested = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/web.git"
[[targets.systemd]]
target_path = "./deploy/units"
"#,
        );
        assert!(nested.is_ok());
    }

    #[test]
    fn test_rejects_shared_clone_dir() {
        let err = AnchorConfig::parse(
            r#"
[[targets]]
name = "web"
url = "https://example.com/a.git"
clone_dir = "/srv/clones/shared"
[[targets.raw]]
target_path = "a"

[[targets]]
name = "api"
url = "https://example.com/b.git"
clone_dir = "/srv/clones/shared"
[[targets.raw]]
target_path = "b"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Targets 'web' and 'api' share a clone_dir"));
    }

    #[test]
    fn test_rejects_clone_dir_colliding_with_default() {
        let err = AnchorConfig::parse(
            r#"
[agent]
clone_root = "/srv/clones"

[[targets]]
name = "web"
url = "https://example.com/a.git"
[[targets.raw]]
target_path = "a"

[[targets]]
name = "api"
url = "https://example.com/b.git"
clone_dir = "/srv/clones/web"
[[targets.raw]]
target_path = "b"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("share a clone_dir"));
    }

    #[test]
    fn test_auto_update_all_parses() {
        let config = AnchorConfig::parse(
            r#"
[[targets]]
name = "host"
url = "https://example.com/host.git"
[[targets.systemd]]
name = "autoupdate"
target_path = "units"
auto_update_all = true
"#,
        )
        .unwrap();
        let host = config.find_target("host").unwrap();
        assert!(host.systemd[0].auto_update_all);
        assert!(!host.systemd[0].root);

        let recording = Arc::new(RecordingRunner::new());
        let runner: Arc<dyn CommandRunner> = recording.clone();
        let deployment = config.deployment("host", &runner).unwrap();
        deployment.find_method("systemd-autoupdate").unwrap().prepare().unwrap();
        assert_eq!(
            recording.calls(),
            vec![
                "systemctl enable --now podman-auto-update.timer",
                "systemctl enable --now podman-auto-update.service",
            ]
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = AnchorConfig::load(Some(&temp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Could not read config file"));
    }
}

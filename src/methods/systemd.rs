//! Systemd method - place unit files and manage their services
//!
//! Units are flat in the unit directory, so `a/web.service` and
//! `b/web.service` are the same unit. Changes naming one unit run one at
//! a time, and a deletion leaves the unit alone while another file in the
//! checked-out tree still provides it.

use anyhow::{Context, Result};
use catchup::{ApplyContext, ApplyResult, Change, ChangeFilter, Destination, Method, ScheduleInfo};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use walkdir::WalkDir;

use super::{MethodSettings, base_name, place_file, remove_file};
use crate::runner::CommandRunner;

/// Unit directory for system-wide units
pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// Suffixes the method picks up when none are configured
pub const DEFAULT_SUFFIXES: &[&str] = &[".service"];

const AUTO_UPDATE_TIMER: &str = "podman-auto-update.timer";
const AUTO_UPDATE_SERVICE: &str = "podman-auto-update.service";

/// How the method manages the units it places
#[derive(Debug, Clone, Default)]
pub struct SystemdOptions {
    /// System units (`/etc/systemd/system`) instead of user units
    pub root: bool,
    /// `enable --now` every placed unit
    pub enable: bool,
    /// Restart placed units on every apply; implies `enable`
    pub restart: bool,
    /// Override for the directory units are written to
    pub unit_dir: Option<PathBuf>,
    /// Only enable podman's auto-update timer and service; unit files in
    /// the repository are ignored and the other options have no effect
    pub auto_update_all: bool,
}

/// Places `.service` units and drives `systemctl`
#[derive(Debug)]
pub struct Systemd {
    settings: MethodSettings,
    root: bool,
    enable: bool,
    restart: bool,
    unit_dir: PathBuf,
    auto_update_all: bool,
    auto_update_ready: AtomicBool,
    units: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    runner: Arc<dyn CommandRunner>,
}

impl Systemd {
    pub fn new(
        settings: MethodSettings,
        options: SystemdOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let root = options.root || options.auto_update_all;
        let unit_dir = match options.unit_dir {
            Some(dir) => dir,
            None if root => PathBuf::from(SYSTEM_UNIT_DIR),
            None => dirs::home_dir()
                .context("Could not determine home directory for user units")?
                .join(".config")
                .join("systemd")
                .join("user"),
        };

        Ok(Self {
            settings,
            root,
            enable: options.enable || options.restart || options.auto_update_all,
            restart: options.restart && !options.auto_update_all,
            unit_dir,
            auto_update_all: options.auto_update_all,
            auto_update_ready: AtomicBool::new(false),
            units: Mutex::new(HashMap::new()),
            runner,
        })
    }

    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }

    fn systemctl(&self, args: &[&str]) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if !self.root {
            full.push("--user");
        }
        full.extend_from_slice(args);
        self.runner.run_checked("systemctl", &full)
    }

    fn unit_lock(&self, unit: &str) -> Arc<Mutex<()>> {
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(units.entry(unit.to_string()).or_default())
    }

    /// Another file under the watched directory still provides `unit`
    fn still_provided(&self, ctx: &ApplyContext<'_>, unit: &str) -> bool {
        let root = ctx.target.clone_dir().join(&self.settings.target_path);
        WalkDir::new(&root)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == unit)
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&root).ok()?;
                Some(relative.to_string_lossy().replace('\\', "/"))
            })
            .any(|name| self.settings.filter.matches(&name))
    }

    fn start(&self, unit: &str) -> Result<()> {
        self.systemctl(&["daemon-reload"])?;
        if self.restart {
            self.systemctl(&["enable", unit])?;
            self.systemctl(&["restart", unit])?;
            log::info!("{}: restarted {}", self.settings.kind, unit);
        } else {
            self.systemctl(&["enable", "--now", unit])?;
            log::info!("{}: enabled {}", self.settings.kind, unit);
        }
        Ok(())
    }

    fn stop(&self, unit: &str) -> Result<ApplyResult> {
        if self.enable {
            // a unit that is already gone cannot be disabled
            if let Err(e) = self.systemctl(&["disable", "--now", unit]) {
                log::warn!("{}: could not disable {}: {:#}", self.settings.kind, unit, e);
            }
        }

        let result = remove_file(&self.unit_dir.join(unit))?;
        if self.enable && result.is_change() {
            self.systemctl(&["daemon-reload"])?;
        }
        Ok(result)
    }
}

impl Method for Systemd {
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

        if self.auto_update_all {
            return Ok(ApplyResult::Skipped {
                reason: "auto-update mode ignores unit files".to_string(),
            });
        }

        match destination {
            Destination::Path(source) => {
                let unit = base_name(change.to_name().context("Change has no target name")?)?;
                let lock = self.unit_lock(unit);
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

                let result = place_file(source, &self.unit_dir.join(unit))?;
                if self.enable {
                    self.start(unit)?;
                }
                Ok(result)
            }
            Destination::Delete => {
                let unit = base_name(change.from_name().context("Deletion has no source name")?)?;
                let lock = self.unit_lock(unit);
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

                if self.still_provided(ctx, unit) {
                    log::debug!("{}: {} moved, keeping the unit", self.settings.kind, unit);
                    return Ok(ApplyResult::NoChange);
                }
                self.stop(unit)
            }
        }
    }

    /// Enable podman's auto-update timer and service once per process
    fn prepare(&self) -> Result<()> {
        if !self.auto_update_all || self.auto_update_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.systemctl(&["enable", "--now", AUTO_UPDATE_TIMER])?;
        self.systemctl(&["enable", "--now", AUTO_UPDATE_SERVICE])?;
        self.auto_update_ready.store(true, Ordering::SeqCst);
        log::info!("{}: podman auto-update enabled", self.settings.kind);
        Ok(())
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

//! Deployment methods shipped with the agent
//!
//! Every method watches one directory of a target and turns each change
//! under it into host state:
//! - `filetransfer` - copy files into a directory
//! - `systemd` - place unit files and (re)start them
//! - `raw` - run containers described by JSON/YAML specs through podman

pub mod filetransfer;
pub mod raw;
pub mod systemd;

pub use filetransfer::FileTransfer;
pub use raw::Raw;
pub use systemd::Systemd;

use anyhow::{Context, Result, bail};
use catchup::{ApplyResult, ChangeFilter, ScheduleInfo};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Settings every method carries regardless of what it does
#[derive(Debug, Clone)]
pub struct MethodSettings {
    /// Tag namespace, unique per target
    pub kind: String,
    /// Directory inside the repository the method watches
    pub target_path: PathBuf,
    pub schedule: ScheduleInfo,
    pub filter: ChangeFilter,
}

/// Copy `source` to `dest` unless `dest` already holds the same bytes
///
/// The new content is written next to `dest` and renamed over it, so a
/// reader never sees a half-written file.
pub fn place_file(source: &Path, dest: &Path) -> Result<ApplyResult> {
    let content =
        fs::read(source).with_context(|| format!("Failed to read {}", source.display()))?;

    let existed = match fs::read(dest) {
        Ok(existing) => {
            if blake3::hash(&existing) == blake3::hash(&content) {
                log::debug!("{} already up to date", dest.display());
                return Ok(ApplyResult::NoChange);
            }
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", dest.display()));
        }
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let staging = staging_path(dest)?;
    fs::write(&staging, &content)
        .with_context(|| format!("Failed to write {}", staging.display()))?;
    let permissions = fs::metadata(source)
        .with_context(|| format!("Failed to stat {}", source.display()))?
        .permissions();
    fs::set_permissions(&staging, permissions)
        .with_context(|| format!("Failed to set permissions on {}", staging.display()))?;
    fs::rename(&staging, dest)
        .with_context(|| format!("Failed to move {} into place", dest.display()))?;

    log::info!("placed {}", dest.display());
    Ok(if existed {
        ApplyResult::Modified
    } else {
        ApplyResult::Created
    })
}

/// Remove `path`; a file that is already gone is not an error
pub fn remove_file(path: &Path) -> Result<ApplyResult> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::info!("removed {}", path.display());
            Ok(ApplyResult::Removed)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(ApplyResult::NoChange),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Last component of a change name (`"nested/web.conf"` -> `"web.conf"`)
pub fn base_name(name: &str) -> Result<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Change name {name:?} has no file name"))
}

/// A change name as a path that stays below the directory it is joined to
pub fn relative_path(name: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => bail!("Change name {name:?} escapes its directory"),
        }
    }
    if path.as_os_str().is_empty() {
        bail!("Change name {name:?} has no file name");
    }
    Ok(path)
}

fn staging_path(dest: &Path) -> Result<PathBuf> {
    let name = dest
        .file_name()
        .with_context(|| format!("{} has no file name", dest.display()))?;
    Ok(dest.with_file_name(format!(".{}.anchor-tmp", name.to_string_lossy())))
}

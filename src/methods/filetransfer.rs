//! File transfer method - copy changed files into a host directory

use anyhow::{Context, Result};
use catchup::{ApplyContext, ApplyResult, Change, ChangeFilter, Destination, Method, ScheduleInfo};
use std::path::{Path, PathBuf};

use super::{MethodSettings, place_file, relative_path, remove_file};

/// Mirrors the watched directory into `dest_dir`, keeping relative paths
#[derive(Debug)]
pub struct FileTransfer {
    settings: MethodSettings,
    dest_dir: PathBuf,
}

impl FileTransfer {
    pub fn new(settings: MethodSettings, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            dest_dir: dest_dir.into(),
        }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    fn host_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.dest_dir.join(relative_path(name)?))
    }
}

impl Method for FileTransfer {
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
                if let Some(from) = change.from_name()
                    && relative_path(from)? != relative_path(to)?
                {
                    remove_file(&self.host_path(from)?)?;
                }
                place_file(source, &self.host_path(to)?)
            }
            Destination::Delete => {
                let from = change.from_name().context("Deletion has no source name")?;
                remove_file(&self.host_path(from)?)
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

#[cfg(test)]
mod tests {
    use super::*;
    use catchup::{CancelToken, Changeset, CommitId, DispatchOptions, Target, apply_all};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        clone: PathBuf,
        target: Target,
        method: FileTransfer,
        cancel: CancelToken,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let clone = temp.path().join("clone");
            fs::create_dir_all(clone.join("etc")).unwrap();
            let target = Target::new("web", "https://example.com/web.git", "main", &clone);
            let method = FileTransfer::new(
                MethodSettings {
                    kind: "filetransfer".to_string(),
                    target_path: PathBuf::from("etc"),
                    schedule: ScheduleInfo {
                        interval: Duration::from_secs(60),
                        jitter: Duration::ZERO,
                    },
                    filter: ChangeFilter::allow_all(),
                },
                temp.path().join("host"),
            );
            Self {
                _temp: temp,
                clone,
                target,
                method,
                cancel: CancelToken::new(),
            }
        }

        fn write(&self, name: &str, content: &str) -> Destination {
            let path = self.clone.join("etc").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            Destination::Path(path)
        }

        fn apply(&self, change: &Change, destination: &Destination) -> Result<ApplyResult> {
            let ctx = ApplyContext::new(&self.target, CommitId::ZERO, CommitId::ZERO, &self.cancel);
            self.method.apply(change, destination, &ctx)
        }

        fn host(&self, name: &str) -> PathBuf {
            self.method.dest_dir().join(name)
        }
    }

    #[test]
    fn test_create_then_replay_is_a_no_op() {
        let fx = Fixture::new();
        let dest = fx.write("web.conf", "port = 80");
        let change = Change::create("web.conf");

        assert!(matches!(fx.apply(&change, &dest).unwrap(), ApplyResult::Created));
        assert!(matches!(fx.apply(&change, &dest).unwrap(), ApplyResult::NoChange));
        assert_eq!(fs::read_to_string(fx.host("web.conf")).unwrap(), "port = 80");
    }

    #[test]
    fn test_nested_files_keep_their_relative_path() {
        let fx = Fixture::new();
        let dest = fx.write("sites/api.conf", "upstream api");

        fx.apply(&Change::create("sites/api.conf"), &dest).unwrap();
        assert!(fx.host("sites/api.conf").exists());
        assert!(!fx.host("api.conf").exists());
    }

    #[test]
    fn test_rename_removes_old_path() {
        let fx = Fixture::new();
        let old = fx.write("web.conf", "port = 80");
        fx.apply(&Change::create("web.conf"), &old).unwrap();

        let new = fx.write("nested/web.conf", "port = 80");
        let rename = Change::new(Some("web.conf".into()), Some("nested/web.conf".into()));
        fx.apply(&rename, &new).unwrap();

        assert!(!fx.host("web.conf").exists());
        assert_eq!(fs::read_to_string(fx.host("nested/web.conf")).unwrap(), "port = 80");
    }

    #[test]
    fn test_escaping_name_is_refused() {
        let fx = Fixture::new();
        let dest = fx.write("web.conf", "port = 80");

        assert!(fx.apply(&Change::create("../web.conf"), &dest).is_err());
        assert!(fx.apply(&Change::delete("../web.conf"), &Destination::Delete).is_err());
    }

    #[test]
    fn test_concurrent_move_keeps_the_file() {
        for _ in 0..50 {
            let fx = Fixture::new();
            let old = fx.write("web.conf", "port = 80");
            fx.apply(&Change::create("web.conf"), &old).unwrap();
            fs::remove_file(fx.clone.join("etc/web.conf")).unwrap();
            let new = fx.write("nested/web.conf", "port = 80");

            let mut changeset = Changeset::new();
            changeset.insert(Change::delete("web.conf"), Destination::Delete);
            changeset.insert(Change::create("nested/web.conf"), new);
            let ctx = ApplyContext::new(&fx.target, CommitId::ZERO, CommitId::ZERO, &fx.cancel);
            let summary =
                apply_all(&fx.method, &changeset, &ctx, &DispatchOptions { jobs: 8 }).unwrap();

            assert_eq!((summary.created, summary.removed), (1, 1));
            assert!(!fx.host("web.conf").exists());
            assert_eq!(fs::read_to_string(fx.host("nested/web.conf")).unwrap(), "port = 80");
        }
    }

    #[test]
    fn test_modify_overwrites() {
        let fx = Fixture::new();
        let first = fx.write("web.conf", "port = 80");
        fx.apply(&Change::create("web.conf"), &first).unwrap();

        let second = fx.write("web.conf", "port = 8080");
        assert!(matches!(
            fx.apply(&Change::modify("web.conf"), &second).unwrap(),
            ApplyResult::Modified
        ));
        assert_eq!(fs::read_to_string(fx.host("web.conf")).unwrap(), "port = 8080");
    }

    #[test]
    fn test_delete_removes_and_tolerates_replay() {
        let fx = Fixture::new();
        let dest = fx.write("web.conf", "port = 80");
        fx.apply(&Change::create("web.conf"), &dest).unwrap();

        let change = Change::delete("web.conf");
        assert!(matches!(
            fx.apply(&change, &Destination::Delete).unwrap(),
            ApplyResult::Removed
        ));
        assert!(matches!(
            fx.apply(&change, &Destination::Delete).unwrap(),
            ApplyResult::NoChange
        ));
        assert!(!fx.host("web.conf").exists());
    }

    #[test]
    fn test_cancelled_context_refuses_work() {
        let fx = Fixture::new();
        let dest = fx.write("web.conf", "port = 80");
        fx.cancel.cancel();

        assert!(fx.apply(&Change::create("web.conf"), &dest).is_err());
        assert!(!fx.host("web.conf").exists());
    }
}

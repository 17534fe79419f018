//! In-memory repository and recording method shared by the unit tests

use crate::change::{Change, Destination};
use crate::context::{ApplyContext, CancelToken};
use crate::method::Method;
use crate::repo::{Repository, TagError};
use crate::select::ChangeFilter;
use crate::tags::TagKind;
use crate::target::Target;
use crate::types::{ApplyResult, CommitId, ScheduleInfo};
use anyhow::{Result, bail};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Commit id whose bytes are all `n`
pub(crate) fn commit(n: u8) -> CommitId {
    CommitId::from_bytes(&[n; 20]).unwrap()
}

type Tree = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct MemoryState {
    commits: HashMap<CommitId, Tree>,
    head: CommitId,
    next: u8,
    tags: HashMap<String, CommitId>,
    injected: Vec<Change>,
    existing_on_create: bool,
    fail_fetch: bool,
    fetches: usize,
}

/// Repository whose commits are flat path -> content maps
#[derive(Debug, Default)]
pub(crate) struct MemoryRepo {
    state: Mutex<MemoryState>,
}

impl MemoryRepo {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a commit holding exactly `files` and move the head to it
    pub(crate) fn commit(&self, files: &[(&str, &str)]) -> CommitId {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let id = commit(state.next);
        let tree = files
            .iter()
            .map(|(path, content)| ((*path).to_string(), (*content).to_string()))
            .collect();
        state.commits.insert(id, tree);
        state.head = id;
        id
    }

    pub(crate) fn tag(&self, name: &str) -> Option<CommitId> {
        self.state.lock().unwrap().tags.get(name).copied()
    }

    pub(crate) fn set_tag(&self, name: &str, id: CommitId) {
        self.state.lock().unwrap().tags.insert(name.to_string(), id);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub(crate) fn fail_fetch(&self) {
        self.state.lock().unwrap().fail_fetch = true;
    }

    /// Make every create report "already exists" without creating
    pub(crate) fn report_existing_on_create(&self) {
        self.state.lock().unwrap().existing_on_create = true;
    }

    /// Append a raw change to every diff result
    pub(crate) fn inject_change(&self, change: Change) {
        self.state.lock().unwrap().injected.push(change);
    }

    fn subtree(state: &MemoryState, id: CommitId, subpath: &Path) -> Result<Tree> {
        if id.is_zero() {
            return Ok(Tree::new());
        }
        let Some(tree) = state.commits.get(&id) else {
            bail!("unknown commit {id}");
        };

        let prefix = subpath.to_string_lossy();
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.trim_end_matches('/'))
        };

        Ok(tree
            .iter()
            .filter_map(|(path, content)| {
                path.strip_prefix(&prefix)
                    .map(|rel| (rel.to_string(), content.clone()))
            })
            .collect())
    }
}

impl Repository for MemoryRepo {
    fn fetch_latest(&self, _target: &Target) -> Result<CommitId> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if state.fail_fetch {
            bail!("remote unreachable");
        }
        Ok(state.head)
    }

    fn read_tag(&self, _target: &Target, name: &str) -> Result<Option<CommitId>> {
        Ok(self.tag(name))
    }

    fn create_tag(&self, _target: &Target, name: &str, id: CommitId) -> Result<(), TagError> {
        let mut state = self.state.lock().unwrap();
        if state.existing_on_create || state.tags.contains_key(name) {
            return Err(TagError::AlreadyExists(name.to_string()));
        }
        state.tags.insert(name.to_string(), id);
        Ok(())
    }

    fn delete_tag(&self, _target: &Target, name: &str) -> Result<(), TagError> {
        match self.state.lock().unwrap().tags.remove(name) {
            Some(_) => Ok(()),
            None => Err(TagError::NotFound(name.to_string())),
        }
    }

    fn diff(
        &self,
        _target: &Target,
        subpath: &Path,
        from: CommitId,
        to: CommitId,
    ) -> Result<Vec<Change>> {
        let state = self.state.lock().unwrap();
        let old = Self::subtree(&state, from, subpath)?;
        let new = Self::subtree(&state, to, subpath)?;

        let mut changes = Vec::new();
        for (path, content) in &new {
            match old.get(path) {
                None => changes.push(Change::create(path.clone())),
                Some(previous) if previous != content => changes.push(Change::modify(path.clone())),
                Some(_) => {}
            }
        }
        for path in old.keys() {
            if !new.contains_key(path) {
                changes.push(Change::delete(path.clone()));
            }
        }
        changes.extend(state.injected.iter().cloned());
        Ok(changes)
    }

    fn read_file(&self, _target: &Target, id: CommitId, path: &Path) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().unwrap();
        let tree = Self::subtree(&state, id, Path::new(""))?;
        Ok(tree
            .get(path.to_string_lossy().as_ref())
            .map(|content| content.as_bytes().to_vec()))
    }
}

/// One observed `apply` call
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub change: Change,
    #[allow(dead_code)]
    pub destination: Destination,
    pub from: CommitId,
    pub to: CommitId,
    /// Progress tag seen while applying, when the method watches a repo
    pub progress: Option<CommitId>,
    /// Content of the change's from-name at `from`
    pub previous: Option<String>,
}

/// Method that records calls and fails on request
#[derive(Debug)]
pub(crate) struct RecordingMethod {
    kind: String,
    subpath: PathBuf,
    filter: ChangeFilter,
    fail_on: Mutex<Vec<String>>,
    panic_on: Vec<String>,
    cancel_on_apply: Option<CancelToken>,
    watched: Option<Arc<MemoryRepo>>,
    fail_prepare: bool,
    prepares: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl RecordingMethod {
    pub(crate) fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            subpath: PathBuf::from("units"),
            filter: ChangeFilter::allow_all(),
            fail_on: Mutex::new(Vec::new()),
            panic_on: Vec::new(),
            cancel_on_apply: None,
            watched: None,
            fail_prepare: false,
            prepares: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_filter(mut self, filter: ChangeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub(crate) fn failing_on(self, name: &str) -> Self {
        self.fail_on(name);
        self
    }

    pub(crate) fn panicking_on(mut self, name: &str) -> Self {
        self.panic_on.push(name.to_string());
        self
    }

    /// Cancel `token` from inside the first apply call
    pub(crate) fn cancelling(mut self, token: CancelToken) -> Self {
        self.cancel_on_apply = Some(token);
        self
    }

    /// Record this method's progress tag in `repo` on every apply
    pub(crate) fn watching(mut self, repo: Arc<MemoryRepo>) -> Self {
        self.watched = Some(repo);
        self
    }

    pub(crate) fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub(crate) fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_on(&self, name: &str) {
        self.fail_on.lock().unwrap().push(name.to_string());
    }

    /// Stop failing on every name
    pub(crate) fn heal(&self) {
        self.fail_on.lock().unwrap().clear();
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl Method for RecordingMethod {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn apply(
        &self,
        change: &Change,
        destination: &Destination,
        ctx: &ApplyContext<'_>,
    ) -> Result<ApplyResult> {
        self.calls.lock().unwrap().push(Call {
            change: change.clone(),
            destination: destination.clone(),
            from: ctx.from,
            to: ctx.to,
            progress: self
                .watched
                .as_ref()
                .and_then(|repo| repo.tag(&TagKind::Progress.name(&self.kind))),
            previous: match change.from_name() {
                Some(name) => ctx
                    .read_previous(name)?
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
                None => None,
            },
        });

        let name = change.name().unwrap_or_default();
        if self.panic_on.iter().any(|n| n == name) {
            panic!("boom on {name}");
        }
        if self.fail_on.lock().unwrap().iter().any(|n| n == name) {
            bail!("refusing to apply {name}");
        }
        if let Some(token) = &self.cancel_on_apply {
            token.cancel();
        }

        Ok(match (change.from_name(), change.to_name()) {
            (None, Some(_)) => ApplyResult::Created,
            (Some(_), Some(_)) => ApplyResult::Modified,
            _ => ApplyResult::Removed,
        })
    }

    fn prepare(&self) -> Result<()> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare {
            bail!("host setup unavailable");
        }
        Ok(())
    }

    fn schedule_info(&self) -> ScheduleInfo {
        ScheduleInfo {
            interval: Duration::from_secs(60),
            jitter: Duration::ZERO,
        }
    }

    fn target_path(&self) -> &Path {
        &self.subpath
    }

    fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}

//! git2-backed repository accessor
//!
//! Each target is a regular (non-bare) clone with an `origin` remote.
//! Fetching moves the local branch to the remote head and force-checks it
//! out, so methods read file content straight from the working tree.
//! The progress markers are lightweight tags under `refs/tags/`.

use anyhow::{Context, Result, anyhow};
use catchup::{Change, CommitId, Repository, TagError, Target};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, CredentialType, Delta, ErrorCode, FetchOptions, ObjectType, Oid, RemoteCallbacks};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Credential attempts per operation before libgit2 is told to give up
const MAX_AUTH_ATTEMPTS: usize = 3;

/// Username sent with a personal access token
const TOKEN_USERNAME: &str = "anchor";

/// Repository accessor over local git2 clones
#[derive(Debug, Default, Clone)]
pub struct GitRepository {
    token: Option<String>,
}

impl GitRepository {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    /// Clone `target` into its clone dir unless a repository is already there
    ///
    /// Returns whether a clone was made.
    pub fn ensure_clone(&self, target: &Target) -> Result<bool> {
        let dir = target.clone_dir();
        if git2::Repository::open(dir).is_ok() {
            log::debug!("{}: using existing clone at {}", target.name(), dir.display());
            return Ok(false);
        }

        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        log::info!("{}: cloning {} into {}", target.name(), target.url(), dir.display());
        let mut builder = RepoBuilder::new();
        builder.branch(target.branch());
        builder.fetch_options(self.fetch_options());
        builder.clone(target.url(), dir).with_context(|| {
            format!(
                "Failed to clone {} (branch {}) into {}",
                target.url(),
                target.branch(),
                dir.display()
            )
        })?;

        Ok(true)
    }

    fn open(target: &Target) -> Result<git2::Repository> {
        git2::Repository::open(target.clone_dir()).with_context(|| {
            format!(
                "Failed to open repository for {} at {}",
                target.name(),
                target.clone_dir().display()
            )
        })
    }

    fn fetch_options(&self) -> FetchOptions<'static> {
        let token = self.token.clone();
        let mut attempts = 0;

        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username, allowed| {
            attempts += 1;
            if attempts > MAX_AUTH_ATTEMPTS {
                return Err(git2::Error::from_str("no accepted credentials"));
            }

            if allowed.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username.unwrap_or("git"));
            }

            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(token) = &token {
                    return Cred::userpass_plaintext(TOKEN_USERNAME, token);
                }
                let config = git2::Config::open_default()?;
                return Cred::credential_helper(&config, url, username);
            }

            Cred::default()
        });

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options
    }

    fn tag_error(name: &str, err: git2::Error) -> TagError {
        match err.code() {
            ErrorCode::Exists => TagError::AlreadyExists(name.to_string()),
            ErrorCode::NotFound => TagError::NotFound(name.to_string()),
            _ => TagError::Repository(anyhow!(err).context(format!("tag {name}"))),
        }
    }

    /// Tree at `subpath` in `commit`; `None` stands for the empty tree
    fn subtree<'r>(
        repo: &'r git2::Repository,
        commit: CommitId,
        subpath: &Path,
    ) -> Result<Option<git2::Tree<'r>>> {
        if commit.is_zero() {
            return Ok(None);
        }

        let oid = to_oid(commit)?;
        let tree = repo
            .find_commit(oid)
            .with_context(|| format!("Commit {commit} not found"))?
            .tree()?;

        let subpath = normalize(subpath);
        if subpath.as_os_str().is_empty() {
            return Ok(Some(tree));
        }

        match tree.get_path(&subpath) {
            Ok(entry) if entry.kind() == Some(ObjectType::Tree) => {
                Ok(Some(entry.to_object(repo)?.peel_to_tree()?))
            }
            Ok(_) => Ok(None),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(anyhow!(err).context(format!(
                "Failed to resolve {} in {}",
                subpath.display(),
                commit.short()
            ))),
        }
    }
}

impl Repository for GitRepository {
    fn fetch_latest(&self, target: &Target) -> Result<CommitId> {
        let repo = Self::open(target)?;
        let branch = target.branch();
        let remote_ref = format!("refs/remotes/origin/{branch}");
        let local_ref = format!("refs/heads/{branch}");

        let mut remote = repo
            .find_remote("origin")
            .context("Clone has no origin remote")?;
        let refspec = format!("+refs/heads/{branch}:{remote_ref}");
        remote
            .fetch(&[refspec.as_str()], Some(&mut self.fetch_options()), None)
            .with_context(|| format!("Failed to fetch {branch} from {}", target.url()))?;

        let oid = repo
            .refname_to_id(&remote_ref)
            .with_context(|| format!("Remote branch {branch} not found"))?;
        let commit = repo.find_commit(oid)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))
            .with_context(|| format!("Failed to check out {oid}"))?;
        repo.reference(&local_ref, oid, true, "anchor: fetch")?;
        repo.set_head(&local_ref)?;

        to_commit_id(oid)
    }

    fn read_tag(&self, target: &Target, name: &str) -> Result<Option<CommitId>> {
        let repo = Self::open(target)?;
        match repo.find_reference(&format!("refs/tags/{name}")) {
            Ok(reference) => {
                let commit = reference.peel_to_commit()?;
                to_commit_id(commit.id()).map(Some)
            }
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(anyhow!(err).context(format!("Failed to read tag {name}"))),
        }
    }

    fn create_tag(&self, target: &Target, name: &str, commit: CommitId) -> Result<(), TagError> {
        let repo = Self::open(target)?;
        let object = repo
            .find_object(to_oid(commit)?, Some(ObjectType::Commit))
            .map_err(|err| anyhow!(err).context(format!("Commit {commit} not found")))?;
        repo.tag_lightweight(name, &object, false)
            .map(|_| ())
            .map_err(|err| Self::tag_error(name, err))
    }

    fn delete_tag(&self, target: &Target, name: &str) -> Result<(), TagError> {
        let repo = Self::open(target)?;
        repo.tag_delete(name).map_err(|err| Self::tag_error(name, err))
    }

    fn diff(
        &self,
        target: &Target,
        subpath: &Path,
        from: CommitId,
        to: CommitId,
    ) -> Result<Vec<Change>> {
        let repo = Self::open(target)?;
        let old = Self::subtree(&repo, from, subpath)?;
        let new = Self::subtree(&repo, to, subpath)?;

        let diff = repo
            .diff_tree_to_tree(old.as_ref(), new.as_ref(), None)
            .with_context(|| format!("Failed to diff {} -> {}", from.short(), to.short()))?;

        let changes = diff
            .deltas()
            .filter_map(|delta| {
                let old_name = delta.old_file().path().map(path_name);
                let new_name = delta.new_file().path().map(path_name);
                match delta.status() {
                    Delta::Added => Some(Change::new(None, new_name)),
                    Delta::Deleted => Some(Change::new(old_name, None)),
                    Delta::Modified | Delta::Typechange => Some(Change::new(old_name, new_name)),
                    _ => None,
                }
            })
            .collect();

        Ok(changes)
    }

    fn read_file(&self, target: &Target, commit: CommitId, path: &Path) -> Result<Option<Vec<u8>>> {
        if commit.is_zero() {
            return Ok(None);
        }

        let repo = Self::open(target)?;
        let tree = repo
            .find_commit(to_oid(commit)?)
            .with_context(|| format!("Commit {commit} not found"))?
            .tree()?;

        let path = normalize(path);
        match tree.get_path(&path) {
            Ok(entry) if entry.kind() == Some(ObjectType::Blob) => {
                let blob = entry.to_object(&repo)?.peel_to_blob()?;
                Ok(Some(blob.content().to_vec()))
            }
            Ok(_) => Ok(None),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(anyhow!(err).context(format!(
                "Failed to read {} at {}",
                path.display(),
                commit.short()
            ))),
        }
    }
}

fn to_commit_id(oid: Oid) -> Result<CommitId> {
    CommitId::from_bytes(oid.as_bytes())
        .with_context(|| format!("Unsupported object id length for {oid}"))
}

fn to_oid(commit: CommitId) -> Result<Oid> {
    Oid::from_bytes(commit.as_bytes()).with_context(|| format!("Invalid commit id {commit}"))
}

/// Drop `.`/trailing separators so `"units/"` and `"./units"` name the same tree
fn normalize(subpath: &Path) -> PathBuf {
    subpath
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect()
}

fn path_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

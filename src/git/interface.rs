//! git::interface
//!
//! Remote admin repository access using git2.
//!
//! # Architecture
//!
//! A [`GitBackend`] keeps a private bare clone of the remote. Nothing is
//! ever checked out: files are read straight from trees and commits are
//! built with a tree update builder on top of the parent's tree.
//!
//! - `fetch` fetches the admin branch into `refs/remotes/origin/<branch>`;
//!   no tracking ref afterwards means an empty store
//! - `commit` writes a detached commit into the private clone
//! - `advance` re-fetches, compares, then pushes without force; the
//!   remote refuses anything that is not a fast-forward of what it has
//!
//! The private clone is guarded by an exclusive file lock for the lifetime
//! of the backend, and git2 access is serialized through a mutex.
//!
//! # Error Handling
//!
//! Transport failures become [`GitError::Connection`]. A push refused
//! because the remote moved is reported as [`Advance::Rejected`], not as
//! an error.
//!
//! # Example
//!
//! ```no_run
//! use gitacl::core::settings::Settings;
//! use gitacl::git::{Backend, GitBackend};
//!
//! let backend = GitBackend::open("git@example.com:gitolite-admin", &Settings::default())?;
//! if let Some(head) = backend.fetch()? {
//!     let files = backend.read_files(&head)?;
//!     println!("{}", files.conf);
//! }
//! # Ok::<(), gitacl::git::GitError>(())
//! ```

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use git2::{
    build::TreeUpdateBuilder, Cred, CredentialType, FetchOptions, FileMode, ObjectType,
    PushOptions, RemoteCallbacks, Repository, Signature, TreeWalkMode, TreeWalkResult,
};
use uuid::Uuid;

use super::{Advance, Backend, GitError};
use crate::core::codec::ConfigFiles;
use crate::core::settings::{Settings, SshSettings};
use crate::core::types::Revision;

/// Name of the remote inside the private clone.
const REMOTE: &str = "origin";

/// Bare repository directory inside the working directory.
const CLONE_DIR: &str = "admin.git";

/// Lock file inside the working directory.
const LOCK_FILE: &str = "gitacl.lock";

/// Credential callback attempts before giving up.
const MAX_AUTH_ATTEMPTS: usize = 3;

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => GitError::NotFound {
                what: context.to_string(),
            },
            git2::ErrorCode::Locked => GitError::Locked {
                path: format!("{}: {}", context, err.message()),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    /// Create a connection error for a remote operation.
    fn connection(err: &git2::Error, location: &str) -> Self {
        GitError::Connection {
            location: location.to_string(),
            message: err.message().to_string(),
        }
    }

    fn io(err: std::io::Error, path: &Path) -> Self {
        GitError::Internal {
            message: format!("{}: {}", path.display(), err),
        }
    }
}

/// Exclusive lock on a private working directory.
///
/// Released when dropped.
#[derive(Debug)]
struct WorkdirLock {
    path: PathBuf,
    file: File,
}

impl WorkdirLock {
    /// Acquire the lock without blocking.
    fn acquire(workdir: &Path) -> Result<Self, GitError> {
        let path = workdir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| GitError::io(e, &path))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { path, file }),
            Err(_) => Err(GitError::Locked {
                path: path.display().to_string(),
            }),
        }
    }
}

impl Drop for WorkdirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "failed to release working copy lock: {e}");
        }
    }
}

/// [`Backend`] over a remote git repository.
pub struct GitBackend {
    location: String,
    branch: String,
    conf_path: String,
    keydir: String,
    committer_name: String,
    committer_email: String,
    ssh: Option<SshSettings>,
    workdir: PathBuf,
    /// Remove the working directory on drop.
    ephemeral: bool,
    repo: Mutex<Repository>,
    _lock: WorkdirLock,
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("location", &self.location)
            .field("branch", &self.branch)
            .field("workdir", &self.workdir)
            .finish_non_exhaustive()
    }
}

impl GitBackend {
    /// Open a private clone of the admin repository at `location`.
    ///
    /// The clone lives in the configured working directory, or in a fresh
    /// directory under the system temp dir that is removed on drop. The
    /// remote is contacted once to verify it is reachable.
    ///
    /// # Errors
    ///
    /// - [`GitError::Connection`] if the remote cannot be reached
    /// - [`GitError::Locked`] if another backend holds the working directory
    pub fn open(location: &str, settings: &Settings) -> Result<Self, GitError> {
        let (workdir, ephemeral) = match settings.workdir() {
            Some(dir) => (dir.to_path_buf(), false),
            None => (
                std::env::temp_dir().join(format!("gitacl-{}", Uuid::new_v4())),
                true,
            ),
        };
        fs::create_dir_all(&workdir).map_err(|e| GitError::io(e, &workdir))?;
        let lock = WorkdirLock::acquire(&workdir)?;

        let repo = Self::open_clone(&workdir.join(CLONE_DIR), location)?;

        let backend = Self {
            location: location.to_string(),
            branch: settings.branch().to_string(),
            conf_path: settings.conf_path().to_string(),
            keydir: settings.keydir().to_string(),
            committer_name: settings.committer_name().to_string(),
            committer_email: settings.committer_email().to_string(),
            ssh: settings.ssh().cloned(),
            workdir,
            ephemeral,
            repo: Mutex::new(repo),
            _lock: lock,
        };

        tracing::debug!(location, workdir = %backend.workdir.display(), "opened private clone");
        backend.fetch()?;
        Ok(backend)
    }

    /// Open or initialize the bare clone and point its remote at `location`.
    fn open_clone(path: &Path, location: &str) -> Result<Repository, GitError> {
        let repo = if path.exists() {
            Repository::open_bare(path).map_err(|e| GitError::from_git2(e, "open clone"))?
        } else {
            Repository::init_bare(path).map_err(|e| GitError::from_git2(e, "init clone"))?
        };

        match repo.find_remote(REMOTE) {
            Ok(remote) if remote.url() == Some(location) => {}
            Ok(_) => repo
                .remote_set_url(REMOTE, location)
                .map_err(|e| GitError::from_git2(e, "set remote url"))?,
            Err(_) => {
                repo.remote(REMOTE, location)
                    .map_err(|e| GitError::from_git2(e, "add remote"))?;
            }
        }
        Ok(repo)
    }

    /// Path of the private working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Remote location this backend talks to.
    pub fn location(&self) -> &str {
        &self.location
    }

    fn repo(&self) -> MutexGuard<'_, Repository> {
        self.repo.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn tracking_ref(&self) -> String {
        format!("refs/remotes/{REMOTE}/{}", self.branch)
    }

    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let ssh = self.ssh.as_ref();
        let attempts = Cell::new(0usize);

        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username, allowed| {
            attempts.set(attempts.get() + 1);
            if attempts.get() > MAX_AUTH_ATTEMPTS {
                return Err(git2::Error::from_str("authentication failed"));
            }

            let user = username
                .or_else(|| ssh.and_then(|s| s.username.as_deref()))
                .unwrap_or("git");

            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(user);
            }
            if allowed.contains(CredentialType::SSH_KEY) {
                return match ssh.and_then(|s| s.private_key.as_deref()) {
                    Some(key) => {
                        let public = ssh.and_then(|s| s.public_key.as_deref());
                        Cred::ssh_key(user, public, key, None)
                    }
                    None => Cred::ssh_key_from_agent(user),
                };
            }
            Cred::default()
        });
        callbacks
    }

    // =========================================================================
    // Remote operations
    // =========================================================================

    /// Fetch the admin branch and return the remote head.
    fn fetch_locked(&self, repo: &Repository) -> Result<Option<Revision>, GitError> {
        let mut remote = repo
            .find_remote(REMOTE)
            .map_err(|e| GitError::from_git2(e, "find remote"))?;
        let branch_ref = self.branch_ref();
        let tracking = self.tracking_ref();

        // A branch missing on the remote fetches nothing, so the tracking
        // ref exists afterwards only if the remote has the branch.
        if let Ok(mut stale) = repo.find_reference(&tracking) {
            stale
                .delete()
                .map_err(|e| GitError::from_git2(e, &tracking))?;
        }

        let refspec = format!("+{branch_ref}:{tracking}");
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        remote
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .map_err(|e| GitError::connection(&e, &self.location))?;

        match repo.refname_to_id(&tracking) {
            Ok(oid) => Ok(Some(Revision::new(oid.to_string())?)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, &tracking)),
        }
    }

    /// Push `to` onto the admin branch without force.
    ///
    /// Returns the remote's refusal message, if any.
    fn push_locked(&self, repo: &Repository, to: git2::Oid) -> Result<Option<String>, GitError> {
        let branch_ref = self.branch_ref();
        repo.reference(&branch_ref, to, true, "gitacl: stage push")
            .map_err(|e| GitError::from_git2(e, &branch_ref))?;

        let mut remote = repo
            .find_remote(REMOTE)
            .map_err(|e| GitError::from_git2(e, "find remote"))?;

        let refused = Cell::new(None::<String>);
        let result = {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    refused.set(Some(format!("{refname}: {message}")));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            let refspec = format!("{branch_ref}:{branch_ref}");
            remote.push(&[refspec.as_str()], Some(&mut options))
        };

        match result {
            Ok(()) => Ok(refused.into_inner()),
            Err(e)
                if matches!(
                    e.code(),
                    git2::ErrorCode::NotFastForward
                        | git2::ErrorCode::Exists
                        | git2::ErrorCode::Modified
                ) || e.class() == git2::ErrorClass::Reference =>
            {
                Ok(Some(e.message().to_string()))
            }
            Err(e) => Err(GitError::connection(&e, &self.location)),
        }
    }

    // =========================================================================
    // Tree access
    // =========================================================================

    fn find_commit<'r>(
        repo: &'r Repository,
        revision: &Revision,
    ) -> Result<git2::Commit<'r>, GitError> {
        let oid = git2::Oid::from_str(revision.as_str())
            .map_err(|e| GitError::from_git2(e, revision.as_str()))?;
        repo.find_commit(oid)
            .map_err(|e| GitError::from_git2(e, revision.as_str()))
    }

    fn read_blob(repo: &Repository, oid: git2::Oid, path: &str) -> Result<String, GitError> {
        let blob = repo
            .find_blob(oid)
            .map_err(|e| GitError::from_git2(e, path))?;
        String::from_utf8(blob.content().to_vec()).map_err(|_| GitError::InvalidUtf8 {
            path: path.to_string(),
        })
    }

    /// Blob paths (relative to the key directory) and ids under the key directory.
    fn key_entries(
        &self,
        repo: &Repository,
        tree: &git2::Tree<'_>,
    ) -> Result<Vec<(String, git2::Oid)>, GitError> {
        let entry = match tree.get_path(Path::new(&self.keydir)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GitError::from_git2(e, &self.keydir)),
        };
        if entry.kind() != Some(ObjectType::Tree) {
            return Ok(Vec::new());
        }
        let keydir = repo
            .find_tree(entry.id())
            .map_err(|e| GitError::from_git2(e, &self.keydir))?;

        let mut entries = Vec::new();
        keydir
            .walk(TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() == Some(ObjectType::Blob) {
                    if let Some(name) = entry.name() {
                        entries.push((format!("{root}{name}"), entry.id()));
                    }
                }
                TreeWalkResult::Ok
            })
            .map_err(|e| GitError::from_git2(e, &self.keydir))?;
        Ok(entries)
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        Signature::now(&self.committer_name, &self.committer_email)
            .map_err(|e| GitError::from_git2(e, "committer signature"))
    }
}

impl Backend for GitBackend {
    fn fetch(&self) -> Result<Option<Revision>, GitError> {
        let repo = self.repo();
        let head = self.fetch_locked(&repo)?;
        tracing::debug!(location = %self.location, head = ?head.as_ref().map(|r| r.short(7)), "fetched");
        Ok(head)
    }

    fn read_files(&self, revision: &Revision) -> Result<ConfigFiles, GitError> {
        let repo = self.repo();
        let tree = Self::find_commit(&repo, revision)?
            .tree()
            .map_err(|e| GitError::from_git2(e, revision.as_str()))?;

        let conf = match tree.get_path(Path::new(&self.conf_path)) {
            Ok(entry) => Self::read_blob(&repo, entry.id(), &self.conf_path)?,
            Err(e) if e.code() == git2::ErrorCode::NotFound => String::new(),
            Err(e) => return Err(GitError::from_git2(e, &self.conf_path)),
        };

        let mut keys = BTreeMap::new();
        for (path, oid) in self.key_entries(&repo, &tree)? {
            let full = format!("{}/{}", self.keydir, path);
            keys.insert(path, Self::read_blob(&repo, oid, &full)?);
        }

        Ok(ConfigFiles { conf, keys })
    }

    fn commit(
        &self,
        parent: Option<&Revision>,
        files: &ConfigFiles,
        message: &str,
    ) -> Result<Revision, GitError> {
        let repo = self.repo();

        let parent = parent
            .map(|rev| Self::find_commit(&repo, rev))
            .transpose()?;
        let base_tree = match &parent {
            Some(commit) => commit
                .tree()
                .map_err(|e| GitError::from_git2(e, "parent tree"))?,
            None => {
                let empty = repo
                    .treebuilder(None)
                    .and_then(|b| b.write())
                    .map_err(|e| GitError::from_git2(e, "empty tree"))?;
                repo.find_tree(empty)
                    .map_err(|e| GitError::from_git2(e, "empty tree"))?
            }
        };

        let mut update = TreeUpdateBuilder::new();
        for (path, _) in self.key_entries(&repo, &base_tree)? {
            if path.ends_with(".pub") && !files.keys.contains_key(&path) {
                update.remove(format!("{}/{}", self.keydir, path));
            }
        }

        let conf = repo
            .blob(files.conf.as_bytes())
            .map_err(|e| GitError::from_git2(e, &self.conf_path))?;
        update.upsert(self.conf_path.as_str(), conf, FileMode::Blob);
        for (path, content) in &files.keys {
            let full = format!("{}/{}", self.keydir, path);
            let blob = repo
                .blob(content.as_bytes())
                .map_err(|e| GitError::from_git2(e, &full))?;
            update.upsert(full, blob, FileMode::Blob);
        }

        let tree_oid = update
            .create_updated(&repo, &base_tree)
            .map_err(|e| GitError::from_git2(e, "write tree"))?;
        let tree = repo
            .find_tree(tree_oid)
            .map_err(|e| GitError::from_git2(e, "write tree"))?;

        let signature = self.signature()?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(None, &signature, &signature, message, &tree, &parents)
            .map_err(|e| GitError::from_git2(e, "commit"))?;

        let revision = Revision::new(oid.to_string())?;
        tracing::debug!(revision = revision.short(7), "created commit");
        Ok(revision)
    }

    fn advance(&self, from: Option<&Revision>, to: &Revision) -> Result<Advance, GitError> {
        let repo = self.repo();
        let target = Self::find_commit(&repo, to)?.id();

        let current = self.fetch_locked(&repo)?;
        if current.as_ref() != from {
            return Ok(Advance::Rejected { actual: current });
        }

        if let Some(message) = self.push_locked(&repo, target)? {
            tracing::debug!(%message, "push refused");
            let actual = self.fetch_locked(&repo)?;
            if actual.as_ref() == from {
                return Err(GitError::Rejected {
                    refname: self.branch_ref(),
                    message,
                });
            }
            return Ok(Advance::Rejected { actual });
        }

        let tracking = self.tracking_ref();
        repo.reference(&tracking, target, true, "gitacl: advance")
            .map_err(|e| GitError::from_git2(e, &tracking))?;
        Ok(Advance::Advanced)
    }
}

impl Drop for GitBackend {
    fn drop(&mut self) {
        if self.ephemeral {
            if let Err(e) = fs::remove_dir_all(&self.workdir) {
                tracing::warn!(workdir = %self.workdir.display(), "failed to remove working copy: {e}");
            }
        }
    }
}

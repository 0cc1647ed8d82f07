//! git::memory
//!
//! In-process store with the same contract as a remote admin repository.
//!
//! Commits live in a map keyed by revision; the head moves by
//! compare-and-swap under a mutex. Clones share state, so a test can keep
//! one handle to play "another writer" while a manager owns the other.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::{Advance, Backend, GitError};
use crate::core::codec::ConfigFiles;
use crate::core::types::{Fingerprint, Revision};

/// A stored commit.
#[derive(Debug, Clone)]
struct StoredCommit {
    parent: Option<Revision>,
    files: ConfigFiles,
    message: String,
}

#[derive(Debug, Default)]
struct Inner {
    commits: HashMap<Revision, StoredCommit>,
    head: Option<Revision>,
    /// Monotonic counter mixed into revision ids.
    sequence: u64,
    /// Simulated connection failure.
    unreachable: bool,
    /// While set, `commit` blocks.
    paused: bool,
}

/// In-memory [`Backend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<(Mutex<Inner>, Condvar)>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose head holds `files`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; shares the error type of [`Backend`].
    pub fn with_files(files: ConfigFiles) -> Result<Self, GitError> {
        let backend = Self::new();
        backend.push_external(files, "initial configuration")?;
        Ok(backend)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Commit and advance in one step, as another writer would.
    ///
    /// # Errors
    ///
    /// Never fails in practice; shares the error type of [`Backend`].
    pub fn push_external(&self, files: ConfigFiles, message: &str) -> Result<Revision, GitError> {
        let mut inner = self.lock();
        let parent = inner.head.clone();
        let revision = Self::store(&mut inner, parent, files, message)?;
        inner.head = Some(revision.clone());
        Ok(revision)
    }

    /// Current head without going through the connection check.
    pub fn head(&self) -> Option<Revision> {
        self.lock().head.clone()
    }

    /// Commit message of a stored revision.
    pub fn message(&self, revision: &Revision) -> Option<String> {
        self.lock().commits.get(revision).map(|c| c.message.clone())
    }

    /// Parent of a stored revision.
    pub fn parent(&self, revision: &Revision) -> Option<Revision> {
        self.lock()
            .commits
            .get(revision)
            .and_then(|c| c.parent.clone())
    }

    /// Number of commits reachable from the head.
    pub fn history_len(&self) -> usize {
        let inner = self.lock();
        let mut count = 0;
        let mut cursor = inner.head.clone();
        while let Some(rev) = cursor {
            count += 1;
            cursor = inner.commits.get(&rev).and_then(|c| c.parent.clone());
        }
        count
    }

    /// Simulate losing or regaining the connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Block every `commit` call until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Release blocked `commit` calls.
    pub fn resume(&self) {
        self.lock().paused = false;
        self.inner.1.notify_all();
    }

    fn check_reachable(inner: &Inner) -> Result<(), GitError> {
        if inner.unreachable {
            return Err(GitError::Connection {
                location: "memory".to_string(),
                message: "store is unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn store(
        inner: &mut Inner,
        parent: Option<Revision>,
        files: ConfigFiles,
        message: &str,
    ) -> Result<Revision, GitError> {
        inner.sequence += 1;
        let sequence = inner.sequence.to_string();
        let fingerprint = files.fingerprint();
        let id = Fingerprint::compute([
            ("parent", parent.as_ref().map_or("", |p| p.as_str())),
            ("files", fingerprint.as_str()),
            ("message", message),
            ("sequence", sequence.as_str()),
        ]);
        let revision = Revision::new(id.as_str())?;
        inner.commits.insert(
            revision.clone(),
            StoredCommit {
                parent,
                files,
                message: message.to_string(),
            },
        );
        Ok(revision)
    }
}

impl Backend for MemoryBackend {
    fn fetch(&self) -> Result<Option<Revision>, GitError> {
        let inner = self.lock();
        Self::check_reachable(&inner)?;
        Ok(inner.head.clone())
    }

    fn read_files(&self, revision: &Revision) -> Result<ConfigFiles, GitError> {
        let inner = self.lock();
        Self::check_reachable(&inner)?;
        inner
            .commits
            .get(revision)
            .map(|c| c.files.clone())
            .ok_or_else(|| GitError::NotFound {
                what: revision.to_string(),
            })
    }

    fn commit(
        &self,
        parent: Option<&Revision>,
        files: &ConfigFiles,
        message: &str,
    ) -> Result<Revision, GitError> {
        let guard = self.lock();
        let mut inner = self
            .inner
            .1
            .wait_while(guard, |inner| inner.paused)
            .unwrap_or_else(|e| e.into_inner());
        Self::check_reachable(&inner)?;

        if let Some(parent) = parent {
            if !inner.commits.contains_key(parent) {
                return Err(GitError::NotFound {
                    what: parent.to_string(),
                });
            }
        }
        Self::store(&mut inner, parent.cloned(), files.clone(), message)
    }

    fn advance(&self, from: Option<&Revision>, to: &Revision) -> Result<Advance, GitError> {
        let mut inner = self.lock();
        Self::check_reachable(&inner)?;

        if !inner.commits.contains_key(to) {
            return Err(GitError::NotFound {
                what: to.to_string(),
            });
        }
        if inner.head.as_ref() != from {
            return Ok(Advance::Rejected {
                actual: inner.head.clone(),
            });
        }
        inner.head = Some(to.clone());
        Ok(Advance::Advanced)
    }
}

//! manager
//!
//! Transactional access to the admin repository.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Fetching → Ready(snapshot) → Applying → Committed
//!                                              → Conflicted
//!                                              → Failed
//! ```
//!
//! Each transition is emitted as a `tracing` event with a `state` field.
//!
//! # Concurrency
//!
//! Updates are optimistic. A [`Config`] from [`ConfigManager::get`] carries
//! the revision it was read at. [`ConfigManager::apply`] commits on top of
//! that revision and moves the branch only if it is still there; otherwise
//! it fails with [`ManagerError::Modification`] and the caller re-reads and
//! retries. Nothing is retried automatically.
//!
//! Applies through one manager are serialized around the
//! fetch/commit/advance section. Across managers and processes the
//! store's compare-and-swap arbitrates.
//!
//! # Example
//!
//! ```no_run
//! use gitacl::core::types::Permission;
//! use gitacl::manager::ConfigManager;
//!
//! let manager = ConfigManager::create("git@example.com:gitolite-admin")?;
//! let mut config = manager.get()?;
//! config.create_repository("new-repo")?;
//! config.set_permission("new-repo", "@devs", Permission::ReadWrite)?;
//! let revision = manager.apply(&config)?;
//! println!("applied at {}", revision.short(7));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod handle;

pub use handle::ApplyHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::core::codec::{self, CodecError};
use crate::core::config::Config;
use crate::core::settings::{Settings, SettingsError};
use crate::core::types::Revision;
use crate::git::{Advance, Backend, GitBackend, GitError};

/// Errors from manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The store could not be reached.
    #[error("cannot reach '{location}': {message}")]
    Connection {
        /// The store location
        location: String,
        /// Transport error message
        message: String,
    },

    /// The store moved since the config was read.
    #[error(
        "configuration was modified concurrently: expected {}, found {}",
        describe(.expected),
        describe(.actual)
    )]
    Modification {
        /// Revision the config was based on
        expected: Option<Revision>,
        /// Revision the store is actually at
        actual: Option<Revision>,
    },

    /// The stored configuration could not be parsed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Store failure other than a connection problem.
    #[error(transparent)]
    Git(GitError),

    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The apply was cancelled before the store moved.
    #[error("apply was cancelled")]
    Cancelled,

    /// The background worker ended without reporting a result.
    #[error("apply worker exited without a result")]
    WorkerLost,
}

fn describe(revision: &Option<Revision>) -> String {
    match revision {
        Some(rev) => rev.short(12).to_string(),
        None => "empty store".to_string(),
    }
}

impl From<GitError> for ManagerError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Connection { location, message } => {
                ManagerError::Connection { location, message }
            }
            other => ManagerError::Git(other),
        }
    }
}

/// Entry point for reading and updating the access configuration.
///
/// Cheap to clone; clones share the backend and the apply lock.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    backend: Box<dyn Backend>,
    apply_lock: Mutex<()>,
}

impl ConfigManager {
    /// Open the admin repository at `location` with settings from the
    /// standard locations.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::Settings`] if a settings file is invalid
    /// - [`ManagerError::Connection`] if the location cannot be reached
    pub fn create(location: &str) -> Result<Self, ManagerError> {
        Self::with_settings(location, Settings::load()?)
    }

    /// Open the admin repository at `location` with explicit settings.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::Connection`] if the location cannot be reached
    /// - [`ManagerError::Git`] if the private working copy is unusable
    pub fn with_settings(location: &str, settings: Settings) -> Result<Self, ManagerError> {
        let backend = GitBackend::open(location, &settings)?;
        tracing::info!(location, branch = settings.branch(), "config manager ready");
        Ok(Self::with_backend(backend))
    }

    /// Use an already-constructed backend.
    pub fn with_backend(backend: impl Backend + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: Box::new(backend),
                apply_lock: Mutex::new(()),
            }),
        }
    }

    /// Read the current configuration.
    ///
    /// The returned config is an independent snapshot tagged with the
    /// revision it was read at, with an empty journal. An empty store
    /// yields an empty config with no base revision.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::Connection`] if the store cannot be reached
    /// - [`ManagerError::Codec`] if the stored files do not parse
    pub fn get(&self) -> Result<Config, ManagerError> {
        self.inner.get()
    }

    /// Write a configuration back to the store.
    ///
    /// Commits `config` on top of its base revision with a message built
    /// from its journal, then moves the branch if it has not moved since.
    /// If the rendered files are identical to the base revision's, nothing
    /// is committed and the base revision is returned.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::Modification`] if the store moved since `config`
    ///   was read
    /// - [`ManagerError::Connection`] if the store cannot be reached
    pub fn apply(&self, config: &Config) -> Result<Revision, ManagerError> {
        self.inner.apply(config, &AtomicBool::new(false))
    }

    /// Run [`apply`](Self::apply) on a background thread.
    ///
    /// The handle can be awaited, waited on, or cancelled. A cancelled
    /// apply leaves the store untouched unless it had already moved it.
    pub fn apply_async(&self, config: Config) -> ApplyHandle {
        let inner = Arc::clone(&self.inner);
        ApplyHandle::spawn(move |cancelled| inner.apply(&config, cancelled))
    }
}

impl Inner {
    fn get(&self) -> Result<Config, ManagerError> {
        tracing::debug!(state = "fetching");
        let head = self.backend.fetch()?;

        let mut config = match &head {
            Some(revision) => codec::parse(&self.backend.read_files(revision)?)?,
            None => Config::new(),
        };
        config.set_base_revision(head.clone());

        tracing::debug!(
            state = "ready",
            revision = head.as_ref().map_or("none", |r| r.short(7)),
            users = config.users().count(),
            groups = config.groups().count(),
            repositories = config.repositories().count()
        );
        Ok(config)
    }

    fn apply(&self, config: &Config, cancelled: &AtomicBool) -> Result<Revision, ManagerError> {
        let _guard = self.apply_lock.lock().unwrap_or_else(|e| e.into_inner());
        let base = config.base_revision().cloned();
        tracing::debug!(state = "applying", base = %describe(&base), changes = config.recorder().len());

        let result = self.apply_locked(config, base.as_ref(), cancelled);
        match &result {
            Ok(revision) => {
                tracing::info!(state = "committed", revision = revision.short(7));
            }
            Err(ManagerError::Modification { expected, actual }) => {
                tracing::warn!(
                    state = "conflicted",
                    expected = %describe(expected),
                    actual = %describe(actual)
                );
            }
            Err(e) => {
                tracing::warn!(state = "failed", error = %e);
            }
        }
        result
    }

    fn apply_locked(
        &self,
        config: &Config,
        base: Option<&Revision>,
        cancelled: &AtomicBool,
    ) -> Result<Revision, ManagerError> {
        let files = codec::render(config);

        let head = self.backend.fetch()?;
        if head.as_ref() != base {
            return Err(ManagerError::Modification {
                expected: base.cloned(),
                actual: head,
            });
        }

        if let Some(base) = base {
            let current = self.backend.read_files(base)?;
            if current.fingerprint() == files.fingerprint() {
                tracing::debug!(revision = base.short(7), "no changes to apply");
                return Ok(base.clone());
            }
        }

        if cancelled.load(Ordering::SeqCst) {
            return Err(ManagerError::Cancelled);
        }
        let message = config.recorder().commit_message();
        let revision = self.backend.commit(base, &files, &message)?;

        if cancelled.load(Ordering::SeqCst) {
            return Err(ManagerError::Cancelled);
        }
        match self.backend.advance(base, &revision)? {
            Advance::Advanced => Ok(revision),
            Advance::Rejected { actual } => Err(ManagerError::Modification {
                expected: base.cloned(),
                actual,
            }),
        }
    }
}

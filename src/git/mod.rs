//! git
//!
//! Single interface for all access to the admin repository.
//!
//! # Architecture
//!
//! This module is the **ONLY doorway** to Git. No other module imports
//! `git2`. The manager talks to a [`Backend`], which has two
//! implementations:
//!
//! - [`GitBackend`]: a private bare clone of the remote admin repository,
//!   driven by `git2`
//! - [`MemoryBackend`]: an in-process store for tests and embedding
//!
//! # Invariants
//!
//! - The store moves only through [`Backend::advance`], which is a
//!   compare-and-swap on the branch head
//! - Commits are created detached and become visible only when advanced
//! - All operations return strong types ([`Revision`], [`ConfigFiles`])
//!
//! # Example
//!
//! ```
//! use gitacl::core::codec::ConfigFiles;
//! use gitacl::git::{Advance, Backend, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! assert_eq!(backend.fetch().unwrap(), None);
//!
//! let files = ConfigFiles { conf: "repo r\n    R = alice\n".into(), ..Default::default() };
//! let rev = backend.commit(None, &files, "initial").unwrap();
//! assert_eq!(backend.advance(None, &rev).unwrap(), Advance::Advanced);
//! assert_eq!(backend.fetch().unwrap(), Some(rev));
//! ```

mod interface;
mod memory;

pub use interface::GitBackend;
pub use memory::MemoryBackend;

use thiserror::Error;

use crate::core::codec::ConfigFiles;
use crate::core::types::{Revision, TypeError};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The remote location could not be reached or refused access.
    #[error("cannot reach '{location}': {message}")]
    Connection {
        /// The remote location
        location: String,
        /// Transport error message
        message: String,
    },

    /// Requested object does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up
        what: String,
    },

    /// File content is not valid UTF-8.
    #[error("file is not valid UTF-8: {path}")]
    InvalidUtf8 {
        /// Path inside the admin repository
        path: String,
    },

    /// The remote refused an update for a reason other than a moved head.
    #[error("update of {refname} rejected: {message}")]
    Rejected {
        /// The ref being updated
        refname: String,
        /// Reason given by the remote
        message: String,
    },

    /// The private working copy is in use by another manager.
    #[error("working copy is locked: {path}")]
    Locked {
        /// Lock file path
        path: String,
    },

    /// Internal git2 or filesystem error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        GitError::Internal {
            message: err.to_string(),
        }
    }
}

/// Outcome of a compare-and-swap on the branch head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The head now points at the new revision.
    Advanced,
    /// The head was not at the expected revision and was left alone.
    Rejected {
        /// Where the head actually is (`None` for an empty store)
        actual: Option<Revision>,
    },
}

/// Versioned store holding the admin configuration.
///
/// Implementations must be safe to share across threads. Every method
/// observes the latest state of the store; nothing is cached between calls
/// except immutable commit contents.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Current head of the admin branch, `None` if the store is empty.
    ///
    /// # Errors
    ///
    /// - [`GitError::Connection`] if the store cannot be reached
    fn fetch(&self) -> Result<Option<Revision>, GitError>;

    /// Read the conf file and key files at a revision.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotFound`] if the revision is unknown
    /// - [`GitError::InvalidUtf8`] if a file is not text
    fn read_files(&self, revision: &Revision) -> Result<ConfigFiles, GitError>;

    /// Create a detached commit holding `files` on top of `parent`.
    ///
    /// Files outside the conf file and key directory are carried over
    /// from the parent unchanged.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotFound`] if the parent is unknown
    fn commit(
        &self,
        parent: Option<&Revision>,
        files: &ConfigFiles,
        message: &str,
    ) -> Result<Revision, GitError>;

    /// Move the head from `from` to `to` if it is still at `from`.
    ///
    /// # Errors
    ///
    /// Errors are reserved for failures to talk to the store. A head that
    /// has moved is reported as [`Advance::Rejected`].
    fn advance(&self, from: Option<&Revision>, to: &Revision) -> Result<Advance, GitError>;
}

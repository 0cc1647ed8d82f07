//! gitacl - Transactional management of gitolite access control
//!
//! gitacl reads the access configuration of a gitolite-style admin
//! repository (`conf/gitolite.conf` plus `keydir/`) into a typed in-memory
//! model, lets callers edit users, groups, repositories and permissions
//! with every invariant checked at mutation time, and writes the result
//! back as a single commit guarded by optimistic concurrency.
//!
//! # Architecture
//!
//! - [`core`] - Domain types, the config aggregate, change journal, codec, settings
//! - [`git`] - Single interface for all store access
//! - [`manager`] - Snapshot reads and compare-and-swap applies
//!
//! # Correctness Invariants
//!
//! 1. A config never holds dangling member or grantee references
//! 2. The group graph is acyclic
//! 3. A grantee holds at most one permission level per repository
//! 4. The store only moves from the revision a config was read at
//!
//! # Example
//!
//! ```
//! use gitacl::core::types::Permission;
//! use gitacl::git::MemoryBackend;
//! use gitacl::manager::ConfigManager;
//!
//! let manager = ConfigManager::with_backend(MemoryBackend::new());
//! let mut config = manager.get()?;
//! config.create_user("alice")?;
//! config.create_repository("repo1")?;
//! config.set_permission("repo1", "alice", Permission::All)?;
//! manager.apply(&config)?;
//!
//! let reread = manager.get()?;
//! assert_eq!(reread, config);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod core;
pub mod git;
pub mod manager;

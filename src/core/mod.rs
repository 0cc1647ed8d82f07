//! core
//!
//! Domain types, the config aggregate, and its textual form.
//!
//! # Modules
//!
//! - [`types`] - Strong types: UserName, GroupName, RepoName, Permission, etc.
//! - [`model`] - Users, groups, repositories and their invariants
//! - [`config`] - The config aggregate that owns every entity
//! - [`recorder`] - Change journal and commit narrative
//! - [`codec`] - Conf file and key file rendering and parsing
//! - [`settings`] - Manager settings schema and loading
//!
//! # Design Principles
//!
//! - Names are validated once, at construction
//! - Entities refer to each other by name, never by reference
//! - Rendering is deterministic

pub mod codec;
pub mod config;
pub mod model;
pub mod recorder;
pub mod settings;
pub mod types;

//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Permission`] - Access level, ordered most permissive first
//! - [`Kind`] - Category tag used for deterministic tie-breaking
//! - [`UserName`], [`GroupName`], [`RepoName`] - Validated entity names
//! - [`KeyLabel`] - Label distinguishing multiple keys of one user
//! - [`ConfigKeyName`] - Name of a repository-scoped config key
//! - [`Grantee`] - A user or group holding a permission
//! - [`Revision`] - Identifier of a commit in the backing store
//! - [`Fingerprint`] - Content hash of rendered configuration files
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, so the codec never renders a line it could not
//! parse back.
//!
//! # Examples
//!
//! ```
//! use gitacl::core::types::{GroupName, Permission, UserName};
//!
//! let user = UserName::new("alice").unwrap();
//! let group = GroupName::new("@admins").unwrap();
//! assert_eq!(Permission::from_code("RW+").unwrap(), Permission::All);
//!
//! assert!(UserName::new("").is_err());
//! assert!(GroupName::new("admins").is_err());
//! # let _ = (user, group);
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// An argument was empty or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A permission code outside the fixed vocabulary.
    #[error("unknown permission: {0}")]
    UnknownPermission(String),
}

/// Access level granted on a repository.
///
/// Variants are declared from most to least permissive and the derived
/// `Ord` follows that declaration, so sorted collections list
/// [`Permission::All`] first.
///
/// # Example
///
/// ```
/// use gitacl::core::types::Permission;
///
/// assert!(Permission::All < Permission::ReadOnly);
/// assert_eq!(Permission::ReadWrite.code(), "RW");
/// assert_eq!(Permission::from_code("-").unwrap(), Permission::Deny);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    /// Fast-forward, rewind or delete branches and tags.
    All,
    /// Fast-forward push, create new branches or tags.
    ReadWrite,
    /// Read operations only.
    ReadOnly,
    /// Create repositories.
    Create,
    /// Deny access.
    Deny,
}

impl Permission {
    /// Every level, most permissive first.
    pub const LEVELS: [Permission; 5] = [
        Permission::All,
        Permission::ReadWrite,
        Permission::ReadOnly,
        Permission::Create,
        Permission::Deny,
    ];

    /// The canonical code used in the configuration grammar.
    pub fn code(self) -> &'static str {
        match self {
            Permission::All => "RW+",
            Permission::ReadWrite => "RW",
            Permission::ReadOnly => "R",
            Permission::Create => "C",
            Permission::Deny => "-",
        }
    }

    /// Look up a permission by its canonical code.
    ///
    /// # Errors
    ///
    /// - [`TypeError::InvalidInput`] if `code` is empty
    /// - [`TypeError::UnknownPermission`] if `code` is not in the vocabulary
    pub fn from_code(code: &str) -> Result<Self, TypeError> {
        if code.is_empty() {
            return Err(TypeError::InvalidInput(
                "permission code cannot be empty".into(),
            ));
        }
        Self::LEVELS
            .into_iter()
            .find(|p| p.code() == code)
            .ok_or_else(|| TypeError::UnknownPermission(code.to_string()))
    }
}

impl TryFrom<String> for Permission {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_code(&s)
    }
}

impl From<Permission> for String {
    fn from(p: Permission) -> Self {
        p.code().to_string()
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Category of an identifiable entity.
///
/// Declaration order is the tie-breaking order for mixed sets: users sort
/// before groups, groups before repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    User,
    Group,
    Repository,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::User => f.write_str("user"),
            Kind::Group => f.write_str("group"),
            Kind::Repository => f.write_str("repository"),
        }
    }
}

/// Anything with a unique name and a category.
pub trait Identifiable {
    /// The entity's unique name within its kind.
    fn name(&self) -> &str;

    /// The entity's category.
    fn kind(&self) -> Kind;
}

/// Alphabetical ordering by name.
pub fn by_name<T: Identifiable + ?Sized>(a: &T, b: &T) -> Ordering {
    a.name().cmp(b.name())
}

/// Ordering by category, then by name.
///
/// Used for mixed membership sets so output is stable across runs.
pub fn by_kind_then_name<A, B>(a: &A, b: &B) -> Ordering
where
    A: Identifiable + ?Sized,
    B: Identifiable + ?Sized,
{
    a.kind()
        .cmp(&b.kind())
        .then_with(|| a.name().cmp(b.name()))
}

/// Shared trait impls for validated string newtypes.
macro_rules! string_newtype {
    ($ty:ident) => {
        impl $ty {
            /// Get the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = TypeError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = TypeError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$ty> for String {
            fn from(name: $ty) -> Self {
                name.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $ty {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// Check the shared identifier shape: an ASCII alphanumeric first
/// character followed by alphanumerics or any of `extra`.
fn check_identifier(what: &str, name: &str, extra: &[char]) -> Result<(), TypeError> {
    let mut chars = name.chars();
    match chars.next() {
        None => {
            return Err(TypeError::InvalidInput(format!("{what} cannot be empty")));
        }
        Some(c) if !c.is_ascii_alphanumeric() => {
            return Err(TypeError::InvalidInput(format!(
                "{what} must start with a letter or digit: '{name}'"
            )));
        }
        Some(_) => {}
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && !extra.contains(c)) {
        return Err(TypeError::InvalidInput(format!(
            "{what} cannot contain '{bad}': '{name}'"
        )));
    }
    Ok(())
}

/// A validated user name.
///
/// User names start with a letter or digit and continue with letters,
/// digits or `-._@+`. A name containing `@` must look like an email
/// address (the part after the last `@` contains a `.`) so key file names
/// stay unambiguous.
///
/// # Example
///
/// ```
/// use gitacl::core::types::UserName;
///
/// assert!(UserName::new("alice").is_ok());
/// assert!(UserName::new("alice@example.com").is_ok());
/// assert!(UserName::new("alice@laptop").is_err());
/// assert!(UserName::new("@alice").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserName(String);

impl UserName {
    /// Create a new validated user name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if the name is empty or malformed.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_identifier("user name", &name, &['-', '.', '_', '@', '+'])?;
        if let Some((_, domain)) = name.rsplit_once('@') {
            if !domain.contains('.') {
                return Err(TypeError::InvalidInput(format!(
                    "user name with '@' must be an email address: '{name}'"
                )));
            }
        }
        Ok(Self(name))
    }
}

string_newtype!(UserName);

/// A validated group name, always starting with the `@` sigil.
///
/// # Example
///
/// ```
/// use gitacl::core::types::GroupName;
///
/// let all = GroupName::all();
/// assert!(all.is_reserved());
/// assert!(!GroupName::new("@devs").unwrap().is_reserved());
/// assert!(GroupName::new("@").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    /// The group sigil.
    pub const SIGIL: char = '@';

    /// Name of the reserved group representing every principal.
    pub const ALL: &'static str = "@all";

    /// Create a new validated group name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if the name lacks the sigil or is
    /// otherwise malformed.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        let Some(rest) = name.strip_prefix(Self::SIGIL) else {
            return Err(TypeError::InvalidInput(format!(
                "group name must start with '{}': '{name}'",
                Self::SIGIL
            )));
        };
        check_identifier("group name", rest, &['-', '.', '_'])?;
        Ok(Self(name))
    }

    /// The reserved `@all` group name.
    pub fn all() -> Self {
        Self(Self::ALL.to_string())
    }

    /// Whether this names the reserved `@all` group.
    pub fn is_reserved(&self) -> bool {
        self.0 == Self::ALL
    }
}

string_newtype!(GroupName);

/// A validated repository name.
///
/// Repository names may contain `/` to place repositories in
/// subdirectories, but cannot contain `..` or end with `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// Create a new validated repository name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if the name is empty or malformed.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_identifier("repository name", &name, &['-', '.', '_', '@', '+', '/'])?;
        if name.contains("..") {
            return Err(TypeError::InvalidInput(format!(
                "repository name cannot contain '..': '{name}'"
            )));
        }
        if name.ends_with('/') {
            return Err(TypeError::InvalidInput(format!(
                "repository name cannot end with '/': '{name}'"
            )));
        }
        Ok(Self(name))
    }
}

string_newtype!(RepoName);

/// Label distinguishing several keys of one user.
///
/// The empty label is the default key (`keydir/<user>.pub`). A plain label
/// names an `@` suffix (`keydir/<user>@laptop.pub`). A label may also carry
/// the key directory subpath before a `/`: `laptop/` is
/// `keydir/laptop/<user>.pub` and `laptop/work` is
/// `keydir/laptop/<user>@work.pub`.
///
/// Suffixes cannot contain `.` so they are never mistaken for an email
/// domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyLabel(String);

impl KeyLabel {
    /// Create a new validated key label. The empty string is allowed.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if a non-empty label is malformed.
    pub fn new(label: impl Into<String>) -> Result<Self, TypeError> {
        let label = label.into();
        let (directory, suffix) = match label.rsplit_once('/') {
            Some((directory, suffix)) => (Some(directory), suffix),
            None => (None, label.as_str()),
        };
        if let Some(directory) = directory {
            for component in directory.split('/') {
                check_identifier("key directory", component, &['-', '_', '.'])?;
            }
        }
        if !suffix.is_empty() {
            check_identifier("key label", suffix, &['-', '_'])?;
        }
        Ok(Self(label))
    }

    /// Build a label from a key directory subpath and an `@` suffix.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if either part is malformed.
    pub fn at(directory: Option<&str>, suffix: &str) -> Result<Self, TypeError> {
        match directory {
            Some(directory) => Self::new(format!("{directory}/{suffix}")),
            None => Self::new(suffix),
        }
    }

    /// The default (unnamed) label.
    pub fn default_label() -> Self {
        Self::default()
    }

    /// Whether this is the default label.
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    /// Subpath of the key directory holding this key, if any.
    pub fn directory(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(directory, _)| directory)
    }

    /// The `@` suffix of the key file name; empty for none.
    pub fn suffix(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, suffix)| suffix)
    }
}

string_newtype!(KeyLabel);

/// Name of a repository-scoped config key, e.g. `gitweb.owner`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigKeyName(String);

impl ConfigKeyName {
    /// Create a new validated config key name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if the name is empty or malformed.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_identifier("config key", &name, &['-', '.', '_'])?;
        Ok(Self(name))
    }
}

string_newtype!(ConfigKeyName);

/// A user or group holding a permission on a repository.
///
/// The derived `Ord` is kind-then-name: every user sorts before every
/// group, and names break ties.
///
/// # Example
///
/// ```
/// use gitacl::core::types::{Grantee, GroupName, UserName};
///
/// let zed = Grantee::User(UserName::new("zed").unwrap());
/// let admins = Grantee::Group(GroupName::new("@admins").unwrap());
/// assert!(zed < admins);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grantee {
    User(UserName),
    Group(GroupName),
}

impl Grantee {
    /// Parse a grantee token: `@name` is a group, anything else a user.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if the token is not a valid name.
    pub fn parse(token: &str) -> Result<Self, TypeError> {
        if token.starts_with(GroupName::SIGIL) {
            GroupName::new(token).map(Grantee::Group)
        } else {
            UserName::new(token).map(Grantee::User)
        }
    }
}

impl Identifiable for Grantee {
    fn name(&self) -> &str {
        match self {
            Grantee::User(name) => name.as_str(),
            Grantee::Group(name) => name.as_str(),
        }
    }

    fn kind(&self) -> Kind {
        match self {
            Grantee::User(_) => Kind::User,
            Grantee::Group(_) => Kind::Group,
        }
    }
}

impl From<UserName> for Grantee {
    fn from(name: UserName) -> Self {
        Grantee::User(name)
    }
}

impl From<GroupName> for Grantee {
    fn from(name: GroupName) -> Self {
        Grantee::Group(name)
    }
}

impl std::fmt::Display for Grantee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A revision (commit id) of the backing store.
///
/// Revisions are hex object ids (SHA-1 or SHA-256), normalized to
/// lowercase.
///
/// # Example
///
/// ```
/// use gitacl::core::types::Revision;
///
/// let rev = Revision::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(rev.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(rev.short(7), "abc123d");
/// assert!(Revision::new("not-a-sha").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision(String);

impl Revision {
    /// Create a new validated revision id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidInput` if the string is not a hex object id.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidInput(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidInput(
                "revision must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// Get an abbreviated form of the revision.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    /// Get the revision as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Revision {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content hash of a set of rendered files.
///
/// Used to detect applies that would not change the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint from `(path, content)` pairs.
    ///
    /// Pairs are sorted by path before hashing so the result does not
    /// depend on input order.
    pub fn compute<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut sorted: Vec<_> = files.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (path, content) in sorted {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(content.as_bytes());
            hasher.update(b"\0");
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Get the fingerprint as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

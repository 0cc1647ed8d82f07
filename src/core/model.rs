//! core::model
//!
//! Domain entities: [`User`], [`Group`] and [`Repository`].
//!
//! # Architecture
//!
//! Entities refer to each other by name handles ([`UserName`],
//! [`GroupName`]) rather than by owning references, so the group graph is
//! a plain adjacency structure that may be walked with a visited-set and
//! cloned without aliasing.
//!
//! Entities are read-only outside the crate. All mutation goes through
//! [`Config`](crate::core::config::Config), which checks cross-entity
//! invariants (ownership, acyclicity) before calling the crate-private
//! mutators here and records the [`Change`] each one returns.
//!
//! # Invariants
//!
//! - A group never holds the same direct child twice
//! - The reserved `@all` group never gains members
//! - A grantee holds at most one permission level per repository
//! - Repository permission buckets are never empty

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use super::recorder::Change;
use super::types::{
    ConfigKeyName, Grantee, GroupName, Identifiable, KeyLabel, Kind, Permission, RepoName,
    TypeError, UserName,
};

/// Errors from domain model operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// An argument was empty or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An entity of this kind already has the name.
    #[error("{kind} already exists: {name}")]
    DuplicateName {
        /// Kind of the existing entity
        kind: Kind,
        /// The duplicated name
        name: String,
    },

    /// The member is already a direct child of the group.
    #[error("{member} is already a member of {group}")]
    DuplicateMember {
        /// The group being edited
        group: String,
        /// The duplicated member
        member: String,
    },

    /// The entity is not owned by this configuration.
    #[error("unknown {kind}: {name}")]
    UnknownEntity {
        /// Kind of the missing entity
        kind: Kind,
        /// The name that was not found
        name: String,
    },

    /// The reserved group cannot be modified.
    #[error("group {0} is immutable")]
    ImmutableGroup(String),

    /// Adding the member would make a group its own descendant.
    #[error("adding {child} to {parent} would create a membership cycle")]
    CyclicMembership {
        /// The group being edited
        parent: String,
        /// The group being added
        child: String,
    },

    /// A config value contains shell-unsafe characters.
    #[error("value for config key {key} contains unsafe characters: {value}")]
    UnsafeValue {
        /// The config key
        key: String,
        /// The rejected value
        value: String,
    },

    /// A permission code outside the fixed vocabulary.
    #[error("unknown permission: {0}")]
    UnknownPermission(String),
}

impl From<TypeError> for ModelError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidInput(msg) => ModelError::InvalidInput(msg),
            TypeError::UnknownPermission(code) => ModelError::UnknownPermission(code),
        }
    }
}

/// A user and their public keys.
///
/// Key material is opaque; it is only checked to be a non-empty single
/// line so it can be stored as a key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    name: UserName,
    keys: BTreeMap<KeyLabel, String>,
}

impl User {
    pub(crate) fn new(name: UserName) -> Self {
        Self {
            name,
            keys: BTreeMap::new(),
        }
    }

    /// The user's validated name.
    pub fn id(&self) -> &UserName {
        &self.name
    }

    /// All keys, ordered by label (default label first).
    pub fn keys(&self) -> &BTreeMap<KeyLabel, String> {
        &self.keys
    }

    /// Look up a key by label.
    pub fn key(&self, label: &str) -> Option<&str> {
        self.keys.get(label).map(String::as_str)
    }

    pub(crate) fn set_key(&mut self, label: KeyLabel, key: &str) -> Result<Change, ModelError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ModelError::InvalidInput(format!(
                "key for user {} cannot be empty",
                self.name
            )));
        }
        if key.contains(['\n', '\r']) {
            return Err(ModelError::InvalidInput(format!(
                "key for user {} must be a single line",
                self.name
            )));
        }
        self.keys.insert(label.clone(), key.to_string());
        Ok(Change::KeySet {
            user: self.name.clone(),
            label,
        })
    }

    pub(crate) fn remove_key(&mut self, label: &KeyLabel) -> Option<Change> {
        self.keys.remove(label).map(|_| Change::KeyRemoved {
            user: self.name.clone(),
            label: label.clone(),
        })
    }
}

impl Identifiable for User {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn kind(&self) -> Kind {
        Kind::User
    }
}

/// A named group of users and other groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    name: GroupName,
    users: BTreeSet<UserName>,
    groups: BTreeSet<GroupName>,
}

impl Group {
    pub(crate) fn new(name: GroupName) -> Self {
        Self {
            name,
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
        }
    }

    /// The group's validated name.
    pub fn id(&self) -> &GroupName {
        &self.name
    }

    /// Whether this is the reserved `@all` group.
    pub fn is_reserved(&self) -> bool {
        self.name.is_reserved()
    }

    /// Direct child users.
    pub fn users(&self) -> &BTreeSet<UserName> {
        &self.users
    }

    /// Direct child groups.
    pub fn groups(&self) -> &BTreeSet<GroupName> {
        &self.groups
    }

    /// Whether `user` is a direct child.
    pub fn contains_user(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    /// Whether `group` is a direct child. See
    /// [`Config::contains_group`](crate::core::config::Config::contains_group)
    /// for transitive containment.
    pub fn has_child_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Direct users and groups, users first, each sorted by name.
    pub fn all_members(&self) -> Vec<Grantee> {
        self.users
            .iter()
            .cloned()
            .map(Grantee::User)
            .chain(self.groups.iter().cloned().map(Grantee::Group))
            .collect()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }

    pub(crate) fn add(&mut self, member: Grantee) -> Result<Change, ModelError> {
        if self.is_reserved() {
            return Err(ModelError::ImmutableGroup(self.name.to_string()));
        }
        let inserted = match &member {
            Grantee::User(user) => self.users.insert(user.clone()),
            Grantee::Group(group) => self.groups.insert(group.clone()),
        };
        if !inserted {
            return Err(ModelError::DuplicateMember {
                group: self.name.to_string(),
                member: member.to_string(),
            });
        }
        Ok(Change::MemberAdded {
            group: self.name.clone(),
            member,
        })
    }

    /// Remove a direct child, returning the change if it was present.
    pub(crate) fn remove(&mut self, member: &Grantee) -> Option<Change> {
        let removed = match member {
            Grantee::User(user) => self.users.remove(user),
            Grantee::Group(group) => self.groups.remove(group),
        };
        removed.then(|| Change::MemberRemoved {
            group: self.name.clone(),
            member: member.clone(),
        })
    }
}

impl Identifiable for Group {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn kind(&self) -> Kind {
        Kind::Group
    }
}

/// A repository-scoped `config key = "value"` setting.
///
/// # Example
///
/// ```
/// use gitacl::core::model::{ConfigKey, ModelError};
///
/// let key = ConfigKey::new("gitweb.owner", "a-b").unwrap();
/// assert_eq!(key.to_string(), "config gitweb.owner = \"a-b\"");
///
/// assert!(matches!(
///     ConfigKey::new("gitweb.owner", "a$b"),
///     Err(ModelError::UnsafeValue { .. })
/// ));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigKey {
    key: ConfigKeyName,
    value: String,
}

impl ConfigKey {
    /// Characters that may never appear in a config value.
    pub const UNSAFE_CHARS: [char; 10] = ['`', '~', '#', '$', '&', '(', ')', '|', '<', '>'];

    /// Create a new config key setting.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnsafeValue`] if `value` contains any of
    ///   [`ConfigKey::UNSAFE_CHARS`]
    /// - [`ModelError::InvalidInput`] if the key is malformed or the value
    ///   contains a quote or line break
    pub fn new(key: &str, value: &str) -> Result<Self, ModelError> {
        let key = ConfigKeyName::new(key)?;
        if value.contains(Self::UNSAFE_CHARS) {
            return Err(ModelError::UnsafeValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        if value.contains(['"', '\n', '\r']) {
            return Err(ModelError::InvalidInput(format!(
                "value for config key {key} cannot contain quotes or line breaks"
            )));
        }
        Ok(Self {
            key,
            value: value.to_string(),
        })
    }

    /// The key name.
    pub fn key(&self) -> &ConfigKeyName {
        &self.key
    }

    /// The value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config {} = \"{}\"", self.key, self.value)
    }
}

/// A repository with its permission buckets and config keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    name: RepoName,
    permissions: BTreeMap<Permission, BTreeSet<Grantee>>,
    config_keys: BTreeMap<ConfigKeyName, ConfigKey>,
}

impl Repository {
    pub(crate) fn new(name: RepoName) -> Self {
        Self {
            name,
            permissions: BTreeMap::new(),
            config_keys: BTreeMap::new(),
        }
    }

    /// The repository's validated name.
    pub fn id(&self) -> &RepoName {
        &self.name
    }

    /// Permission buckets, most permissive first, grantees kind-then-name.
    /// Only non-empty buckets are present.
    pub fn permissions(&self) -> &BTreeMap<Permission, BTreeSet<Grantee>> {
        &self.permissions
    }

    /// The level `grantee` holds on this repository, if any.
    pub fn permission_of(&self, grantee: &Grantee) -> Option<Permission> {
        self.permissions
            .iter()
            .find(|(_, bucket)| bucket.contains(grantee))
            .map(|(level, _)| *level)
    }

    /// Grantees holding exactly `level`.
    pub fn grantees(&self, level: Permission) -> Option<&BTreeSet<Grantee>> {
        self.permissions.get(&level)
    }

    /// Config key settings, ordered by key.
    pub fn config_keys(&self) -> impl Iterator<Item = &ConfigKey> {
        self.config_keys.values()
    }

    /// Look up a config value by key.
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config_keys.get(key).map(ConfigKey::value)
    }

    /// Assign `grantee` to the `level` bucket, moving it out of any other.
    pub(crate) fn set_permission(&mut self, grantee: Grantee, level: Permission) -> Change {
        let previous = self.take_grantee(&grantee);
        self.permissions
            .entry(level)
            .or_default()
            .insert(grantee.clone());
        Change::PermissionSet {
            repository: self.name.clone(),
            grantee,
            permission: level,
            previous,
        }
    }

    /// Remove `grantee` from whatever bucket holds it.
    pub(crate) fn revoke(&mut self, grantee: &Grantee) -> Option<Change> {
        self.take_grantee(grantee)
            .map(|permission| Change::PermissionRevoked {
                repository: self.name.clone(),
                grantee: grantee.clone(),
                permission,
            })
    }

    pub(crate) fn set_config_key(&mut self, setting: ConfigKey) -> Change {
        let change = Change::ConfigKeySet {
            repository: self.name.clone(),
            key: setting.key.clone(),
            value: setting.value.clone(),
        };
        self.config_keys.insert(setting.key.clone(), setting);
        change
    }

    pub(crate) fn remove_config_key(&mut self, key: &str) -> Option<Change> {
        self.config_keys
            .remove(key)
            .map(|setting| Change::ConfigKeyRemoved {
                repository: self.name.clone(),
                key: setting.key,
            })
    }

    fn take_grantee(&mut self, grantee: &Grantee) -> Option<Permission> {
        let level = self.permission_of(grantee)?;
        if let Some(bucket) = self.permissions.get_mut(&level) {
            bucket.remove(grantee);
            if bucket.is_empty() {
                self.permissions.remove(&level);
            }
        }
        Some(level)
    }
}

impl Identifiable for Repository {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn kind(&self) -> Kind {
        Kind::Repository
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> Grantee {
        Grantee::User(UserName::new(name).unwrap())
    }

    fn group(name: &str) -> Grantee {
        Grantee::Group(GroupName::new(name).unwrap())
    }

    fn repo(name: &str) -> Repository {
        Repository::new(RepoName::new(name).unwrap())
    }

    mod group {
        use super::*;

        #[test]
        fn new_group_is_empty() {
            let g = Group::new(GroupName::new("@test-group").unwrap());
            assert_eq!(g.name(), "@test-group");
            assert!(g.is_empty());
            assert!(g.all_members().is_empty());
        }

        #[test]
        fn add_user_and_group() {
            let mut g = Group::new(GroupName::new("@parent").unwrap());
            g.add(user("test-user")).unwrap();
            g.add(group("@child")).unwrap();

            assert!(g.contains_user("test-user"));
            assert!(g.has_child_group("@child"));
            assert_eq!(g.users().len(), 1);
            assert_eq!(g.groups().len(), 1);
        }

        #[test]
        fn duplicate_member_rejected() {
            let mut g = Group::new(GroupName::new("@parent").unwrap());
            g.add(group("@child")).unwrap();
            assert_eq!(
                g.add(group("@child")),
                Err(ModelError::DuplicateMember {
                    group: "@parent".into(),
                    member: "@child".into(),
                })
            );
        }

        #[test]
        fn reserved_group_is_immutable() {
            let mut all = Group::new(GroupName::all());
            assert!(matches!(
                all.add(user("test-user")),
                Err(ModelError::ImmutableGroup(_))
            ));
            assert!(matches!(
                all.add(group("@test-group")),
                Err(ModelError::ImmutableGroup(_))
            ));
            assert!(all.is_empty());
        }

        #[test]
        fn all_members_kind_then_name() {
            let mut g = Group::new(GroupName::new("@parent").unwrap());
            g.add(group("@child")).unwrap();
            g.add(user("zed")).unwrap();
            g.add(user("amy")).unwrap();

            assert_eq!(
                g.all_members(),
                vec![user("amy"), user("zed"), group("@child")]
            );
        }

        #[test]
        fn remove_member() {
            let mut g = Group::new(GroupName::new("@parent").unwrap());
            g.add(user("amy")).unwrap();
            assert!(g.remove(&user("amy")).is_some());
            assert!(g.remove(&user("amy")).is_none());
        }
    }

    mod repository {
        use super::*;

        #[test]
        fn new_repository_has_no_permissions() {
            let r = repo("test-repo");
            assert_eq!(r.name(), "test-repo");
            assert!(r.permissions().is_empty());
        }

        #[test]
        fn two_users_same_level_sorted() {
            let mut r = repo("test-repo");
            r.set_permission(user("test-user-2"), Permission::ReadOnly);
            r.set_permission(user("test-user-1"), Permission::ReadOnly);

            let levels: Vec<_> = r.permissions().keys().copied().collect();
            assert_eq!(levels, vec![Permission::ReadOnly]);

            let bucket: Vec<_> = r.grantees(Permission::ReadOnly).unwrap().iter().collect();
            assert_eq!(bucket, vec![&user("test-user-1"), &user("test-user-2")]);
        }

        #[test]
        fn levels_most_permissive_first() {
            let mut r = repo("test-repo");
            r.set_permission(user("test-user-1"), Permission::ReadOnly);
            r.set_permission(user("test-user-2"), Permission::All);

            let levels: Vec<_> = r.permissions().keys().copied().collect();
            assert_eq!(levels, vec![Permission::All, Permission::ReadOnly]);
        }

        #[test]
        fn reassign_moves_grantee() {
            let mut r = repo("test-repo");
            r.set_permission(user("alice"), Permission::ReadOnly);
            let change = r.set_permission(user("alice"), Permission::All);

            assert_eq!(r.permission_of(&user("alice")), Some(Permission::All));
            assert!(r.grantees(Permission::ReadOnly).is_none());
            assert!(matches!(
                change,
                Change::PermissionSet {
                    previous: Some(Permission::ReadOnly),
                    ..
                }
            ));
        }

        #[test]
        fn revoke_drops_empty_bucket() {
            let mut r = repo("test-repo");
            r.set_permission(group("@devs"), Permission::ReadWrite);
            assert!(r.revoke(&group("@devs")).is_some());
            assert!(r.permissions().is_empty());
            assert!(r.revoke(&group("@devs")).is_none());
        }

        #[test]
        fn config_keys_replace_by_key() {
            let mut r = repo("test-repo");
            r.set_config_key(ConfigKey::new("gitweb.owner", "alice").unwrap());
            r.set_config_key(ConfigKey::new("gitweb.owner", "bob").unwrap());
            assert_eq!(r.config_value("gitweb.owner"), Some("bob"));
            assert_eq!(r.config_keys().count(), 1);
            assert!(r.remove_config_key("gitweb.owner").is_some());
            assert!(r.remove_config_key("gitweb.owner").is_none());
        }
    }

    mod config_key {
        use super::*;

        #[test]
        fn every_unsafe_char_rejected() {
            for c in ConfigKey::UNSAFE_CHARS {
                let value = format!("a{c}b");
                assert!(
                    matches!(
                        ConfigKey::new("hooks.x", &value),
                        Err(ModelError::UnsafeValue { .. })
                    ),
                    "{c} should be rejected"
                );
            }
        }

        #[test]
        fn safe_value_accepted() {
            let key = ConfigKey::new("hooks.x", "a-b").unwrap();
            assert_eq!(key.value(), "a-b");
            assert_eq!(key.key().as_str(), "hooks.x");
        }

        #[test]
        fn quotes_rejected() {
            assert!(matches!(
                ConfigKey::new("hooks.x", "a\"b"),
                Err(ModelError::InvalidInput(_))
            ));
        }

        #[test]
        fn malformed_key_rejected() {
            assert!(ConfigKey::new("", "x").is_err());
            assert!(ConfigKey::new("has space", "x").is_err());
        }
    }

    mod user {
        use super::*;

        #[test]
        fn keys_by_label() {
            let mut u = User::new(UserName::new("alice").unwrap());
            u.set_key(KeyLabel::default_label(), "ssh-ed25519 AAAA alice\n")
                .unwrap();
            u.set_key(KeyLabel::new("laptop").unwrap(), "ssh-ed25519 BBBB")
                .unwrap();

            assert_eq!(u.key(""), Some("ssh-ed25519 AAAA alice"));
            assert_eq!(u.key("laptop"), Some("ssh-ed25519 BBBB"));
            assert_eq!(u.keys().len(), 2);
        }

        #[test]
        fn empty_or_multiline_key_rejected() {
            let mut u = User::new(UserName::new("alice").unwrap());
            assert!(u.set_key(KeyLabel::default_label(), "  ").is_err());
            assert!(u.set_key(KeyLabel::default_label(), "a\nb").is_err());
            assert!(u.keys().is_empty());
        }
    }
}

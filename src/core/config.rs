//! core::config
//!
//! The [`Config`] aggregate root.
//!
//! # Overview
//!
//! A `Config` owns the complete, disjoint sets of users, groups and
//! repositories for one point in time, each keyed by unique name. It is
//! the only entry point for mutation: every successful mutating call
//! appends exactly one [`Change`] to the config's [`Recorder`], and every
//! failing call leaves the config untouched.
//!
//! # Invariants
//!
//! - Names are unique per kind
//! - The reserved `@all` group always exists, has no members, and cannot
//!   be removed
//! - Every member and grantee refers to an entity owned by this config
//! - The group graph is acyclic (enforced when members are added)
//!
//! # Snapshots
//!
//! A `Config` returned by the manager is tagged with the revision it was
//! derived from. Cloning produces a fully independent deep copy.
//!
//! # Example
//!
//! ```
//! use gitacl::core::config::Config;
//! use gitacl::core::types::Permission;
//!
//! let mut config = Config::new();
//! config.create_user("alice").unwrap();
//! config.create_group("@devs").unwrap();
//! config.add_user_to_group("@devs", "alice").unwrap();
//! config.create_repository("repo1").unwrap();
//! config.set_permission("repo1", "@devs", Permission::ReadWrite).unwrap();
//!
//! assert!(config.group("@devs").unwrap().contains_user("alice"));
//! assert_eq!(config.recorder().len(), 5);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::model::{ConfigKey, Group, ModelError, Repository, User};
use super::recorder::{Change, Recorder};
use super::types::{Grantee, GroupName, KeyLabel, Kind, Permission, RepoName, Revision, UserName};

/// Complete access-control configuration.
#[derive(Debug, Clone)]
pub struct Config {
    users: BTreeMap<UserName, User>,
    groups: BTreeMap<GroupName, Group>,
    repositories: BTreeMap<RepoName, Repository>,
    recorder: Recorder,
    base: Option<Revision>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Config {
    /// Structural equality: entities and their relationships. The journal
    /// and the base revision are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.users == other.users
            && self.groups == other.groups
            && self.repositories == other.repositories
    }
}

impl Eq for Config {}

impl Config {
    /// Create a config containing only the reserved `@all` group.
    pub fn new() -> Self {
        let all = GroupName::all();
        let mut groups = BTreeMap::new();
        groups.insert(all.clone(), Group::new(all));
        Self {
            users: BTreeMap::new(),
            groups,
            repositories: BTreeMap::new(),
            recorder: Recorder::new(),
            base: None,
        }
    }

    // =========================================================================
    // Journal and snapshot tagging
    // =========================================================================

    /// The change journal for this instance.
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Changes made to this instance, oldest first.
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.recorder.changes()
    }

    /// The revision this config was derived from, if any.
    pub fn base_revision(&self) -> Option<&Revision> {
        self.base.as_ref()
    }

    pub(crate) fn set_base_revision(&mut self, base: Option<Revision>) {
        self.base = base;
    }

    pub(crate) fn reset_recorder(&mut self) {
        self.recorder.clear();
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Look up a user. Returns `None` on a miss or a malformed name.
    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    /// Look up a group. Returns `None` on a miss or a malformed name.
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Look up a repository. Returns `None` on a miss or a malformed name.
    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repositories.get(name)
    }

    /// All users in name order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// All groups in name order, including the reserved `@all` group.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// All repositories in name order.
    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.values()
    }

    /// Whether `grantee` names an entity owned by this config.
    pub fn owns(&self, grantee: &Grantee) -> bool {
        match grantee {
            Grantee::User(name) => self.users.contains_key(name),
            Grantee::Group(name) => self.groups.contains_key(name),
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create and register a user.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidInput`] if the name is empty or malformed
    /// - [`ModelError::DuplicateName`] if a user with this name exists
    pub fn create_user(&mut self, name: &str) -> Result<&User, ModelError> {
        let name = UserName::new(name)?;
        if self.users.contains_key(&name) {
            return Err(duplicate(Kind::User, &name));
        }
        self.recorder.record(Change::UserCreated { user: name.clone() });
        Ok(self
            .users
            .entry(name.clone())
            .or_insert_with(|| User::new(name)))
    }

    /// Create and register a group.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidInput`] if the name is empty or lacks the `@` sigil
    /// - [`ModelError::DuplicateName`] if a group with this name exists
    pub fn create_group(&mut self, name: &str) -> Result<&Group, ModelError> {
        let name = GroupName::new(name)?;
        if self.groups.contains_key(&name) {
            return Err(duplicate(Kind::Group, &name));
        }
        self.recorder.record(Change::GroupCreated {
            group: name.clone(),
        });
        Ok(self
            .groups
            .entry(name.clone())
            .or_insert_with(|| Group::new(name)))
    }

    /// Create and register a repository.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidInput`] if the name is empty or malformed
    /// - [`ModelError::DuplicateName`] if a repository with this name exists
    pub fn create_repository(&mut self, name: &str) -> Result<&Repository, ModelError> {
        let name = RepoName::new(name)?;
        if self.repositories.contains_key(&name) {
            return Err(duplicate(Kind::Repository, &name));
        }
        self.recorder.record(Change::RepositoryCreated {
            repository: name.clone(),
        });
        Ok(self
            .repositories
            .entry(name.clone())
            .or_insert_with(|| Repository::new(name)))
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove a user, detaching it from every group and repository.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if no such user is owned
    pub fn remove_user(&mut self, name: &str) -> Result<User, ModelError> {
        let user = self
            .users
            .remove(name)
            .ok_or_else(|| unknown(Kind::User, name))?;
        self.detach(&Grantee::User(user.id().clone()));
        self.recorder.record(Change::UserRemoved {
            user: user.id().clone(),
        });
        Ok(user)
    }

    /// Remove a group, detaching it from every parent group and repository.
    ///
    /// # Errors
    ///
    /// - [`ModelError::ImmutableGroup`] for the reserved `@all` group
    /// - [`ModelError::UnknownEntity`] if no such group is owned
    pub fn remove_group(&mut self, name: &str) -> Result<Group, ModelError> {
        if name == GroupName::ALL {
            return Err(ModelError::ImmutableGroup(name.to_string()));
        }
        let group = self
            .groups
            .remove(name)
            .ok_or_else(|| unknown(Kind::Group, name))?;
        self.detach(&Grantee::Group(group.id().clone()));
        self.recorder.record(Change::GroupRemoved {
            group: group.id().clone(),
        });
        Ok(group)
    }

    /// Remove a repository.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if no such repository is owned
    pub fn remove_repository(&mut self, name: &str) -> Result<Repository, ModelError> {
        let repo = self
            .repositories
            .remove(name)
            .ok_or_else(|| unknown(Kind::Repository, name))?;
        self.recorder.record(Change::RepositoryRemoved {
            repository: repo.id().clone(),
        });
        Ok(repo)
    }

    /// Drop every reference to `grantee` from group memberships and
    /// permission buckets.
    fn detach(&mut self, grantee: &Grantee) {
        for group in self.groups.values_mut() {
            group.remove(grantee);
        }
        for repo in self.repositories.values_mut() {
            repo.revoke(grantee);
        }
    }

    // =========================================================================
    // Group membership
    // =========================================================================

    /// Add a user as a direct member of a group.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if the group or user is not owned
    /// - [`ModelError::ImmutableGroup`] if the group is `@all`
    /// - [`ModelError::DuplicateMember`] if the user is already a direct member
    pub fn add_user_to_group(&mut self, group: &str, user: &str) -> Result<(), ModelError> {
        let user = self.owned_user(user)?;
        self.add_member(group, Grantee::User(user))
    }

    /// Add a group as a direct child of another group.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if either group is not owned
    /// - [`ModelError::ImmutableGroup`] if the parent is `@all`
    /// - [`ModelError::DuplicateMember`] if the child is already a direct member
    /// - [`ModelError::CyclicMembership`] if the parent is the child or one of
    ///   its descendants
    pub fn add_group_to_group(&mut self, parent: &str, child: &str) -> Result<(), ModelError> {
        let child = self.owned_group(child)?;
        self.add_member(parent, Grantee::Group(child))
    }

    /// Add a direct member of either kind.
    ///
    /// # Errors
    ///
    /// See [`Config::add_user_to_group`] and [`Config::add_group_to_group`].
    pub fn add_member(&mut self, group: &str, member: impl Into<Grantee>) -> Result<(), ModelError> {
        let member = member.into();
        if !self.owns(&member) {
            return Err(unknown(member_kind(&member), member.to_string()));
        }
        let parent = self
            .groups
            .get(group)
            .ok_or_else(|| unknown(Kind::Group, group))?;
        if parent.is_reserved() {
            return Err(ModelError::ImmutableGroup(group.to_string()));
        }
        if let Grantee::Group(child) = &member {
            if child.as_str() == group || self.reaches(child.as_str(), group) {
                return Err(ModelError::CyclicMembership {
                    parent: group.to_string(),
                    child: child.to_string(),
                });
            }
        }

        let change = self
            .groups
            .get_mut(group)
            .ok_or_else(|| unknown(Kind::Group, group))?
            .add(member)?;
        self.recorder.record(change);
        Ok(())
    }

    /// Remove a direct member from a group.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if the group is not owned or the
    ///   member is not a direct child
    pub fn remove_member(&mut self, group: &str, member: impl Into<Grantee>) -> Result<(), ModelError> {
        let member = member.into();
        let change = self
            .groups
            .get_mut(group)
            .ok_or_else(|| unknown(Kind::Group, group))?
            .remove(&member)
            .ok_or_else(|| unknown(member_kind(&member), member.to_string()))?;
        self.recorder.record(change);
        Ok(())
    }

    /// Whether `other` is a transitive descendant of `parent`.
    ///
    /// Not reflexive: a group does not contain itself unless it is part
    /// of a cycle. Terminates on any graph.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if `parent` is not owned
    pub fn contains_group(&self, parent: &str, other: &str) -> Result<bool, ModelError> {
        if !self.groups.contains_key(parent) {
            return Err(unknown(Kind::Group, parent));
        }
        Ok(self.reaches(parent, other))
    }

    /// Depth-first search over child groups with a visited-set.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![from];

        while let Some(current) = stack.pop() {
            let Some(group) = self.groups.get(current) else {
                continue;
            };
            for child in group.groups() {
                if child.as_str() == target {
                    return true;
                }
                if visited.insert(child.as_str()) {
                    stack.push(child.as_str());
                }
            }
        }
        false
    }

    /// Every user and group reachable from `group` through membership.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if the group is not owned
    pub fn transitive_members(&self, group: &str) -> Result<BTreeSet<Grantee>, ModelError> {
        let root = self
            .groups
            .get(group)
            .ok_or_else(|| unknown(Kind::Group, group))?;

        let mut members = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            for member in current.all_members() {
                if let Grantee::Group(name) = &member {
                    if !members.contains(&member) {
                        if let Some(child) = self.groups.get(name) {
                            stack.push(child);
                        }
                    }
                }
                members.insert(member);
            }
        }
        Ok(members)
    }

    // =========================================================================
    // Permissions and settings
    // =========================================================================

    /// Grant `level` on a repository, moving the grantee out of any other
    /// level it held there.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidInput`] if `grantee` is not a valid name
    /// - [`ModelError::UnknownEntity`] if the repository or grantee is not owned
    pub fn set_permission(
        &mut self,
        repository: &str,
        grantee: &str,
        level: Permission,
    ) -> Result<(), ModelError> {
        let grantee = Grantee::parse(grantee)?;
        self.grant(repository, grantee, level)
    }

    /// Typed form of [`Config::set_permission`].
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if the repository or grantee is not owned
    pub fn grant(
        &mut self,
        repository: &str,
        grantee: impl Into<Grantee>,
        level: Permission,
    ) -> Result<(), ModelError> {
        let grantee = grantee.into();
        if !self.owns(&grantee) {
            return Err(unknown(member_kind(&grantee), grantee.to_string()));
        }
        let change = self
            .repositories
            .get_mut(repository)
            .ok_or_else(|| unknown(Kind::Repository, repository))?
            .set_permission(grantee, level);
        self.recorder.record(change);
        Ok(())
    }

    /// Remove whatever permission `grantee` holds on a repository.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidInput`] if `grantee` is not a valid name
    /// - [`ModelError::UnknownEntity`] if the repository is not owned or the
    ///   grantee holds no permission on it
    pub fn revoke_permission(&mut self, repository: &str, grantee: &str) -> Result<(), ModelError> {
        let grantee = Grantee::parse(grantee)?;
        let change = self
            .repositories
            .get_mut(repository)
            .ok_or_else(|| unknown(Kind::Repository, repository))?
            .revoke(&grantee)
            .ok_or_else(|| unknown(member_kind(&grantee), grantee.to_string()))?;
        self.recorder.record(change);
        Ok(())
    }

    /// Set a repository-scoped config key.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnsafeValue`] if the value contains shell-unsafe characters
    /// - [`ModelError::InvalidInput`] if the key or value is malformed
    /// - [`ModelError::UnknownEntity`] if the repository is not owned
    pub fn set_config_key(&mut self, repository: &str, key: &str, value: &str) -> Result<(), ModelError> {
        let setting = ConfigKey::new(key, value)?;
        let change = self
            .repositories
            .get_mut(repository)
            .ok_or_else(|| unknown(Kind::Repository, repository))?
            .set_config_key(setting);
        self.recorder.record(change);
        Ok(())
    }

    /// Remove a repository-scoped config key.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if the repository is not owned or the
    ///   key is not set
    pub fn remove_config_key(&mut self, repository: &str, key: &str) -> Result<(), ModelError> {
        let repo = self
            .repositories
            .get_mut(repository)
            .ok_or_else(|| unknown(Kind::Repository, repository))?;
        let change = repo.remove_config_key(key).ok_or_else(|| {
            ModelError::InvalidInput(format!("config key {key} is not set on {repository}"))
        })?;
        self.recorder.record(change);
        Ok(())
    }

    /// Set a public key for a user. `label` is empty for the default key.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidInput`] if the label or key is malformed
    /// - [`ModelError::UnknownEntity`] if the user is not owned
    pub fn set_key(&mut self, user: &str, label: &str, key: &str) -> Result<(), ModelError> {
        let label = KeyLabel::new(label)?;
        let change = self
            .users
            .get_mut(user)
            .ok_or_else(|| unknown(Kind::User, user))?
            .set_key(label, key)?;
        self.recorder.record(change);
        Ok(())
    }

    /// Remove a user's key.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownEntity`] if the user is not owned
    /// - [`ModelError::InvalidInput`] if the user has no key with this label
    pub fn remove_key(&mut self, user: &str, label: &str) -> Result<(), ModelError> {
        let label = KeyLabel::new(label)?;
        let change = self
            .users
            .get_mut(user)
            .ok_or_else(|| unknown(Kind::User, user))?
            .remove_key(&label)
            .ok_or_else(|| {
                ModelError::InvalidInput(format!("user {user} has no key labelled '{label}'"))
            })?;
        self.recorder.record(change);
        Ok(())
    }

    fn owned_user(&self, name: &str) -> Result<UserName, ModelError> {
        self.users
            .get(name)
            .map(|u| u.id().clone())
            .ok_or_else(|| unknown(Kind::User, name))
    }

    fn owned_group(&self, name: &str) -> Result<GroupName, ModelError> {
        self.groups
            .get(name)
            .map(|g| g.id().clone())
            .ok_or_else(|| unknown(Kind::Group, name))
    }
}

fn member_kind(grantee: &Grantee) -> Kind {
    match grantee {
        Grantee::User(_) => Kind::User,
        Grantee::Group(_) => Kind::Group,
    }
}

fn duplicate(kind: Kind, name: impl ToString) -> ModelError {
    ModelError::DuplicateName {
        kind,
        name: name.to_string(),
    }
}

fn unknown(kind: Kind, name: impl ToString) -> ModelError {
    ModelError::UnknownEntity {
        kind,
        name: name.to_string(),
    }
}

//! core::recorder
//!
//! Change journal attached to a [`Config`](crate::core::config::Config).
//!
//! # Design
//!
//! Entity mutators return a [`Change`] value describing what they did.
//! The owning `Config` appends each change to its [`Recorder`], which is
//! append-only for the lifetime of the `Config` instance. The recorder
//! is not part of `Config` equality and never reaches the rendered
//! grammar; the manager reads it to build commit messages.
//!
//! # Example
//!
//! ```
//! use gitacl::core::config::Config;
//!
//! let mut config = Config::new();
//! config.create_repository("test-repo").unwrap();
//!
//! let message = config.recorder().commit_message();
//! assert!(message.contains("create repository test-repo"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ConfigKeyName, Grantee, GroupName, KeyLabel, Permission, RepoName, UserName};

/// A single described mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    UserCreated {
        user: UserName,
    },
    UserRemoved {
        user: UserName,
    },
    KeySet {
        user: UserName,
        label: KeyLabel,
    },
    KeyRemoved {
        user: UserName,
        label: KeyLabel,
    },
    GroupCreated {
        group: GroupName,
    },
    GroupRemoved {
        group: GroupName,
    },
    MemberAdded {
        group: GroupName,
        member: Grantee,
    },
    MemberRemoved {
        group: GroupName,
        member: Grantee,
    },
    RepositoryCreated {
        repository: RepoName,
    },
    RepositoryRemoved {
        repository: RepoName,
    },
    PermissionSet {
        repository: RepoName,
        grantee: Grantee,
        permission: Permission,
        /// Level held before the change, if any.
        previous: Option<Permission>,
    },
    PermissionRevoked {
        repository: RepoName,
        grantee: Grantee,
        permission: Permission,
    },
    ConfigKeySet {
        repository: RepoName,
        key: ConfigKeyName,
        value: String,
    },
    ConfigKeyRemoved {
        repository: RepoName,
        key: ConfigKeyName,
    },
}

fn key_suffix(label: &KeyLabel) -> String {
    if label.is_default() {
        String::new()
    } else {
        format!(" ({label})")
    }
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::UserCreated { user } => write!(f, "create user {user}"),
            Change::UserRemoved { user } => write!(f, "remove user {user}"),
            Change::KeySet { user, label } => {
                write!(f, "set key for user {user}{}", key_suffix(label))
            }
            Change::KeyRemoved { user, label } => {
                write!(f, "remove key for user {user}{}", key_suffix(label))
            }
            Change::GroupCreated { group } => write!(f, "create group {group}"),
            Change::GroupRemoved { group } => write!(f, "remove group {group}"),
            Change::MemberAdded { group, member } => write!(f, "add {member} to {group}"),
            Change::MemberRemoved { group, member } => {
                write!(f, "remove {member} from {group}")
            }
            Change::RepositoryCreated { repository } => {
                write!(f, "create repository {repository}")
            }
            Change::RepositoryRemoved { repository } => {
                write!(f, "remove repository {repository}")
            }
            Change::PermissionSet {
                repository,
                grantee,
                permission,
                previous: Some(previous),
            } if previous != permission => write!(
                f,
                "change permission of {grantee} on {repository} from {previous} to {permission}"
            ),
            Change::PermissionSet {
                repository,
                grantee,
                permission,
                ..
            } => write!(f, "grant {permission} on {repository} to {grantee}"),
            Change::PermissionRevoked {
                repository,
                grantee,
                permission,
            } => write!(f, "revoke {permission} on {repository} from {grantee}"),
            Change::ConfigKeySet {
                repository,
                key,
                value,
            } => write!(f, "set config {key} = \"{value}\" on {repository}"),
            Change::ConfigKeyRemoved { repository, key } => {
                write!(f, "unset config {key} on {repository}")
            }
        }
    }
}

/// A recorded change with the time it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// When the change was recorded.
    pub at: DateTime<Utc>,
    /// What changed.
    #[serde(flatten)]
    pub change: Change,
}

/// Append-only journal of changes made to one `Config` instance.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Vec<Entry>,
}

impl Recorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change.
    pub(crate) fn record(&mut self, change: Change) {
        self.entries.push(Entry {
            at: Utc::now(),
            change,
        });
    }

    /// Drop everything recorded so far. Only used when a `Config` is
    /// rebuilt from the store and starts a fresh journal.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// All entries in the order they were recorded.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Iterate over the recorded changes.
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.entries.iter().map(|e| &e.change)
    }

    /// Number of recorded changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a commit message: a summary line, then one bullet per change.
    pub fn commit_message(&self) -> String {
        let summary = match self.entries.len() {
            0 => "Update access configuration".to_string(),
            1 => "Update access configuration (1 change)".to_string(),
            n => format!("Update access configuration ({n} changes)"),
        };

        let mut message = summary;
        if !self.entries.is_empty() {
            message.push_str("\n\n");
            for entry in &self.entries {
                message.push_str("- ");
                message.push_str(&entry.change.to_string());
                message.push('\n');
            }
        }
        message
    }

    /// Serialize the journal as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserName {
        UserName::new(name).unwrap()
    }

    fn repo(name: &str) -> RepoName {
        RepoName::new(name).unwrap()
    }

    #[test]
    fn empty_recorder() {
        let recorder = Recorder::new();
        assert!(recorder.is_empty());
        assert_eq!(recorder.commit_message(), "Update access configuration");
    }

    #[test]
    fn entries_keep_order() {
        let mut recorder = Recorder::new();
        recorder.record(Change::UserCreated { user: user("alice") });
        recorder.record(Change::RepositoryCreated {
            repository: repo("repo1"),
        });

        let changes: Vec<_> = recorder.changes().cloned().collect();
        assert_eq!(
            changes,
            vec![
                Change::UserCreated { user: user("alice") },
                Change::RepositoryCreated {
                    repository: repo("repo1")
                },
            ]
        );
    }

    #[test]
    fn commit_message_lists_changes() {
        let mut recorder = Recorder::new();
        recorder.record(Change::UserCreated { user: user("alice") });
        recorder.record(Change::PermissionSet {
            repository: repo("repo1"),
            grantee: Grantee::User(user("alice")),
            permission: Permission::All,
            previous: None,
        });

        let message = recorder.commit_message();
        let mut lines = message.lines();
        assert_eq!(
            lines.next(),
            Some("Update access configuration (2 changes)")
        );
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some("- create user alice"));
        assert_eq!(lines.next(), Some("- grant RW+ on repo1 to alice"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn permission_move_is_described() {
        let change = Change::PermissionSet {
            repository: repo("repo1"),
            grantee: Grantee::User(user("bob")),
            permission: Permission::ReadOnly,
            previous: Some(Permission::All),
        };
        assert_eq!(
            change.to_string(),
            "change permission of bob on repo1 from RW+ to R"
        );
    }

    #[test]
    fn key_labels_in_descriptions() {
        let default = Change::KeySet {
            user: user("alice"),
            label: KeyLabel::default_label(),
        };
        let labelled = Change::KeySet {
            user: user("alice"),
            label: KeyLabel::new("laptop").unwrap(),
        };
        assert_eq!(default.to_string(), "set key for user alice");
        assert_eq!(labelled.to_string(), "set key for user alice (laptop)");
    }

    #[test]
    fn clear_resets() {
        let mut recorder = Recorder::new();
        recorder.record(Change::UserCreated { user: user("alice") });
        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn json_form() {
        let mut recorder = Recorder::new();
        recorder.record(Change::GroupCreated {
            group: GroupName::new("@devs").unwrap(),
        });
        let json = recorder.to_json().unwrap();
        assert!(json.contains("\"change\": \"group_created\""));
        assert!(json.contains("\"group\": \"@devs\""));
    }
}

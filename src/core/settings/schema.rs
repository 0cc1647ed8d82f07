//! core::settings::schema
//!
//! Settings file schema.
//!
//! # Validation
//!
//! Values are validated after parsing: the branch must be a plausible ref
//! component, layout paths must be relative and stay inside the admin
//! repository, and the committer identity must be usable by git.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::SettingsError;

/// Settings file contents.
///
/// # Example
///
/// ```toml
/// branch = "master"
/// conf_path = "conf/gitolite.conf"
/// keydir = "keydir"
/// workdir = "/var/lib/gitacl/admin"
///
/// [committer]
/// name = "gitacl"
/// email = "gitacl@localhost"
///
/// [ssh]
/// username = "git"
/// private_key = "/home/admin/.ssh/id_ed25519"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    /// Branch holding the admin configuration
    pub branch: Option<String>,

    /// Path of the conf file inside the admin repository
    pub conf_path: Option<String>,

    /// Directory holding key files inside the admin repository
    pub keydir: Option<String>,

    /// Private working copy location (default: fresh temp directory)
    pub workdir: Option<PathBuf>,

    /// Identity used for commits
    pub committer: Option<CommitterSettings>,

    /// SSH credentials for remote locations
    pub ssh: Option<SshSettings>,
}

impl SettingsFile {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(branch) = &self.branch {
            validate_branch(branch)?;
        }
        if let Some(path) = &self.conf_path {
            validate_relative("conf_path", path)?;
        }
        if let Some(path) = &self.keydir {
            validate_relative("keydir", path)?;
        }
        if let Some(committer) = &self.committer {
            committer.validate()?;
        }
        if let Some(ssh) = &self.ssh {
            ssh.validate()?;
        }
        Ok(())
    }
}

/// Commit identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CommitterSettings {
    /// Committer name
    pub name: Option<String>,

    /// Committer email
    pub email: Option<String>,
}

impl CommitterSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() || name.contains(['<', '>', '\n']) {
                return Err(SettingsError::InvalidValue(format!(
                    "invalid committer name '{name}'"
                )));
            }
        }
        if let Some(email) = &self.email {
            if !email.contains('@') || email.contains(['<', '>', ' ', '\n']) {
                return Err(SettingsError::InvalidValue(format!(
                    "invalid committer email '{email}'"
                )));
            }
        }
        Ok(())
    }
}

/// SSH credentials.
///
/// Without a private key the ssh agent is asked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SshSettings {
    /// User name when the location does not carry one
    pub username: Option<String>,

    /// Private key file
    pub private_key: Option<PathBuf>,

    /// Public key file (optional, derived by libssh2 when absent)
    pub public_key: Option<PathBuf>,
}

impl SshSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.public_key.is_some() && self.private_key.is_none() {
            return Err(SettingsError::InvalidValue(
                "ssh.public_key requires ssh.private_key".to_string(),
            ));
        }
        if let Some(username) = &self.username {
            if username.is_empty() || username.contains(char::is_whitespace) {
                return Err(SettingsError::InvalidValue(format!(
                    "invalid ssh username '{username}'"
                )));
            }
        }
        Ok(())
    }
}

fn validate_branch(branch: &str) -> Result<(), SettingsError> {
    let invalid = branch.is_empty()
        || branch.starts_with(['-', '/'])
        || branch.ends_with(['/', '.'])
        || branch.ends_with(".lock")
        || branch.contains("..")
        || branch.contains("@{")
        || branch
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));

    if invalid {
        return Err(SettingsError::InvalidValue(format!(
            "invalid branch name '{branch}'"
        )));
    }
    Ok(())
}

fn validate_relative(field: &str, path: &str) -> Result<(), SettingsError> {
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));

    if path.is_empty() || escapes || path.ends_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "{field} must be a relative path inside the admin repository, got '{path}'"
        )));
    }
    Ok(())
}

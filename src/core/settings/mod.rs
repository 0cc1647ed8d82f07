//! core::settings
//!
//! Manager settings schema and loading.
//!
//! # Locations
//!
//! Searched in order, first match wins:
//! 1. `$GITACL_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/gitacl/config.toml`
//! 3. `~/.gitacl/config.toml`
//!
//! With no file present every value takes its default.
//!
//! # Example
//!
//! ```no_run
//! use gitacl::core::settings::Settings;
//!
//! let settings = Settings::load().unwrap();
//! println!("branch: {}", settings.branch());
//! println!("conf:   {}", settings.conf_path());
//! ```

pub mod schema;

pub use schema::{CommitterSettings, SettingsFile, SshSettings};

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default branch of the admin repository.
pub const DEFAULT_BRANCH: &str = "master";

/// Default conf file path.
pub const DEFAULT_CONF_PATH: &str = "conf/gitolite.conf";

/// Default key directory.
pub const DEFAULT_KEYDIR: &str = "keydir";

/// Default committer name.
pub const DEFAULT_COMMITTER_NAME: &str = "gitacl";

/// Default committer email.
pub const DEFAULT_COMMITTER_EMAIL: &str = "gitacl@localhost";

/// Errors from settings operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Resolved settings.
///
/// Accessors apply defaults for anything the file leaves out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// Values as read from the file
    pub file: SettingsFile,
    /// Path the file was loaded from
    loaded_from: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the standard locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read,
    /// parsed, or validated. A missing file is not an error.
    pub fn load() -> Result<Self, SettingsError> {
        let path = Self::locate(|key| std::env::var(key).ok(), dirs::home_dir());
        match path {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Find the settings file, if any.
    fn locate(
        env: impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
    ) -> Option<PathBuf> {
        let candidates = [
            env("GITACL_CONFIG").map(PathBuf::from),
            env("XDG_CONFIG_HOME").map(|xdg| PathBuf::from(xdg).join("gitacl/config.toml")),
            home.map(|home| home.join(".gitacl/config.toml")),
        ];
        candidates.into_iter().flatten().find(|p| p.exists())
    }

    /// Load settings from an explicit file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_path(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|e| SettingsError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let file: SettingsFile = toml::from_str(&contents).map_err(|e| SettingsError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        file.validate()?;

        Ok(Self {
            file,
            loaded_from: Some(path.to_path_buf()),
        })
    }

    /// Build settings from already-parsed values.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` if validation fails.
    pub fn from_file(file: SettingsFile) -> Result<Self, SettingsError> {
        file.validate()?;
        Ok(Self {
            file,
            loaded_from: None,
        })
    }

    /// Use an explicit private working copy directory.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.file.workdir = Some(workdir.into());
        self
    }

    // =========================================================================
    // Accessors with defaults
    // =========================================================================

    /// Branch holding the admin configuration.
    pub fn branch(&self) -> &str {
        self.file.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    /// Conf file path inside the admin repository.
    pub fn conf_path(&self) -> &str {
        self.file.conf_path.as_deref().unwrap_or(DEFAULT_CONF_PATH)
    }

    /// Key directory inside the admin repository.
    pub fn keydir(&self) -> &str {
        self.file.keydir.as_deref().unwrap_or(DEFAULT_KEYDIR)
    }

    /// Explicit private working copy, if configured.
    pub fn workdir(&self) -> Option<&Path> {
        self.file.workdir.as_deref()
    }

    /// Committer name.
    pub fn committer_name(&self) -> &str {
        self.file
            .committer
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .unwrap_or(DEFAULT_COMMITTER_NAME)
    }

    /// Committer email.
    pub fn committer_email(&self) -> &str {
        self.file
            .committer
            .as_ref()
            .and_then(|c| c.email.as_deref())
            .unwrap_or(DEFAULT_COMMITTER_EMAIL)
    }

    /// SSH credentials, if configured.
    pub fn ssh(&self) -> Option<&SshSettings> {
        self.file.ssh.as_ref()
    }

    /// Path the settings were loaded from.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }
}

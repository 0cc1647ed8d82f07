//! core::codec
//!
//! Bidirectional mapping between a [`Config`] and its on-disk form.
//!
//! # Format
//!
//! The admin repository holds two kinds of files:
//!
//! - `conf/gitolite.conf`: line-oriented access rules
//! - `keydir/**/<user>[@<label>].pub`: one public key per file
//!
//! The conf grammar, one declaration per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! @group = member member ...
//! repo name [name ...]
//!     CODE = grantee grantee ...
//!     config key = "value"
//! ```
//!
//! `CODE` is one of `RW+ RW R C -`. Indentation marks a line as belonging
//! to the preceding `repo` declaration. Lines are case-sensitive and
//! unknown directives are rejected.
//!
//! # Determinism
//!
//! Rendering is a pure function of the config: group declarations in name
//! order, then repositories in name order; within a repository, permission
//! levels most permissive first, grantees users-then-groups by name, then
//! config keys by key. Rendering the same config twice yields identical
//! bytes, and parsing rendered output yields an equal config.
//!
//! # Example
//!
//! ```
//! use gitacl::core::codec;
//! use gitacl::core::config::Config;
//! use gitacl::core::types::Permission;
//!
//! let mut config = Config::new();
//! config.create_user("alice").unwrap();
//! config.create_repository("repo1").unwrap();
//! config.set_permission("repo1", "alice", Permission::All).unwrap();
//!
//! let text = codec::render_conf(&config);
//! assert_eq!(text, "repo repo1\n    RW+ = alice\n");
//! assert_eq!(codec::parse_conf(&text).unwrap(), config);
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

use super::config::Config;
use super::model::ModelError;
use super::types::{
    Fingerprint, Grantee, GroupName, KeyLabel, Permission, RepoName, TypeError, UserName,
};

/// Indentation used for lines inside a repo block.
const INDENT: &str = "    ";

/// Suffix of key files.
const KEY_SUFFIX: &str = ".pub";

/// Errors from parsing the configuration files.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A malformed conf line.
    #[error("parse error at line {line}: {message}: '{content}'")]
    Parse {
        /// 1-based line number
        line: usize,
        /// The offending line
        content: String,
        /// What is wrong with it
        message: String,
    },

    /// A permission code outside the fixed vocabulary.
    #[error("unknown permission '{code}' at line {line}")]
    UnknownPermission {
        /// 1-based line number
        line: usize,
        /// The unrecognized code
        code: String,
    },

    /// A config value with shell-unsafe characters.
    #[error("unsafe value for config key {key} at line {line}: {value}")]
    UnsafeValue {
        /// 1-based line number
        line: usize,
        /// The config key
        key: String,
        /// The rejected value
        value: String,
    },

    /// A key file that does not map to a valid user and key.
    #[error("invalid key file '{path}': {message}")]
    KeyFile {
        /// Path relative to the key directory
        path: String,
        /// What is wrong with it
        message: String,
    },
}

/// The rendered form of a config: conf text plus key files.
///
/// Key file paths are relative to the key directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFiles {
    /// Contents of the conf file.
    pub conf: String,
    /// Key file path (relative to the key directory) to contents.
    pub keys: BTreeMap<String, String>,
}

impl ConfigFiles {
    /// Content hash over the conf text and every key file.
    pub fn fingerprint(&self) -> Fingerprint {
        let conf = std::iter::once(("", self.conf.as_str()));
        let keys = self.keys.iter().map(|(p, c)| (p.as_str(), c.as_str()));
        Fingerprint::compute(conf.chain(keys))
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render a config to its full on-disk form.
pub fn render(config: &Config) -> ConfigFiles {
    ConfigFiles {
        conf: render_conf(config),
        keys: render_keys(config),
    }
}

/// Render the conf file.
pub fn render_conf(config: &Config) -> String {
    let mut blocks: Vec<String> = Vec::new();

    let mut groups = String::new();
    for group in config.groups().filter(|g| !g.is_reserved()) {
        groups.push_str(group.id().as_str());
        groups.push_str(" =");
        for member in group.all_members() {
            groups.push(' ');
            groups.push_str(&member.to_string());
        }
        groups.push('\n');
    }
    if !groups.is_empty() {
        blocks.push(groups);
    }

    for repo in config.repositories() {
        let mut block = format!("repo {}\n", repo.id());
        for (level, grantees) in repo.permissions() {
            block.push_str(INDENT);
            block.push_str(level.code());
            block.push_str(" =");
            for grantee in grantees {
                block.push(' ');
                block.push_str(&grantee.to_string());
            }
            block.push('\n');
        }
        for setting in repo.config_keys() {
            block.push_str(INDENT);
            block.push_str(&setting.to_string());
            block.push('\n');
        }
        blocks.push(block);
    }

    blocks.join("\n")
}

/// Render one key file per user key.
pub fn render_keys(config: &Config) -> BTreeMap<String, String> {
    let mut keys = BTreeMap::new();
    for user in config.users() {
        for (label, key) in user.keys() {
            let mut path = String::new();
            if let Some(directory) = label.directory() {
                path.push_str(directory);
                path.push('/');
            }
            path.push_str(user.id().as_str());
            if !label.suffix().is_empty() {
                path.push('@');
                path.push_str(label.suffix());
            }
            path.push_str(KEY_SUFFIX);
            keys.insert(path, format!("{key}\n"));
        }
    }
    keys
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse the full on-disk form into a fresh config with an empty journal.
///
/// # Errors
///
/// Returns the first [`CodecError`] found in the conf text or key files.
pub fn parse(files: &ConfigFiles) -> Result<Config, CodecError> {
    let mut config = parse_conf_into(&files.conf)?;
    for (path, content) in &files.keys {
        parse_key_file(&mut config, path, content)?;
    }
    config.reset_recorder();
    Ok(config)
}

/// Parse conf text alone into a fresh config with an empty journal.
///
/// # Errors
///
/// Returns the first [`CodecError`] found in the text.
pub fn parse_conf(text: &str) -> Result<Config, CodecError> {
    let mut config = parse_conf_into(text)?;
    config.reset_recorder();
    Ok(config)
}

/// Line-level parser state.
struct Parser<'a> {
    config: Config,
    line: usize,
    content: &'a str,
    /// Repositories named by the innermost `repo` line.
    current: Option<Vec<RepoName>>,
}

fn parse_conf_into(text: &str) -> Result<Config, CodecError> {
    let mut parser = Parser {
        config: Config::new(),
        line: 0,
        content: "",
        current: None,
    };

    for (idx, raw) in text.lines().enumerate() {
        parser.line = idx + 1;
        parser.content = raw;

        let line = strip_comment(raw);
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            parser.repo_rule(line.trim())?;
        } else {
            parser.current = None;
            parser.declaration(line.trim())?;
        }
    }

    Ok(parser.config)
}

/// Cut a trailing comment. A `#` inside double quotes is part of the value.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (pos, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..pos],
            _ => {}
        }
    }
    line
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError::Parse {
            line: self.line,
            content: self.content.to_string(),
            message: message.into(),
        }
    }

    fn model_error(&self, err: ModelError) -> CodecError {
        match err {
            ModelError::UnsafeValue { key, value } => CodecError::UnsafeValue {
                line: self.line,
                key,
                value,
            },
            ModelError::UnknownPermission(code) => CodecError::UnknownPermission {
                line: self.line,
                code,
            },
            other => self.error(other.to_string()),
        }
    }

    fn type_error(&self, err: TypeError) -> CodecError {
        self.model_error(err.into())
    }

    /// A top-level line: a group declaration or a `repo` line.
    fn declaration(&mut self, line: &str) -> Result<(), CodecError> {
        if line.starts_with(GroupName::SIGIL) {
            return self.group_declaration(line);
        }

        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("repo") => {
                let mut names = Vec::new();
                for token in tokens {
                    if token.starts_with(GroupName::SIGIL) {
                        return Err(self.error("repository groups are not supported"));
                    }
                    let name = RepoName::new(token).map_err(|e| self.type_error(e))?;
                    self.ensure_repository(&name)?;
                    names.push(name);
                }
                if names.is_empty() {
                    return Err(self.error("repo line names no repository"));
                }
                self.current = Some(names);
                Ok(())
            }
            _ => Err(self.error("unknown directive")),
        }
    }

    fn group_declaration(&mut self, line: &str) -> Result<(), CodecError> {
        let Some((lhs, rhs)) = line.split_once('=') else {
            return Err(self.error("group declaration without '='"));
        };
        let name = GroupName::new(lhs.trim()).map_err(|e| self.type_error(e))?;
        self.ensure_group(&name)?;

        for token in rhs.split_whitespace() {
            let member = Grantee::parse(token).map_err(|e| self.type_error(e))?;
            self.ensure_grantee(&member)?;
            let already = self
                .config
                .group(name.as_str())
                .is_some_and(|g| match &member {
                    Grantee::User(u) => g.contains_user(u.as_str()),
                    Grantee::Group(c) => g.has_child_group(c.as_str()),
                });
            if already {
                continue;
            }
            self.config
                .add_member(name.as_str(), member)
                .map_err(|e| self.model_error(e))?;
        }
        Ok(())
    }

    /// An indented line inside a repo block.
    fn repo_rule(&mut self, line: &str) -> Result<(), CodecError> {
        let Some(repos) = self.current.clone() else {
            return Err(self.error("indented rule outside of a repo block"));
        };

        if let Some(rest) = line.strip_prefix("config ") {
            let Some((key, value)) = rest.split_once('=') else {
                return Err(self.error("config line without '='"));
            };
            let value = unquote(value.trim());
            for repo in &repos {
                self.config
                    .set_config_key(repo.as_str(), key.trim(), value)
                    .map_err(|e| self.model_error(e))?;
            }
            return Ok(());
        }

        let Some((lhs, rhs)) = line.split_once('=') else {
            return Err(self.error("permission rule without '='"));
        };
        let mut lhs_tokens = lhs.split_whitespace();
        let code = lhs_tokens.next().unwrap_or("");
        if lhs_tokens.next().is_some() {
            return Err(self.error("refex-qualified rules are not supported"));
        }
        let level = Permission::from_code(code).map_err(|e| match e {
            TypeError::InvalidInput(_) => self.error("permission rule without a code"),
            other => self.type_error(other),
        })?;

        let mut grantees = Vec::new();
        for token in rhs.split_whitespace() {
            let grantee = Grantee::parse(token).map_err(|e| self.type_error(e))?;
            self.ensure_grantee(&grantee)?;
            grantees.push(grantee);
        }
        if grantees.is_empty() {
            return Err(self.error("permission rule names no grantee"));
        }

        for repo in &repos {
            for grantee in &grantees {
                self.config
                    .grant(repo.as_str(), grantee.clone(), level)
                    .map_err(|e| self.model_error(e))?;
            }
        }
        Ok(())
    }

    fn ensure_grantee(&mut self, grantee: &Grantee) -> Result<(), CodecError> {
        match grantee {
            Grantee::User(name) => self.ensure_user(name),
            Grantee::Group(name) => self.ensure_group(name),
        }
    }

    fn ensure_user(&mut self, name: &UserName) -> Result<(), CodecError> {
        if self.config.user(name.as_str()).is_none() {
            self.config
                .create_user(name.as_str())
                .map(|_| ())
                .map_err(|e| self.model_error(e))?;
        }
        Ok(())
    }

    fn ensure_group(&mut self, name: &GroupName) -> Result<(), CodecError> {
        if self.config.group(name.as_str()).is_none() {
            self.config
                .create_group(name.as_str())
                .map(|_| ())
                .map_err(|e| self.model_error(e))?;
        }
        Ok(())
    }

    fn ensure_repository(&mut self, name: &RepoName) -> Result<(), CodecError> {
        if self.config.repository(name.as_str()).is_none() {
            self.config
                .create_repository(name.as_str())
                .map(|_| ())
                .map_err(|e| self.model_error(e))?;
        }
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Split a key file name into user name and label.
///
/// `alice.pub` is alice's default key, `alice@laptop.pub` is alice's
/// `laptop` key. A suffix containing a `.` belongs to the user name, so
/// `jane@example.org.pub` is jane@example.org's default key.
fn split_key_file_name(stem: &str) -> (&str, &str) {
    match stem.rsplit_once('@') {
        Some((user, label)) if !label.contains('.') => (user, label),
        _ => (stem, ""),
    }
}

fn parse_key_file(config: &mut Config, path: &str, content: &str) -> Result<(), CodecError> {
    let (directory, file_name) = match path.rsplit_once('/') {
        Some((directory, file_name)) => (Some(directory), file_name),
        None => (None, path),
    };
    let Some(stem) = file_name.strip_suffix(KEY_SUFFIX) else {
        return Ok(());
    };

    let key_error = |message: String| CodecError::KeyFile {
        path: path.to_string(),
        message,
    };

    let (user, suffix) = split_key_file_name(stem);
    let user = UserName::new(user).map_err(|e| key_error(e.to_string()))?;
    let label = KeyLabel::at(directory, suffix).map_err(|e| key_error(e.to_string()))?;
    match config.user(user.as_str()) {
        Some(existing) if existing.keys().contains_key(&label) => {
            return Err(key_error(format!(
                "another key file already holds this key of user {user}"
            )));
        }
        Some(_) => {}
        None => {
            config
                .create_user(user.as_str())
                .map(|_| ())
                .map_err(|e| key_error(e.to_string()))?;
        }
    }
    config
        .set_key(user.as_str(), label.as_str(), content.trim())
        .map_err(|e| key_error(e.to_string()))
}

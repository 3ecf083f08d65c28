//! Session and Host Configuration
//!
//! Configuration is plain data (`SessionConfig`, `HostConfig`) that can be
//! built in code or read from TOML:
//!
//! ```toml
//! search_path = ["/opt/host/lib"]
//! protected = ["host", "host.io"]
//! inherit_process_env = false
//!
//! [env]
//! HOST_MODE = "embedded"
//!
//! [sessions.legacy]
//! keep_global = ["host_api"]
//! keep_global_match = "subtree"
//! paths = ["/opt/plugins/legacy"]
//! path_placement = "prepend"
//!
//! [sessions.legacy.env]
//! PLUGIN_MODE = "legacy"
//! ```
//!
//! `SessionConfig::validate` turns a config into `SessionSettings`, failing
//! before anything is patched if any entry is malformed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::patch::{EnvDelta, PathDelta, PathPlacement};
use crate::modules::{Identifier, IdentifierError};

/// Invalid session or host configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A keep-global or protected entry is not a valid identifier.
    #[error("invalid {field} entry: {source}")]
    InvalidIdentifier {
        field: &'static str,
        #[source]
        source: IdentifierError,
    },

    /// An environment variable name cannot be set.
    #[error("invalid environment variable name '{name}': {reason}")]
    InvalidEnvName { name: String, reason: &'static str },

    /// An environment variable value cannot be set.
    #[error("invalid value for environment variable '{name}': contains a NUL byte")]
    InvalidEnvValue { name: String },

    /// A path entry is unusable.
    #[error("invalid {field} entry #{index} '{path}': {reason}")]
    InvalidPath {
        field: &'static str,
        index: usize,
        path: String,
        reason: &'static str,
    },

    /// No session profile is configured under this name.
    #[error("no session profile named '{0}'")]
    UnknownProfile(String),

    /// The document is not valid TOML or has the wrong shape.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// The document could not be read.
    #[error("failed to read '{}': {message}", .path.display())]
    Read { path: PathBuf, message: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// How `keep_global` entries match loaded identifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepGlobalMatch {
    /// Only the exact identifier is kept shared.
    #[default]
    Exact,
    /// The identifier and all of its dotted descendants are kept shared.
    Subtree,
}

/// Requested configuration of one session.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Identifiers resolved through the shared cache while the scope is active.
    pub keep_global: Vec<String>,
    pub keep_global_match: KeepGlobalMatch,
    /// Variables set for the duration of the scope.
    pub env: BTreeMap<String, String>,
    pub inherit_env: bool,
    /// Search-path entries added for the duration of the scope.
    pub paths: Vec<String>,
    pub inherit_paths: bool,
    pub path_placement: PathPlacement,
    /// Name used in log output.
    pub label: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_global: Vec::new(),
            keep_global_match: KeepGlobalMatch::Exact,
            env: BTreeMap::new(),
            inherit_env: true,
            paths: Vec::new(),
            inherit_paths: true,
            path_placement: PathPlacement::Prepend,
            label: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_global<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keep_global.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn keep_global_match(mut self, mode: KeepGlobalMatch) -> Self {
        self.keep_global_match = mode;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn inherit_paths(mut self, inherit: bool) -> Self {
        self.inherit_paths = inherit;
        self
    }

    pub fn path_placement(mut self, placement: PathPlacement) -> Self {
        self.path_placement = placement;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Parse a session config from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a session config file.
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        from_toml_path(path)
    }

    /// Check every entry and produce the settings a session runs with.
    pub fn validate(&self) -> Result<SessionSettings, ConfigError> {
        let keep_global = parse_identifiers("keep_global", &self.keep_global)?
            .into_iter()
            .collect::<BTreeSet<_>>();

        for (name, value) in &self.env {
            validate_env_entry(name, value)?;
        }
        let paths = validate_paths("paths", &self.paths)?;

        Ok(SessionSettings {
            keep_global,
            keep_global_match: self.keep_global_match,
            env: EnvDelta {
                vars: self.env.clone(),
                inherit: self.inherit_env,
            },
            paths: PathDelta {
                entries: paths,
                placement: self.path_placement,
                inherit: self.inherit_paths,
            },
            label: self.label.clone(),
        })
    }
}

/// Validated session configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub keep_global: BTreeSet<Identifier>,
    pub keep_global_match: KeepGlobalMatch,
    pub env: EnvDelta,
    pub paths: PathDelta,
    pub label: Option<String>,
}

impl SessionSettings {
    /// True if `ident` resolves through the shared cache under these settings.
    pub fn keeps_global(&self, ident: &Identifier) -> bool {
        match self.keep_global_match {
            KeepGlobalMatch::Exact => self.keep_global.contains(ident),
            KeepGlobalMatch::Subtree => self.keep_global.iter().any(|kept| ident.is_within(kept)),
        }
    }
}

/// Host-level configuration document.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Identifiers always exempt from isolation.
    pub protected: Vec<String>,
    /// Initial search path.
    pub search_path: Vec<String>,
    /// Seed the environment table from the process environment.
    pub inherit_process_env: bool,
    /// Variables set on top of the initial environment.
    pub env: BTreeMap<String, String>,
    /// Named session profiles.
    pub sessions: BTreeMap<String, SessionConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            protected: Vec::new(),
            search_path: Vec::new(),
            inherit_process_env: true,
            env: BTreeMap::new(),
            sessions: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    /// Parse a host config from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a host config file.
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        from_toml_path(path)
    }

    /// A named session profile.
    pub fn session(&self, name: &str) -> Option<&SessionConfig> {
        self.sessions.get(name)
    }

    pub(crate) fn validated_search_path(&self) -> Result<Vec<PathBuf>, ConfigError> {
        validate_paths("search_path", &self.search_path)
    }
}

fn from_toml_path<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(toml::from_str(&content)?)
}

pub(crate) fn parse_identifiers(
    field: &'static str,
    names: &[String],
) -> Result<Vec<Identifier>, ConfigError> {
    names
        .iter()
        .map(|name| {
            Identifier::new(name.as_str())
                .map_err(|source| ConfigError::InvalidIdentifier { field, source })
        })
        .collect()
}

pub(crate) fn validate_env_entry(name: &str, value: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains('=') {
        Some("name contains '='")
    } else if name.contains('\0') {
        Some("name contains a NUL byte")
    } else {
        None
    };
    if let Some(reason) = reason {
        return Err(ConfigError::InvalidEnvName {
            name: name.to_string(),
            reason,
        });
    }
    if value.contains('\0') {
        return Err(ConfigError::InvalidEnvValue {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn validate_paths(field: &'static str, entries: &[String]) -> Result<Vec<PathBuf>, ConfigError> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let reason = if entry.trim().is_empty() {
                Some("path is empty")
            } else if entry.contains('\0') {
                Some("path contains a NUL byte")
            } else {
                None
            };
            match reason {
                Some(reason) => Err(ConfigError::InvalidPath {
                    field,
                    index,
                    path: entry.clone(),
                    reason,
                }),
                None => Ok(PathBuf::from(entry)),
            }
        })
        .collect()
}

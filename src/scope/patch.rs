//! Environment and Search-Path Patching
//!
//! Reversible, stacked mutation of the environment table and the resource
//! search path. A patch is computed from the current state and a delta
//! (`apply`); reversal reinstates the snapshot taken before the patch. Nested
//! scopes therefore revert to their own entry state, not the pristine one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::Deserialize;

/// Environment variable table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvTable(BTreeMap<String, String>);

impl EnvTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys added, removed or changed between `self` and `other`, sorted.
    pub fn changed_keys(&self, other: &EnvTable) -> Vec<String> {
        self.0
            .keys()
            .chain(other.0.keys())
            .unique()
            .filter(|key| self.0.get(*key) != other.0.get(*key))
            .sorted()
            .cloned()
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Ordered list of locations consulted to find unit sources.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchPath(Vec<PathBuf>);

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.0.iter().any(|p| p == path.as_ref())
    }

    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.0.push(path.into());
    }

    pub fn as_slice(&self) -> &[PathBuf] {
        &self.0
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().map(|p| p.display()).join(":"))
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for SearchPath {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Where a scope's extra paths go relative to the enclosing search path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathPlacement {
    /// Scope paths are searched first.
    #[default]
    Prepend,
    /// Scope paths are searched after the enclosing ones.
    Append,
}

/// Environment change requested by a scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvDelta {
    pub vars: BTreeMap<String, String>,
    /// Merge over the current table (true) or replace it (false).
    pub inherit: bool,
}

impl EnvDelta {
    /// New table with this delta applied on top of `current`.
    pub fn apply(&self, current: &EnvTable) -> EnvTable {
        let mut next = if self.inherit {
            current.clone()
        } else {
            EnvTable::new()
        };
        for (key, value) in &self.vars {
            next.set(key.clone(), value.clone());
        }
        next
    }
}

/// Search-path change requested by a scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathDelta {
    pub entries: Vec<PathBuf>,
    pub placement: PathPlacement,
    /// Keep the current entries (true) or use only `entries` (false).
    pub inherit: bool,
}

impl PathDelta {
    /// New search path with this delta applied to `current`.
    pub fn apply(&self, current: &SearchPath) -> SearchPath {
        if !self.inherit {
            return self.entries.iter().cloned().collect();
        }
        let (first, second) = match self.placement {
            PathPlacement::Prepend => (self.entries.as_slice(), current.as_slice()),
            PathPlacement::Append => (current.as_slice(), self.entries.as_slice()),
        };
        first.iter().chain(second).cloned().collect()
    }
}

/// Environment table plus search path at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub env: EnvTable,
    pub paths: SearchPath,
}

impl Snapshot {
    pub fn new(env: EnvTable, paths: SearchPath) -> Self {
        Self { env, paths }
    }

    /// Differences between this (expected) snapshot and `current`.
    pub fn drift(&self, current: &Snapshot) -> Drift {
        Drift {
            env_keys: self.env.changed_keys(&current.env),
            paths_changed: self.paths != current.paths,
        }
    }
}

/// What changed between an expected and an observed snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Drift {
    pub env_keys: Vec<String>,
    pub paths_changed: bool,
}

impl Drift {
    pub fn is_empty(&self) -> bool {
        self.env_keys.is_empty() && !self.paths_changed
    }
}

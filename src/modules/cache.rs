//! Shared Module Cache
//!
//! The process-wide mapping from identifier to loaded unit, consulted to
//! avoid re-executing source. Also defines `SourceRef`, the record of which
//! source a unit was executed from:
//! - Origin: where the loader found the source
//! - Content hash: lets callers tell whether a reload picked up new text

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use super::identifier::Identifier;
use super::unit::UnitHandle;

/// Where a unit's source came from and what it hashed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceRef {
    /// Location reported by the loader (a file path, or a virtual path).
    origin: PathBuf,

    /// Hash of the source text at the time it was executed.
    content_hash: u64,
}

impl SourceRef {
    /// Create a source reference from an origin and its content.
    pub fn new(origin: PathBuf, content: &str) -> Self {
        Self {
            origin,
            content_hash: hash_content(content),
        }
    }

    /// Get the origin path.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Get the content hash.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }
}

/// Hash content string to a u64.
#[inline]
pub fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Identifier → unit mapping shared by everything outside isolation.
///
/// The cache never decides policy. The host's load pipeline and the scope
/// interceptor are its only writers.
#[derive(Default)]
pub struct ModuleCache {
    entries: HashMap<Identifier, UnitHandle>,
}

impl ModuleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the unit cached under `ident`.
    pub fn get(&self, ident: &str) -> Option<&UnitHandle> {
        self.entries.get(ident)
    }

    /// Check if `ident` has an entry.
    pub fn contains(&self, ident: &str) -> bool {
        self.entries.contains_key(ident)
    }

    /// Bind `unit` under `ident`, returning the entry it replaced.
    pub fn insert(&mut self, ident: Identifier, unit: UnitHandle) -> Option<UnitHandle> {
        self.entries.insert(ident, unit)
    }

    /// Remove the entry for `ident`.
    pub fn remove(&mut self, ident: &str) -> Option<UnitHandle> {
        self.entries.remove(ident)
    }

    /// Remove the entry for `ident` only if it is `unit`.
    ///
    /// Returns true if an entry was removed.
    pub fn remove_if_same(&mut self, ident: &str, unit: &UnitHandle) -> bool {
        match self.entries.get(ident) {
            Some(current) if current.ptr_eq(unit) => {
                self.entries.remove(ident);
                true
            }
            _ => false,
        }
    }

    /// Number of cached units.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All identifiers, sorted.
    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

//! Baseline Registry
//!
//! One-time snapshot of the identifiers the host had loaded before any
//! isolation scope existed. Baseline identifiers always resolve through the
//! shared cache, so host startup units are never re-executed by a scope.

use std::collections::BTreeSet;

use super::cache::ModuleCache;
use super::identifier::Identifier;

/// Frozen set of identifiers exempt from isolation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaselineSet {
    ids: BTreeSet<Identifier>,
}

impl BaselineSet {
    /// Capture every identifier currently in `cache`, plus the host's
    /// `protected` identifiers (exempt even if they load later).
    pub fn capture<'a>(
        cache: &ModuleCache,
        protected: impl IntoIterator<Item = &'a Identifier>,
    ) -> Self {
        let mut ids: BTreeSet<Identifier> = cache.identifiers().into_iter().collect();
        ids.extend(protected.into_iter().cloned());
        Self { ids }
    }

    /// Check if `ident` is exempt.
    pub fn contains(&self, ident: &str) -> bool {
        self.ids.contains(ident)
    }

    /// Number of exempt identifiers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if no identifiers are exempt.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate over the exempt identifiers in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Identifier> {
        self.ids.iter()
    }
}

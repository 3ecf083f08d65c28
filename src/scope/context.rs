//! Scope Contexts
//!
//! A `ScopeContext` is created each time a session is entered and outlives
//! the scope: every unit the activation isolates holds it as its owner, which
//! is what lets `reload` re-apply the scope's environment after exit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::config::SessionSettings;
use super::patch::Snapshot;
use crate::modules::unit::WeakUnit;
use crate::modules::{Identifier, UnitHandle};

/// Unique identifier for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Durable record of one session activation.
pub(crate) struct ScopeContext {
    session: SessionId,
    activation: u32,
    settings: Rc<SessionSettings>,
    /// Env and paths as applied on entry.
    applied: Snapshot,
    /// Units isolated by this activation. Weak: units point back here.
    isolated: RefCell<HashMap<Identifier, WeakUnit>>,
    /// Strong list of this activation's units, owned by the session while
    /// this is its latest activation.
    retained: Weak<RefCell<Vec<UnitHandle>>>,
}

impl ScopeContext {
    pub(crate) fn new(
        session: SessionId,
        activation: u32,
        settings: Rc<SessionSettings>,
        applied: Snapshot,
        retained: Weak<RefCell<Vec<UnitHandle>>>,
    ) -> Self {
        Self {
            session,
            activation,
            settings,
            applied,
            isolated: RefCell::new(HashMap::new()),
            retained,
        }
    }

    pub(crate) fn session(&self) -> SessionId {
        self.session
    }

    pub(crate) fn activation(&self) -> u32 {
        self.activation
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.settings.label.as_deref()
    }

    pub(crate) fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub(crate) fn applied(&self) -> &Snapshot {
        &self.applied
    }

    /// The live unit this activation isolated under `ident`.
    pub(crate) fn isolated_unit(&self, ident: &str) -> Option<UnitHandle> {
        self.isolated.borrow().get(ident).and_then(WeakUnit::upgrade)
    }

    /// Record a finished isolated load.
    pub(crate) fn record(&self, ident: Identifier, unit: &UnitHandle) {
        self.isolated.borrow_mut().insert(ident, unit.downgrade());
        if let Some(retained) = self.retained.upgrade() {
            retained.borrow_mut().push(unit.clone());
        }
    }

    /// Identifiers with a live isolated unit, sorted.
    pub(crate) fn isolated_identifiers(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self
            .isolated
            .borrow()
            .iter()
            .filter(|(_, unit)| unit.upgrade().is_some())
            .map(|(ident, _)| ident.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeContext")
            .field("session", &self.session)
            .field("activation", &self.activation)
            .field("label", &self.label())
            .field("isolated", &self.isolated.borrow().len())
            .finish()
    }
}

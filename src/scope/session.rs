//! Sessions
//!
//! A `Session` is a reusable scope configuration bound to one host. Entering
//! it opens a scope: the environment and search path are patched, a frame is
//! pushed, and every load not exempt from isolation produces a unit private
//! to this activation. Leaving the scope (guard drop, `close`, or the end of
//! `run`) restores the pre-entry state and purges isolated units from the
//! shared cache. The latest activation's units stay reachable through the
//! session for `reload`.
//!
//! ```ignore
//! let session = host.session(&SessionConfig::new().path("/plugins/a"))?;
//! let plugin = session.run(|host| host.import("plugin"))??;
//! session.reload(&plugin)?;
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::config::{SessionConfig, SessionSettings};
use super::context::{ScopeContext, SessionId};
use super::error::{RestoreAnomaly, SessionError};
use super::stack::FrameGuard;
use crate::host::Host;
use crate::modules::{Identifier, UnitHandle};

/// A reusable isolation scope.
pub struct Session {
    host: Host,
    id: SessionId,
    settings: Rc<SessionSettings>,
    activations: Cell<u32>,
    active: Cell<bool>,
    /// Context of the latest activation.
    current: RefCell<Option<Rc<ScopeContext>>>,
    /// Units isolated by the latest activation. Replaced on every entry.
    retained: RefCell<Rc<RefCell<Vec<UnitHandle>>>>,
}

impl Session {
    /// Validate `config` and bind a session to `host`.
    ///
    /// Nothing is patched until the session is entered.
    pub fn new(host: &Host, config: &SessionConfig) -> Result<Self, SessionError> {
        let settings = config.validate()?;
        Ok(Self {
            host: host.clone(),
            id: host.next_session_id(),
            settings: Rc::new(settings),
            activations: Cell::new(0),
            active: Cell::new(false),
            current: RefCell::new(None),
            retained: RefCell::new(Rc::new(RefCell::new(Vec::new()))),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn label(&self) -> Option<&str> {
        self.settings.label.as_deref()
    }

    /// True while a scope of this session is open.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Number of times the session has been entered.
    pub fn activations(&self) -> u32 {
        self.activations.get()
    }

    /// Open a scope. It closes when the returned guard is dropped.
    pub fn enter(&self) -> Result<ScopeGuard<'_>, SessionError> {
        if self.active.get() {
            return Err(SessionError::AlreadyActive(self.id));
        }
        let activation = self.activations.get() + 1;
        let retained = Rc::new(RefCell::new(Vec::new()));
        let (frame, ctx) = self.host.enter_scope(
            self.id,
            activation,
            Rc::clone(&self.settings),
            Rc::downgrade(&retained),
        );
        *self.retained.borrow_mut() = retained;
        self.activations.set(activation);
        self.active.set(true);
        *self.current.borrow_mut() = Some(ctx);
        Ok(ScopeGuard {
            session: self,
            frame: Some(FrameGuard::new(&self.host, frame, self.id)),
        })
    }

    /// Run `body` inside a scope of this session.
    ///
    /// The scope is closed before the result is returned, and also when
    /// `body` panics. Restoration anomalies are logged.
    pub fn run<T>(&self, body: impl FnOnce(&Host) -> T) -> Result<T, SessionError> {
        let _guard = self.enter()?;
        Ok(body(&self.host))
    }

    /// Wrap `body` so that every call runs inside a fresh scope of this session.
    pub fn wrap<'s, A, T>(
        &'s self,
        body: impl Fn(&Host, A) -> T + 's,
    ) -> impl Fn(A) -> Result<T, SessionError> + 's {
        move |arg| self.run(|host| body(host, arg))
    }

    /// Re-execute `unit`'s source under the environment and search path its
    /// scope had, whether or not that scope is still open.
    ///
    /// The handle's identity is kept; every holder sees the new namespace.
    pub fn reload(&self, unit: &UnitHandle) -> Result<UnitHandle, SessionError> {
        match unit.owner_session() {
            None => Err(SessionError::Unmanaged(unit.identifier().clone())),
            Some(owner) if owner != self.id => Err(SessionError::NotOwned {
                ident: unit.identifier().clone(),
                owner,
                session: self.id,
            }),
            Some(_) => self.host.reload(unit),
        }
    }

    /// The unit the latest activation isolated under `name`.
    pub fn isolated(&self, name: &str) -> Option<UnitHandle> {
        self.current
            .borrow()
            .as_ref()
            .and_then(|ctx| ctx.isolated_unit(name))
    }

    /// Identifiers isolated by the latest activation, sorted.
    pub fn isolated_identifiers(&self) -> Vec<Identifier> {
        self.current
            .borrow()
            .as_ref()
            .map(|ctx| ctx.isolated_identifiers())
            .unwrap_or_default()
    }

    /// Units isolated by the latest activation, in load order.
    ///
    /// Units of earlier activations live only as long as their holders do.
    pub fn retained_units(&self) -> Vec<UnitHandle> {
        self.retained.borrow().borrow().clone()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("label", &self.label())
            .field("active", &self.active.get())
            .field("activations", &self.activations.get())
            .field("retained", &self.retained.borrow().borrow().len())
            .finish()
    }
}

/// An open scope of a session.
///
/// Dropping the guard exits the scope, including during panic unwinding.
pub struct ScopeGuard<'s> {
    session: &'s Session,
    frame: Option<FrameGuard<'s>>,
}

impl<'s> ScopeGuard<'s> {
    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn host(&self) -> &'s Host {
        &self.session.host
    }

    /// Exit the scope, returning restoration anomalies as an error.
    ///
    /// State is fully restored either way.
    pub fn close(mut self) -> Result<(), SessionError> {
        let anomalies = self.exit();
        if anomalies.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Restore(anomalies))
        }
    }

    fn exit(&mut self) -> Vec<RestoreAnomaly> {
        let anomalies = self.frame.take().map(FrameGuard::exit).unwrap_or_default();
        self.session.active.set(false);
        anomalies
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            drop(frame);
            self.session.active.set(false);
        }
    }
}

impl fmt::Debug for ScopeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("session", &self.session.id)
            .field("open", &self.frame.is_some())
            .finish()
    }
}

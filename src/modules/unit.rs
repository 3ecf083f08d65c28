//! Loaded Units
//!
//! A `UnitHandle` is the identity of one loaded, executed unit of code: its
//! identifier, a reference to the source it was executed from, its namespace
//! and (for isolated units) a back-reference to the scope that created it.
//!
//! Handles compare by identity. Two loads that produce distinct records are
//! never equal even if their namespaces happen to match.

use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::cache::SourceRef;
use super::identifier::Identifier;
use crate::scope::context::ScopeContext;
use crate::scope::SessionId;

/// Unique identifier for a loaded unit.
///
/// Assigned sequentially by the host; a reload keeps the id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl UnitId {
    /// Create a new UnitId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Execution state of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    /// Source is executing. The unit may be observed partially initialised
    /// by circular importers.
    Executing,

    /// Last execution completed.
    Loaded,

    /// Last execution raised.
    Failed,
}

/// A value bound in a unit namespace.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    /// Another unit, bound by `import`.
    Unit(UnitHandle),
}

impl Value {
    /// The string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The bound unit, if this is a `Unit`.
    pub fn as_unit(&self) -> Option<&UnitHandle> {
        match self {
            Value::Unit(unit) => Some(unit),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Unit(unit) => write!(f, "<{} {}>", unit.identifier(), unit.id()),
        }
    }
}

/// Names bound by executing a unit.
pub type Namespace = BTreeMap<String, Value>;

struct Unit {
    id: UnitId,
    ident: Identifier,
    source: RefCell<SourceRef>,
    namespace: RefCell<Namespace>,
    state: Cell<UnitState>,
    executions: Cell<u32>,
    /// Set at creation, never reassigned.
    owner: Option<Rc<ScopeContext>>,
}

/// Shared handle to a loaded unit.
#[derive(Clone)]
pub struct UnitHandle(Rc<Unit>);

/// Non-owning reference to a unit, held by scope indexes.
#[derive(Clone)]
pub(crate) struct WeakUnit(Weak<Unit>);

impl WeakUnit {
    pub(crate) fn upgrade(&self) -> Option<UnitHandle> {
        self.0.upgrade().map(UnitHandle)
    }
}

impl UnitHandle {
    pub(crate) fn new(
        id: UnitId,
        ident: Identifier,
        source: SourceRef,
        owner: Option<Rc<ScopeContext>>,
    ) -> Self {
        Self(Rc::new(Unit {
            id,
            ident,
            source: RefCell::new(source),
            namespace: RefCell::new(Namespace::new()),
            state: Cell::new(UnitState::Executing),
            executions: Cell::new(0),
            owner,
        }))
    }

    /// Host-assigned unit id.
    pub fn id(&self) -> UnitId {
        self.0.id
    }

    /// Identifier the unit was loaded under.
    pub fn identifier(&self) -> &Identifier {
        &self.0.ident
    }

    /// Source the unit was last executed from.
    pub fn source(&self) -> SourceRef {
        self.0.source.borrow().clone()
    }

    /// Current execution state.
    pub fn state(&self) -> UnitState {
        self.0.state.get()
    }

    /// Number of times the unit's source has been executed.
    pub fn executions(&self) -> u32 {
        self.0.executions.get()
    }

    /// Look up a name in the namespace.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.namespace.borrow().get(name).cloned()
    }

    /// Borrow the namespace.
    ///
    /// The borrow must be released before the unit executes again.
    pub fn namespace(&self) -> Ref<'_, Namespace> {
        self.0.namespace.borrow()
    }

    /// True if the unit was produced inside a session scope.
    pub fn is_session_managed(&self) -> bool {
        self.0.owner.is_some()
    }

    /// Id of the session that isolated this unit.
    pub fn owner_session(&self) -> Option<SessionId> {
        self.0.owner.as_ref().map(|ctx| ctx.session())
    }

    /// True if both handles refer to the same unit record.
    pub fn ptr_eq(&self, other: &UnitHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn owner(&self) -> Option<&Rc<ScopeContext>> {
        self.0.owner.as_ref()
    }

    pub(crate) fn is_owned_by(&self, ctx: &Rc<ScopeContext>) -> bool {
        self.0
            .owner
            .as_ref()
            .is_some_and(|owner| Rc::ptr_eq(owner, ctx))
    }

    pub(crate) fn downgrade(&self) -> WeakUnit {
        WeakUnit(Rc::downgrade(&self.0))
    }

    pub(crate) fn define(&self, name: String, value: Value) {
        self.0.namespace.borrow_mut().insert(name, value);
    }

    pub(crate) fn set_source(&self, source: SourceRef) {
        *self.0.source.borrow_mut() = source;
    }

    pub(crate) fn begin_execution(&self) {
        self.0.state.set(UnitState::Executing);
        self.0.executions.set(self.0.executions.get() + 1);
    }

    pub(crate) fn finish_execution(&self, ok: bool) {
        self.0
            .state
            .set(if ok { UnitState::Loaded } else { UnitState::Failed });
    }
}

impl PartialEq for UnitHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for UnitHandle {}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Namespace values may refer back to this unit; print names only.
        let names: Vec<String> = match self.0.namespace.try_borrow() {
            Ok(ns) => ns.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("UnitHandle")
            .field("id", &self.0.id)
            .field("ident", &self.0.ident)
            .field("state", &self.0.state.get())
            .field("executions", &self.0.executions.get())
            .field("owner", &self.owner_session())
            .field("names", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn handle(id: u64, name: &str) -> UnitHandle {
        UnitHandle::new(
            UnitId::new(id),
            Identifier::new(name).unwrap(),
            SourceRef::new(PathBuf::from(format!("/lib/{name}.unit")), ""),
            None,
        )
    }

    #[test]
    fn test_unit_id() {
        assert_eq!(UnitId::new(3).value(), 3);
        assert_eq!(UnitId::new(3).to_string(), "unit#3");
    }

    #[test]
    fn test_identity_equality() {
        let a = handle(1, "pkg");
        let b = handle(1, "pkg");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn test_execution_state_transitions() {
        let unit = handle(1, "pkg");
        assert_eq!(unit.state(), UnitState::Executing);
        assert_eq!(unit.executions(), 0);

        unit.begin_execution();
        unit.finish_execution(true);
        assert_eq!(unit.state(), UnitState::Loaded);
        assert_eq!(unit.executions(), 1);

        unit.begin_execution();
        unit.finish_execution(false);
        assert_eq!(unit.state(), UnitState::Failed);
        assert_eq!(unit.executions(), 2);
    }

    #[test]
    fn test_namespace_updates_visible_to_all_holders() {
        let unit = handle(1, "pkg");
        let other_holder = unit.clone();
        unit.define("x".into(), Value::Int(1));
        assert_eq!(other_holder.get("x"), Some(Value::Int(1)));
        unit.define("x".into(), Value::Int(2));
        assert_eq!(other_holder.get("x"), Some(Value::Int(2)));
        assert_eq!(other_holder.namespace().len(), 1);
    }

    #[test]
    fn test_unmanaged_without_owner() {
        let unit = handle(1, "pkg");
        assert!(!unit.is_session_managed());
        assert_eq!(unit.owner_session(), None);
    }

    #[test]
    fn test_weak_unit_does_not_keep_alive() {
        let unit = handle(1, "pkg");
        let weak = unit.downgrade();
        assert!(weak.upgrade().is_some());
        drop(unit);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_value_display() {
        let list = Value::List(vec![Value::Str("a".into()), Value::Int(2), Value::Bool(true)]);
        assert_eq!(list.to_string(), "[a, 2, true]");
        let unit = handle(7, "pkg.mod");
        assert_eq!(Value::Unit(unit).to_string(), "<pkg.mod unit#7>");
    }
}

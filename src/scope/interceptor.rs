//! Load Interceptor
//!
//! Installed into the host's load pipeline while at least one scope is open.
//! Each request is offered to a chain of resolvers against the innermost
//! scope; the first one that answers wins:
//!
//! 1. `baseline` - baseline identifiers use the shared cache
//! 2. `keep-shared` - the scope's `keep_global` identifiers use the shared cache
//! 3. host-registered resolvers, in registration order
//! 4. `isolating` - forced fresh load private to the scope (always answers)

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::config::SessionSettings;
use super::context::{ScopeContext, SessionId};
use crate::host::Host;
use crate::modules::{Identifier, LoadResult, UnitHandle, UnitState};

/// One load request as seen by a resolver.
pub struct LoadRequest<'a> {
    ident: &'a Identifier,
    ctx: &'a Rc<ScopeContext>,
}

impl<'a> LoadRequest<'a> {
    pub(crate) fn new(ident: &'a Identifier, ctx: &'a Rc<ScopeContext>) -> Self {
        Self { ident, ctx }
    }

    /// Identifier being loaded.
    pub fn ident(&self) -> &Identifier {
        self.ident
    }

    /// Session of the innermost open scope.
    pub fn session(&self) -> SessionId {
        self.ctx.session()
    }

    /// Label of the innermost open scope.
    pub fn label(&self) -> Option<&str> {
        self.ctx.label()
    }

    /// Settings of the innermost open scope.
    pub fn settings(&self) -> &SessionSettings {
        self.ctx.settings()
    }

    pub(crate) fn ctx(&self) -> &Rc<ScopeContext> {
        self.ctx
    }
}

/// A stage of the interceptor's resolution chain.
///
/// Returning `None` passes the request to the next stage.
pub trait Resolve {
    /// Name used in trace output.
    fn name(&self) -> &'static str;

    fn resolve(&self, host: &Host, request: &LoadRequest<'_>) -> Option<LoadResult<UnitHandle>>;
}

struct BaselineResolver;

impl Resolve for BaselineResolver {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn resolve(&self, host: &Host, request: &LoadRequest<'_>) -> Option<LoadResult<UnitHandle>> {
        host.is_baseline(request.ident())
            .then(|| host.load_shared(request.ident()))
    }
}

struct KeepSharedResolver;

impl Resolve for KeepSharedResolver {
    fn name(&self) -> &'static str {
        "keep-shared"
    }

    fn resolve(&self, host: &Host, request: &LoadRequest<'_>) -> Option<LoadResult<UnitHandle>> {
        request
            .settings()
            .keeps_global(request.ident())
            .then(|| host.load_shared(request.ident()))
    }
}

struct IsolatingResolver;

impl Resolve for IsolatingResolver {
    fn name(&self) -> &'static str {
        "isolating"
    }

    fn resolve(&self, host: &Host, request: &LoadRequest<'_>) -> Option<LoadResult<UnitHandle>> {
        Some(fresh_load(host, request.ident(), request.ctx()))
    }
}

/// Execute `ident` fresh into a unit owned by `ctx`.
fn fresh_load(host: &Host, ident: &Identifier, ctx: &Rc<ScopeContext>) -> LoadResult<UnitHandle> {
    let current = host.cached(ident.as_str());

    // Circular import of a unit this scope is still executing.
    if let Some(unit) = &current {
        if unit.state() == UnitState::Executing && unit.is_owned_by(ctx) {
            trace!(target: "subsession::intercept", %ident, "partially initialised unit");
            return Ok(unit.clone());
        }
    }
    if let Some(unit) = ctx.isolated_unit(ident.as_str()) {
        trace!(target: "subsession::intercept", %ident, unit = %unit.id(), "already isolated in scope");
        return Ok(unit);
    }

    let source = host.locate(ident)?;
    if current.is_some() {
        trace!(target: "subsession::intercept", %ident, "setting aside shared entry");
    }
    host.set_aside(ident, current);

    let unit = host.new_unit(ident.clone(), source.reference(), Some(Rc::clone(ctx)));
    host.insert_transient(ident, &unit);
    let result = host.execute(&unit, &source);
    host.remove_transient(ident, &unit);
    result?;

    ctx.record(ident.clone(), &unit);
    trace!(
        target: "subsession::intercept",
        %ident,
        unit = %unit.id(),
        session = %ctx.session(),
        activation = ctx.activation(),
        "isolated"
    );
    Ok(unit)
}

/// The resolution chain installed while scopes are open.
pub struct LoadInterceptor {
    chain: Vec<Rc<dyn Resolve>>,
}

impl LoadInterceptor {
    /// Build the chain with `custom` resolvers between keep-shared and isolating.
    pub fn new(custom: &[Rc<dyn Resolve>]) -> Self {
        let mut chain: Vec<Rc<dyn Resolve>> = Vec::with_capacity(custom.len() + 3);
        chain.push(Rc::new(BaselineResolver));
        chain.push(Rc::new(KeepSharedResolver));
        chain.extend(custom.iter().cloned());
        chain.push(Rc::new(IsolatingResolver));
        Self { chain }
    }

    /// Stage names in resolution order.
    pub fn stages(&self) -> Vec<&'static str> {
        self.chain.iter().map(|stage| stage.name()).collect()
    }

    /// Resolve `ident` against the innermost scope `ctx`.
    pub(crate) fn resolve(
        &self,
        host: &Host,
        ident: &Identifier,
        ctx: &Rc<ScopeContext>,
    ) -> LoadResult<UnitHandle> {
        let request = LoadRequest::new(ident, ctx);
        for stage in &self.chain {
            if let Some(result) = stage.resolve(host, &request) {
                trace!(
                    target: "subsession::intercept",
                    %ident,
                    stage = stage.name(),
                    session = %ctx.session(),
                    ok = result.is_ok(),
                    "resolved"
                );
                return result;
            }
        }
        host.load_shared(ident)
    }
}

impl fmt::Debug for LoadInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadInterceptor")
            .field("stages", &self.stages())
            .finish()
    }
}

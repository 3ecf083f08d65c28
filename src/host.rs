//! Host
//!
//! The explicit registry that owns everything a scope patches: the shared
//! module cache, the environment table, the resource search path, the
//! baseline set and the scope stack. `Host` is a cheap `Rc` handle and is
//! `!Send`; one host serves one thread.
//!
//! Loads go through `Host::import`. With no scope open they use ordinary
//! shared-cache semantics; while a scope is open the installed
//! `LoadInterceptor` decides.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::modules::{
    BaselineSet, FileLoader, Identifier, LoadError, LoadResult, ModuleCache, Source, SourceLoader,
    SourceRef, UnitHandle, UnitId, Value,
};
use crate::scope::config::{parse_identifiers, validate_env_entry};
use crate::scope::context::ScopeContext;
use crate::scope::stack::{log_anomalies, Frame, FrameGuard, FrameId, ScopeStack};
use crate::scope::{
    ConfigError, EnvTable, HostConfig, LoadInterceptor, Resolve, RestoreAnomaly, SearchPath,
    Session, SessionConfig, SessionError, SessionId, SessionSettings, Snapshot,
};

struct HostInner {
    loader: Box<dyn SourceLoader>,
    cache: RefCell<ModuleCache>,
    state: RefCell<Snapshot>,
    baseline: OnceCell<BaselineSet>,
    protected: Vec<Identifier>,
    stack: RefCell<ScopeStack>,
    interceptor: RefCell<Option<Rc<LoadInterceptor>>>,
    resolvers: Vec<Rc<dyn Resolve>>,
    profiles: BTreeMap<String, SessionConfig>,
    next_unit: Cell<u64>,
    next_session: Cell<u64>,
    next_frame: Cell<u64>,
}

/// Handle to a host's loading state.
#[derive(Clone)]
pub struct Host {
    inner: Rc<HostInner>,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Build a host from a configuration document.
    pub fn from_config(config: &HostConfig) -> Result<Self, ConfigError> {
        HostBuilder::from_config(config)?.build()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load the unit named `name` through the host pipeline.
    pub fn import(&self, name: &str) -> LoadResult<UnitHandle> {
        let ident = Identifier::new(name)?;
        self.load(&ident)
    }

    /// Load `ident` through the host pipeline.
    pub fn load(&self, ident: &Identifier) -> LoadResult<UnitHandle> {
        let interceptor = self.inner.interceptor.borrow().clone();
        let top = self.top_context();
        match interceptor.zip(top) {
            Some((interceptor, ctx)) => interceptor.resolve(self, ident, &ctx),
            None => self.load_shared(ident),
        }
    }

    /// Ordinary shared-cache resolution: return the cached unit, or locate,
    /// execute and cache a new one.
    ///
    /// A unit that is still executing is returned as is, so circular imports
    /// see it partially initialised. A failed execution leaves no entry.
    pub fn load_shared(&self, ident: &Identifier) -> LoadResult<UnitHandle> {
        if let Some(unit) = self.cached(ident.as_str()) {
            trace!(target: "subsession::host", %ident, unit = %unit.id(), "shared cache hit");
            return Ok(unit);
        }
        let source = self.locate(ident)?;
        let unit = self.new_unit(ident.clone(), source.reference(), None);
        self.inner
            .cache
            .borrow_mut()
            .insert(ident.clone(), unit.clone());
        if let Err(err) = self.execute(&unit, &source) {
            self.inner
                .cache
                .borrow_mut()
                .remove_if_same(ident.as_str(), &unit);
            return Err(err);
        }
        trace!(target: "subsession::host", %ident, unit = %unit.id(), "loaded into shared cache");
        Ok(unit)
    }

    /// Re-execute a session-managed unit under its owning scope's saved
    /// environment and search path. See [`Session::reload`].
    pub fn reload(&self, unit: &UnitHandle) -> Result<UnitHandle, SessionError> {
        let ctx = unit
            .owner()
            .cloned()
            .ok_or_else(|| SessionError::Unmanaged(unit.identifier().clone()))?;
        let session = ctx.session();
        debug!(
            target: "subsession::reload",
            ident = %unit.identifier(),
            unit = %unit.id(),
            %session,
            activation = ctx.activation(),
            "reloading"
        );
        let frame = self.push_frame(Rc::clone(&ctx), self.snapshot(), ctx.applied().clone());
        let guard = FrameGuard::new(self, frame, session);
        let result = self.reexecute(unit);
        log_anomalies(&guard.exit());
        result?;
        Ok(unit.clone())
    }

    fn reexecute(&self, unit: &UnitHandle) -> LoadResult<()> {
        let ident = unit.identifier();
        let source = self.locate(ident)?;
        unit.set_source(source.reference());
        self.set_aside(ident, self.cached(ident.as_str()));
        self.insert_transient(ident, unit);
        let result = self.execute(unit, &source);
        self.remove_transient(ident, unit);
        result
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Create a session bound to this host.
    pub fn session(&self, config: &SessionConfig) -> Result<Session, SessionError> {
        Session::new(self, config)
    }

    /// Create a session from a named configuration profile.
    pub fn profile_session(&self, name: &str) -> Result<Session, SessionError> {
        let config = self
            .profile(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
        Session::new(self, config)
    }

    /// A named configuration profile.
    pub fn profile(&self, name: &str) -> Option<&SessionConfig> {
        self.inner.profiles.get(name)
    }

    /// Capture the baseline set if it has not been captured yet.
    ///
    /// Runs implicitly when the first scope opens.
    pub fn capture_baseline(&self) -> &BaselineSet {
        self.inner.baseline.get_or_init(|| {
            let baseline = BaselineSet::capture(&self.inner.cache.borrow(), &self.inner.protected);
            debug!(target: "subsession::host", identifiers = baseline.len(), "baseline captured");
            baseline
        })
    }

    /// The baseline set, once captured.
    pub fn baseline(&self) -> Option<&BaselineSet> {
        self.inner.baseline.get()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// The unit the shared cache holds under `name`.
    pub fn cached(&self, name: &str) -> Option<UnitHandle> {
        self.inner.cache.borrow().get(name).cloned()
    }

    /// Identifiers in the shared cache, sorted.
    pub fn cached_identifiers(&self) -> Vec<Identifier> {
        self.inner.cache.borrow().identifiers()
    }

    /// Number of open scopes.
    pub fn scope_depth(&self) -> usize {
        self.inner.stack.borrow().depth()
    }

    /// True while the load interceptor is installed.
    pub fn is_intercepting(&self) -> bool {
        self.inner.interceptor.borrow().is_some()
    }

    /// Resolution stages of the installed interceptor.
    pub fn interceptor_stages(&self) -> Option<Vec<&'static str>> {
        self.inner
            .interceptor
            .borrow()
            .as_ref()
            .map(|interceptor| interceptor.stages())
    }

    /// Session of the innermost open scope.
    pub fn active_session(&self) -> Option<SessionId> {
        self.inner.stack.borrow().top().map(|frame| frame.ctx.session())
    }

    // ========================================================================
    // Environment and search path
    // ========================================================================

    pub fn var(&self, key: &str) -> Option<String> {
        self.inner.state.borrow().env.get(key).map(str::to_string)
    }

    /// Copy of the environment table.
    pub fn env(&self) -> EnvTable {
        self.inner.state.borrow().env.clone()
    }

    /// Copy of the search path.
    pub fn search_path(&self) -> SearchPath {
        self.inner.state.borrow().paths.clone()
    }

    /// Copy of the environment table and search path.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.borrow().clone()
    }

    /// Set a variable from host code.
    ///
    /// While a scope is open this is out-of-band: the change is reverted at
    /// scope exit and reported as drift.
    pub fn set_var(&self, key: &str, value: &str) {
        self.inner.state.borrow_mut().env.set(key, value);
    }

    /// Remove a variable from host code. Same scope rules as `set_var`.
    pub fn remove_var(&self, key: &str) -> Option<String> {
        self.inner.state.borrow_mut().env.remove(key)
    }

    /// Append a search-path entry from host code. Same scope rules as `set_var`.
    pub fn push_path(&self, path: impl Into<PathBuf>) {
        self.inner.state.borrow_mut().paths.push(path);
    }

    // ========================================================================
    // Scope protocol
    // ========================================================================

    pub(crate) fn next_session_id(&self) -> SessionId {
        SessionId::new(bump(&self.inner.next_session))
    }

    pub(crate) fn enter_scope(
        &self,
        session: SessionId,
        activation: u32,
        settings: Rc<SessionSettings>,
        retained: Weak<RefCell<Vec<UnitHandle>>>,
    ) -> (FrameId, Rc<ScopeContext>) {
        self.capture_baseline();
        let restore = self.snapshot();
        let applied = Snapshot::new(
            settings.env.apply(&restore.env),
            settings.paths.apply(&restore.paths),
        );
        let ctx = Rc::new(ScopeContext::new(
            session,
            activation,
            settings,
            applied.clone(),
            retained,
        ));
        let frame = self.push_frame(Rc::clone(&ctx), restore, applied);
        debug!(
            target: "subsession::scope",
            %session,
            activation,
            label = ctx.label().unwrap_or(""),
            depth = self.scope_depth(),
            "scope entered"
        );
        (frame, ctx)
    }

    fn push_frame(&self, ctx: Rc<ScopeContext>, restore: Snapshot, applied: Snapshot) -> FrameId {
        let id = FrameId(bump(&self.inner.next_frame));
        *self.inner.state.borrow_mut() = applied.clone();
        let was_empty = {
            let mut stack = self.inner.stack.borrow_mut();
            let was_empty = stack.is_empty();
            stack.push(Frame::new(id, ctx, restore, applied));
            was_empty
        };
        if was_empty {
            let interceptor = LoadInterceptor::new(&self.inner.resolvers);
            debug!(target: "subsession::scope", stages = ?interceptor.stages(), "interceptor installed");
            *self.inner.interceptor.borrow_mut() = Some(Rc::new(interceptor));
        }
        id
    }

    /// Pop frame `id` (and anything opened above it) and restore state.
    pub(crate) fn exit_frame(&self, id: FrameId, session: SessionId) -> Vec<RestoreAnomaly> {
        let popped = self.inner.stack.borrow_mut().pop_through(id);
        let Some(frames) = popped else {
            return vec![RestoreAnomaly::NotActive { session }];
        };

        let mut anomalies = Vec::new();
        for frame in frames {
            if frame.id != id {
                anomalies.push(RestoreAnomaly::OutOfOrder {
                    outer: session,
                    inner: frame.ctx.session(),
                });
            }
            self.restore_frame(frame, &mut anomalies);
        }

        if self.inner.stack.borrow().is_empty() {
            self.inner.interceptor.borrow_mut().take();
            debug!(target: "subsession::scope", "interceptor removed");
        }
        anomalies
    }

    fn restore_frame(&self, frame: Frame, anomalies: &mut Vec<RestoreAnomaly>) {
        let session = frame.ctx.session();
        let drift = {
            let mut state = self.inner.state.borrow_mut();
            let drift = frame.applied.drift(&state);
            *state = frame.restore;
            drift
        };
        if !drift.env_keys.is_empty() {
            anomalies.push(RestoreAnomaly::EnvDrift {
                session,
                keys: drift.env_keys,
            });
        }
        if drift.paths_changed {
            anomalies.push(RestoreAnomaly::PathDrift { session });
        }

        let purged = frame.set_aside.len();
        let mut cache = self.inner.cache.borrow_mut();
        for (ident, previous) in frame.set_aside {
            match previous {
                Some(unit) => {
                    cache.insert(ident, unit);
                }
                None => {
                    cache.remove(ident.as_str());
                }
            }
        }
        debug!(
            target: "subsession::scope",
            %session,
            activation = frame.ctx.activation(),
            purged,
            "scope exited"
        );
    }

    // ========================================================================
    // Pipeline primitives used by the interceptor
    // ========================================================================

    pub(crate) fn is_baseline(&self, ident: &Identifier) -> bool {
        self.inner
            .baseline
            .get()
            .is_some_and(|baseline| baseline.contains(ident.as_str()))
    }

    pub(crate) fn locate(&self, ident: &Identifier) -> LoadResult<Source> {
        let paths = self.search_path();
        self.inner.loader.locate(ident, &paths)
    }

    pub(crate) fn new_unit(
        &self,
        ident: Identifier,
        source: SourceRef,
        owner: Option<Rc<ScopeContext>>,
    ) -> UnitHandle {
        UnitHandle::new(UnitId::new(bump(&self.inner.next_unit)), ident, source, owner)
    }

    /// Execute `source` into `unit`. No host borrow is held while it runs.
    pub(crate) fn execute(&self, unit: &UnitHandle, source: &Source) -> LoadResult<()> {
        unit.begin_execution();
        let cx = ExecContext { host: self, unit };
        let result = self.inner.loader.execute(source, &cx);
        unit.finish_execution(result.is_ok());
        result.map_err(|err| LoadError::Execution {
            ident: unit.identifier().clone(),
            source: err,
        })
    }

    pub(crate) fn set_aside(&self, ident: &Identifier, previous: Option<UnitHandle>) {
        if let Some(frame) = self.inner.stack.borrow_mut().top_mut() {
            frame.set_aside(ident, previous);
        }
    }

    pub(crate) fn insert_transient(&self, ident: &Identifier, unit: &UnitHandle) {
        self.inner
            .cache
            .borrow_mut()
            .insert(ident.clone(), unit.clone());
    }

    pub(crate) fn remove_transient(&self, ident: &Identifier, unit: &UnitHandle) {
        if self
            .inner
            .cache
            .borrow_mut()
            .remove_if_same(ident.as_str(), unit)
        {
            trace!(target: "subsession::intercept", %ident, unit = %unit.id(), "transient entry removed");
        }
    }

    /// In-scope write: the innermost frame expects it, so it is not drift.
    fn set_scoped_var(&self, key: &str, value: &str) {
        self.inner.state.borrow_mut().env.set(key, value);
        if let Some(frame) = self.inner.stack.borrow_mut().top_mut() {
            frame.applied.env.set(key, value);
        }
    }

    fn top_context(&self) -> Option<Rc<ScopeContext>> {
        self.inner
            .stack
            .borrow()
            .top()
            .map(|frame| Rc::clone(&frame.ctx))
    }
}

fn bump(counter: &Cell<u64>) -> u64 {
    let id = counter.get();
    counter.set(id + 1);
    id
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("cache", &self.inner.cache.borrow())
            .field("depth", &self.scope_depth())
            .field("intercepting", &self.is_intercepting())
            .field("search_path", &self.search_path().to_string())
            .finish()
    }
}

/// What executing unit source sees.
pub struct ExecContext<'a> {
    host: &'a Host,
    unit: &'a UnitHandle,
}

impl<'a> ExecContext<'a> {
    pub fn host(&self) -> &'a Host {
        self.host
    }

    /// The unit being executed.
    pub fn unit(&self) -> &'a UnitHandle {
        self.unit
    }

    /// How many times this unit has executed, including the current run.
    pub fn executions(&self) -> u32 {
        self.unit.executions()
    }

    /// Look up a name bound so far in the unit namespace.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.unit.get(name)
    }

    /// Bind a name in the unit namespace.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.unit.define(name.into(), value);
    }

    /// Load another unit through the host pipeline.
    pub fn import(&self, name: &str) -> LoadResult<UnitHandle> {
        self.host.import(name)
    }

    pub fn var(&self, key: &str) -> Option<String> {
        self.host.var(key)
    }

    /// Set an environment variable. Inside a scope the write is reverted at
    /// exit like the scope's own patches.
    pub fn set_var(&self, key: &str, value: &str) {
        self.host.set_scoped_var(key, value);
    }

    pub fn search_path(&self) -> SearchPath {
        self.host.search_path()
    }
}

/// Builder for a [`Host`].
pub struct HostBuilder {
    loader: Box<dyn SourceLoader>,
    inherit_process_env: bool,
    env: BTreeMap<String, String>,
    search_path: Vec<PathBuf>,
    protected: Vec<String>,
    resolvers: Vec<Rc<dyn Resolve>>,
    profiles: BTreeMap<String, SessionConfig>,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBuilder {
    /// A builder with a `FileLoader`, an empty environment and no search path.
    pub fn new() -> Self {
        Self {
            loader: Box::new(FileLoader::new()),
            inherit_process_env: false,
            env: BTreeMap::new(),
            search_path: Vec::new(),
            protected: Vec::new(),
            resolvers: Vec::new(),
            profiles: BTreeMap::new(),
        }
    }

    /// A builder seeded from a configuration document.
    ///
    /// Session profiles are validated here so a bad profile fails early.
    pub fn from_config(config: &HostConfig) -> Result<Self, ConfigError> {
        let search_path = config.validated_search_path()?;
        for profile in config.sessions.values() {
            profile.validate()?;
        }
        Ok(Self {
            inherit_process_env: config.inherit_process_env,
            env: config.env.clone(),
            search_path,
            protected: config.protected.clone(),
            profiles: config.sessions.clone(),
            ..Self::new()
        })
    }

    pub fn loader(mut self, loader: impl SourceLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Seed the environment table from the process environment.
    pub fn inherit_process_env(mut self, inherit: bool) -> Self {
        self.inherit_process_env = inherit;
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_path.push(path.into());
        self
    }

    /// Exempt `name` from isolation even if it is first loaded after the
    /// baseline is captured.
    pub fn protect(mut self, name: impl Into<String>) -> Self {
        self.protected.push(name.into());
        self
    }

    /// Add a resolution stage before the isolating stage.
    pub fn resolver(mut self, resolver: impl Resolve + 'static) -> Self {
        self.resolvers.push(Rc::new(resolver));
        self
    }

    pub fn profile(mut self, name: impl Into<String>, config: SessionConfig) -> Self {
        self.profiles.insert(name.into(), config);
        self
    }

    pub fn build(self) -> Result<Host, ConfigError> {
        let mut env = if self.inherit_process_env {
            EnvTable::from_process()
        } else {
            EnvTable::new()
        };
        for (key, value) in self.env {
            validate_env_entry(&key, &value)?;
            env.set(key, value);
        }
        let protected = parse_identifiers("protected", &self.protected)?;
        let paths: SearchPath = self.search_path.into_iter().collect();
        debug!(
            target: "subsession::host",
            search_path = %paths,
            protected = protected.len(),
            resolvers = self.resolvers.len(),
            "host built"
        );

        Ok(Host {
            inner: Rc::new(HostInner {
                loader: self.loader,
                cache: RefCell::new(ModuleCache::new()),
                state: RefCell::new(Snapshot::new(env, paths)),
                baseline: OnceCell::new(),
                protected,
                stack: RefCell::new(ScopeStack::default()),
                interceptor: RefCell::new(None),
                resolvers: self.resolvers,
                profiles: self.profiles,
                next_unit: Cell::new(0),
                next_session: Cell::new(1),
                next_frame: Cell::new(0),
            }),
        })
    }
}

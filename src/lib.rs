//! Subsession - scoped isolation of unit loading inside one host process
//!
//! A host that embeds one long-lived interpreter cannot spawn a subprocess
//! every time two incompatible versions of the same unit need to coexist.
//! This crate gives it nested, temporary isolation scopes instead:
//!
//! - **Loading**: while a scope is open, every unit not exempt from isolation
//!   is executed fresh and kept private to the scope; the shared module cache
//!   is left as it was found.
//! - **Environment and search path**: a scope patches both on entry and
//!   restores them exactly on exit, also when the body fails or panics.
//! - **Reload**: an isolated unit can be re-executed later under its scope's
//!   saved environment and search path, even after the scope has closed.
//!
//! # Architecture
//!
//! - `modules`: identifiers, unit records, the shared cache, the baseline set,
//!   source loaders and the built-in unit script
//! - `scope`: sessions, the scope stack, the load interceptor, env/path
//!   patching and configuration
//! - `host`: the explicit registry that owns the mutable state
//!
//! # Example
//!
//! ```rust
//! use subsession::{Host, MemoryLoader, SessionConfig, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = MemoryLoader::new()
//!     .with_unit("/v1", "json", "let version = 1")
//!     .with_unit("/v2", "json", "let version = 2");
//! let host = Host::builder().loader(loader).search_path("/v1").build()?;
//!
//! let session = host.session(&SessionConfig::new().path("/v2"))?;
//! let isolated = session.run(|host| host.import("json"))??;
//! assert_eq!(isolated.get("version"), Some(Value::Int(2)));
//! assert!(host.cached("json").is_none());
//!
//! let shared = host.import("json")?;
//! assert_eq!(shared.get("version"), Some(Value::Int(1)));
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! A `Host` and everything bound to it is `!Send`. Scopes on one host form a
//! single nesting chain on one thread.

pub mod host;
pub mod modules;
pub mod scope;

pub use host::{ExecContext, Host, HostBuilder};
pub use modules::{
    BaselineSet, ExecError, FileLoader, Identifier, IdentifierError, LoadError, LoadResult,
    MemoryLoader, Source, SourceLoader, SourceRef, UnitHandle, UnitId, UnitState, Value,
};
pub use scope::{
    ConfigError, EnvTable, HostConfig, KeepGlobalMatch, LoadRequest, PathPlacement, Resolve,
    RestoreAnomaly, ScopeGuard, SearchPath, Session, SessionConfig, SessionError, SessionId,
    SessionSettings, Snapshot,
};

//! Scoped Isolation
//!
//! Sessions, the scope stack, the load interceptor and env/path patching.

pub mod config;
pub(crate) mod context;
pub mod error;
pub mod interceptor;
pub mod patch;
pub mod session;
pub(crate) mod stack;

pub use config::{ConfigError, HostConfig, KeepGlobalMatch, SessionConfig, SessionSettings};
pub use context::SessionId;
pub use error::{RestoreAnomaly, SessionError};
pub use interceptor::{LoadInterceptor, LoadRequest, Resolve};
pub use patch::{Drift, EnvDelta, EnvTable, PathDelta, PathPlacement, SearchPath, Snapshot};
pub use session::{ScopeGuard, Session};

//! Loadable Units
//!
//! Identifiers, unit records, the shared module cache, the baseline set and
//! the source loaders the host pipeline delegates to.

pub mod baseline;
pub mod cache;
pub mod identifier;
pub mod loader;
pub mod script;
pub mod unit;

pub use baseline::BaselineSet;
pub use cache::{hash_content, ModuleCache, SourceRef};
pub use identifier::{Identifier, IdentifierError};
pub use loader::{
    candidate_paths, ExecError, FileLoader, LoadError, LoadResult, MemoryLoader, Source,
    SourceLoader, PACKAGE_INIT, UNIT_EXTENSION,
};
pub use unit::{Namespace, UnitHandle, UnitId, UnitState, Value};

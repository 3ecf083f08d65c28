//! Source Loaders
//!
//! The host's code-loading pipeline, as seen by the core:
//! - `locate`: find the source text for an identifier along the search path
//! - `execute`: run that source into a unit namespace
//!
//! The default `execute` runs the built-in unit script (see `script`). Two
//! loaders are provided, both resolving `a.b.c` against each search-path
//! directory `D` in order:
//! 1. `D/a/b/c.unit`
//! 2. `D/a/b/c/_init.unit` (package form)

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use super::cache::SourceRef;
use super::identifier::{Identifier, IdentifierError};
use super::script;
use crate::host::ExecContext;
use crate::scope::SearchPath;

/// File extension for unit sources.
pub const UNIT_EXTENSION: &str = "unit";

/// File name of a package's own source.
pub const PACKAGE_INIT: &str = "_init.unit";

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors raised while a unit's own source executes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    /// A statement could not be parsed.
    #[error("{}:{line}: syntax error: {message}", .origin.display())]
    Syntax {
        origin: PathBuf,
        line: usize,
        message: String,
    },

    /// The unit raised explicitly.
    #[error("{0}")]
    Raised(String),

    /// A referenced name is not bound.
    #[error("name '{0}' is not defined")]
    UnknownName(String),

    /// A required environment variable is not set.
    #[error("environment variable '{0}' is not set")]
    MissingEnv(String),

    /// A nested import failed.
    #[error("import of '{ident}' failed: {source}")]
    Import {
        ident: String,
        #[source]
        source: Box<LoadError>,
    },
}

/// Errors that can occur during unit loading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// The requested name is not a valid identifier.
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    /// No search-path entry holds a source for the unit.
    #[error("no source for '{ident}' on a search path of {searched} entries")]
    NotFound { ident: Identifier, searched: usize },

    /// A source file exists but could not be read.
    #[error("failed to read '{}': {message}", .path.display())]
    Read { path: PathBuf, message: String },

    /// The unit's own source raised while executing.
    #[error("executing '{ident}' failed: {source}")]
    Execution {
        ident: Identifier,
        #[source]
        source: ExecError,
    },
}

impl LoadError {
    /// The unit's own execution error, if this is an execution failure.
    pub fn exec_error(&self) -> Option<&ExecError> {
        match self {
            LoadError::Execution { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Located source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Where the text was found.
    pub origin: PathBuf,
    /// The text itself.
    pub text: String,
}

impl Source {
    pub fn new(origin: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }

    /// Reference recorded on the unit executed from this source.
    pub fn reference(&self) -> SourceRef {
        SourceRef::new(self.origin.clone(), &self.text)
    }
}

/// The host's code-loading pipeline.
pub trait SourceLoader {
    /// Find the source for `ident` using `search_path`.
    fn locate(&self, ident: &Identifier, search_path: &SearchPath) -> LoadResult<Source>;

    /// Execute `source` into the unit behind `cx`.
    fn execute(&self, source: &Source, cx: &ExecContext<'_>) -> Result<(), ExecError> {
        script::run(source, cx)
    }
}

/// Candidate source locations for `ident` under `dir`, in lookup order.
pub fn candidate_paths(dir: &Path, ident: &Identifier) -> [PathBuf; 2] {
    let relative = ident.relative_path();
    let module = dir.join(&relative).with_extension(UNIT_EXTENSION);
    let package = dir.join(relative).join(PACKAGE_INIT);
    [module, package]
}

/// Loads unit sources from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl SourceLoader for FileLoader {
    fn locate(&self, ident: &Identifier, search_path: &SearchPath) -> LoadResult<Source> {
        for dir in search_path.iter() {
            for candidate in candidate_paths(dir, ident) {
                if !candidate.is_file() {
                    continue;
                }
                return match std::fs::read_to_string(&candidate) {
                    Ok(text) => Ok(Source::new(candidate, text)),
                    Err(e) => Err(LoadError::Read {
                        path: candidate,
                        message: e.to_string(),
                    }),
                };
            }
        }
        Err(LoadError::NotFound {
            ident: ident.clone(),
            searched: search_path.len(),
        })
    }
}

/// Loads unit sources from an in-memory file map.
///
/// Clones share the same map, so a host's loader can be edited after the
/// host owns it (e.g. to change a source before a reload).
#[derive(Clone, Default)]
pub struct MemoryLoader {
    files: Rc<RefCell<BTreeMap<PathBuf, String>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit source at its resolved path under `dir`.
    pub fn with_unit(self, dir: impl AsRef<Path>, ident: &str, text: &str) -> Self {
        self.put_unit(dir, ident, text);
        self
    }

    /// Add a package source (`_init.unit`) under `dir`.
    pub fn with_package(self, dir: impl AsRef<Path>, ident: &str, text: &str) -> Self {
        self.put_file(Self::package_path(dir.as_ref(), ident), text);
        self
    }

    /// Insert or replace the unit source for `ident` under `dir`.
    pub fn put_unit(&self, dir: impl AsRef<Path>, ident: &str, text: &str) {
        self.put_file(Self::unit_path(dir.as_ref(), ident), text);
    }

    /// Insert or replace a file at an explicit path.
    pub fn put_file(&self, path: impl Into<PathBuf>, text: &str) {
        self.files.borrow_mut().insert(path.into(), text.to_string());
    }

    /// Remove a file.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.borrow_mut().remove(path.as_ref())
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.files.borrow().len()
    }

    // Names are not validated here; a malformed name is simply never located.
    fn unit_path(dir: &Path, ident: &str) -> PathBuf {
        dir.join(ident.replace('.', "/"))
            .with_extension(UNIT_EXTENSION)
    }

    fn package_path(dir: &Path, ident: &str) -> PathBuf {
        dir.join(ident.replace('.', "/")).join(PACKAGE_INIT)
    }
}

impl SourceLoader for MemoryLoader {
    fn locate(&self, ident: &Identifier, search_path: &SearchPath) -> LoadResult<Source> {
        let files = self.files.borrow();
        for dir in search_path.iter() {
            for candidate in candidate_paths(dir, ident) {
                if let Some(text) = files.get(&candidate) {
                    return Ok(Source::new(candidate, text.clone()));
                }
            }
        }
        Err(LoadError::NotFound {
            ident: ident.clone(),
            searched: search_path.len(),
        })
    }
}

impl fmt::Debug for MemoryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLoader")
            .field("files", &self.files.borrow().len())
            .finish()
    }
}

//! Shared helpers for the integration tests.
//!
//! - Logging setup (`RUST_LOG` controls verbosity, default `warn`)
//! - Hosts over an in-memory loader rooted at `/lib`
//! - The on-disk fixtures directory

#![allow(dead_code)]

use std::path::PathBuf;

use subsession::{Host, MemoryLoader, UnitHandle, Value};
use tracing_subscriber::EnvFilter;

/// Search-path root of the in-memory test hosts.
pub const LIB: &str = "/lib";

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .with_target(true)
        .try_init();
}

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Host over `loader` with search path `[/lib]` and an empty environment.
pub fn memory_host(loader: &MemoryLoader) -> Host {
    init_test_logging();
    Host::builder()
        .loader(loader.clone())
        .search_path(LIB)
        .build()
        .expect("test host should build")
}

/// Unit bound under `name` in `unit`'s namespace.
pub fn bound_unit(unit: &UnitHandle, name: &str) -> UnitHandle {
    match unit.get(name) {
        Some(Value::Unit(bound)) => bound,
        other => panic!("expected unit bound as '{name}', found {other:?}"),
    }
}

pub fn str_value(unit: &UnitHandle, name: &str) -> Option<String> {
    unit.get(name).and_then(|v| v.as_str().map(str::to_string))
}

pub fn int_value(unit: &UnitHandle, name: &str) -> Option<i64> {
    unit.get(name).and_then(|v| v.as_int())
}

//! Integration tests for the session lifecycle.
//!
//! These tests verify:
//! - Exit restoration runs on failure and on panic
//! - Failed isolated loads leave no cache entry and keep the scope patches
//! - Closure and wrapper forms, sequential re-entry, nested re-entry
//! - Configuration errors fail before anything is patched
//! - Host-registered resolvers and configuration profiles

mod common;

use std::panic::{self, AssertUnwindSafe};

use common::{init_test_logging, int_value, memory_host, LIB};
use subsession::{
    ConfigError, ExecError, Host, HostBuilder, HostConfig, LoadError, LoadRequest, LoadResult,
    MemoryLoader, Resolve, SessionConfig, SessionError, UnitHandle, UnitState,
};

// ============================================================
// Failure handling
// ============================================================

#[test]
fn test_failed_isolated_load_rolls_back_entry() {
    let loader = MemoryLoader::new().with_unit(LIB, "bad", "let partial = 1\nraise \"unit failed\"");
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new().env("MODE", "scoped")).unwrap();

    let scope = session.enter().unwrap();
    let err = host.import("bad").unwrap_err();
    assert_eq!(err.exec_error(), Some(&ExecError::Raised("unit failed".into())));
    assert!(host.cached("bad").is_none());
    assert!(session.isolated("bad").is_none());
    // Scope patches are still in place.
    assert_eq!(host.var("MODE").as_deref(), Some("scoped"));
    scope.close().unwrap();
    assert_eq!(host.var("MODE"), None);
}

#[test]
fn test_failed_isolated_load_restores_set_aside_entry() {
    let loader = MemoryLoader::new().with_unit(LIB, "m", "let version = 1");
    let host = memory_host(&loader);
    host.capture_baseline();
    let shared = host.import("m").unwrap();

    loader.put_unit(LIB, "m", "raise \"v2 is broken\"");
    let session = host.session(&SessionConfig::new()).unwrap();
    let result = session.run(|host| host.import("m")).unwrap();

    assert!(result.is_err());
    assert_eq!(host.cached("m"), Some(shared));
}

#[test]
fn test_failed_load_can_be_retried_in_scope() {
    let loader = MemoryLoader::new().with_unit(LIB, "flaky", "raise \"not yet\"");
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new()).unwrap();

    let scope = session.enter().unwrap();
    assert!(host.import("flaky").is_err());
    loader.put_unit(LIB, "flaky", "let ready = true");
    let flaky = host.import("flaky").unwrap();
    assert_eq!(flaky.state(), UnitState::Loaded);
    assert_eq!(session.isolated("flaky"), Some(flaky));
    scope.close().unwrap();
}

#[test]
fn test_nested_failure_names_each_import() {
    let loader = MemoryLoader::new()
        .with_unit(LIB, "outer", "import inner")
        .with_unit(LIB, "inner", "let x = $env(REQUIRED)");
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new()).unwrap();

    let err = session.run(|host| host.import("outer")).unwrap().unwrap_err();
    match err.exec_error() {
        Some(ExecError::Import { ident, source }) => {
            assert_eq!(ident, "inner");
            assert_eq!(source.exec_error(), Some(&ExecError::MissingEnv("REQUIRED".into())));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(host.cached_identifiers().is_empty());
}

#[test]
fn test_panic_in_scope_restores_everything() {
    let loader = MemoryLoader::new().with_unit(LIB, "m", "");
    let host = memory_host(&loader);
    let before = host.snapshot();
    let session = host
        .session(&SessionConfig::new().path("/panicky").env("MODE", "panic"))
        .unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        session.run(|host| {
            host.import("m").unwrap();
            panic!("scope body failed");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(host.snapshot(), before);
    assert_eq!(host.scope_depth(), 0);
    assert!(!host.is_intercepting());
    assert!(host.cached("m").is_none());
    assert!(!session.is_active());
}

#[test]
fn test_body_error_is_returned_unchanged() {
    let loader = MemoryLoader::new();
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new()).unwrap();

    let result: Result<Result<(), String>, SessionError> = session.run(|host| {
        host.set_var("ROGUE", "1");
        Err("body failed".to_string())
    });
    // The drift anomaly is logged; the body's own error comes back.
    assert_eq!(result, Ok(Err("body failed".to_string())));
    assert_eq!(host.var("ROGUE"), None);
}

// ============================================================
// Closure forms and re-entry
// ============================================================

#[test]
fn test_wrap_runs_each_call_in_fresh_scope() {
    let loader = MemoryLoader::new().with_unit(LIB, "json", "let version = 3");
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new().env("MODE", "wrapped")).unwrap();

    let load = session.wrap(|host: &Host, name: &'static str| {
        assert_eq!(host.var("MODE").as_deref(), Some("wrapped"));
        host.import(name)
    });
    let first = load("json").unwrap().unwrap();
    let second = load("json").unwrap().unwrap();

    assert_ne!(first, second);
    assert_eq!(int_value(&first, "version"), Some(3));
    assert_eq!(session.activations(), 2);
    assert_eq!(session.retained_units(), vec![second]);
    assert_eq!(host.var("MODE"), None);
}

#[test]
fn test_repeated_wrap_calls_keep_only_latest_units() {
    let loader = MemoryLoader::new()
        .with_unit(LIB, "json", "import codec")
        .with_unit(LIB, "codec", "let name = \"utf8\"");
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new()).unwrap();

    let load = session.wrap(|host: &Host, name: &'static str| host.import(name).map(|_| ()));
    for _ in 0..200 {
        load("json").unwrap().unwrap();
    }

    assert_eq!(session.activations(), 200);
    assert_eq!(
        session
            .retained_units()
            .iter()
            .map(|unit| unit.identifier().as_str().to_string())
            .collect::<Vec<_>>(),
        vec!["codec", "json"]
    );
    assert!(session.isolated("json").is_some());
}

#[test]
fn test_sequential_reentry_is_fresh_activation() {
    let loader = MemoryLoader::new().with_unit(LIB, "m", "");
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new()).unwrap();

    let a = session.run(|host| host.import("m")).unwrap().unwrap();
    assert_eq!(session.isolated("m"), Some(a.clone()));
    let b = session.run(|host| host.import("m")).unwrap().unwrap();

    assert_ne!(a, b);
    assert_eq!(session.isolated("m"), Some(b));
    // Earlier activations stay reloadable.
    assert!(session.reload(&a).is_ok());
}

#[test]
fn test_nested_reentry_rejected() {
    let loader = MemoryLoader::new();
    let host = memory_host(&loader);
    let session = host.session(&SessionConfig::new().path("/p")).unwrap();

    let scope = session.enter().unwrap();
    let snapshot = host.snapshot();
    assert_eq!(
        session.enter().unwrap_err(),
        SessionError::AlreadyActive(session.id())
    );
    assert_eq!(host.snapshot(), snapshot);
    assert_eq!(host.scope_depth(), 1);
    scope.close().unwrap();
    assert!(session.enter().is_ok());
}

// ============================================================
// Configuration
// ============================================================

#[test]
fn test_invalid_config_fails_before_patching() {
    let loader = MemoryLoader::new();
    let host = memory_host(&loader);
    let before = host.snapshot();

    let err = host
        .session(&SessionConfig::new().path("/fine").env("BAD=NAME", "x"))
        .unwrap_err();
    assert!(matches!(err, SessionError::Config(ConfigError::InvalidEnvName { .. })));

    let err = host
        .session(&SessionConfig::new().keep_global(["9lives"]))
        .unwrap_err();
    assert!(matches!(err, SessionError::Config(ConfigError::InvalidIdentifier { .. })));

    assert_eq!(host.snapshot(), before);
    assert!(host.baseline().is_none());
    assert_eq!(host.scope_depth(), 0);
}

#[test]
fn test_non_string_toml_entries_rejected() {
    let err = SessionConfig::from_toml_str("paths = [\"/ok\", 42]").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_host_config_profiles() {
    init_test_logging();
    let config = HostConfig::from_toml_str(
        r#"
        search_path = ["/lib"]
        protected = ["site"]
        inherit_process_env = false

        [env]
        HOST_MODE = "embedded"

        [sessions.legacy]
        paths = ["/legacy"]
        label = "legacy"

        [sessions.legacy.env]
        PLUGIN_MODE = "legacy"
        "#,
    )
    .unwrap();
    let loader = MemoryLoader::new().with_unit("/legacy", "plugin", "let mode = $env(PLUGIN_MODE)");
    let host = HostBuilder::from_config(&config)
        .unwrap()
        .loader(loader)
        .build()
        .unwrap();
    assert_eq!(host.var("HOST_MODE").as_deref(), Some("embedded"));

    let session = host.profile_session("legacy").unwrap();
    assert_eq!(session.label(), Some("legacy"));
    let plugin = session.run(|host| host.import("plugin")).unwrap().unwrap();
    assert_eq!(common::str_value(&plugin, "mode").as_deref(), Some("legacy"));

    assert_eq!(
        host.profile_session("missing").unwrap_err(),
        SessionError::Config(ConfigError::UnknownProfile("missing".into()))
    );
}

#[test]
fn test_host_config_rejects_bad_profile() {
    let config = HostConfig::from_toml_str(
        r#"
        [sessions.broken]
        keep_global = ["not valid"]
        "#,
    )
    .unwrap();
    assert!(matches!(
        Host::from_config(&config),
        Err(ConfigError::InvalidIdentifier { .. })
    ));
}

// ============================================================
// Custom resolvers
// ============================================================

struct SharedVendor;

impl Resolve for SharedVendor {
    fn name(&self) -> &'static str {
        "shared-vendor"
    }

    fn resolve(&self, host: &Host, request: &LoadRequest<'_>) -> Option<LoadResult<UnitHandle>> {
        (request.ident().segments().next() == Some("vendor"))
            .then(|| host.load_shared(request.ident()))
    }
}

struct DenyBlocked;

impl Resolve for DenyBlocked {
    fn name(&self) -> &'static str {
        "deny-blocked"
    }

    fn resolve(&self, _host: &Host, request: &LoadRequest<'_>) -> Option<LoadResult<UnitHandle>> {
        (request.ident().as_str() == "blocked" && request.label() == Some("strict")).then(|| {
            Err(LoadError::NotFound {
                ident: request.ident().clone(),
                searched: 0,
            })
        })
    }
}

fn resolver_host(loader: &MemoryLoader) -> Host {
    init_test_logging();
    Host::builder()
        .loader(loader.clone())
        .search_path(LIB)
        .resolver(SharedVendor)
        .resolver(DenyBlocked)
        .build()
        .unwrap()
}

#[test]
fn test_custom_resolver_keeps_units_shared() {
    let loader = MemoryLoader::new()
        .with_unit(LIB, "vendor.json", "")
        .with_unit(LIB, "plugin", "");
    let host = resolver_host(&loader);
    let first = host.session(&SessionConfig::new()).unwrap();
    let second = host.session(&SessionConfig::new()).unwrap();

    let a = first.run(|host| host.import("vendor.json")).unwrap().unwrap();
    let b = second.run(|host| host.import("vendor.json")).unwrap().unwrap();
    assert_eq!(a, b);

    let p = first.run(|host| host.import("plugin")).unwrap().unwrap();
    assert!(p.is_session_managed());
}

#[test]
fn test_custom_resolver_can_deny() {
    let loader = MemoryLoader::new().with_unit(LIB, "blocked", "");
    let host = resolver_host(&loader);
    let strict = host.session(&SessionConfig::new().label("strict")).unwrap();
    let relaxed = host.session(&SessionConfig::new()).unwrap();

    let denied = strict.run(|host| host.import("blocked")).unwrap();
    assert!(matches!(denied, Err(LoadError::NotFound { searched: 0, .. })));
    assert!(relaxed.run(|host| host.import("blocked")).unwrap().is_ok());
}

#[test]
fn test_resolver_stage_order() {
    let loader = MemoryLoader::new();
    let host = resolver_host(&loader);
    let session = host.session(&SessionConfig::new()).unwrap();

    assert_eq!(host.interceptor_stages(), None);
    let stages = session.run(|host| host.interceptor_stages()).unwrap();
    assert_eq!(
        stages,
        Some(vec!["baseline", "keep-shared", "shared-vendor", "deny-blocked", "isolating"])
    );
}

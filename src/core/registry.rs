//! Purpose: Map format identifiers to backend constructors.
//! Exports: `BackendRegistry`, `BackendFactory`, `register_backend`, `registered_kinds`, `resolve_backend`,
//! `default_kind`, `with_global`.
//! Role: Resolver between a canonical spec and a concrete `Backend`.
//! Invariants: The process-wide registry starts with the built-ins and is append-only.
//! Invariants: Resolution never opens storage; backends open lazily per session.
//! Invariants: New formats are added by registering, never by editing the resolver.
//! Invariants: Factories run with the process-wide lock released, so they may use the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use crate::core::backend::Backend;
use crate::core::delimited::{self, DelimitedBackend};
use crate::core::error::{Error, ErrorKind};
use crate::core::fixed_width::{self, FixedWidthBackend};
use crate::core::spec::TableSpec;

pub type BackendFactory =
    Arc<dyn Fn(&TableSpec) -> Result<Arc<dyn Backend>, Error> + Send + Sync>;

#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_kind: String,
}

impl BackendRegistry {
    /// Empty registry whose bare locations default to the delimited backend.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_kind: delimited::KIND.to_string(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .factories
            .insert(delimited::KIND.to_string(), Arc::new(delimited_factory));
        registry
            .factories
            .insert(fixed_width::KIND.to_string(), Arc::new(fixed_width_factory));
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> Result<(), Error>
    where
        F: Fn(&TableSpec) -> Result<Arc<dyn Backend>, Error> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("backend kind must not be empty"));
        }
        if self.factories.contains_key(&kind) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("backend `{kind}` is already registered")));
        }
        tracing::debug!(kind = %kind, "registered table backend");
        self.factories.insert(kind, Arc::new(factory));
        Ok(())
    }

    pub fn with_default_kind(mut self, kind: impl Into<String>) -> Self {
        self.default_kind = kind.into();
        self
    }

    pub fn default_kind(&self) -> &str {
        &self.default_kind
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered identifiers, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// The constructor registered for `kind`.
    pub fn factory(&self, kind: &str) -> Result<BackendFactory, Error> {
        self.factories.get(kind).cloned().ok_or_else(|| {
            Error::new(ErrorKind::UnknownFormat)
                .with_message(format!("no backend registered for `{kind}`"))
                .with_hint(format!("Known formats: {}.", self.kinds().join(", ")))
        })
    }

    pub fn resolve(&self, spec: &TableSpec) -> Result<Arc<dyn Backend>, Error> {
        let backend = self.factory(spec.kind())?(spec)?;
        tracing::debug!(kind = spec.kind(), location = spec.location(), "resolved backend");
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .field("default_kind", &self.default_kind)
            .finish()
    }
}

fn delimited_factory(spec: &TableSpec) -> Result<Arc<dyn Backend>, Error> {
    Ok(Arc::new(DelimitedBackend::from_spec(spec)?))
}

fn fixed_width_factory(spec: &TableSpec) -> Result<Arc<dyn Backend>, Error> {
    Ok(Arc::new(FixedWidthBackend::from_spec(spec)?))
}

fn global() -> &'static RwLock<BackendRegistry> {
    static REGISTRY: OnceLock<RwLock<BackendRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(BackendRegistry::with_builtins()))
}

fn poisoned() -> Error {
    Error::new(ErrorKind::Internal).with_message("backend registry lock poisoned")
}

/// Runs `f` against the process-wide registry.
pub fn with_global<R>(f: impl FnOnce(&BackendRegistry) -> R) -> Result<R, Error> {
    let registry = global().read().map_err(|_| poisoned())?;
    Ok(f(&registry))
}

/// Adds a backend to the process-wide registry.
pub fn register_backend<F>(kind: impl Into<String>, factory: F) -> Result<(), Error>
where
    F: Fn(&TableSpec) -> Result<Arc<dyn Backend>, Error> + Send + Sync + 'static,
{
    let mut registry = global().write().map_err(|_| poisoned())?;
    registry.register(kind, factory)
}

pub fn registered_kinds() -> Result<Vec<String>, Error> {
    with_global(BackendRegistry::kinds)
}

pub fn default_kind() -> Result<String, Error> {
    with_global(|registry| registry.default_kind().to_string())
}

/// Resolves against the process-wide registry. The factory runs after the
/// read lock is dropped.
pub fn resolve_backend(spec: &TableSpec) -> Result<Arc<dyn Backend>, Error> {
    let factory = with_global(|registry| registry.factory(spec.kind()))??;
    let backend = factory(spec)?;
    tracing::debug!(kind = spec.kind(), location = spec.location(), "resolved backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::{
        BackendRegistry, default_kind, register_backend, registered_kinds, resolve_backend,
    };
    use crate::core::backend::{Backend, RawHandle, SessionMode};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::spec::TableSpec;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug)]
    struct NullBackend;

    impl Backend for NullBackend {
        fn kind(&self) -> &str {
            "null"
        }

        fn open(&self, _mode: SessionMode) -> Result<Box<dyn RawHandle>, Error> {
            Err(Error::new(ErrorKind::Unsupported))
        }
    }

    #[test]
    fn builtins_resolve_by_kind() {
        let registry = BackendRegistry::with_builtins();
        assert_eq!(registry.kinds(), ["delimited", "fixed-width"]);
        let spec = TableSpec::new("fixed-width", "t.txt").with_param("widths", json!([3]));
        let backend = registry.resolve(&spec).expect("backend");
        assert_eq!(backend.kind(), spec.kind());
    }

    #[test]
    fn unknown_kind_is_reported() {
        let registry = BackendRegistry::with_builtins();
        let err = registry
            .resolve(&TableSpec::new("parquet", "t.parquet"))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::UnknownFormat);
    }

    #[test]
    fn resolution_does_not_touch_storage() {
        let registry = BackendRegistry::with_builtins();
        let spec = TableSpec::new("delimited", "/definitely/not/here.tab");
        registry.resolve(&spec).expect("lazy backend");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = BackendRegistry::new();
        registry
            .register("null", |_spec: &TableSpec| Ok(Arc::new(NullBackend) as Arc<dyn Backend>))
            .expect("register");
        let err = registry
            .register("null", |_spec: &TableSpec| Ok(Arc::new(NullBackend) as Arc<dyn Backend>))
            .expect_err("dup");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(registry.kinds(), ["null"]);
    }

    #[test]
    fn global_registry_is_extensible() {
        register_backend("registry-test-null", |_spec: &TableSpec| {
            Ok(Arc::new(NullBackend) as Arc<dyn Backend>)
        })
        .expect("register");
        let kinds = registered_kinds().expect("kinds");
        assert!(kinds.contains(&"registry-test-null".to_string()));
        assert!(kinds.contains(&"delimited".to_string()));
        assert_eq!(default_kind().expect("kind"), "delimited");
    }

    #[test]
    fn factories_may_use_the_global_registry() {
        register_backend("registry-test-outer", |_spec: &TableSpec| {
            let _ = register_backend("registry-test-inner", |_spec: &TableSpec| {
                Ok(Arc::new(NullBackend) as Arc<dyn Backend>)
            });
            let kinds = registered_kinds()?;
            assert!(kinds.contains(&"registry-test-outer".to_string()));
            Ok(Arc::new(NullBackend) as Arc<dyn Backend>)
        })
        .expect("register");
        let backend =
            resolve_backend(&TableSpec::new("registry-test-outer", "t.null")).expect("resolve");
        assert_eq!(backend.kind(), "null");
        assert!(registered_kinds().expect("kinds").contains(&"registry-test-inner".to_string()));

        let err = resolve_backend(&TableSpec::new("registry-test-missing", "t.null"))
            .expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::UnknownFormat);
    }
}

//! Purpose: The user-facing table handle and the factory entry points that build it.
//! Exports: `TableHandle`, `open_table`, `BackendRegistry::open_table`.
//! Role: Binds a canonical spec to a resolved backend; spawns sessions.
//! Invariants: A handle holds no resource; only sessions do.
//! Invariants: At most one session per handle (and its clones) is open at a time.
//! Invariants: After `delete`, every `open_*` on the handle fails with `NotFound`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::session::{Reader, SessionGuard, Writer};
use crate::core::backend::{Backend, SessionMode};
use crate::core::error::{Error, ErrorKind};
use crate::core::registry::{BackendRegistry, default_kind, resolve_backend};
use crate::core::spec::{TableSource, TableSpec, normalize};

/// Builds a handle from any accepted spec shape using the process-wide registry.
///
/// Accepts a `TableSpec`, a JSON map, spec text (`{:kind ...}` or JSON), a bare
/// location string, a filesystem path, or a URI.
pub fn open_table(source: impl Into<TableSource>) -> Result<TableHandle, Error> {
    let spec = normalize(source.into(), &default_kind()?)?;
    let backend = resolve_backend(&spec)?;
    Ok(TableHandle::from_parts(spec, backend))
}

impl BackendRegistry {
    /// Builds a handle against this registry instead of the process-wide one.
    pub fn open_table(&self, source: impl Into<TableSource>) -> Result<TableHandle, Error> {
        TableHandle::with_registry(self, source)
    }
}

#[derive(Clone)]
pub struct TableHandle {
    spec: TableSpec,
    backend: Arc<dyn Backend>,
    busy: Arc<AtomicBool>,
    deleted: Arc<AtomicBool>,
}

impl TableHandle {
    /// Builds a handle against an explicit registry.
    pub fn with_registry(
        registry: &BackendRegistry,
        source: impl Into<TableSource>,
    ) -> Result<Self, Error> {
        let spec = normalize(source.into(), registry.default_kind())?;
        let backend = registry.resolve(&spec)?;
        Ok(Self::from_parts(spec, backend))
    }

    fn from_parts(spec: TableSpec, backend: Arc<dyn Backend>) -> Self {
        Self {
            spec,
            backend,
            busy: Arc::new(AtomicBool::new(false)),
            deleted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn kind(&self) -> &str {
        self.spec.kind()
    }

    /// Declared headers; empty when the spec declares none.
    pub fn headers(&self) -> &[String] {
        self.spec.headers().unwrap_or_default()
    }

    pub fn open_reader(&self) -> Result<Reader, Error> {
        let guard = self.acquire()?;
        let mut raw = self.backend.open(SessionMode::Reading)?;
        let inferred = raw.infer_headers()?;
        let headers = self.spec.headers().map(<[String]>::to_vec).or(inferred);
        Ok(Reader::new(self.spec.location(), raw, guard, headers))
    }

    /// Opens for writing. The reference backends truncate existing content.
    pub fn open_writer(&self) -> Result<Writer, Error> {
        let guard = self.acquire()?;
        let raw = self.backend.open(SessionMode::Writing)?;
        let headers = self.spec.headers().map(<[String]>::to_vec);
        Ok(Writer::new(self.spec.location(), raw, guard, headers))
    }

    /// Removes the underlying storage; the handle is unusable for I/O afterwards.
    pub fn delete(&self) -> Result<&Self, Error> {
        let _guard = SessionGuard::acquire(&self.busy, self.spec.location()).map_err(|err| {
            err.with_message("cannot delete a table while a session is open")
        })?;
        self.backend.remove()?;
        self.deleted.store(true, Ordering::Release);
        tracing::debug!(kind = self.kind(), location = self.spec.location(), "table deleted");
        Ok(self)
    }

    /// A handle owns no resource, so closing it is a no-op.
    pub fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn acquire(&self) -> Result<SessionGuard, Error> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("table `{}` was deleted", self.spec.location())));
        }
        SessionGuard::acquire(&self.busy, self.spec.location())
    }
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("spec", &self.spec)
            .field("backend", &self.backend)
            .finish()
    }
}

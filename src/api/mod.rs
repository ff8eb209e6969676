//! Purpose: Define the stable public Rust API boundary for anytable.
//! Exports: Table handles, sessions, spec types, the registry surface, and errors.
//! Role: Public, additive-only surface; backend authors may reach into `core`.
//! Invariants: Every format is reached through `open_table` and a `TableHandle`.
//! Invariants: Session types are only constructed by a handle.

mod session;
mod table;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::backend::{Backend, RawHandle, SessionMode};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::registry::{BackendRegistry, register_backend, registered_kinds};
pub use crate::core::row::{Record, Row};
pub use crate::core::spec::{TableSource, TableSpec};
pub use session::{Reader, Records, Rows, Writer};
pub use table::{TableHandle, open_table};

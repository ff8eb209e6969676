//! Purpose: Library crate behind the `anytable` CLI: one access layer over many tabular formats.
//! Exports: `api` (handles, sessions, factory), `core` (specs, backends, registry, errors).
//! Role: Callers build a `TableHandle` from any spec shape and stream rows or records.
//! Invariants: Callers depend on `api`; `core` is exposed for backend authors.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;

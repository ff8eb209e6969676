//! Purpose: Single error type shared by the core, the public API, and the CLI.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`, `io_error_kind`.
//! Role: Every failure surfaces as one `ErrorKind` plus optional context.
//! Invariants: Kinds are stable; exit codes never change once assigned.
//! Invariants: I/O errors are classified in one place (`io_error_kind`).
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use libc::{EACCES, EPERM};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    InvalidSpec,
    UnknownFormat,
    NotFound,
    Permission,
    Unsupported,
    SchemaMismatch,
    MissingHeaders,
    Closed,
    Busy,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    row: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            row: None,
            source: None,
        }
    }

    /// Wraps an I/O failure, classifying it by `io_error_kind`.
    pub fn io(err: io::Error, path: &Path) -> Self {
        Error::new(io_error_kind(&err))
            .with_path(path)
            .with_source(err)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Zero-based index of the row the failure relates to, when known.
    pub fn row(&self) -> Option<u64> {
        self.row
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_row(mut self, row: u64) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(row) = self.row {
            write!(f, " (row: {row})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn io_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        _ => ErrorKind::Io,
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::InvalidSpec => 4,
        ErrorKind::Busy => 5,
        ErrorKind::Permission => 6,
        ErrorKind::UnknownFormat => 7,
        ErrorKind::Io => 8,
        ErrorKind::Unsupported => 9,
        ErrorKind::SchemaMismatch => 10,
        ErrorKind::MissingHeaders => 11,
        ErrorKind::Closed => 12,
    }
}

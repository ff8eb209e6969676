//! Purpose: The contract every storage format implements, plus shared file plumbing.
//! Exports: `Backend`, `RawHandle`, `SessionMode`, `open_locked`, `remove_file`, `read_line`.
//! Role: Narrow seam between the format-agnostic core and format-specific I/O.
//! Invariants: Constructing a backend never touches storage; `open` does.
//! Invariants: A failed `open` leaks nothing; a raw handle releases its file on drop.
//! Invariants: Readers hold a shared advisory lock, writers an exclusive one.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::BufRead;
use std::path::Path;

use bstr::ByteSlice;
use fs2::FileExt;

use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::row::Row;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionMode {
    Reading,
    Writing,
}

/// A format backend bound to one location and its format parameters.
pub trait Backend: fmt::Debug + Send + Sync {
    /// Format identifier this backend was registered under.
    fn kind(&self) -> &str;

    fn open(&self, mode: SessionMode) -> Result<Box<dyn RawHandle>, Error>;

    /// Removes the underlying storage.
    fn remove(&self) -> Result<(), Error> {
        Err(Error::new(ErrorKind::Unsupported)
            .with_message(format!("`{}` tables cannot be deleted", self.kind())))
    }
}

/// Live resource produced by `Backend::open`.
pub trait RawHandle: Send {
    /// Next row in storage order, or `None` at end of data.
    fn read_next(&mut self) -> Result<Option<Row>, Error>;

    fn write_next(&mut self, row: &[String]) -> Result<(), Error>;

    /// Header names discovered in storage, if the format carries them.
    fn infer_headers(&mut self) -> Result<Option<Vec<String>>, Error> {
        Ok(None)
    }

    /// Flushes pending output and releases the resource.
    fn close(&mut self) -> Result<(), Error>;
}

/// Opens `path` for `mode` and takes the matching advisory lock without blocking.
///
/// Writing truncates (creating the file if needed); reading requires it to exist.
pub fn open_locked(path: &Path, mode: SessionMode) -> Result<File, Error> {
    let mut options = OpenOptions::new();
    match mode {
        SessionMode::Reading => options.read(true),
        SessionMode::Writing => options.write(true).create(true),
    };
    let file = options.open(path).map_err(|err| Error::io(err, path))?;

    let locked = match mode {
        SessionMode::Reading => FileExt::try_lock_shared(&file),
        SessionMode::Writing => FileExt::try_lock_exclusive(&file),
    };
    locked.map_err(|err| {
        let kind = match io_error_kind(&err) {
            ErrorKind::NotFound => ErrorKind::Io,
            kind => kind,
        };
        let mut error = Error::new(kind).with_path(path).with_source(err);
        if kind == ErrorKind::Busy {
            error = error.with_message("table is open in another session");
        }
        error
    })?;

    // Truncate only under the exclusive lock.
    if mode == SessionMode::Writing {
        file.set_len(0).map_err(|err| Error::io(err, path))?;
    }
    Ok(file)
}

pub fn remove_file(path: &Path) -> Result<(), Error> {
    std::fs::remove_file(path).map_err(|err| {
        Error::io(err, path).with_message("failed to delete table")
    })
}

/// Reads one text line without its terminator (`\n` or `\r\n`); `None` at end of data.
pub fn read_line<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    path: &Path,
    line: u64,
) -> Result<Option<String>, Error> {
    buf.clear();
    let read = reader
        .read_until(b'\n', buf)
        .map_err(|err| Error::io(err, path).with_row(line))?;
    if read == 0 {
        return Ok(None);
    }
    let mut text = buf.as_slice();
    if let Some(rest) = text.strip_suffix(b"\n") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(b"\r") {
        text = rest;
    }
    let text = text.to_str().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("line is not valid UTF-8")
            .with_path(path)
            .with_row(line)
            .with_source(err)
    })?;
    Ok(Some(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{SessionMode, open_locked, read_line, remove_file};
    use crate::core::error::ErrorKind;
    use std::io::{Cursor, Write};
    use std::path::Path;

    #[test]
    fn read_line_strips_terminators() {
        let mut input = Cursor::new(b"a\tb\r\nc\n\nlast".to_vec());
        let mut buf = Vec::new();
        let path = Path::new("t.tab");
        let mut lines = Vec::new();
        while let Some(line) = read_line(&mut input, &mut buf, path, 0).expect("line") {
            lines.push(line);
        }
        assert_eq!(lines, ["a\tb", "c", "", "last"]);
    }

    #[test]
    fn read_line_rejects_invalid_utf8() {
        let mut input = Cursor::new(vec![0xff, 0xfe, b'\n']);
        let mut buf = Vec::new();
        let err = read_line(&mut input, &mut buf, Path::new("t.tab"), 7).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.row(), Some(7));
    }

    #[test]
    fn reading_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = open_locked(&dir.path().join("missing.tab"), SessionMode::Reading)
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn writing_truncates_existing_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t.tab");
        std::fs::write(&path, "old content\n").expect("seed");
        let mut file = open_locked(&path, SessionMode::Writing).expect("open");
        file.write_all(b"new\n").expect("write");
        drop(file);
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "new\n");
    }

    #[test]
    fn second_writer_is_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t.tab");
        let _first = open_locked(&path, SessionMode::Writing).expect("open");
        let err = open_locked(&path, SessionMode::Writing).expect_err("busy");
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn removing_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = remove_file(&dir.path().join("gone.tab")).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

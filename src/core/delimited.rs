//! Purpose: Delimited-text backend (tab- or character-separated lines).
//! Exports: `DelimitedBackend`, `KIND`, parameter key names.
//! Role: Reference backend; one row per line, fields split on a single character.
//! Invariants: Writers truncate; with `header-row` the declared header line comes first.
//! Invariants: With `header-row` a writer needs declared headers, so reads never eat a data row.
//! Invariants: Values containing the delimiter or a line break are rejected, never escaped.
//! Invariants: Rows are never empty, and once headers are known every line must match their count.
//! Invariants: Declared headers take precedence over an inferred header line.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::backend::{
    Backend, RawHandle, SessionMode, open_locked, read_line, remove_file,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::location::local_path;
use crate::core::row::Row;
use crate::core::spec::TableSpec;

pub const KIND: &str = "delimited";
pub const KEY_DELIMITER: &str = "delimiter";
pub const KEY_HEADER_ROW: &str = "header-row";

#[derive(Clone, Debug)]
pub struct DelimitedBackend {
    path: PathBuf,
    delimiter: char,
    header_row: bool,
    headers: Option<Vec<String>>,
}

impl DelimitedBackend {
    pub fn from_spec(spec: &TableSpec) -> Result<Self, Error> {
        let path = local_path(spec.location())?;
        let delimiter = match spec.param(KEY_DELIMITER) {
            None => default_delimiter(&path),
            Some(Value::String(text)) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) if ch != '\n' && ch != '\r' => ch,
                    _ => {
                        return Err(Error::new(ErrorKind::InvalidSpec).with_message(format!(
                            "delimiter must be a single non-newline character, got {text:?}"
                        )));
                    }
                }
            }
            Some(other) => {
                return Err(Error::new(ErrorKind::InvalidSpec)
                    .with_message(format!("delimiter must be a string, got {other}")));
            }
        };
        let header_row = match spec.param(KEY_HEADER_ROW) {
            None => true,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(Error::new(ErrorKind::InvalidSpec)
                    .with_message(format!("header-row must be true or false, got {other}")));
            }
        };
        Ok(Self {
            path,
            delimiter,
            header_row,
            headers: spec
                .headers()
                .filter(|headers| !headers.is_empty())
                .map(<[String]>::to_vec),
        })
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }
}

fn default_delimiter(path: &Path) -> char {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => ',',
        _ => '\t',
    }
}

impl Backend for DelimitedBackend {
    fn kind(&self) -> &str {
        KIND
    }

    fn open(&self, mode: SessionMode) -> Result<Box<dyn RawHandle>, Error> {
        if mode == SessionMode::Writing && self.header_row && self.headers.is_none() {
            return Err(Error::new(ErrorKind::MissingHeaders)
                .with_message("a delimited table with a header row needs declared headers to write")
                .with_hint("Declare :headers, or set :header-row false.")
                .with_path(&self.path));
        }
        let file = open_locked(&self.path, mode)?;
        let io = match mode {
            SessionMode::Reading => Io::Read {
                reader: BufReader::new(file),
                header_pending: self.header_row,
            },
            SessionMode::Writing => Io::Write(BufWriter::new(file)),
        };
        let mut handle = DelimitedHandle {
            path: self.path.clone(),
            delimiter: self.delimiter,
            width: self.headers.as_ref().map(Vec::len),
            line: 0,
            buf: Vec::new(),
            io,
        };
        if mode == SessionMode::Writing && self.header_row {
            if let Some(headers) = &self.headers {
                handle.write_line(headers)?;
            }
        }
        Ok(Box::new(handle))
    }

    fn remove(&self) -> Result<(), Error> {
        remove_file(&self.path)
    }
}

enum Io {
    Read {
        reader: BufReader<File>,
        header_pending: bool,
    },
    Write(BufWriter<File>),
    Closed,
}

struct DelimitedHandle {
    path: PathBuf,
    delimiter: char,
    /// Column count every data line must have, once headers are known.
    width: Option<usize>,
    line: u64,
    buf: Vec<u8>,
    io: Io,
}

impl DelimitedHandle {
    fn next_line(&mut self) -> Result<Option<String>, Error> {
        let Io::Read { reader, .. } = &mut self.io else {
            return Err(self.wrong_mode("read from"));
        };
        let line = read_line(reader, &mut self.buf, &self.path, self.line)?;
        if line.is_some() {
            self.line += 1;
        }
        Ok(line)
    }

    fn split(&self, line: &str) -> Row {
        line.split(self.delimiter).map(str::to_string).collect()
    }

    fn write_line(&mut self, values: &[String]) -> Result<(), Error> {
        if values.is_empty() {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message("delimited rows need at least one value")
                .with_path(&self.path)
                .with_row(self.line));
        }
        for value in values {
            if value.contains(self.delimiter) || value.contains(['\n', '\r']) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!(
                        "value {value:?} contains the delimiter or a line break"
                    ))
                    .with_path(&self.path)
                    .with_row(self.line));
            }
        }
        let Io::Write(writer) = &mut self.io else {
            return Err(self.wrong_mode("write to"));
        };
        let mut text = values.join(self.delimiter.encode_utf8(&mut [0u8; 4]));
        text.push('\n');
        writer
            .write_all(text.as_bytes())
            .map_err(|err| Error::io(err, &self.path).with_row(self.line))?;
        self.line += 1;
        Ok(())
    }

    fn wrong_mode(&self, action: &str) -> Error {
        let kind = match self.io {
            Io::Closed => ErrorKind::Closed,
            _ => ErrorKind::Unsupported,
        };
        Error::new(kind)
            .with_message(format!("cannot {action} this handle"))
            .with_path(&self.path)
    }

    fn take_header_line(&mut self) -> Result<Option<Vec<String>>, Error> {
        let pending = match &mut self.io {
            Io::Read { header_pending, .. } => std::mem::replace(header_pending, false),
            _ => false,
        };
        if !pending {
            return Ok(None);
        }
        let headers = self.next_line()?.map(|line| self.split(&line));
        if let (None, Some(headers)) = (self.width, &headers) {
            self.width = Some(headers.len());
        }
        Ok(headers)
    }
}

impl RawHandle for DelimitedHandle {
    fn read_next(&mut self) -> Result<Option<Row>, Error> {
        self.take_header_line()?;
        let index = self.line;
        let Some(line) = self.next_line()? else {
            return Ok(None);
        };
        let row = self.split(&line);
        if let Some(width) = self.width.filter(|width| *width != row.len()) {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message(format!("expected {width} values, got {}", row.len()))
                .with_path(&self.path)
                .with_row(index));
        }
        Ok(Some(row))
    }

    fn write_next(&mut self, row: &[String]) -> Result<(), Error> {
        self.write_line(row)
    }

    fn infer_headers(&mut self) -> Result<Option<Vec<String>>, Error> {
        self.take_header_line()
    }

    fn close(&mut self) -> Result<(), Error> {
        match std::mem::replace(&mut self.io, Io::Closed) {
            Io::Write(mut writer) => writer
                .flush()
                .map_err(|err| Error::io(err, &self.path).with_message("failed to flush table")),
            Io::Read { .. } | Io::Closed => Ok(()),
        }
    }
}

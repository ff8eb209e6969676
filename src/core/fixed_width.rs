//! Purpose: Fixed-width text backend (columns occupy declared character widths).
//! Exports: `FixedWidthBackend`, `KIND`.
//! Role: Reference backend for column-aligned text without a header line.
//! Invariants: Widths count characters, not bytes.
//! Invariants: Writers pad each value with trailing spaces; readers strip trailing spaces.
//! Invariants: Values wider than their column are rejected rather than truncated.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use crate::core::backend::{
    Backend, RawHandle, SessionMode, open_locked, read_line, remove_file,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::location::local_path;
use crate::core::row::Row;
use crate::core::spec::TableSpec;

pub const KIND: &str = "fixed-width";

#[derive(Clone, Debug)]
pub struct FixedWidthBackend {
    path: PathBuf,
    widths: Vec<usize>,
}

impl FixedWidthBackend {
    pub fn from_spec(spec: &TableSpec) -> Result<Self, Error> {
        let widths = spec.widths()?.ok_or_else(|| {
            Error::new(ErrorKind::InvalidSpec)
                .with_message("fixed-width tables require `widths`")
                .with_hint("Declare one width per column, e.g. :widths [12 5 6].")
        })?;
        if widths.is_empty() {
            return Err(Error::new(ErrorKind::InvalidSpec).with_message("`widths` must not be empty"));
        }
        Ok(Self {
            path: local_path(spec.location())?,
            widths,
        })
    }

    pub fn widths(&self) -> &[usize] {
        &self.widths
    }
}

impl Backend for FixedWidthBackend {
    fn kind(&self) -> &str {
        KIND
    }

    fn open(&self, mode: SessionMode) -> Result<Box<dyn RawHandle>, Error> {
        let file = open_locked(&self.path, mode)?;
        let io = match mode {
            SessionMode::Reading => Io::Read(BufReader::new(file)),
            SessionMode::Writing => Io::Write(BufWriter::new(file)),
        };
        Ok(Box::new(FixedWidthHandle {
            path: self.path.clone(),
            widths: self.widths.clone(),
            line: 0,
            buf: Vec::new(),
            io,
        }))
    }

    fn remove(&self) -> Result<(), Error> {
        remove_file(&self.path)
    }
}

enum Io {
    Read(BufReader<File>),
    Write(BufWriter<File>),
    Closed,
}

struct FixedWidthHandle {
    path: PathBuf,
    widths: Vec<usize>,
    line: u64,
    buf: Vec<u8>,
    io: Io,
}

impl FixedWidthHandle {
    fn mode_error(&self, action: &str) -> Error {
        let kind = match self.io {
            Io::Closed => ErrorKind::Closed,
            _ => ErrorKind::Unsupported,
        };
        Error::new(kind)
            .with_message(format!("cannot {action} this handle"))
            .with_path(&self.path)
    }

    fn mismatch(&self, message: String) -> Error {
        Error::new(ErrorKind::SchemaMismatch)
            .with_message(message)
            .with_path(&self.path)
            .with_row(self.line)
    }
}

fn split_columns(line: &str, widths: &[usize]) -> (Row, String) {
    let mut chars = line.chars();
    let row = widths
        .iter()
        .map(|width| {
            let cell: String = chars.by_ref().take(*width).collect();
            cell.trim_end_matches(' ').to_string()
        })
        .collect();
    (row, chars.collect())
}

impl RawHandle for FixedWidthHandle {
    fn read_next(&mut self) -> Result<Option<Row>, Error> {
        let Io::Read(reader) = &mut self.io else {
            return Err(self.mode_error("read from"));
        };
        let Some(line) = read_line(reader, &mut self.buf, &self.path, self.line)? else {
            return Ok(None);
        };
        let (row, rest) = split_columns(&line, &self.widths);
        if !rest.trim().is_empty() {
            let total: usize = self.widths.iter().sum();
            return Err(self.mismatch(format!(
                "line is longer than the declared {total} characters"
            )));
        }
        self.line += 1;
        Ok(Some(row))
    }

    fn write_next(&mut self, row: &[String]) -> Result<(), Error> {
        if row.len() != self.widths.len() {
            return Err(self.mismatch(format!(
                "expected {} values, got {}",
                self.widths.len(),
                row.len()
            )));
        }
        let mut text = String::new();
        for (value, width) in row.iter().zip(&self.widths) {
            if value.contains(['\n', '\r']) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("value {value:?} contains a line break"))
                    .with_path(&self.path)
                    .with_row(self.line));
            }
            let len = value.chars().count();
            if len > *width {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("value {value:?} is wider than its {width}-character column"))
                    .with_path(&self.path)
                    .with_row(self.line));
            }
            text.push_str(value);
            text.extend(std::iter::repeat_n(' ', width - len));
        }
        text.push('\n');

        let Io::Write(writer) = &mut self.io else {
            return Err(self.mode_error("write to"));
        };
        writer
            .write_all(text.as_bytes())
            .map_err(|err| Error::io(err, &self.path).with_row(self.line))?;
        self.line += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        match std::mem::replace(&mut self.io, Io::Closed) {
            Io::Write(mut writer) => writer
                .flush()
                .map_err(|err| Error::io(err, &self.path).with_message("failed to flush table")),
            Io::Read(_) | Io::Closed => Ok(()),
        }
    }
}

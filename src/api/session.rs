//! Purpose: Open reading and writing sessions over a backend resource.
//! Exports: `Reader`, `Writer`, `Rows`, `Records`.
//! Role: Stateful handles returned by `TableHandle::open_reader` / `open_writer`.
//! Invariants: A session is open from construction until `close`; `Closed` is terminal.
//! Invariants: `close` is idempotent and releases the resource exactly once.
//! Invariants: Cursors borrow their reader; after `close` they yield one `Closed` error, then end.
//! Invariants: Row writes are checked against declared headers before reaching the backend.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::backend::{RawHandle, SessionMode};
use crate::core::error::{Error, ErrorKind};
use crate::core::row::{Record, Row};

/// Marks a table handle busy for as long as one of its sessions is open.
#[derive(Debug)]
pub(crate) struct SessionGuard {
    busy: Arc<AtomicBool>,
}

impl SessionGuard {
    pub(crate) fn acquire(busy: &Arc<AtomicBool>, location: &str) -> Result<Self, Error> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                Error::new(ErrorKind::Busy)
                    .with_message(format!("a session on `{location}` is already open"))
                    .with_hint("Close the open reader or writer first.")
            })?;
        Ok(Self {
            busy: Arc::clone(busy),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// State shared by both session kinds.
struct SessionCore {
    mode: SessionMode,
    location: String,
    raw: Option<Box<dyn RawHandle>>,
    guard: Option<SessionGuard>,
    rows: u64,
}

impl SessionCore {
    fn new(
        mode: SessionMode,
        location: &str,
        raw: Box<dyn RawHandle>,
        guard: SessionGuard,
    ) -> Self {
        tracing::debug!(location, ?mode, "session opened");
        Self {
            mode,
            location: location.to_string(),
            raw: Some(raw),
            guard: Some(guard),
            rows: 0,
        }
    }

    fn raw(&mut self) -> Result<&mut Box<dyn RawHandle>, Error> {
        let location = &self.location;
        self.raw.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Closed)
                .with_message(format!("session on `{location}` is closed"))
        })
    }

    fn close(&mut self) -> Result<(), Error> {
        let Some(mut raw) = self.raw.take() else {
            return Ok(());
        };
        let result = raw.close();
        drop(raw);
        self.guard = None;
        tracing::debug!(location = %self.location, mode = ?self.mode, rows = self.rows, "session closed");
        result
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        if self.raw.is_some() {
            if let Err(err) = self.close() {
                tracing::warn!(location = %self.location, error = %err, "implicit session close failed");
            }
        }
    }
}

/// A session open for reading.
pub struct Reader {
    headers: Option<Vec<String>>,
    core: RefCell<SessionCore>,
}

impl Reader {
    pub(crate) fn new(
        location: &str,
        raw: Box<dyn RawHandle>,
        guard: SessionGuard,
        headers: Option<Vec<String>>,
    ) -> Self {
        Self {
            headers,
            core: RefCell::new(SessionCore::new(SessionMode::Reading, location, raw, guard)),
        }
    }

    pub fn mode(&self) -> SessionMode {
        SessionMode::Reading
    }

    /// Effective headers: declared in the spec, else inferred from storage, else empty.
    pub fn headers(&self) -> &[String] {
        self.headers.as_deref().unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.core.borrow().raw.is_none()
    }

    /// Reads the next row, or `None` at end of data.
    pub fn read_row(&self) -> Result<Option<Row>, Error> {
        let mut core = self.core.borrow_mut();
        let row = core.raw()?.read_next()?;
        if row.is_some() {
            core.rows += 1;
        }
        Ok(row)
    }

    /// Reads the next row keyed by the header list.
    pub fn read_record(&self) -> Result<Option<Record>, Error> {
        let headers = self.require_headers()?;
        Ok(self.read_row()?.map(|row| Record::zip(headers, row)))
    }

    /// Lazy cursor over the remaining rows.
    pub fn rows(&self) -> Rows<'_> {
        Rows {
            reader: self,
            done: false,
        }
    }

    /// Lazy cursor over the remaining records; fails on first use without headers.
    pub fn records(&self) -> Records<'_> {
        Records {
            reader: self,
            done: false,
        }
    }

    /// Releases the underlying resource. Safe to call repeatedly and mid-iteration.
    pub fn close(&self) -> Result<(), Error> {
        self.core.borrow_mut().close()
    }

    fn require_headers(&self) -> Result<&[String], Error> {
        match self.headers.as_deref() {
            Some(headers) if !headers.is_empty() => Ok(headers),
            _ => Err(missing_headers(&self.core.borrow().location)),
        }
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("headers", &self.headers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct Rows<'a> {
    reader: &'a Reader,
    done: bool,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

pub struct Records<'a> {
    reader: &'a Reader,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// A session open for writing.
pub struct Writer {
    headers: Option<Vec<String>>,
    core: SessionCore,
}

impl Writer {
    pub(crate) fn new(
        location: &str,
        raw: Box<dyn RawHandle>,
        guard: SessionGuard,
        headers: Option<Vec<String>>,
    ) -> Self {
        Self {
            headers,
            core: SessionCore::new(SessionMode::Writing, location, raw, guard),
        }
    }

    pub fn mode(&self) -> SessionMode {
        SessionMode::Writing
    }

    pub fn headers(&self) -> &[String] {
        self.headers.as_deref().unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.core.raw.is_none()
    }

    /// Appends one row. With declared headers the row must have exactly one value per header.
    pub fn write_row<S: AsRef<str>>(&mut self, row: &[S]) -> Result<&mut Self, Error> {
        let index = self.core.rows;
        if let Some(headers) = self.headers.as_deref().filter(|headers| !headers.is_empty()) {
            if row.len() != headers.len() {
                return Err(Error::new(ErrorKind::SchemaMismatch)
                    .with_message(format!(
                        "expected {} values, got {}",
                        headers.len(),
                        row.len()
                    ))
                    .with_row(index));
            }
        }
        let row: Vec<String> = row.iter().map(|value| value.as_ref().to_string()).collect();
        self.core.raw()?.write_next(&row)?;
        self.core.rows += 1;
        Ok(self)
    }

    /// Writes `record` projected onto the header list; missing keys are written empty.
    pub fn write_record(&mut self, record: &Record) -> Result<&mut Self, Error> {
        let row = match self.headers.as_deref() {
            Some(headers) if !headers.is_empty() => record.project(headers),
            _ => return Err(missing_headers(&self.core.location)),
        };
        self.write_row(row.as_slice())
    }

    /// Flushes and releases the underlying resource. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), Error> {
        self.core.close()
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("headers", &self.headers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn missing_headers(location: &str) -> Error {
    Error::new(ErrorKind::MissingHeaders)
        .with_message(format!("table `{location}` has no headers"))
        .with_hint("Declare :headers in the spec, or use rows instead of records.")
}

#[cfg(test)]
mod tests {
    use super::{Reader, SessionGuard, Writer};
    use crate::core::backend::RawHandle;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::row::{Record, Row};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Tally {
        closes: AtomicUsize,
        written: Mutex<Vec<Row>>,
    }

    struct MemoryHandle {
        rows: VecDeque<Row>,
        tally: Arc<Tally>,
    }

    impl RawHandle for MemoryHandle {
        fn read_next(&mut self) -> Result<Option<Row>, Error> {
            Ok(self.rows.pop_front())
        }

        fn write_next(&mut self, row: &[String]) -> Result<(), Error> {
            self.tally.written.lock().expect("lock").push(row.to_vec());
            Ok(())
        }

        fn close(&mut self) -> Result<(), Error> {
            self.tally.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn strings(values: &[&str]) -> Row {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn reader(rows: Vec<Row>, headers: Option<&[&str]>) -> (Reader, Arc<Tally>, Arc<AtomicBool>) {
        let tally = Arc::new(Tally::default());
        let busy = Arc::new(AtomicBool::new(false));
        let guard = SessionGuard::acquire(&busy, "mem").expect("guard");
        let raw = Box::new(MemoryHandle {
            rows: rows.into(),
            tally: Arc::clone(&tally),
        });
        let reader = Reader::new("mem", raw, guard, headers.map(strings));
        (reader, tally, busy)
    }

    fn writer(headers: Option<&[&str]>) -> (Writer, Arc<Tally>, Arc<AtomicBool>) {
        let tally = Arc::new(Tally::default());
        let busy = Arc::new(AtomicBool::new(false));
        let guard = SessionGuard::acquire(&busy, "mem").expect("guard");
        let raw = Box::new(MemoryHandle {
            rows: VecDeque::new(),
            tally: Arc::clone(&tally),
        });
        (Writer::new("mem", raw, guard, headers.map(strings)), tally, busy)
    }

    #[test]
    fn guard_is_exclusive_until_dropped() {
        let busy = Arc::new(AtomicBool::new(false));
        let guard = SessionGuard::acquire(&busy, "t").expect("first");
        let err = SessionGuard::acquire(&busy, "t").expect_err("second");
        assert_eq!(err.kind(), ErrorKind::Busy);
        drop(guard);
        SessionGuard::acquire(&busy, "t").expect("after release");
    }

    #[test]
    fn records_match_rows() {
        let data = vec![strings(&["1", "a"]), strings(&["2", "b"])];
        let (by_rows, _, _) = reader(data.clone(), Some(&["n", "s"][..]));
        let rows: Vec<Row> = by_rows.rows().collect::<Result<_, _>>().expect("rows");
        let (by_records, _, _) = reader(data, Some(&["n", "s"][..]));
        let records: Vec<Record> = by_records.records().collect::<Result<_, _>>().expect("records");

        assert_eq!(rows.len(), records.len());
        for (row, record) in rows.iter().zip(&records) {
            assert_eq!(record.get("n"), Some(row[0].as_str()));
            assert_eq!(record.get("s"), Some(row[1].as_str()));
        }
    }

    #[test]
    fn records_without_headers_fail_once() {
        let (reader, _, _) = reader(vec![strings(&["x"])], None);
        let mut records = reader.records();
        let err = records.next().expect("item").expect_err("missing headers");
        assert_eq!(err.kind(), ErrorKind::MissingHeaders);
        assert!(records.next().is_none());
    }

    #[test]
    fn close_mid_iteration_invalidates_cursor() {
        let (reader, tally, busy) = reader(
            vec![strings(&["1"]), strings(&["2"]), strings(&["3"])],
            None,
        );
        let mut rows = reader.rows();
        assert_eq!(rows.next().expect("first").expect("row"), strings(&["1"]));
        reader.close().expect("close");
        let err = rows.next().expect("item").expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(rows.next().is_none());

        reader.close().expect("second close");
        assert_eq!(tally.closes.load(Ordering::SeqCst), 1);
        assert!(!busy.load(Ordering::SeqCst));
        assert_eq!(
            reader.read_row().expect_err("closed").kind(),
            ErrorKind::Closed
        );
    }

    #[test]
    fn dropping_a_session_closes_it() {
        let (writer, tally, busy) = writer(None);
        drop(writer);
        assert_eq!(tally.closes.load(Ordering::SeqCst), 1);
        assert!(!busy.load(Ordering::SeqCst));
    }

    #[test]
    fn write_row_checks_shape_and_chains() {
        let (mut writer, tally, _) = writer(Some(&["a", "b"][..]));
        writer
            .write_row(&["1", "2"])
            .expect("first")
            .write_row(&["3", "4"])
            .expect("second");
        let err = writer.write_row(&["5"]).expect_err("short row");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert_eq!(err.row(), Some(2));
        writer.close().expect("close after mismatch");
        assert_eq!(
            *tally.written.lock().expect("lock"),
            vec![strings(&["1", "2"]), strings(&["3", "4"])]
        );
        let err = writer.write_row(&["1", "2"]).expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
    }

    #[test]
    fn write_record_projects_onto_headers() {
        let (mut writer, tally, _) = writer(Some(&["breed", "category", "size"][..]));
        let record: Record = [("size", "Small"), ("breed", "Chihuahua"), ("owner", "x")]
            .into_iter()
            .collect();
        writer.write_record(&record).expect("write");
        writer.close().expect("close");
        assert_eq!(
            *tally.written.lock().expect("lock"),
            vec![strings(&["Chihuahua", "", "Small"])]
        );
    }

    #[test]
    fn write_record_without_headers_fails() {
        let (mut writer, _, _) = writer(None);
        let err = writer.write_record(&Record::new()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::MissingHeaders);
        writer.write_row(&["free", "form"]).expect("rows still allowed");
    }
}

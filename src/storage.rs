//! Where a table's rows live.
//!
//! Stream files are a header followed by a data section of encoded rows. The
//! data section is append-only; only the header is ever rewritten, so byte
//! offsets of rows relative to the start of the data never change.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tempfile::TempPath;

pub(crate) mod binary;
pub(crate) mod memory;
pub(crate) mod text;

use crate::observability::{log_debug, log_warn};
use crate::{Error, Row, Schema, StreamOptions};

/// The table attribute map
pub(crate) type Attributes = BTreeMap<String, String>;

/// Which storage holds a table's rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Rows held in memory
    Memory,
    /// A text file with one CSV line per row
    Text,
    /// A binary file of typed values
    Binary,
}

pub(crate) enum Storage {
    Memory(memory::MemoryRows),
    Text(text::TextStream),
    Binary(binary::BinaryStream),
}

/// A position in a table's rows, independent of any other cursor.
pub(crate) enum Cursor {
    Memory { next: usize, end: usize },
    Stream(StreamCursor),
}

impl Storage {
    pub(crate) fn backend(&self) -> Backend {
        match self {
            Storage::Memory(_) => Backend::Memory,
            Storage::Text(_) => Backend::Text,
            Storage::Binary(_) => Backend::Binary,
        }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Storage::Memory(_) => None,
            Storage::Text(s) => Some(s.file().path()),
            Storage::Binary(s) => Some(s.file().path()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Storage::Memory(m) => m.len(),
            Storage::Text(s) => s.file().len(),
            Storage::Binary(s) => s.file().len(),
        }
    }

    pub(crate) fn append(&self, row: &Row) -> Result<(), Error> {
        match self {
            Storage::Memory(m) => {
                m.push(row.clone());
                Ok(())
            }
            Storage::Text(s) => s.append(row),
            Storage::Binary(s) => s.append(row),
        }
    }

    pub(crate) fn get(&self, schema: &Arc<Schema>, index: usize) -> Result<Row, Error> {
        match self {
            Storage::Memory(m) => m.get(index),
            Storage::Text(s) => s.get(schema, index),
            Storage::Binary(s) => s.get(schema, index),
        }
    }

    /// Replace the header after an attribute change.
    pub(crate) fn write_header(&self, schema: &Schema, attributes: &Attributes) -> Result<(), Error> {
        match self {
            Storage::Memory(_) => Ok(()),
            Storage::Text(s) => s.write_header(schema, attributes),
            Storage::Binary(s) => s.write_header(schema, attributes),
        }
    }

    pub(crate) fn clear(&self, schema: &Schema, attributes: &Attributes) -> Result<(), Error> {
        match self {
            Storage::Memory(m) => {
                m.clear();
                Ok(())
            }
            Storage::Text(s) => s.file().clear(&text::header(schema, attributes)?),
            Storage::Binary(s) => s.file().clear(&binary::header(schema, attributes)?),
        }
    }

    pub(crate) fn cursor(&self) -> Result<Cursor, Error> {
        match self {
            Storage::Memory(m) => Ok(Cursor::Memory {
                next: 0,
                end: m.len(),
            }),
            Storage::Text(s) => Ok(Cursor::Stream(s.file().cursor()?)),
            Storage::Binary(s) => Ok(Cursor::Stream(s.file().cursor()?)),
        }
    }

    /// The next row for `cursor`, or `None` at the end.
    ///
    /// A cursor stops at the row count it saw when created, or earlier if the
    /// table is cleared.
    pub(crate) fn advance(
        &self,
        schema: &Arc<Schema>,
        cursor: &mut Cursor,
    ) -> Option<Result<Row, Error>> {
        match (self, cursor) {
            (Storage::Memory(m), Cursor::Memory { next, end }) => {
                if *next >= *end {
                    return None;
                }
                let row = m.try_get(*next)?;
                *next += 1;
                Some(Ok(row))
            }
            (Storage::Text(s), Cursor::Stream(c)) => {
                let index = c.next;
                s.file()
                    .next_bytes(c)
                    .map(|bytes| bytes.and_then(|b| text::decode_row(schema, b, index)))
            }
            (Storage::Binary(s), Cursor::Stream(c)) => {
                let index = c.next;
                s.file()
                    .next_bytes(c)
                    .map(|bytes| bytes.and_then(|b| binary::decode_row(schema, &b, index)))
            }
            _ => None,
        }
    }
}

/// Render attributes as a JSON object.
pub(crate) fn format_attributes(attributes: &Attributes) -> Result<String, Error> {
    Ok(serde_json::to_string(attributes)?)
}

/// Parse a JSON object of attributes. Values that are not strings keep their
/// JSON text.
pub(crate) fn parse_attributes(json: &str) -> Result<Attributes, Error> {
    if json.trim().is_empty() {
        return Ok(Attributes::new());
    }
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
    Ok(map
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

struct StreamState {
    file: File,
    data_start: u64,
    /// Start of each row, relative to `data_start`
    offsets: Vec<u64>,
    data_len: u64,
    /// Bumped whenever the header is replaced or the data cleared
    generation: u64,
    /// Set when a failed header rewrite could not put the old layout back
    broken: bool,
}

impl StreamState {
    fn check(&self, path: &Path) -> Result<(), Error> {
        if self.broken {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} was left damaged by a failed header rewrite", path.display()),
            )
            .into());
        }
        Ok(())
    }

    fn end(&self) -> u64 {
        self.data_start + self.data_len
    }

    fn bounds(&self, index: usize) -> Option<(u64, u64)> {
        let start = *self.offsets.get(index)?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.data_len);
        Some((start, end))
    }
}

/// A file holding a header and rows, with an index of row offsets.
///
/// All changes go through the write lock. Cursors read through their own
/// file handles under the read lock.
pub(crate) struct StreamFile {
    path: PathBuf,
    options: StreamOptions,
    state: RwLock<StreamState>,
    _temp: Option<TempPath>,
}

impl StreamFile {
    /// Create (or truncate) `path` and write `header`.
    pub(crate) fn create(
        path: &Path,
        header: &[u8],
        options: &StreamOptions,
    ) -> Result<StreamFile, Error> {
        options.prepare(path)?;
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        StreamFile::init(path.to_path_buf(), None, file, header, options)
    }

    /// Create a file that is deleted when the stream is dropped.
    pub(crate) fn create_temp(
        suffix: &str,
        header: &[u8],
        options: &StreamOptions,
    ) -> Result<StreamFile, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("resultstore-").suffix(suffix);
        let named = match options.temp_dir() {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let temp = named.into_temp_path();
        let file = File::options().read(true).write(true).open(&temp)?;
        StreamFile::init(temp.to_path_buf(), Some(temp), file, header, options)
    }

    fn init(
        path: PathBuf,
        temp: Option<TempPath>,
        mut file: File,
        header: &[u8],
        options: &StreamOptions,
    ) -> Result<StreamFile, Error> {
        file.write_all(header)?;
        file.seek(SeekFrom::Start(0))?;
        log_debug!(event = "stream_created", path = %path.display(), header_bytes = header.len());
        Ok(StreamFile {
            path,
            options: options.clone(),
            state: RwLock::new(StreamState {
                file,
                data_start: header.len() as u64,
                offsets: Vec::new(),
                data_len: 0,
                generation: 0,
                broken: false,
            }),
            _temp: temp,
        })
    }

    /// Wrap an existing file whose layout has already been scanned.
    pub(crate) fn existing(
        path: &Path,
        mut file: File,
        data_start: u64,
        offsets: Vec<u64>,
        data_len: u64,
        options: &StreamOptions,
    ) -> Result<StreamFile, Error> {
        file.seek(SeekFrom::Start(0))?;
        log_debug!(
            event = "stream_opened",
            path = %path.display(),
            rows = offsets.len(),
            data_bytes = data_len
        );
        Ok(StreamFile {
            path: path.to_path_buf(),
            options: options.clone(),
            state: RwLock::new(StreamState {
                file,
                data_start,
                offsets,
                data_len,
                generation: 0,
                broken: false,
            }),
            _temp: None,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().offsets.len()
    }

    /// Append one encoded row.
    ///
    /// The row goes right after the last indexed row, whatever else the file
    /// holds. A failed write is cut off again so that it cannot shift later
    /// rows. The handle's position is restored afterwards.
    pub(crate) fn append(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.check(&self.path)?;
        let position = state.file.stream_position()?;
        let end = state.end();
        state.file.seek(SeekFrom::Start(end))?;
        if let Err(e) = state.file.write_all(bytes) {
            if let Err(cleanup) = state.file.set_len(end) {
                log_warn!(event = "append_cleanup_failed", path = %self.path.display(), error = %cleanup);
            }
            return Err(e.into());
        }
        state.file.seek(SeekFrom::Start(position))?;
        state.offsets.push(state.data_len);
        state.data_len += bytes.len() as u64;
        Ok(())
    }

    /// The encoded bytes of one row.
    pub(crate) fn read_row(&self, index: usize) -> Result<Vec<u8>, Error> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.check(&self.path)?;
        let (start, end) = state.bounds(index).ok_or(Error::OutOfBounds {
            index,
            len: state.offsets.len(),
        })?;
        state.file.seek(SeekFrom::Start(state.data_start + start))?;
        let mut buf = vec![0; (end - start) as usize];
        state.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Replace the header, keeping the data section.
    ///
    /// The data is copied into `buffer`, the file truncated, the new header
    /// written and the data copied back, all under the write lock. If that
    /// fails the old header and data are put back; if even that fails the
    /// stream refuses further use until it is cleared.
    pub(crate) fn rewrite_header<B: Read + Write + Seek>(
        &self,
        header: &[u8],
        mut buffer: B,
    ) -> Result<(), Error> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.check(&self.path)?;
        let mut old_header = vec![0; state.data_start as usize];
        state.file.seek(SeekFrom::Start(0))?;
        state.file.read_exact(&mut old_header)?;
        let copied = std::io::copy(&mut (&mut state.file).take(state.data_len), &mut buffer)?;
        if copied != state.data_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "data section shorter than expected",
            )
            .into());
        }
        if let Err(e) = write_layout(&mut state.file, header, &mut buffer, state.data_len) {
            let restored = write_layout(&mut state.file, &old_header, &mut buffer, state.data_len);
            if let Err(restore) = restored {
                log_warn!(
                    event = "header_restore_failed",
                    path = %self.path.display(),
                    error = %restore
                );
                state.broken = true;
            }
            state.generation += 1;
            return Err(e.into());
        }
        state.data_start = header.len() as u64;
        state.generation += 1;
        log_debug!(
            event = "header_rewritten",
            path = %self.path.display(),
            header_bytes = header.len(),
            data_bytes = state.data_len
        );
        Ok(())
    }

    /// Drop every row, leaving just `header`.
    pub(crate) fn clear(&self, header: &[u8]) -> Result<(), Error> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.file.set_len(0)?;
        state.file.seek(SeekFrom::Start(0))?;
        state.file.write_all(header)?;
        state.file.seek(SeekFrom::Start(0))?;
        state.data_start = header.len() as u64;
        state.offsets.clear();
        state.data_len = 0;
        state.generation += 1;
        state.broken = false;
        Ok(())
    }

    pub(crate) fn cursor(&self) -> Result<StreamCursor, Error> {
        let state = self.state.read();
        let file = File::open(&self.path)?;
        Ok(StreamCursor {
            reader: BufReader::new(file),
            next: 0,
            end: state.offsets.len(),
            generation: state.generation,
            position: None,
        })
    }

    /// The encoded bytes of the cursor's next row.
    pub(crate) fn next_bytes(&self, cursor: &mut StreamCursor) -> Option<Result<Vec<u8>, Error>> {
        if cursor.next >= cursor.end {
            return None;
        }
        let result = self.read_for(cursor).transpose();
        if let Some(Err(_)) = result {
            cursor.next = cursor.end;
        }
        result
    }

    fn read_for(&self, cursor: &mut StreamCursor) -> Result<Option<Vec<u8>>, Error> {
        let state = self.state.read();
        let Some((start, end)) = state.bounds(cursor.next) else {
            return Ok(None);
        };
        let at = state.data_start + start;
        if cursor.generation != state.generation || cursor.position != Some(at) {
            cursor.reader.seek(SeekFrom::Start(at))?;
            cursor.generation = state.generation;
        }
        let mut buf = vec![0; (end - start) as usize];
        cursor.reader.read_exact(&mut buf)?;
        cursor.position = Some(at + (end - start));
        cursor.next += 1;
        Ok(Some(buf))
    }
}

/// Truncate `file` and write `header` followed by the `data_len` bytes of
/// `data`.
fn write_layout<D: Read + Seek>(
    file: &mut File,
    header: &[u8],
    data: &mut D,
    data_len: u64,
) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(header)?;
    data.seek(SeekFrom::Start(0))?;
    let copied = std::io::copy(&mut data.take(data_len), file)?;
    if copied != data_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "scratch copy shorter than the data section",
        ));
    }
    file.flush()?;
    file.seek(SeekFrom::Start(0))?;
    Ok(())
}

/// An iteration cursor with its own read handle.
pub(crate) struct StreamCursor {
    reader: BufReader<File>,
    next: usize,
    end: usize,
    generation: u64,
    position: Option<u64>,
}

#[cfg(test)]
mod test {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::{parse_attributes, StreamFile};
    use crate::StreamOptions;

    /// A scratch buffer whose first `failures` reads fail.
    struct Flaky {
        inner: std::io::Cursor<Vec<u8>>,
        failures: usize,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.inner.read(buf)
        }
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.inner.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Flaky {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn flaky(failures: usize) -> Flaky {
        Flaky {
            inner: std::io::Cursor::new(Vec::new()),
            failures,
        }
    }

    #[test]
    fn appends_follow_the_indexed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream");
        let file = StreamFile::create(&path, b"H", &StreamOptions::default()).unwrap();
        file.append(b"one").unwrap();
        // bytes past the last row, as a failed write would leave
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"xx")
            .unwrap();
        file.append(b"two").unwrap();
        assert_eq!(file.read_row(1).unwrap(), b"two");
        assert_eq!(std::fs::read(&path).unwrap(), b"Honetwo");
    }

    #[test]
    fn failed_rewrites_put_the_old_header_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream");
        let file = StreamFile::create(&path, b"HEAD", &StreamOptions::default()).unwrap();
        file.append(b"one").unwrap();
        file.append(b"two").unwrap();

        assert!(file.rewrite_header(b"NEW HEAD", flaky(1)).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"HEADonetwo");
        assert_eq!(file.read_row(1).unwrap(), b"two");
        file.append(b"three").unwrap();
        assert_eq!(file.read_row(2).unwrap(), b"three");

        assert!(file.rewrite_header(b"NEW HEAD", flaky(2)).is_err());
        assert!(file.append(b"four").is_err());
        assert!(file.read_row(0).is_err());
        file.clear(b"HEAD").unwrap();
        file.append(b"again").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"HEADagain");
    }

    #[test]
    fn attributes_keep_json_text_of_non_strings() {
        let attrs = parse_attributes(r#"{"a": "x", "n": 3, "list": [1, 2]}"#).unwrap();
        assert_eq!(attrs["a"], "x");
        assert_eq!(attrs["n"], "3");
        assert_eq!(attrs["list"], "[1,2]");
        assert!(parse_attributes("").unwrap().is_empty());
        assert!(parse_attributes("[1]").is_err());
    }

    #[test]
    fn offsets_survive_a_header_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream");
        let file = StreamFile::create(&path, b"HEAD", &StreamOptions::default()).unwrap();
        file.append(b"one").unwrap();
        file.append(b"three").unwrap();
        let mut cursor = file.cursor().unwrap();
        assert_eq!(file.next_bytes(&mut cursor).unwrap().unwrap(), b"one");

        file.rewrite_header(b"LONGER HEADER", std::io::Cursor::new(Vec::new()))
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"LONGER HEADERonethree");
        assert_eq!(file.read_row(1).unwrap(), b"three");
        assert_eq!(file.next_bytes(&mut cursor).unwrap().unwrap(), b"three");
        assert!(file.next_bytes(&mut cursor).is_none());
        assert!(file.read_row(2).is_err());
    }

    #[test]
    fn cursors_see_the_rows_present_when_created() {
        let file = StreamFile::create_temp(".bin", b"H", &StreamOptions::default()).unwrap();
        file.append(b"a").unwrap();
        let mut cursor = file.cursor().unwrap();
        file.append(b"b").unwrap();
        assert_eq!(file.next_bytes(&mut cursor).unwrap().unwrap(), b"a");
        assert!(file.next_bytes(&mut cursor).is_none());

        let mut cursor = file.cursor().unwrap();
        file.clear(b"H").unwrap();
        assert!(file.next_bytes(&mut cursor).is_none());
        assert_eq!(file.len(), 0);
    }
}

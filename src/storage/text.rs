//! Text streams.
//!
//! ```text
//! % ATTRIBUTES: {"sample":"A1"}
//! Time [s], Voltage [V], "Note" {String}
//! 0.0, 1.5, "first"
//! ```
//!
//! The attribute line is only present when there are attributes. Changing an
//! attribute rewrites the whole file, so costs time proportional to its size.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use super::{format_attributes, parse_attributes, Attributes, StreamFile};
use crate::column::encoding::StorageError;
use crate::schema::split_fields;
use crate::{Context, Error, Row, Schema, StreamOptions};

const ATTRIBUTES_PREFIX: &str = "% ATTRIBUTES:";

pub(crate) struct TextStream {
    file: StreamFile,
}

impl TextStream {
    /// Start a new file, or an anonymous one if `path` is `None`.
    pub(crate) fn create(
        path: Option<&Path>,
        schema: &Schema,
        attributes: &Attributes,
        options: &StreamOptions,
    ) -> Result<TextStream, Error> {
        let header = header(schema, attributes)?;
        let file = match path {
            Some(path) => StreamFile::create(path, &header, options)?,
            None => StreamFile::create_temp(".csv", &header, options)?,
        };
        Ok(TextStream { file })
    }

    /// Open an existing file to read and append rows.
    pub(crate) fn open(
        path: &Path,
        options: &StreamOptions,
    ) -> Result<(Schema, Attributes, TextStream), Error> {
        let mut file = File::options().read(true).write(true).open(path)?;
        let mut reader = BufReader::new(&file);
        let (schema, attributes, data_start) = read_header(&mut reader)?;

        let mut offsets = Vec::new();
        let mut data_len = 0;
        let mut line = Vec::new();
        let mut complete = true;
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                offsets.push(data_len);
            }
            complete = line.ends_with(b"\n");
            data_len += n as u64;
        }
        drop(reader);
        if !complete {
            file.seek(SeekFrom::End(0))?;
            file.write_all(b"\n")?;
            data_len += 1;
        }

        let file = StreamFile::existing(path, file, data_start, offsets, data_len, options)?;
        Ok((schema, attributes, TextStream { file }))
    }

    pub(crate) fn file(&self) -> &StreamFile {
        &self.file
    }

    pub(crate) fn append(&self, row: &Row) -> Result<(), Error> {
        let mut line = encode_row(row);
        line.push('\n');
        self.file.append(line.as_bytes())
    }

    pub(crate) fn get(&self, schema: &Arc<Schema>, index: usize) -> Result<Row, Error> {
        decode_row(schema, self.file.read_row(index)?, index)
    }

    pub(crate) fn write_header(&self, schema: &Schema, attributes: &Attributes) -> Result<(), Error> {
        let header = header(schema, attributes)?;
        self.file
            .rewrite_header(&header, std::io::Cursor::new(Vec::new()))
    }
}

/// The attribute line (if any) and column header line.
pub(crate) fn header(schema: &Schema, attributes: &Attributes) -> Result<Vec<u8>, Error> {
    let mut out = String::new();
    if !attributes.is_empty() {
        out.push_str(ATTRIBUTES_PREFIX);
        out.push(' ');
        out.push_str(&format_attributes(attributes)?);
        out.push('\n');
    }
    out.push_str(&schema.header_line());
    out.push('\n');
    Ok(out.into_bytes())
}

/// Read up to and including the column header line.
///
/// Also returns the number of bytes consumed. Other lines starting with `%`
/// are comments.
pub(crate) fn read_header<R: BufRead>(reader: &mut R) -> Result<(Schema, Attributes, u64), Error> {
    let mut attributes = Attributes::new();
    let mut consumed = 0;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(Error::format("column header", "end of file"));
        }
        consumed += n as u64;
        let trimmed = line.trim();
        if let Some(json) = trimmed.strip_prefix(ATTRIBUTES_PREFIX) {
            attributes = parse_attributes(json)?;
        } else if !trimmed.is_empty() && !trimmed.starts_with('%') {
            let schema = Schema::parse_header_line(trimmed)?;
            return Ok((schema, attributes, consumed));
        }
    }
}

/// Read every row after the header.
pub(crate) fn read_rows<R: BufRead>(reader: &mut R, schema: &Arc<Schema>) -> Result<Vec<Row>, Error> {
    let mut rows = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(rows);
        }
        if line.trim().is_empty() {
            continue;
        }
        let row = decode_line(schema, &line).context(format!("row {}", rows.len()))?;
        rows.push(row);
    }
}

pub(crate) fn encode_row(row: &Row) -> String {
    row.string_list().join(", ")
}

fn decode_line(schema: &Arc<Schema>, line: &str) -> Result<Row, Error> {
    let line = line.trim();
    let fields = split_fields(line, false);
    if fields.len() != schema.len() {
        return Err(Error::format(format!("row of {} values", schema.len()), line));
    }
    let values = schema
        .columns()
        .iter()
        .zip(fields.iter())
        .map(|(column, field)| column.parse(field))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row::from_parts(schema.clone(), values))
}

pub(crate) fn decode_row(schema: &Arc<Schema>, bytes: Vec<u8>, index: usize) -> Result<Row, Error> {
    let line = String::from_utf8(bytes).map_err(StorageError::from)?;
    decode_line(schema, &line).context(format!("row {index}"))
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::{header, TextStream};
    use crate::storage::Attributes;
    use crate::{Column, Schema, StreamOptions};

    fn schema() -> Schema {
        Schema::new(vec![Column::float("Time").with_units("s"), Column::text("Note")]).unwrap()
    }

    #[test]
    fn attribute_line_only_when_needed() {
        let mut attributes = Attributes::new();
        let plain = header(&schema(), &attributes).unwrap();
        expect_test::expect![[r#"
            Time [s], "Note" {String}
        "#]]
        .assert_eq(std::str::from_utf8(&plain).unwrap());

        attributes.insert("sample".into(), "A1".into());
        let with = header(&schema(), &attributes).unwrap();
        expect_test::expect![[r#"
            % ATTRIBUTES: {"sample":"A1"}
            Time [s], "Note" {String}
        "#]]
        .assert_eq(std::str::from_utf8(&with).unwrap());
    }

    #[test]
    fn open_indexes_rows_and_finishes_the_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "% a comment\nTime [s], \"Note\" {{String}}\n0.0, \"a\"\n\n1.0, \"b, c\"").unwrap();
        drop(f);

        let (schema, attributes, stream) = TextStream::open(&path, &StreamOptions::default()).unwrap();
        assert!(attributes.is_empty());
        assert_eq!(stream.file().len(), 2);
        let schema = std::sync::Arc::new(schema);
        let row = stream.get(&schema, 1).unwrap();
        assert_eq!(row.string_list(), vec!["1.0", "\"b, c\""]);
        assert!(std::fs::read_to_string(&path).unwrap().ends_with("\"b, c\"\n"));
    }
}

//! Binary streams.
//!
//! The header is a sequence of tagged blocks: [`ATTRIBUTES`] then a JSON
//! object, one [`COLUMN`] per column holding its name, units and type name,
//! then [`END`]. Rows follow with no delimiters, each value encoded by its
//! column.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use super::{format_attributes, parse_attributes, Attributes, StreamFile};
use crate::column::encoding::{ReadEncoded, StorageError, WriteEncoded};
use crate::{Column, Error, Kind, Row, Schema, StreamOptions};

/// Tag of the attribute block
pub(crate) const ATTRIBUTES: u8 = 1;
/// Tag of a column block
pub(crate) const COLUMN: u8 = 2;
/// Marks the end of the header
pub(crate) const END: u8 = 3;

pub(crate) struct BinaryStream {
    file: StreamFile,
}

impl BinaryStream {
    /// Start a new file, or an anonymous one if `path` is `None`.
    pub(crate) fn create(
        path: Option<&Path>,
        schema: &Schema,
        attributes: &Attributes,
        options: &StreamOptions,
    ) -> Result<BinaryStream, Error> {
        let header = header(schema, attributes)?;
        let file = match path {
            Some(path) => StreamFile::create(path, &header, options)?,
            None => StreamFile::create_temp(".jdf", &header, options)?,
        };
        Ok(BinaryStream { file })
    }

    /// Open an existing file, stepping over every row to index it.
    pub(crate) fn open(
        path: &Path,
        options: &StreamOptions,
    ) -> Result<(Schema, Attributes, BinaryStream), Error> {
        let file = File::options().read(true).write(true).open(path)?;
        let mut reader = BufReader::new(&file);
        let (schema, attributes, data_start) = read_header(&mut reader)?;

        let mut offsets = Vec::new();
        loop {
            if reader.fill_buf()?.is_empty() {
                break;
            }
            offsets.push(reader.stream_position()? - data_start);
            for column in schema.columns() {
                column
                    .skip_binary(&mut reader)
                    .map_err(|e| truncated(e, offsets.len() - 1))?;
            }
        }
        let data_len = reader.stream_position()? - data_start;
        drop(reader);

        let file = StreamFile::existing(path, file, data_start, offsets, data_len, options)?;
        Ok((schema, attributes, BinaryStream { file }))
    }

    pub(crate) fn file(&self) -> &StreamFile {
        &self.file
    }

    pub(crate) fn append(&self, row: &Row) -> Result<(), Error> {
        let mut bytes = Vec::new();
        encode_row(row, &mut bytes)?;
        self.file.append(&bytes)
    }

    pub(crate) fn get(&self, schema: &Arc<Schema>, index: usize) -> Result<Row, Error> {
        decode_row(schema, &self.file.read_row(index)?, index)
    }

    pub(crate) fn write_header(&self, schema: &Schema, attributes: &Attributes) -> Result<(), Error> {
        let header = header(schema, attributes)?;
        let scratch = self.file.options().scratch_file()?;
        self.file.rewrite_header(&header, scratch)
    }
}

fn truncated(e: StorageError, row: usize) -> Error {
    if e.is_eof() {
        Error::format(format!("row {row}"), "truncated row")
    } else {
        e.into()
    }
}

pub(crate) fn header(schema: &Schema, attributes: &Attributes) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    out.write_u8(ATTRIBUTES)?;
    out.write_block(format_attributes(attributes)?.as_bytes())?;
    for column in schema.columns() {
        out.write_u8(COLUMN)?;
        out.write_block(column.name().as_bytes())?;
        out.write_block(column.units().unwrap_or("").as_bytes())?;
        out.write_block(column.kind().type_name().as_bytes())?;
    }
    out.write_u8(END)?;
    Ok(out)
}

/// Read the header, returning its length in bytes too.
pub(crate) fn read_header<R: Read>(reader: &mut R) -> Result<(Schema, Attributes, u64), Error> {
    let mut attributes = Attributes::new();
    let mut columns = Vec::new();
    let mut len = 0;
    loop {
        let tag = reader.read_u8()?;
        len += 1;
        match tag {
            ATTRIBUTES => {
                let json = reader.read_string()?;
                len += 4 + json.len() as u64;
                attributes = parse_attributes(&json)?;
            }
            COLUMN => {
                let name = reader.read_string()?;
                let units = reader.read_string()?;
                let type_name = reader.read_string()?;
                len += 12 + (name.len() + units.len() + type_name.len()) as u64;
                let kind = Kind::from_type_name(&type_name)
                    .ok_or(StorageError::UnknownType(type_name))?;
                columns.push(Column::new(name, kind).with_units(units));
            }
            END => break,
            tag => return Err(StorageError::BadTag(tag).into()),
        }
    }
    Ok((Schema::new(columns)?, attributes, len))
}

/// Read every row after the header.
pub(crate) fn read_rows<R: BufRead>(reader: &mut R, schema: &Arc<Schema>) -> Result<Vec<Row>, Error> {
    let mut rows = Vec::new();
    while !reader.fill_buf()?.is_empty() {
        let values = schema
            .columns()
            .iter()
            .map(|c| c.read_binary(&mut *reader))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| truncated(e, rows.len()))?;
        rows.push(Row::from_parts(schema.clone(), values));
    }
    Ok(rows)
}

pub(crate) fn encode_row(row: &Row, out: &mut Vec<u8>) -> Result<(), Error> {
    for (column, value) in row.columns().iter().zip(row.values()) {
        column.write_binary(out, value)?;
    }
    Ok(())
}

pub(crate) fn decode_row(schema: &Arc<Schema>, mut bytes: &[u8], index: usize) -> Result<Row, Error> {
    let values = schema
        .columns()
        .iter()
        .map(|c| c.read_binary(&mut bytes))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| truncated(e, index))?;
    if !bytes.is_empty() {
        return Err(Error::format(format!("row {index}"), "trailing bytes"));
    }
    Ok(Row::from_parts(schema.clone(), values))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{header, read_header, BinaryStream};
    use crate::storage::Attributes;
    use crate::{Column, Error, Schema, StreamOptions, Value};

    #[test]
    fn header_layout() {
        let schema = Schema::new(vec![Column::int("n").with_units("#")]).unwrap();
        let bytes = header(&schema, &Attributes::new()).unwrap();
        let mut expected = vec![1, 0, 0, 0, 2, b'{', b'}'];
        expected.extend([2, 0, 0, 0, 1, b'n', 0, 0, 0, 1, b'#', 0, 0, 0, 7]);
        expected.extend(b"Integer");
        expected.push(3);
        assert_eq!(bytes, expected);

        let (parsed, attributes, len) = read_header(&mut bytes.as_slice()).unwrap();
        assert_eq!(parsed, schema);
        assert!(attributes.is_empty());
        assert_eq!(len, bytes.len() as u64);
    }

    #[test]
    fn unknown_tags_and_types() {
        let e = read_header(&mut [9u8].as_slice()).unwrap_err();
        expect_test::expect!["Storage error: Bad tag: 0x09"].assert_eq(&e.to_string());
        let mut bytes = vec![2, 0, 0, 0, 1, b'x', 0, 0, 0, 0, 0, 0, 0, 5];
        bytes.extend(b"Float");
        bytes.push(3);
        assert!(matches!(
            read_header(&mut bytes.as_slice()),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn truncated_trailing_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jdf");
        let schema = Schema::new(vec![Column::float("x"), Column::text("s")]).unwrap();
        let stream = BinaryStream::create(
            Some(&path),
            &schema,
            &Attributes::new(),
            &StreamOptions::default(),
        )
        .unwrap();
        let schema = Arc::new(schema);
        let row = crate::Row::from_parts(schema.clone(), vec![Value::Float64(1.0), Value::from("abc")]);
        stream.append(&row).unwrap();
        drop(stream);

        let (_, _, reopened) = BinaryStream::open(&path, &StreamOptions::default()).unwrap();
        assert_eq!(reopened.get(&schema, 0).unwrap(), row);
        drop(reopened);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        let e = BinaryStream::open(&path, &StreamOptions::default()).err().unwrap();
        expect_test::expect![[r#"Format error in row 0: "truncated row""#]].assert_eq(&e.to_string());
    }
}

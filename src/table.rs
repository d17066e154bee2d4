use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::RwLock;

use crate::observability::{log_debug, log_info};
use crate::storage::binary::{self, BinaryStream};
use crate::storage::memory::MemoryRows;
use crate::storage::text::{self, TextStream};
use crate::storage::{Attributes, Cursor, Storage};
use crate::{Backend, Column, Error, Kind, Result, Row, Schema, StreamOptions, Value};

type RowListener = Arc<dyn Fn(&Row) + Send + Sync>;
type ClearListener = Arc<dyn Fn() + Send + Sync>;

/// Identifies a listener so that it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next: u64,
    added: Vec<(ListenerId, RowListener)>,
    cleared: Vec<(ListenerId, ClearListener)>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next += 1;
        ListenerId(self.next)
    }
}

/// A table of results.
///
/// The columns are fixed when the table is created. Rows are appended one at
/// a time and never change afterwards. Where the rows live is decided by the
/// constructor: [`Table::new`] keeps them in memory, [`Table::text_stream`]
/// and [`Table::binary_stream`] write them to a file as they arrive.
///
/// Every method takes `&self`, so a table can be shared between threads.
/// Appends and attribute changes are serialized; they block rather than
/// interleave.
pub struct Table {
    schema: Arc<Schema>,
    attributes: RwLock<Attributes>,
    storage: Storage,
    listeners: RwLock<Listeners>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("backend", &self.backend())
            .field("columns", &self.schema)
            .field("attributes", &*self.attributes.read())
            .field("rows", &self.row_count())
            .finish()
    }
}

impl Table {
    fn with_storage(schema: Arc<Schema>, attributes: Attributes, storage: Storage) -> Table {
        Table {
            schema,
            attributes: RwLock::new(attributes),
            storage,
            listeners: RwLock::new(Listeners::default()),
        }
    }

    fn in_memory(schema: Arc<Schema>, attributes: Attributes, rows: Vec<Row>) -> Table {
        Table::with_storage(schema, attributes, Storage::Memory(MemoryRows::new(rows)))
    }

    /// An empty in-memory table.
    pub fn new(columns: Vec<Column>) -> Result<Table> {
        Ok(Table::from_schema(Arc::new(Schema::new(columns)?)))
    }

    /// An empty in-memory table sharing an existing schema.
    pub fn from_schema(schema: Arc<Schema>) -> Table {
        Table::in_memory(schema, Attributes::new(), Vec::new())
    }

    /// A new text-stream table at `path`, replacing any existing file.
    pub fn text_stream(path: impl AsRef<Path>, columns: Vec<Column>) -> Result<Table> {
        Table::text_stream_with(path, columns, &StreamOptions::default())
    }

    /// A new text-stream table at `path`, with options.
    pub fn text_stream_with(
        path: impl AsRef<Path>,
        columns: Vec<Column>,
        options: &StreamOptions,
    ) -> Result<Table> {
        let schema = Arc::new(Schema::new(columns)?);
        let stream = TextStream::create(Some(path.as_ref()), &schema, &Attributes::new(), options)?;
        Ok(Table::with_storage(schema, Attributes::new(), Storage::Text(stream)))
    }

    /// A text-stream table in a temporary file that is removed on drop.
    pub fn text_stream_temp(columns: Vec<Column>) -> Result<Table> {
        let schema = Arc::new(Schema::new(columns)?);
        let stream = TextStream::create(None, &schema, &Attributes::new(), &StreamOptions::default())?;
        Ok(Table::with_storage(schema, Attributes::new(), Storage::Text(stream)))
    }

    /// A new binary-stream table at `path`, replacing any existing file.
    pub fn binary_stream(path: impl AsRef<Path>, columns: Vec<Column>) -> Result<Table> {
        Table::binary_stream_with(path, columns, &StreamOptions::default())
    }

    /// A new binary-stream table at `path`, with options.
    pub fn binary_stream_with(
        path: impl AsRef<Path>,
        columns: Vec<Column>,
        options: &StreamOptions,
    ) -> Result<Table> {
        let schema = Arc::new(Schema::new(columns)?);
        let stream =
            BinaryStream::create(Some(path.as_ref()), &schema, &Attributes::new(), options)?;
        Ok(Table::with_storage(schema, Attributes::new(), Storage::Binary(stream)))
    }

    /// A binary-stream table in a temporary file that is removed on drop.
    pub fn binary_stream_temp(columns: Vec<Column>) -> Result<Table> {
        let schema = Arc::new(Schema::new(columns)?);
        let stream =
            BinaryStream::create(None, &schema, &Attributes::new(), &StreamOptions::default())?;
        Ok(Table::with_storage(schema, Attributes::new(), Storage::Binary(stream)))
    }

    /// Reopen a text-stream file to read it and append more rows.
    pub fn open_text(path: impl AsRef<Path>) -> Result<Table> {
        let (schema, attributes, stream) = TextStream::open(path.as_ref(), &StreamOptions::default())?;
        Ok(Table::with_storage(Arc::new(schema), attributes, Storage::Text(stream)))
    }

    /// Reopen a binary-stream file to read it and append more rows.
    pub fn open_binary(path: impl AsRef<Path>) -> Result<Table> {
        Table::open_binary_with(path, &StreamOptions::default())
    }

    /// Reopen a binary-stream file, with options.
    pub fn open_binary_with(path: impl AsRef<Path>, options: &StreamOptions) -> Result<Table> {
        let (schema, attributes, stream) = BinaryStream::open(path.as_ref(), options)?;
        Ok(Table::with_storage(Arc::new(schema), attributes, Storage::Binary(stream)))
    }

    /// Read CSV text into an in-memory table.
    pub fn read_csv(reader: impl Read) -> Result<Table> {
        let mut reader = BufReader::new(reader);
        let (schema, attributes, _) = text::read_header(&mut reader)?;
        let schema = Arc::new(schema);
        let rows = text::read_rows(&mut reader, &schema)?;
        Ok(Table::in_memory(schema, attributes, rows))
    }

    /// Read the binary format into an in-memory table.
    pub fn read_binary(reader: impl Read) -> Result<Table> {
        let mut reader = BufReader::new(reader);
        let (schema, attributes, _) = binary::read_header(&mut reader)?;
        let schema = Arc::new(schema);
        let rows = binary::read_rows(&mut reader, &schema)?;
        Ok(Table::in_memory(schema, attributes, rows))
    }

    /// Load a file of any format into memory.
    ///
    /// The first bytes decide: binary files start with the attribute tag,
    /// zlib-compressed binary files with a zlib header, anything else is CSV.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let start: Vec<u8> = reader.fill_buf()?.iter().take(2).copied().collect();
        let table = match start[..] {
            [] => return Err(Error::format(path.display(), "empty file")),
            [binary::ATTRIBUTES, ..] => Table::read_binary(reader)?,
            [cmf, flg] if is_zlib(cmf, flg) => Table::read_binary(ZlibDecoder::new(reader))?,
            _ => Table::read_csv(reader)?,
        };
        log_debug!(event = "file_loaded", path = %path.display(), rows = table.row_count());
        Ok(table)
    }

    /// An in-memory copy of the columns, attributes and rows.
    pub fn copy_of(other: &Table) -> Result<Table> {
        Ok(other.collect(other.rows()?))
    }

    /// An in-memory table with the same columns and attributes, but no rows.
    pub fn empty_copy_of(other: &Table) -> Table {
        other.collect(Vec::new())
    }

    fn collect(&self, rows: Vec<Row>) -> Table {
        Table::in_memory(self.schema.clone(), self.attributes(), rows)
    }

    /// Where the rows are stored
    pub fn backend(&self) -> Backend {
        self.storage.backend()
    }

    /// The file holding the rows, for stream tables
    pub fn path(&self) -> Option<&Path> {
        self.storage.path()
    }

    /// The schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The columns, in order
    pub fn columns(&self) -> &[Column] {
        self.schema.columns()
    }

    /// The column at `index`
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.schema.column(index)
    }

    /// The number of columns
    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    /// This table's column matching `column`, if any.
    pub fn find_column(&self, column: &Column) -> Option<&Column> {
        self.schema.index_of(column).and_then(|i| self.column(i))
    }

    /// The first column with this name (ignoring units and case), optionally
    /// of a particular kind.
    pub fn find_column_by_name(&self, name: &str, kind: Option<Kind>) -> Option<&Column> {
        self.schema
            .index_by_name(name, kind)
            .and_then(|i| self.column(i))
    }

    /// Every column holding numbers
    pub fn numeric_columns(&self) -> Vec<&Column> {
        self.columns()
            .iter()
            .filter(|c| c.kind().is_numeric())
            .collect()
    }

    /// The number of rows
    pub fn row_count(&self) -> usize {
        self.storage.len()
    }

    /// Are there no rows?
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Add a row from values keyed by column.
    ///
    /// Every column must have a value except derived columns, which are
    /// computed. If any value has the wrong kind the error lists every such
    /// column and nothing is added.
    pub fn add_row(&self, values: HashMap<Column, Value>) -> Result<Row> {
        let mut supplied = vec![None; self.schema.len()];
        for (column, value) in values {
            let index = self
                .schema
                .index_of(&column)
                .ok_or_else(|| Error::UnknownColumn(column.title()))?;
            supplied[index] = Some(value);
        }
        self.insert(supplied)
    }

    /// Add a row from one value per column, in column order.
    ///
    /// Values given for derived columns are replaced by the computed ones.
    pub fn add_values(&self, values: Vec<Value>) -> Result<Row> {
        if values.len() != self.schema.len() {
            return Err(Error::WrongNumber {
                found: values.len(),
                wanted: self.schema.len(),
            });
        }
        self.insert(values.into_iter().map(Some).collect())
    }

    /// Add rows from columns of values, one row per position.
    ///
    /// Stops when the shortest column runs out and returns the number of rows
    /// added. Each row is checked as by [`Table::add_row`]; rows before a
    /// failing one stay added.
    pub fn map_rows<I>(&self, columns: Vec<(Column, I)>) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        for (column, _) in columns.iter() {
            if self.schema.index_of(column).is_none() {
                return Err(Error::UnknownColumn(column.title()));
            }
        }
        let mut columns: Vec<(Column, I::IntoIter)> = columns
            .into_iter()
            .map(|(c, values)| (c, values.into_iter()))
            .collect();
        if columns.is_empty() {
            return Ok(0);
        }
        let mut added = 0;
        loop {
            let mut values = HashMap::new();
            for (column, iter) in columns.iter_mut() {
                let Some(value) = iter.next() else {
                    return Ok(added);
                };
                values.insert(column.clone(), value.into());
            }
            self.add_row(values)?;
            added += 1;
        }
    }

    /// Start building a row one column at a time.
    pub fn start_row(&self) -> RowBuilder<'_> {
        RowBuilder {
            table: self,
            values: vec![None; self.schema.len()],
            unknown: Vec::new(),
        }
    }

    fn insert(&self, supplied: Vec<Option<Value>>) -> Result<Row> {
        let wrong: Vec<usize> = supplied
            .iter()
            .zip(self.columns())
            .enumerate()
            .filter(|(_, (v, c))| v.as_ref().map_or(false, |v| v.kind() != c.kind()))
            .map(|(i, _)| i)
            .collect();
        if !wrong.is_empty() {
            return Err(Error::TypeMismatch { columns: wrong });
        }
        let row = Row::build(self.schema.clone(), supplied)?;
        self.storage.append(&row)?;
        let listeners: Vec<RowListener> =
            self.listeners.read().added.iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&row);
        }
        Ok(row)
    }

    /// The row at `index`.
    pub fn get_row(&self, index: usize) -> Result<Row> {
        self.storage.get(&self.schema, index)
    }

    /// Iterate over the rows.
    ///
    /// Each call gives an independent cursor covering the rows present when it
    /// was made. For stream tables the cursor reads through its own file
    /// handle. Changing attributes while a cursor is in use is not supported:
    /// the cursor notices and re-seeks, but may still fail.
    pub fn iter(&self) -> Rows<'_> {
        Rows {
            table: self,
            cursor: self.storage.cursor().map_err(Some),
        }
    }

    /// All the rows
    pub fn rows(&self) -> Result<Vec<Row>> {
        self.iter().collect()
    }

    /// Evaluate `f` for every row.
    pub fn to_list<T>(&self, f: impl Fn(&Row) -> T) -> Result<Vec<T>> {
        self.iter().map(|r| r.map(|r| f(&r))).collect()
    }

    /// An in-memory table of the rows for which `keep` is true.
    pub fn filter(&self, keep: impl Fn(&Row) -> bool) -> Result<Table> {
        let mut rows = Vec::new();
        for row in self.iter() {
            let row = row?;
            if keep(&row) {
                rows.push(row);
            }
        }
        Ok(self.collect(rows))
    }

    /// The first row for which `test` is true
    pub fn find_row(&self, test: impl Fn(&Row) -> bool) -> Result<Option<Row>> {
        for row in self.iter() {
            let row = row?;
            if test(&row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// The distinct values of `f`, in the order they first appear.
    pub fn unique_values<T: Eq + Hash + Clone>(&self, f: impl Fn(&Row) -> T) -> Result<Vec<T>> {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for row in self.iter() {
            let value = f(&row?);
            if seen.insert(value.clone()) {
                unique.push(value);
            }
        }
        Ok(unique)
    }

    /// Split into one in-memory table per distinct value of `f`.
    pub fn split<T: Ord>(&self, f: impl Fn(&Row) -> T) -> Result<BTreeMap<T, Table>> {
        let mut groups: BTreeMap<T, Vec<Row>> = BTreeMap::new();
        for row in self.iter() {
            let row = row?;
            groups.entry(f(&row)).or_default().push(row);
        }
        Ok(groups
            .into_iter()
            .map(|(k, rows)| (k, self.collect(rows)))
            .collect())
    }

    /// Split wherever `f` changes direction, as in the up and down sweeps of a
    /// scan.
    ///
    /// Rising, falling and flat are all directions, except that leaving a flat
    /// stretch does not start a new table.
    pub fn directional_split(&self, f: impl Fn(&Row) -> f64) -> Result<Vec<Table>> {
        let mut tables = Vec::new();
        let mut current = Vec::new();
        let mut direction = None;
        let mut last: Option<f64> = None;
        for row in self.iter() {
            let row = row?;
            let value = f(&row);
            if let Some(last) = last {
                let now = value.total_cmp(&last);
                if let Some(before) = direction {
                    if now != before && before != std::cmp::Ordering::Equal {
                        tables.push(self.collect(std::mem::take(&mut current)));
                    }
                }
                direction = Some(now);
            }
            current.push(row);
            last = Some(value);
        }
        tables.push(self.collect(current));
        Ok(tables)
    }

    /// An in-memory copy sorted by `key`. Equal keys keep their order.
    pub fn sorted_by<K: Ord>(&self, key: impl Fn(&Row) -> K) -> Result<Table> {
        let mut rows = self.rows()?;
        rows.sort_by_cached_key(|r| key(r));
        Ok(self.collect(rows))
    }

    /// An in-memory copy with some columns recomputed from each row.
    ///
    /// Columns without a mapping keep their values, and derived columns are
    /// computed again from the new values.
    pub fn transform(&self, mappings: &[(&Column, &dyn Fn(&Row) -> Value)]) -> Result<Table> {
        let columns: Vec<&Column> = mappings.iter().map(|(c, _)| *c).collect();
        let indices = self.indices(&columns)?;
        let out = Table::empty_copy_of(self);
        for row in self.iter() {
            let row = row?;
            let mut values = row.values().to_vec();
            for (&i, (_, f)) in indices.iter().zip(mappings) {
                values[i] = f(&row);
            }
            out.add_values(values)?;
        }
        Ok(out)
    }

    /// An in-memory copy with the rows in reverse order
    pub fn reversed(&self) -> Result<Table> {
        let mut rows = self.rows()?;
        rows.reverse();
        Ok(self.collect(rows))
    }

    /// An in-memory copy of a range of rows.
    pub fn slice(&self, range: Range<usize>) -> Result<Table> {
        let len = self.row_count();
        if range.end > len {
            return Err(Error::OutOfBounds {
                index: range.end,
                len,
            });
        }
        let rows = range
            .map(|i| self.get_row(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.collect(rows))
    }

    /// An in-memory copy with only some columns.
    ///
    /// The new columns are not derived; they hold the values already computed.
    pub fn sub_table(&self, columns: &[&Column]) -> Result<Table> {
        let indices = self.indices(columns)?;
        let schema = Arc::new(Schema::new(
            indices
                .iter()
                .map(|&i| self.columns()[i].without_derivation())
                .collect(),
        )?);
        let mut rows = Vec::new();
        for row in self.iter() {
            let row = row?;
            let values = indices.iter().map(|&i| row.values()[i].clone()).collect();
            rows.push(Row::from_parts(schema.clone(), values));
        }
        Ok(Table::in_memory(schema, self.attributes(), rows))
    }

    fn indices(&self, columns: &[&Column]) -> Result<Vec<usize>> {
        columns
            .iter()
            .map(|c| {
                self.schema
                    .index_of(c)
                    .ok_or_else(|| Error::UnknownColumn(c.title()))
            })
            .collect()
    }

    /// The mean of `f` over all rows, `NaN` if there are none.
    pub fn mean(&self, f: impl Fn(&Row) -> f64) -> Result<f64> {
        let values = self.to_list(f)?;
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// The smallest value of `f`
    pub fn min(&self, f: impl Fn(&Row) -> f64) -> Result<Option<f64>> {
        Ok(self.to_list(f)?.into_iter().reduce(f64::min))
    }

    /// The largest value of `f`
    pub fn max(&self, f: impl Fn(&Row) -> f64) -> Result<Option<f64>> {
        Ok(self.to_list(f)?.into_iter().reduce(f64::max))
    }

    /// The first row where `f` is smallest
    pub fn min_by(&self, f: impl Fn(&Row) -> f64) -> Result<Option<Row>> {
        self.extreme_by(f, std::cmp::Ordering::Less)
    }

    /// The first row where `f` is largest
    pub fn max_by(&self, f: impl Fn(&Row) -> f64) -> Result<Option<Row>> {
        self.extreme_by(f, std::cmp::Ordering::Greater)
    }

    fn extreme_by(
        &self,
        f: impl Fn(&Row) -> f64,
        better: std::cmp::Ordering,
    ) -> Result<Option<Row>> {
        let mut best: Option<(f64, Row)> = None;
        for row in self.iter() {
            let row = row?;
            let value = f(&row);
            if best
                .as_ref()
                .map_or(true, |(b, _)| value.total_cmp(b) == better)
            {
                best = Some((value, row));
            }
        }
        Ok(best.map(|(_, row)| row))
    }

    /// Is `test` true for every row?
    pub fn all_match(&self, test: impl Fn(&Row) -> bool) -> Result<bool> {
        for row in self.iter() {
            if !test(&row?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Is `test` false for every row?
    pub fn none_match(&self, test: impl Fn(&Row) -> bool) -> Result<bool> {
        Ok(self.find_row(test)?.is_none())
    }

    /// The values of numeric columns as a row-major matrix.
    pub fn to_matrix(&self, columns: &[&Column]) -> Result<Vec<Vec<f64>>> {
        let indices = self.indices(columns)?;
        let not_numeric: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| !self.columns()[i].kind().is_numeric())
            .collect();
        if !not_numeric.is_empty() {
            return Err(Error::TypeMismatch {
                columns: not_numeric,
            });
        }
        self.to_list(|row| {
            indices
                .iter()
                .map(|&i| row.values()[i].as_f64().unwrap_or(f64::NAN))
                .collect()
        })
    }

    /// Remove every row.
    pub fn clear(&self) -> Result<()> {
        self.storage.clear(&self.schema, &self.attributes.read())?;
        let listeners: Vec<ClearListener> =
            self.listeners.read().cleared.iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener();
        }
        Ok(())
    }

    /// Call `listener` with every row added from now on.
    ///
    /// Listeners run on the thread that added the row, after it is stored.
    /// They may use the table, including adding or removing listeners.
    pub fn on_row_added(&self, listener: impl Fn(&Row) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.listeners.write();
        let id = listeners.next_id();
        listeners.added.push((id, Arc::new(listener)));
        id
    }

    /// Call `listener` whenever the table is cleared.
    pub fn on_clear(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.listeners.write();
        let id = listeners.next_id();
        listeners.cleared.push((id, Arc::new(listener)));
        id
    }

    /// Stop calling a row listener. Returns false if it was not registered.
    pub fn remove_row_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.added.len();
        listeners.added.retain(|(i, _)| *i != id);
        listeners.added.len() != before
    }

    /// Stop calling a clear listener. Returns false if it was not registered.
    pub fn remove_clear_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.cleared.len();
        listeners.cleared.retain(|(i, _)| *i != id);
        listeners.cleared.len() != before
    }

    /// Set an attribute.
    ///
    /// For stream tables this rewrites the file header. A text file is
    /// rewritten in full.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl ToString) -> Result<()> {
        let mut attributes = self.attributes.write();
        let mut updated = attributes.clone();
        updated.insert(key.into(), value.to_string());
        self.storage.write_header(&self.schema, &updated)?;
        *attributes = updated;
        Ok(())
    }

    /// Remove an attribute, returning its old value.
    pub fn remove_attribute(&self, key: &str) -> Result<Option<String>> {
        let mut attributes = self.attributes.write();
        if !attributes.contains_key(key) {
            return Ok(None);
        }
        let mut updated = attributes.clone();
        let old = updated.remove(key);
        self.storage.write_header(&self.schema, &updated)?;
        *attributes = updated;
        Ok(old)
    }

    /// The value of an attribute
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.read().get(key).cloned()
    }

    /// All the attributes
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.attributes.read().clone()
    }

    /// Write as CSV text.
    pub fn write_csv(&self, mut out: impl Write) -> Result<()> {
        out.write_all(&text::header(&self.schema, &self.attributes.read())?)?;
        for row in self.iter() {
            writeln!(out, "{}", text::encode_row(&row?))?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write in the binary format.
    pub fn write_binary(&self, mut out: impl Write) -> Result<()> {
        out.write_all(&binary::header(&self.schema, &self.attributes.read())?)?;
        let mut bytes = Vec::new();
        for row in self.iter() {
            bytes.clear();
            binary::encode_row(&row?, &mut bytes)?;
            out.write_all(&bytes)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Save as a CSV file.
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_csv(BufWriter::new(File::create(path)?))
    }

    /// Save as a binary file.
    pub fn save_binary(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_binary(BufWriter::new(File::create(path)?))
    }

    /// Save as a zlib-compressed binary file, which [`Table::load_file`]
    /// reads back.
    pub fn compress_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut encoder = ZlibEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        self.write_binary(&mut encoder)?;
        encoder.finish()?.flush()?;
        log_info!(event = "table_compressed", path = %path.display(), rows = self.row_count());
        Ok(())
    }

    /// Draw the table with ASCII borders.
    pub fn render_ascii(&self, mut out: impl Write) -> Result<()> {
        let rows: Vec<Vec<String>> = self.to_list(|r| r.values().iter().map(|v| v.to_string()).collect())?;
        let titles: Vec<String> = self.columns().iter().map(|c| c.title()).collect();
        let widths: Vec<usize> = titles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                rows.iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(t.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let rule = |fill: char, corner: char| {
            let mut line = String::from(corner);
            for w in widths.iter() {
                line.extend(std::iter::repeat(fill).take(w + 2));
                line.push(corner);
            }
            line
        };
        let cells = |values: &[String]| {
            let mut line = String::from("|");
            for (v, &w) in values.iter().zip(widths.iter()) {
                line.push_str(&format!(" {v:<w$} |"));
            }
            line
        };
        writeln!(out, "{}", rule('=', '='))?;
        writeln!(out, "{}", cells(&titles))?;
        writeln!(out, "{}", rule('=', '='))?;
        for row in rows.iter() {
            writeln!(out, "{}", cells(row))?;
            writeln!(out, "{}", rule('-', '+'))?;
        }
        Ok(())
    }

    /// Write the table as an HTML `<table>` element.
    pub fn render_html(&self, mut out: impl Write) -> Result<()> {
        writeln!(out, "<table>")?;
        writeln!(out, "<thead><tr>")?;
        for column in self.columns() {
            writeln!(out, "<th>{}</th>", escape_html(&column.title()))?;
        }
        writeln!(out, "</tr></thead>")?;
        writeln!(out, "<tbody>")?;
        for row in self.iter() {
            writeln!(out, "<tr>")?;
            for value in row?.values() {
                writeln!(out, "<td>{}</td>", escape_html(&value.to_string()))?;
            }
            writeln!(out, "</tr>")?;
        }
        writeln!(out, "</tbody>")?;
        writeln!(out, "</table>")?;
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A zlib stream header: deflate with a 32K window, a valid check value and
/// no preset dictionary.
fn is_zlib(cmf: u8, flg: u8) -> bool {
    cmf == 0x78 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0 && flg & 0x20 == 0
}

impl<'a> IntoIterator for &'a Table {
    type Item = Result<Row>;
    type IntoIter = Rows<'a>;
    fn into_iter(self) -> Rows<'a> {
        self.iter()
    }
}

/// An iterator over the rows of a [`Table`]
pub struct Rows<'a> {
    table: &'a Table,
    cursor: std::result::Result<Cursor, Option<Error>>,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;
    fn next(&mut self) -> Option<Result<Row>> {
        match &mut self.cursor {
            Ok(cursor) => self.table.storage.advance(&self.table.schema, cursor),
            Err(e) => e.take().map(Err),
        }
    }
}

/// Builds a row one column at a time; see [`Table::start_row`].
pub struct RowBuilder<'a> {
    table: &'a Table,
    values: Vec<Option<Value>>,
    unknown: Vec<String>,
}

impl RowBuilder<'_> {
    /// Set the value of a column.
    pub fn set(mut self, column: &Column, value: impl Into<Value>) -> Self {
        match self.table.schema.index_of(column) {
            Some(i) => self.values[i] = Some(value.into()),
            None => self.unknown.push(column.title()),
        }
        self
    }

    /// Add the row to the table.
    pub fn finish(self) -> Result<Row> {
        if let Some(title) = self.unknown.into_iter().next() {
            return Err(Error::UnknownColumn(title));
        }
        self.table.insert(self.values)
    }
}

use std::collections::BTreeSet;

use crate::{Column, Error, Kind};

/// The ordered columns of a table.
///
/// Derived columns are checked when the schema is built: every input must be a
/// column of the schema, and derived columns may not read each other in a
/// cycle. Derivations then run in dependency order.
#[derive(Clone)]
pub struct Schema {
    columns: Vec<Column>,
    derive_order: Vec<usize>,
}

impl Schema {
    /// Build a schema, checking derived columns.
    pub fn new(columns: Vec<Column>) -> Result<Schema, Error> {
        if columns.is_empty() {
            return Err(Error::format("column header", ""));
        }
        for (i, c) in columns.iter().enumerate() {
            if columns[..i].contains(c) {
                return Err(Error::DuplicateColumn(c.title()));
            }
        }

        // deps[i] holds the derived columns that column i reads
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); columns.len()];
        for (i, c) in columns.iter().enumerate() {
            let Some(derivation) = c.derivation() else {
                continue;
            };
            for input in derivation.inputs() {
                let Some(j) = columns.iter().position(|c| c == input) else {
                    return Err(Error::UnknownInput {
                        column: c.title(),
                        input: input.title(),
                    });
                };
                if columns[j].is_derived() {
                    deps[i].insert(j);
                }
            }
        }

        let mut derive_order = Vec::new();
        let mut pending: Vec<usize> = (0..columns.len())
            .filter(|&i| columns[i].is_derived())
            .collect();
        while !pending.is_empty() {
            let ready: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|i| deps[*i].iter().all(|d| derive_order.contains(d)))
                .collect();
            if ready.is_empty() {
                return Err(Error::DerivationCycle(
                    pending.iter().map(|&i| columns[i].title()).collect(),
                ));
            }
            pending.retain(|i| !ready.contains(i));
            derive_order.extend(ready);
        }

        Ok(Schema {
            columns,
            derive_order,
        })
    }

    /// All the columns
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Are there no columns?
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The column at `index`
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Derived column indices, inputs before the columns that read them.
    pub(crate) fn derive_order(&self) -> &[usize] {
        &self.derive_order
    }

    /// Find the index of a matching column.
    pub fn index_of(&self, column: &Column) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Find a column by name (ignoring units and case), optionally of a kind.
    pub fn index_by_name(&self, name: &str, kind: Option<Kind>) -> Option<usize> {
        let name = name.trim().to_lowercase();
        self.columns
            .iter()
            .position(|c| c.matcher_name() == name && kind.map_or(true, |k| k == c.kind()))
    }

    /// The same columns with derivations removed.
    pub fn plain(&self) -> Schema {
        Schema {
            columns: self.columns.iter().map(Column::without_derivation).collect(),
            derive_order: Vec::new(),
        }
    }

    /// The CSV column header line, without a newline.
    pub fn header_line(&self) -> String {
        self.columns
            .iter()
            .map(Column::header_entry)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse a line written by [`Schema::header_line`].
    ///
    /// Untyped entries are `f64` columns, so plain CSV headers such as
    /// `Time [s], Voltage [V]` are accepted.
    pub fn parse_header_line(line: &str) -> Result<Schema, Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(Error::format("column header", line));
        }
        let columns = split_fields(line, true)
            .into_iter()
            .map(|entry| parse_header_entry(&entry))
            .collect::<Result<Vec<_>, _>>()?;
        Schema::new(columns)
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.columns.iter()).finish()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.name() == b.name() && a.units() == b.units())
    }
}

fn parse_header_entry(entry: &str) -> Result<Column, Error> {
    let bad = || Error::format("column header", entry);
    let entry = entry.trim();
    if let Some(quoted) = entry.strip_prefix('"') {
        let mut title = String::new();
        let mut chars = quoted.char_indices();
        let mut rest = None;
        while let Some((i, ch)) = chars.next() {
            match ch {
                '\\' => title.extend(chars.next().map(|(_, c)| match c {
                    'n' => '\n',
                    'r' => '\r',
                    c => c,
                })),
                '"' => {
                    rest = Some(quoted[i + 1..].trim());
                    break;
                }
                c => title.push(c),
            }
        }
        let rest = rest.ok_or_else(bad)?;
        let kind = if rest.is_empty() {
            Kind::Float64
        } else {
            let name = rest
                .strip_prefix('{')
                .and_then(|r| r.strip_suffix('}'))
                .ok_or_else(bad)?;
            Kind::from_type_name(name.trim()).ok_or_else(bad)?
        };
        Ok(column_from_title(&title, kind))
    } else {
        Ok(column_from_title(&entry.replace("\\,", ","), Kind::Float64))
    }
}

fn column_from_title(title: &str, kind: Kind) -> Column {
    if let Some(open) = title.rfind(" [") {
        if title.ends_with(']') {
            let units = &title[open + 2..title.len() - 1];
            return Column::new(&title[..open], kind).with_units(units);
        }
    }
    Column::new(title, kind)
}

/// Split a CSV line on commas that are outside quotes.
///
/// `\,` outside quotes is a literal comma. With `escapes`, a backslash also
/// escapes the next character inside quotes, as in column headers. Fields
/// are trimmed but otherwise returned verbatim.
pub(crate) fn split_fields(line: &str, escapes: bool) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if escapes || (!quoted && chars.peek() == Some(&',')) => {
                field.push(ch);
                field.extend(chars.next());
            }
            '"' => {
                quoted = !quoted;
                field.push(ch);
            }
            ',' if !quoted => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

//! Column descriptors and their codecs.

use std::io::{Read, Write};
use std::sync::Arc;

use encoding::{ReadEncoded, StorageError, WriteEncoded};

use crate::{Error, Kind, Row, Value};

pub mod encoding;

type DeriveFn = dyn Fn(&Row) -> Value + Send + Sync;

/// How a derived column computes its value.
#[derive(Clone)]
pub struct Derivation {
    inputs: Vec<Column>,
    func: Arc<DeriveFn>,
}

impl Derivation {
    /// The columns this derivation reads.
    pub fn inputs(&self) -> &[Column] {
        &self.inputs
    }
}

/// A typed column: a name, optional units and a [`Kind`].
///
/// Columns compare equal when their lower-cased titles and kinds match, so a
/// column built for one table can be used to look up values in another.
#[derive(Clone)]
pub struct Column {
    name: String,
    units: Option<String>,
    kind: Kind,
    derive: Option<Derivation>,
}

impl Column {
    /// Create a column of any kind.
    pub fn new(name: impl Into<String>, kind: Kind) -> Column {
        Column {
            name: name.into(),
            units: None,
            kind,
            derive: None,
        }
    }

    /// A column of `f64`
    pub fn float(name: impl Into<String>) -> Column {
        Column::new(name, Kind::Float64)
    }

    /// A column of `i32`
    pub fn int(name: impl Into<String>) -> Column {
        Column::new(name, Kind::Int32)
    }

    /// A column of `i64`
    pub fn long(name: impl Into<String>) -> Column {
        Column::new(name, Kind::Int64)
    }

    /// A column of `bool`
    pub fn boolean(name: impl Into<String>) -> Column {
        Column::new(name, Kind::Bool)
    }

    /// A column of text
    pub fn text(name: impl Into<String>) -> Column {
        Column::new(name, Kind::Text)
    }

    /// Set the units. Empty units are the same as none.
    pub fn with_units(mut self, units: impl Into<String>) -> Column {
        let units = units.into();
        self.units = if units.is_empty() { None } else { Some(units) };
        self
    }

    /// Make this a derived column, computed by `func` from `inputs`.
    ///
    /// `inputs` must name every column `func` reads. The schema rejects
    /// inputs that are missing from the table and derived columns that read
    /// each other in a cycle.
    pub fn derived<F>(mut self, inputs: &[&Column], func: F) -> Column
    where
        F: Fn(&Row) -> Value + Send + Sync + 'static,
    {
        self.derive = Some(Derivation {
            inputs: inputs.iter().map(|c| (*c).clone()).collect(),
            func: Arc::new(func),
        });
        self
    }

    /// The same column with no derivation.
    pub fn without_derivation(&self) -> Column {
        Column {
            derive: None,
            ..self.clone()
        }
    }

    /// The name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The units, if any
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    /// The kind of value stored
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Is the value computed from other columns?
    pub fn is_derived(&self) -> bool {
        self.derive.is_some()
    }

    /// The derivation, if any
    pub fn derivation(&self) -> Option<&Derivation> {
        self.derive.as_ref()
    }

    /// `name [units]`, or just `name`.
    pub fn title(&self) -> String {
        match &self.units {
            Some(units) => format!("{} [{}]", self.name, units),
            None => self.name.clone(),
        }
    }

    /// The title used to match columns across tables.
    pub fn matcher_title(&self) -> String {
        self.title().trim().to_lowercase()
    }

    /// The name used to match columns across tables.
    pub fn matcher_name(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Compute a derived value, or `None` for a plain column.
    pub fn calculate(&self, row: &Row) -> Option<Value> {
        self.derive.as_ref().map(|d| (d.func)(row))
    }

    /// Render a value for a CSV line.
    pub fn stringify(&self, value: &Value) -> String {
        match value {
            Value::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('"');
                for ch in s.chars() {
                    match ch {
                        '"' => out.push_str("\"\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        c => out.push(c),
                    }
                }
                out.push('"');
                out
            }
            v => v.to_string(),
        }
    }

    /// Parse a value written by [`Column::stringify`].
    pub fn parse(&self, token: &str) -> Result<Value, Error> {
        let token = token.trim();
        let bad = || Error::format(self.title(), token);
        match self.kind {
            Kind::Float64 => match token {
                "Infinity" | "+Infinity" => Ok(Value::Float64(f64::INFINITY)),
                "-Infinity" => Ok(Value::Float64(f64::NEG_INFINITY)),
                _ => token.parse().map(Value::Float64).map_err(|_| bad()),
            },
            Kind::Int32 => token.parse().map(Value::Int32).map_err(|_| bad()),
            Kind::Int64 => token.parse().map(Value::Int64).map_err(|_| bad()),
            Kind::Bool => {
                if token.eq_ignore_ascii_case("true") {
                    Ok(Value::Bool(true))
                } else if token.eq_ignore_ascii_case("false") {
                    Ok(Value::Bool(false))
                } else {
                    Err(bad())
                }
            }
            Kind::Text => match token.strip_prefix('"') {
                Some(quoted) => unquote(quoted).map(Value::Text).ok_or_else(bad),
                None => Ok(Value::Text(token.replace("\\,", ","))),
            },
        }
    }

    /// Write a value in the binary row format.
    pub fn write_binary<W: Write + ?Sized>(
        &self,
        out: &mut W,
        value: &Value,
    ) -> Result<(), StorageError> {
        debug_assert_eq!(value.kind(), self.kind);
        match value {
            Value::Float64(v) => out.write_f64(*v),
            Value::Int32(v) => out.write_i32(*v),
            Value::Int64(v) => out.write_i64(*v),
            Value::Bool(v) => out.write_u8(*v as u8),
            Value::Text(s) => out.write_block(s.as_bytes()),
        }
    }

    /// Read a value written by [`Column::write_binary`].
    pub fn read_binary<R: Read + ?Sized>(&self, input: &mut R) -> Result<Value, StorageError> {
        Ok(match self.kind {
            Kind::Float64 => Value::Float64(input.read_f64()?),
            Kind::Int32 => Value::Int32(input.read_i32()?),
            Kind::Int64 => Value::Int64(input.read_i64()?),
            Kind::Bool => Value::Bool(input.read_u8()? != 0),
            Kind::Text => Value::Text(input.read_string()?),
        })
    }

    /// Step over one value without decoding it.
    pub fn skip_binary<R: Read + ?Sized>(&self, input: &mut R) -> Result<(), StorageError> {
        match self.kind {
            Kind::Float64 | Kind::Int64 => input.skip_bytes(8),
            Kind::Int32 => input.skip_bytes(4),
            Kind::Bool => input.skip_bytes(1),
            Kind::Text => input.skip_block(),
        }
    }

    /// The entry for this column in a CSV header line.
    ///
    /// Plain `f64` columns are written as `name [units]`. Anything else is
    /// quoted and tagged with its type, as in `"name [units]" {Integer}`.
    pub(crate) fn header_entry(&self) -> String {
        let plain = |s: &str| {
            !s.is_empty()
                && s.trim() == s
                && !s.contains(['"', ',', '[', ']', '{', '}', '\\', '\n', '\r'])
        };
        let units_plain = self.units.as_deref().map(plain).unwrap_or(true);
        if self.kind == Kind::Float64 && plain(&self.name) && units_plain {
            self.title()
        } else {
            let escaped = self
                .title()
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace(',', "\\,")
                .replace('\n', "\\n")
                .replace('\r', "\\r");
            format!("\"{escaped}\" {{{}}}", self.kind.type_name())
        }
    }
}

/// The text of a quoted field, given everything after the opening quote.
///
/// Quotes inside are doubled; backslash escapes a line break or itself. A
/// backslash before anything else is kept as it is.
fn unquote(quoted: &str) -> Option<String> {
    let mut text = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => match chars.next() {
                Some('"') => text.push('"'),
                None => return Some(text),
                Some(_) => return None,
            },
            '\\' => match chars.next() {
                Some('n') => text.push('\n'),
                Some('r') => text.push('\r'),
                Some('\\') => text.push('\\'),
                Some(c) => {
                    text.push('\\');
                    text.push(c);
                }
                None => text.push('\\'),
            },
            c => text.push(c),
        }
    }
    None
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.matcher_title() == other.matcher_title()
    }
}

impl Eq for Column {}

impl std::hash::Hash for Column {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.matcher_title().hash(state);
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Column({:?} {}", self.title(), self.kind)?;
        if self.is_derived() {
            write!(f, " derived")?;
        }
        write!(f, ")")
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.title())
    }
}

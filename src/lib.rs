#![deny(missing_docs)]
//! Typed result tables.
//!
//! A [`Table`] has a fixed list of typed [`Column`]s, a string attribute map
//! and any number of immutable [`Row`]s. Rows live in memory, in a
//! line-oriented text file, or in a compact binary file; all three behave the
//! same through the `Table` API. A [`Group`] arranges tables in a tree and
//! saves the whole tree as one tar+gzip archive.
//!
//! ```
//! use resultstore::{Column, Table, Value};
//!
//! let time = Column::float("Time").with_units("s");
//! let volts = Column::float("Voltage").with_units("V");
//! let table = Table::new(vec![time.clone(), volts.clone()]).unwrap();
//! table.add_values(vec![0.0.into(), 1.5.into()]).unwrap();
//! table.add_values(vec![1.0.into(), 1.6.into()]).unwrap();
//! assert_eq!(table.row_count(), 2);
//! assert_eq!(table.get_row(1).unwrap().get(&volts), Some(&Value::Float64(1.6)));
//! ```

use thiserror::Error;

pub mod column;
mod group;
mod observability;
mod options;
mod row;
mod schema;
mod storage;
mod table;
mod value;

use column::encoding::StorageError;
pub use column::Column;
pub use group::Group;
pub use options::StreamOptions;
pub use row::Row;
pub use schema::Schema;
pub use storage::Backend;
pub use table::{ListenerId, RowBuilder, Rows, Table};
pub use value::{FromValue, Kind, Value};

/// A `Result` whose error is [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error of any sort
#[derive(Debug, Error)]
pub enum Error {
    /// An IO or encoding error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// Text that could not be parsed
    #[error("Format error in {context}: {token:?}")]
    Format {
        /// Where the bad text was found
        context: String,
        /// The offending text
        token: String,
    },
    /// Values whose kind does not match their column
    #[error("Column{} {} the wrong type", plural(.columns), list(.columns))]
    TypeMismatch {
        /// Indices of every offending column
        columns: Vec<usize>,
    },
    /// Columns that need a value but were not given one
    #[error("Column{} {} missing a value", plural(.columns), list(.columns))]
    MissingValues {
        /// Indices of every column without a value
        columns: Vec<usize>,
    },
    /// A row with the wrong number of values
    #[error("Wrong number of values: {found} should be {wanted}")]
    WrongNumber {
        /// Values supplied
        found: usize,
        /// Columns in the table
        wanted: usize,
    },
    /// A column that is not part of the table
    #[error("No such column: {0}")]
    UnknownColumn(String),
    /// Two columns that match each other in one schema
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),
    /// Derived columns that depend on each other
    #[error("Derived columns depend on each other: {}", .0.join(", "))]
    DerivationCycle(Vec<String>),
    /// A derived column reading a column that is not in the schema
    #[error("Derived column {column} reads {input}, which is not in the table")]
    UnknownInput {
        /// The derived column
        column: String,
        /// The missing input
        input: String,
    },
    /// A path that does not exist in a group
    #[error("Not found: {0}")]
    NotFound(String),
    /// A path that cannot name a table or group
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),
    /// A row index past the end of the table
    #[error("Row {index} out of bounds for table of {len} rows")]
    OutOfBounds {
        /// Requested row
        index: usize,
        /// Number of rows
        len: usize,
    },
    /// Attributes that are not valid JSON
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn plural(columns: &[usize]) -> &'static str {
    if columns.len() == 1 {
        " is"
    } else {
        "s are"
    }
}

fn list(columns: &[usize]) -> String {
    columns
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(StorageError::Io(e))
    }
}

impl Error {
    pub(crate) fn format(context: impl ToString, token: impl ToString) -> Self {
        Error::Format {
            context: context.to_string(),
            token: token.to_string(),
        }
    }
}

/// Add context to an error
pub trait Context {
    /// Prefix the location of a format error with `context`.
    fn context<S: ToString>(self, context: S) -> Self;
}

impl Context for Error {
    fn context<S: ToString>(self, context: S) -> Self {
        match self {
            Error::Format { context: c, token } => Error::Format {
                context: format!("{}: {c}", context.to_string()),
                token,
            },
            e => e,
        }
    }
}

impl<T> Context for Result<T, Error> {
    fn context<S: ToString>(self, context: S) -> Self {
        self.map_err(|e| e.context(context))
    }
}

#[cfg(test)]
mod test {
    use super::{Context, Error};

    #[test]
    fn type_mismatch_names_every_column() {
        let e = Error::TypeMismatch {
            columns: vec![0, 2],
        };
        assert_eq!(e.to_string(), "Columns 0, 2 are the wrong type");
        let e = Error::TypeMismatch { columns: vec![1] };
        assert_eq!(e.to_string(), "Column 1 is the wrong type");
    }

    #[test]
    fn context_prefixes_format_errors() {
        let e = Error::format("Time [s]", "abc").context("line 3");
        expect_test::expect![[r#"Format error in line 3: Time [s]: "abc""#]]
            .assert_eq(&e.to_string());
    }
}

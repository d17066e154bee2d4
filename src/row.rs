use std::sync::Arc;

use crate::{Column, Error, FromValue, Kind, Schema, Value};

/// One immutable record: a value for every column of a schema.
#[derive(Clone)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from supplied values, then compute derived columns.
    ///
    /// `supplied` is in schema order. Derived columns are recomputed in
    /// dependency order and overwrite anything supplied for them; every other
    /// column must have a value.
    pub(crate) fn build(schema: Arc<Schema>, supplied: Vec<Option<Value>>) -> Result<Row, Error> {
        debug_assert_eq!(supplied.len(), schema.len());
        let missing: Vec<usize> = supplied
            .iter()
            .enumerate()
            .filter(|(i, v)| v.is_none() && !schema.columns()[*i].is_derived())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingValues { columns: missing });
        }

        let values = supplied
            .into_iter()
            .zip(schema.columns())
            .map(|(v, c)| v.unwrap_or_else(|| placeholder(c.kind())))
            .collect();
        let mut row = Row { schema, values };

        let mut wrong = Vec::new();
        let schema = row.schema.clone();
        for &i in schema.derive_order() {
            let column = &schema.columns()[i];
            if let Some(value) = column.calculate(&row) {
                if value.kind() != column.kind() {
                    wrong.push(i);
                } else {
                    row.values[i] = value;
                }
            }
        }
        if !wrong.is_empty() {
            wrong.sort_unstable();
            return Err(Error::TypeMismatch { columns: wrong });
        }
        Ok(row)
    }

    /// A row whose values are already final, as when read back from storage.
    pub(crate) fn from_parts(schema: Arc<Schema>, values: Vec<Value>) -> Row {
        debug_assert_eq!(values.len(), schema.len());
        Row { schema, values }
    }

    /// The schema this row belongs to
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The columns of this row
    pub fn columns(&self) -> &[Column] {
        self.schema.columns()
    }

    /// The values, in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The value at a column index
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// The value for a matching column, or `None` if this row has no such
    /// column.
    pub fn get(&self, column: &Column) -> Option<&Value> {
        self.schema.index_of(column).map(|i| &self.values[i])
    }

    /// The value for a matching column as a Rust type.
    pub fn get_as<T: FromValue>(&self, column: &Column) -> Option<T> {
        self.get(column).and_then(T::from_value)
    }

    /// The value of the first column with this name and kind.
    pub fn get_named(&self, name: &str, kind: Kind) -> Option<&Value> {
        self.schema
            .index_by_name(name, Some(kind))
            .map(|i| &self.values[i])
    }

    /// The value of the first numeric column with this name, as `f64`.
    pub fn number(&self, name: &str) -> Option<f64> {
        let name = name.trim().to_lowercase();
        self.schema
            .columns()
            .iter()
            .zip(self.values.iter())
            .find(|(c, _)| c.kind().is_numeric() && c.matcher_name() == name)
            .and_then(|(_, v)| v.as_f64())
    }

    /// Every value as it would appear in a CSV line.
    pub fn string_list(&self) -> Vec<String> {
        self.columns()
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| c.stringify(v))
            .collect()
    }
}

fn placeholder(kind: Kind) -> Value {
    match kind {
        Kind::Float64 => Value::Float64(0.0),
        Kind::Int32 => Value::Int32(0),
        Kind::Int64 => Value::Int64(0),
        Kind::Bool => Value::Bool(false),
        Kind::Text => Value::Text(String::new()),
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.columns() == other.columns() && self.values == other.values
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.columns().iter().map(|c| c.title()).zip(self.values.iter()))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::Row;
    use crate::{Column, Error, Kind, Schema, Value};

    fn schema() -> (Column, Column, Column, Arc<Schema>) {
        let v = Column::float("Voltage").with_units("V");
        let i = Column::float("Current").with_units("A");
        let r = Column::float("Resistance").with_units("Ohm").derived(&[&v, &i], |row| {
            let v = row.number("voltage").unwrap_or(f64::NAN);
            let i = row.number("current").unwrap_or(f64::NAN);
            Value::Float64(v / i)
        });
        let schema = Arc::new(Schema::new(vec![v.clone(), i.clone(), r.clone()]).unwrap());
        (v, i, r, schema)
    }

    #[test]
    fn derived_values_overwrite_supplied_ones() {
        let (_, _, r, schema) = schema();
        let row = Row::build(
            schema,
            vec![
                Some(Value::Float64(6.0)),
                Some(Value::Float64(2.0)),
                Some(Value::Float64(-1.0)),
            ],
        )
        .unwrap();
        assert_eq!(row.get(&r), Some(&Value::Float64(3.0)));
        assert_eq!(row.get_as::<f64>(&r), Some(3.0));
    }

    #[test]
    fn derived_values_need_not_be_supplied() {
        let (v, _, r, schema) = schema();
        let row = Row::build(
            schema,
            vec![Some(Value::Float64(1.0)), Some(Value::Float64(4.0)), None],
        )
        .unwrap();
        assert_eq!(row.get(&r), Some(&Value::Float64(0.25)));
        assert_eq!(row.get(&v), Some(&Value::Float64(1.0)));
        assert_eq!(row.get(&Column::float("Voltage")), None);
        assert_eq!(row.get_named("VOLTAGE", Kind::Float64), Some(&Value::Float64(1.0)));
    }

    #[test]
    fn missing_plain_values() {
        let (_, _, _, schema) = schema();
        let e = Row::build(schema, vec![None, None, None]).unwrap_err();
        assert!(matches!(e, Error::MissingValues { columns } if columns == vec![0, 1]));
    }

    #[test]
    fn chained_derivations() {
        let a = Column::int("a");
        let b = Column::int("b").derived(&[&a], |r| Value::Int32(r.get_as::<i32>(&Column::int("a")).unwrap() + 1));
        let c = Column::int("c").derived(&[&b], |r| Value::Int32(r.get_as::<i32>(&Column::int("b")).unwrap() * 10));
        let schema = Arc::new(Schema::new(vec![c.clone(), b.clone(), a.clone()]).unwrap());
        let row = Row::build(schema, vec![None, None, Some(Value::Int32(4))]).unwrap();
        assert_eq!(row.values(), &[Value::Int32(50), Value::Int32(5), Value::Int32(4)]);
    }

    #[test]
    fn derived_kind_is_checked() {
        let a = Column::int("a");
        let b = Column::int("b").derived(&[&a], |_| Value::from("oops"));
        let schema = Arc::new(Schema::new(vec![a, b]).unwrap());
        let e = Row::build(schema, vec![Some(Value::Int32(1)), None]).unwrap_err();
        assert!(matches!(e, Error::TypeMismatch { columns } if columns == vec![1]));
    }
}

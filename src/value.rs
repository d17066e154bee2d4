/// The type of a column.
///
/// We use the name "kind" for types for the convenience of not using a
/// reserved keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    /// A 64-bit float
    Float64,
    /// A 32-bit signed integer
    Int32,
    /// A 64-bit signed integer
    Int64,
    /// A boolean value
    Bool,
    /// A utf8-encoded string
    Text,
}

impl Kind {
    /// Every kind, in wire-tag order.
    pub const ALL: [Kind; 5] = [
        Kind::Float64,
        Kind::Int32,
        Kind::Int64,
        Kind::Bool,
        Kind::Text,
    ];

    /// The name used for this kind in file headers.
    pub const fn type_name(self) -> &'static str {
        match self {
            Kind::Float64 => "Double",
            Kind::Int32 => "Integer",
            Kind::Int64 => "Long",
            Kind::Bool => "Boolean",
            Kind::Text => "String",
        }
    }

    /// Look up a kind from its header name.
    pub fn from_type_name(name: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.type_name() == name)
    }

    /// Is this a numeric kind?
    pub const fn is_numeric(self) -> bool {
        matches!(self, Kind::Float64 | Kind::Int32 | Kind::Int64)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A value that could exist in a column
#[derive(Debug, Clone)]
pub enum Value {
    /// A `f64` value
    Float64(f64),
    /// An `i32` value
    Int32(i32),
    /// An `i64` value
    Int64(i64),
    /// A boolean value
    Bool(bool),
    /// A string value
    Text(String),
}

impl Value {
    /// The `Kind` of this value
    pub fn kind(&self) -> Kind {
        match self {
            Value::Float64(_) => Kind::Float64,
            Value::Int32(_) => Kind::Int32,
            Value::Int64(_) => Kind::Int64,
            Value::Bool(_) => Kind::Bool,
            Value::Text(_) => Kind::Text,
        }
    }

    /// The value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float64(v) => Some(v),
            Value::Int32(v) => Some(v as f64),
            Value::Int64(v) => Some(v as f64),
            Value::Bool(_) | Value::Text(_) => None,
        }
    }

    /// The value as a string slice, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Float64(_) => 0,
            Value::Int32(_) => 1,
            Value::Int64(_) => 2,
            Value::Bool(_) => 3,
            Value::Text(_) => 4,
        }
    }
}

// Floats compare by bit pattern so that values can be map keys and `NaN`
// equals itself.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Text(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Float64(v) => write!(f, "{v:?}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b:?}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! value_conversions {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v)
            }
        }

        impl TryFrom<Value> for $t {
            type Error = Value;
            fn try_from(v: Value) -> Result<Self, Value> {
                match v {
                    Value::$variant(x) => Ok(x),
                    other => Err(other),
                }
            }
        }

        impl FromValue for $t {
            const KIND: Kind = Kind::$variant;
            fn from_value(v: &Value) -> Option<Self> {
                match v {
                    Value::$variant(x) => Some(x.clone()),
                    _ => None,
                }
            }
        }
    };
}

/// A Rust type that corresponds to exactly one [`Kind`].
pub trait FromValue: Sized {
    /// The kind of column holding this type
    const KIND: Kind;
    /// Extract from a value of the matching kind.
    fn from_value(v: &Value) -> Option<Self>;
}

value_conversions!(f64, Float64);
value_conversions!(i32, Int32);
value_conversions!(i64, Int64);
value_conversions!(bool, Bool);
value_conversions!(String, Text);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

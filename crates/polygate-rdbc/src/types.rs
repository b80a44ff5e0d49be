//! Value types for polygate-rdbc
//!
//! `Value` is the dynamically-typed form a driver hands back for one cell.
//! Drivers disagree about what they return for the same column (MySQL text
//! results arrive as byte strings, unsigned integers as `u64`, Postgres
//! numerics as decimals), so consumers coerce by target type rather than by
//! the variant they happen to receive.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SQL value type that can hold any database value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer (TINYINT)
    Int8(i8),
    /// 16-bit signed integer (SMALLINT)
    Int16(i16),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 64-bit unsigned integer (BIGINT UNSIGNED and narrower unsigned columns)
    UInt64(u64),
    /// 32-bit floating point (REAL)
    Float32(f32),
    /// 64-bit floating point (DOUBLE PRECISION)
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, TEXT, CHAR)
    String(String),
    /// Binary data or undecoded byte string
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (DATETIME, TIMESTAMP)
    DateTime(NaiveDateTime),
    /// Timestamp with timezone (TIMESTAMPTZ)
    DateTimeTz(DateTime<Utc>),
    /// UUID
    Uuid(Uuid),
    /// JSON value
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
    /// Interval in microseconds (negative MySQL TIME, Postgres INTERVAL)
    Interval(i64),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in coercion diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int8(_) => "int8",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::UInt64(_) => "uint64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::DateTimeTz(_) => "datetimetz",
            Self::Uuid(_) => "uuid",
            Self::Json(_) => "json",
            Self::Array(_) => "array",
            Self::Interval(_) => "interval",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int8(n) => Some(*n != 0),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::UInt64(n) => Some(*n != 0),
            Self::String(s) => parse_bool(s),
            Self::Bytes(b) => std::str::from_utf8(b).ok().and_then(parse_bool),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(n) => Some(i64::from(*n)),
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::UInt64(n) => i64::try_from(*n).ok(),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Try to convert to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(n) => Some(*n),
            other => other.as_i64().and_then(|n| u64::try_from(n).ok()),
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int8(n) => Some(f64::from(*n)),
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::UInt64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            _ => None,
        }
    }

    /// Try to borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to convert to bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b.as_slice()),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Self::Int8(n) => Some(n.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::UInt64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Uuid(u) => Some(u.to_string()),
            _ => None,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    Decimal => Decimal,
    String => String,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeTz,
    Uuid => Uuid,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Database row as ordered column values
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row, keeping only its values
    #[inline]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }
}

/// Column metadata as reported by a cursor or the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// Native type name (vendor-specific, e.g. `VARCHAR`, `int4`, `DECIMAL`)
    pub type_name: String,
    /// Whether column is nullable
    pub nullable: bool,
    /// Whether an integer column is unsigned (MySQL family)
    pub unsigned: bool,
    /// Column ordinal (1-based)
    pub ordinal: u32,
    /// Maximum length for string/binary types
    pub max_length: Option<u32>,
    /// Precision for numeric types
    pub precision: Option<u32>,
    /// Scale for numeric types
    pub scale: Option<u32>,
}

impl ColumnMetadata {
    /// Create basic column metadata
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            unsigned: false,
            ordinal: 0,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    /// Set precision and scale
    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Mark as unsigned
    pub fn with_unsigned(mut self, unsigned: bool) -> Self {
        self.unsigned = unsigned;
        self
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

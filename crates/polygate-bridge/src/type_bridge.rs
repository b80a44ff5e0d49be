//! Native SQL types <-> canonical columnar types
//!
//! Every backend reports column types in its own vocabulary (`int4`,
//! `BIGINT UNSIGNED`, `DATETIMEV2(3)`). The bridge folds them into one
//! closed set of [`CanonicalType`]s that map 1:1 onto Arrow data types,
//! and renders canonical types back into DDL fragments for create-table.
//!
//! Lookups never fail. A type the tables do not know becomes `utf8` on the
//! read path and a wide text column on the write path.

use std::fmt;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use polygate_rdbc::connection::DatabaseType;
use polygate_rdbc::dialect::ColumnDef;
use polygate_rdbc::types::ColumnMetadata;
use serde::{Deserialize, Serialize};

/// Widest decimal the canonical model carries
pub const MAX_DECIMAL_PRECISION: u8 = 38;

/// Precision and scale used when a decimal column does not report usable ones
pub const DEFAULT_DECIMAL: (u8, u8) = (38, 10);

/// Dialect-independent column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Utf8,
    LargeUtf8,
    Binary,
    Decimal128 { precision: u8, scale: u8 },
    Date32,
    Timestamp(TimeUnit),
}

impl CanonicalType {
    /// Decimal with the given precision and scale, falling back to
    /// [`DEFAULT_DECIMAL`] when the precision is missing or out of range.
    pub fn decimal(precision: Option<u32>, scale: Option<u32>) -> Self {
        match precision {
            Some(p) if p >= 1 && p <= u32::from(MAX_DECIMAL_PRECISION) => {
                let scale = scale.unwrap_or(0).min(p);
                Self::Decimal128 {
                    precision: p as u8,
                    scale: scale as u8,
                }
            }
            _ => Self::Decimal128 {
                precision: DEFAULT_DECIMAL.0,
                scale: DEFAULT_DECIMAL.1,
            },
        }
    }

    /// Arrow data type carrying this canonical type
    pub fn to_arrow(&self) -> DataType {
        match *self {
            Self::Bool => DataType::Boolean,
            Self::Int8 => DataType::Int8,
            Self::Int16 => DataType::Int16,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::UInt8 => DataType::UInt8,
            Self::UInt16 => DataType::UInt16,
            Self::UInt32 => DataType::UInt32,
            Self::UInt64 => DataType::UInt64,
            Self::Float32 => DataType::Float32,
            Self::Float64 => DataType::Float64,
            Self::Utf8 => DataType::Utf8,
            Self::LargeUtf8 => DataType::LargeUtf8,
            Self::Binary => DataType::Binary,
            Self::Decimal128 { precision, scale } => DataType::Decimal128(precision, scale as i8),
            Self::Date32 => DataType::Date32,
            Self::Timestamp(unit) => DataType::Timestamp(unit, None),
        }
    }

    /// Canonical type for an incoming Arrow type.
    ///
    /// Types outside the canonical set are carried as `large-utf8`; their
    /// values are rendered as text when decoded.
    pub fn from_arrow(data_type: &DataType) -> Self {
        match data_type {
            DataType::Boolean => Self::Bool,
            DataType::Int8 => Self::Int8,
            DataType::Int16 => Self::Int16,
            DataType::Int32 => Self::Int32,
            DataType::Int64 => Self::Int64,
            DataType::UInt8 => Self::UInt8,
            DataType::UInt16 => Self::UInt16,
            DataType::UInt32 => Self::UInt32,
            DataType::UInt64 => Self::UInt64,
            DataType::Float32 => Self::Float32,
            DataType::Float64 => Self::Float64,
            DataType::Utf8 => Self::Utf8,
            DataType::LargeUtf8 => Self::LargeUtf8,
            DataType::Binary => Self::Binary,
            DataType::Decimal128(p, s) if *s >= 0 => Self::Decimal128 {
                precision: *p,
                scale: *s as u8,
            },
            DataType::Date32 => Self::Date32,
            DataType::Timestamp(unit, _) => Self::Timestamp(*unit),
            _ => Self::LargeUtf8,
        }
    }

    /// Whether values are variable-length
    pub fn is_variable_width(&self) -> bool {
        matches!(self, Self::Utf8 | Self::LargeUtf8 | Self::Binary)
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int8 => f.write_str("int8"),
            Self::Int16 => f.write_str("int16"),
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::UInt8 => f.write_str("uint8"),
            Self::UInt16 => f.write_str("uint16"),
            Self::UInt32 => f.write_str("uint32"),
            Self::UInt64 => f.write_str("uint64"),
            Self::Float32 => f.write_str("float32"),
            Self::Float64 => f.write_str("float64"),
            Self::Utf8 => f.write_str("utf8"),
            Self::LargeUtf8 => f.write_str("large-utf8"),
            Self::Binary => f.write_str("binary"),
            Self::Decimal128 { precision, scale } => {
                write!(f, "decimal128({},{})", precision, scale)
            }
            Self::Date32 => f.write_str("date32"),
            Self::Timestamp(unit) => {
                let unit = match unit {
                    TimeUnit::Second => "s",
                    TimeUnit::Millisecond => "ms",
                    TimeUnit::Microsecond => "us",
                    TimeUnit::Nanosecond => "ns",
                };
                write!(f, "timestamp({})", unit)
            }
        }
    }
}

/// One column of a [`CanonicalSchema`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalColumn {
    pub name: String,
    pub data_type: CanonicalType,
    pub nullable: bool,
}

impl CanonicalColumn {
    pub fn new(name: impl Into<String>, data_type: CanonicalType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }
}

/// Ordered, immutable column layout shared by every batch of one query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalSchema {
    columns: Vec<CanonicalColumn>,
}

impl CanonicalSchema {
    pub fn new(columns: Vec<CanonicalColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[CanonicalColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn types(&self) -> Vec<CanonicalType> {
        self.columns.iter().map(|c| c.data_type).collect()
    }

    /// Arrow schema with one field per column
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| {
                // The codec may null temporal values it cannot parse
                let nullable = c.nullable
                    || matches!(c.data_type, CanonicalType::Date32 | CanonicalType::Timestamp(_));
                Field::new(&c.name, c.data_type.to_arrow(), nullable)
            })
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Canonical view of an incoming Arrow schema
    pub fn from_arrow(schema: &Schema) -> Self {
        Self::new(
            schema
                .fields()
                .iter()
                .map(|f| CanonicalColumn {
                    name: f.name().clone(),
                    data_type: CanonicalType::from_arrow(f.data_type()),
                    nullable: f.is_nullable(),
                })
                .collect(),
        )
    }
}

/// How temporal native types are read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalMode {
    /// `DATE` -> `date32`, `DATETIME`/`TIMESTAMP` -> `timestamp(us)`
    #[default]
    #[serde(alias = "columnar")]
    Native,
    /// Temporal columns are rendered as `utf8`
    #[serde(alias = "string")]
    Text,
}

impl std::str::FromStr for TemporalMode {
    type Err = polygate_rdbc::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" | "columnar" => Ok(Self::Native),
            "text" | "string" => Ok(Self::Text),
            other => Err(polygate_rdbc::Error::config(format!(
                "unknown temporal mode '{}'",
                other
            ))),
        }
    }
}

/// Native type name split into base name, parameters and sign
#[derive(Debug, PartialEq)]
struct NativeType {
    base: String,
    params: Vec<u32>,
    unsigned: bool,
}

fn parse_native(name: &str) -> NativeType {
    let upper = name.trim().to_uppercase();
    let unsigned = upper.contains("UNSIGNED");

    let (head, params) = match upper.split_once('(') {
        Some((head, rest)) => {
            let inner = rest.split(')').next().unwrap_or("");
            let params = inner
                .split(',')
                .filter_map(|p| p.trim().parse::<u32>().ok())
                .collect();
            (head.to_string(), params)
        }
        None => (upper.clone(), Vec::new()),
    };

    let base = head
        .replace("UNSIGNED", "")
        .replace("ZEROFILL", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    NativeType {
        base,
        params,
        unsigned,
    }
}

/// Per-dialect type mapping
#[derive(Debug, Clone, Copy)]
pub struct TypeBridge {
    dialect: DatabaseType,
    temporal: TemporalMode,
}

impl TypeBridge {
    pub fn new(dialect: DatabaseType) -> Self {
        Self {
            dialect,
            temporal: TemporalMode::default(),
        }
    }

    pub fn with_temporal_mode(mut self, mode: TemporalMode) -> Self {
        self.temporal = mode;
        self
    }

    pub fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    /// Map a native type name to its canonical type.
    ///
    /// `precision`/`scale` override whatever the name itself carries
    /// (`DECIMAL(10,2)`); decimals with neither fall back to
    /// [`DEFAULT_DECIMAL`].
    pub fn to_canonical(
        &self,
        native: &str,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> CanonicalType {
        let parsed = parse_native(native);
        let precision = precision.or_else(|| parsed.params.first().copied());
        let scale = scale.or_else(|| parsed.params.get(1).copied());
        self.lookup(&parsed, precision, scale)
    }

    /// Canonical column for cursor or catalog metadata
    pub fn column(&self, meta: &ColumnMetadata) -> CanonicalColumn {
        let mut parsed = parse_native(&meta.type_name);
        parsed.unsigned |= meta.unsigned;
        let precision = meta.precision.or_else(|| parsed.params.first().copied());
        let scale = meta.scale.or_else(|| parsed.params.get(1).copied());
        CanonicalColumn {
            name: meta.name.clone(),
            data_type: self.lookup(&parsed, precision, scale),
            nullable: meta.nullable,
        }
    }

    /// Canonical schema for a cursor's column layout
    pub fn schema(&self, columns: &[ColumnMetadata]) -> CanonicalSchema {
        CanonicalSchema::new(columns.iter().map(|c| self.column(c)).collect())
    }

    fn lookup(&self, t: &NativeType, precision: Option<u32>, scale: Option<u32>) -> CanonicalType {
        match self.dialect {
            DatabaseType::PostgreSQL => self.postgres(t, precision, scale),
            DatabaseType::MySQL => self.mysql(t, precision, scale),
            DatabaseType::Olap => self.olap(t, precision, scale),
        }
    }

    fn date(&self) -> CanonicalType {
        match self.temporal {
            TemporalMode::Native => CanonicalType::Date32,
            TemporalMode::Text => CanonicalType::Utf8,
        }
    }

    fn timestamp(&self) -> CanonicalType {
        match self.temporal {
            TemporalMode::Native => CanonicalType::Timestamp(TimeUnit::Microsecond),
            TemporalMode::Text => CanonicalType::Utf8,
        }
    }

    fn mysql(&self, t: &NativeType, precision: Option<u32>, scale: Option<u32>) -> CanonicalType {
        use CanonicalType as C;
        let pick = |signed: C, unsigned: C| if t.unsigned { unsigned } else { signed };
        match t.base.as_str() {
            "BOOL" | "BOOLEAN" => C::Bool,
            "TINYINT" => pick(C::Int8, C::UInt8),
            "SMALLINT" => pick(C::Int16, C::UInt16),
            "MEDIUMINT" | "INT" | "INTEGER" => pick(C::Int32, C::UInt32),
            "BIGINT" => pick(C::Int64, C::UInt64),
            "YEAR" => C::Int16,
            "FLOAT" => C::Float32,
            "DOUBLE" | "DOUBLE PRECISION" | "REAL" => C::Float64,
            "DECIMAL" | "NUMERIC" | "DEC" | "FIXED" => C::decimal(precision, scale),
            "CHAR" | "VARCHAR" | "ENUM" | "SET" | "TIME" => C::Utf8,
            "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "JSON" => C::LargeUtf8,
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
            | "GEOMETRY" => C::Binary,
            "DATE" => self.date(),
            "DATETIME" | "TIMESTAMP" => self.timestamp(),
            _ => C::Utf8,
        }
    }

    fn postgres(&self, t: &NativeType, precision: Option<u32>, scale: Option<u32>) -> CanonicalType {
        use CanonicalType as C;
        let base = t.base.as_str();
        match base {
            "BOOL" | "BOOLEAN" => C::Bool,
            "INT2" | "SMALLINT" | "SMALLSERIAL" => C::Int16,
            "INT4" | "INT" | "INTEGER" | "SERIAL" => C::Int32,
            "INT8" | "BIGINT" | "BIGSERIAL" => C::Int64,
            "FLOAT4" | "REAL" => C::Float32,
            "FLOAT8" | "DOUBLE PRECISION" => C::Float64,
            "NUMERIC" | "DECIMAL" => C::decimal(precision, scale),
            "TEXT" | "JSON" | "JSONB" | "XML" => C::LargeUtf8,
            "BYTEA" => C::Binary,
            "DATE" => self.date(),
            "TIMESTAMP" | "TIMESTAMPTZ" => self.timestamp(),
            _ if base.starts_with("TIMESTAMP ") => self.timestamp(),
            _ => C::Utf8,
        }
    }

    fn olap(&self, t: &NativeType, precision: Option<u32>, scale: Option<u32>) -> CanonicalType {
        use CanonicalType as C;
        match t.base.as_str() {
            "LARGEINT" => C::Utf8,
            "STRING" | "VARIANT" | "JSONB" => C::LargeUtf8,
            "DECIMALV2" | "DECIMALV3" | "DECIMAL32" | "DECIMAL64" | "DECIMAL128"
            | "DECIMAL128I" => C::decimal(precision, scale),
            "DATEV2" => self.date(),
            "DATETIMEV2" => self.timestamp(),
            // No binary storage on the OLAP side
            _ => match self.mysql(t, precision, scale) {
                C::Binary => C::LargeUtf8,
                other => other,
            },
        }
    }

    /// DDL fragment for a canonical type
    pub fn from_canonical(&self, ty: &CanonicalType) -> String {
        use CanonicalType as C;
        let fixed = match (self.dialect, ty) {
            (_, C::Decimal128 { precision, scale }) => {
                let keyword = match self.dialect {
                    DatabaseType::PostgreSQL => "NUMERIC",
                    _ => "DECIMAL",
                };
                return format!("{}({},{})", keyword, precision, scale);
            }

            (DatabaseType::PostgreSQL, C::Bool) => "BOOLEAN",
            (DatabaseType::PostgreSQL, C::Int8 | C::Int16 | C::UInt8) => "SMALLINT",
            (DatabaseType::PostgreSQL, C::Int32 | C::UInt16) => "INTEGER",
            (DatabaseType::PostgreSQL, C::Int64 | C::UInt32) => "BIGINT",
            (DatabaseType::PostgreSQL, C::UInt64) => "NUMERIC(20,0)",
            (DatabaseType::PostgreSQL, C::Float32) => "REAL",
            (DatabaseType::PostgreSQL, C::Float64) => "DOUBLE PRECISION",
            (DatabaseType::PostgreSQL, C::Utf8) => "VARCHAR",
            (DatabaseType::PostgreSQL, C::LargeUtf8) => "TEXT",
            (DatabaseType::PostgreSQL, C::Binary) => "BYTEA",
            (DatabaseType::PostgreSQL, C::Date32) => "DATE",
            (DatabaseType::PostgreSQL, C::Timestamp(_)) => "TIMESTAMP",

            (DatabaseType::MySQL, C::Bool) => "BOOLEAN",
            (DatabaseType::MySQL, C::Int8) => "TINYINT",
            (DatabaseType::MySQL, C::Int16) => "SMALLINT",
            (DatabaseType::MySQL, C::Int32) => "INT",
            (DatabaseType::MySQL, C::Int64) => "BIGINT",
            (DatabaseType::MySQL, C::UInt8) => "TINYINT UNSIGNED",
            (DatabaseType::MySQL, C::UInt16) => "SMALLINT UNSIGNED",
            (DatabaseType::MySQL, C::UInt32) => "INT UNSIGNED",
            (DatabaseType::MySQL, C::UInt64) => "BIGINT UNSIGNED",
            (DatabaseType::MySQL, C::Float32) => "FLOAT",
            (DatabaseType::MySQL, C::Float64) => "DOUBLE",
            (DatabaseType::MySQL, C::Utf8) => "VARCHAR(1024)",
            (DatabaseType::MySQL, C::LargeUtf8) => "LONGTEXT",
            (DatabaseType::MySQL, C::Binary) => "LONGBLOB",
            (DatabaseType::MySQL, C::Date32) => "DATE",
            (DatabaseType::MySQL, C::Timestamp(_)) => "DATETIME(6)",

            (DatabaseType::Olap, C::Bool) => "BOOLEAN",
            (DatabaseType::Olap, C::Int8) => "TINYINT",
            (DatabaseType::Olap, C::Int16 | C::UInt8) => "SMALLINT",
            (DatabaseType::Olap, C::Int32 | C::UInt16) => "INT",
            (DatabaseType::Olap, C::Int64 | C::UInt32) => "BIGINT",
            (DatabaseType::Olap, C::UInt64) => "LARGEINT",
            (DatabaseType::Olap, C::Float32) => "FLOAT",
            (DatabaseType::Olap, C::Float64) => "DOUBLE",
            (DatabaseType::Olap, C::Utf8) => "VARCHAR(65533)",
            (DatabaseType::Olap, C::LargeUtf8 | C::Binary) => "STRING",
            (DatabaseType::Olap, C::Date32) => "DATE",
            (DatabaseType::Olap, C::Timestamp(_)) => "DATETIME(6)",
        };
        fixed.to_string()
    }

    /// Column definitions for CREATE TABLE
    pub fn column_defs(&self, schema: &CanonicalSchema) -> Vec<ColumnDef> {
        schema
            .columns()
            .iter()
            .map(|c| ColumnDef::new(&c.name, self.from_canonical(&c.data_type)))
            .collect()
    }
}

/// Renormalize a decimal literal to exactly `scale` fractional digits.
///
/// Extra digits are truncated, missing ones zero-padded. Returns `None`
/// when `raw` is not a decimal number.
///
/// ```
/// use polygate_bridge::type_bridge::normalize_decimal;
///
/// assert_eq!(normalize_decimal("123", 4).as_deref(), Some("123.0000"));
/// assert_eq!(normalize_decimal("123.456789", 2).as_deref(), Some("123.45"));
/// assert_eq!(normalize_decimal("5", 0).as_deref(), Some("5"));
/// ```
pub fn normalize_decimal(raw: &str, scale: u32) -> Option<String> {
    let s = raw.trim();
    if s.contains(['e', 'E']) {
        let expanded = rust_decimal::Decimal::from_scientific(s).ok()?;
        return normalize_decimal(&expanded.to_string(), scale);
    }

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let int_part = match int_part.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let scale = scale as usize;
    let mut frac: String = frac_part.chars().take(scale).collect();
    while frac.len() < scale {
        frac.push('0');
    }

    let is_zero = int_part == "0" && frac.bytes().all(|b| b == b'0');
    let mut out = String::with_capacity(int_part.len() + frac.len() + 2);
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(int_part);
    if scale > 0 {
        out.push('.');
        out.push_str(&frac);
    }
    Some(out)
}

/// Unscaled 128-bit mantissa for a decimal literal at `(precision, scale)`.
///
/// Returns `None` when the literal is malformed or needs more than
/// `precision` digits.
pub fn decimal_mantissa(raw: &str, precision: u8, scale: u8) -> Option<i128> {
    let normalized = normalize_decimal(raw, u32::from(scale))?;
    let digits: String = normalized.chars().filter(|c| *c != '.').collect();
    let significant = digits.trim_start_matches('-').trim_start_matches('0').len();
    if significant > usize::from(precision) {
        return None;
    }
    digits.parse::<i128>().ok()
}

//! Value coercion between driver values and Arrow columns
//!
//! Reads go row -> column: each scanned [`Value`] is appended to a
//! [`ColumnBuilder`] chosen by the column's canonical type, and the coercion
//! rule is picked by that target type, never by the variant the driver
//! happened to hand back. Writes go column -> row through [`batch_rows`].
//!
//! The default policy is permissive. A value that does not fit its target
//! is replaced by the type's default (zero, a single space, `"unsupported"`,
//! epoch 0) so one odd cell cannot fail a bulk transfer. [`CoercionPolicy::Strict`]
//! turns every such substitution into an error.

use std::borrow::Cow;
use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder, Float32Builder,
    Float64Builder, Int16Builder, Int32Builder, Int64Builder, Int8Builder, LargeStringBuilder,
    StringBuilder, TimestampMicrosecondBuilder, TimestampMillisecondBuilder,
    TimestampNanosecondBuilder, TimestampSecondBuilder, UInt16Builder, UInt32Builder,
    UInt64Builder, UInt8Builder,
};
use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{Array, ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use arrow_schema::{DataType, SchemaRef, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polygate_rdbc::types::Value;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::type_bridge::{decimal_mantissa, CanonicalColumn, CanonicalSchema, CanonicalType};

/// Substitute written for text columns when the value is NULL
pub const NULL_TEXT: &str = " ";

/// Substitute written for text columns when the value has no text form
pub const UNSUPPORTED_TEXT: &str = "unsupported";

/// What to do with a value that does not fit its column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionPolicy {
    /// Substitute the type's default and keep going
    #[default]
    Permissive,
    /// Fail the batch
    Strict,
}

/// Column identity used for diagnostics and policy decisions
#[derive(Debug, Clone)]
struct Target {
    name: String,
    data_type: CanonicalType,
    nullable: bool,
    policy: CoercionPolicy,
}

impl Target {
    /// Default for a value that did not coerce.
    ///
    /// Permissive mode returns `default`. Strict mode passes NULL through
    /// for nullable columns and rejects everything else.
    fn fallback<T>(&self, value: &Value, default: T) -> Result<Option<T>> {
        match self.policy {
            CoercionPolicy::Permissive => {
                if !value.is_null() {
                    warn!(
                        column = %self.name,
                        target = %self.data_type,
                        found = value.kind(),
                        "Value does not fit column, substituting default"
                    );
                }
                Ok(Some(default))
            }
            CoercionPolicy::Strict if value.is_null() && self.nullable => Ok(None),
            CoercionPolicy::Strict => Err(self.reject(value)),
        }
    }

    fn reject(&self, value: &Value) -> BridgeError {
        BridgeError::Coercion {
            column: self.name.clone(),
            target: self.data_type.to_string(),
            found: value.kind().to_string(),
        }
    }

    /// NULL for temporal columns: passes through except for strict non-nullable columns
    fn temporal_null<T>(&self, value: &Value) -> Result<Option<T>> {
        if self.policy == CoercionPolicy::Strict && !self.nullable {
            return Err(self.reject(value));
        }
        Ok(None)
    }

    fn int<T>(&self, value: &Value) -> Result<Option<T>>
    where
        T: TryFrom<i64> + TryFrom<u64> + Default,
    {
        let coerced = match value {
            Value::Null => None,
            Value::UInt64(n) => <T as TryFrom<u64>>::try_from(*n).ok(),
            Value::String(_) | Value::Bytes(_) => value.as_str().and_then(parse_int_text::<T>),
            Value::Float32(f) => float_to_int(f64::from(*f)),
            Value::Float64(f) => float_to_int(*f),
            Value::Decimal(d) if d.fract().is_zero() => {
                d.to_i64().and_then(|n| <T as TryFrom<i64>>::try_from(n).ok())
            }
            other => other.as_i64().and_then(|n| <T as TryFrom<i64>>::try_from(n).ok()),
        };
        match coerced {
            Some(v) => Ok(Some(v)),
            None => self.fallback(value, T::default()),
        }
    }

    fn float(&self, value: &Value) -> Result<Option<f64>> {
        let coerced = match value {
            Value::String(_) | Value::Bytes(_) => value.as_str().and_then(|s| s.trim().parse().ok()),
            Value::Bool(_) => None,
            other => other.as_f64(),
        };
        match coerced {
            Some(v) => Ok(Some(v)),
            None => self.fallback(value, 0.0),
        }
    }

    fn boolean(&self, value: &Value) -> Result<Option<bool>> {
        match value.as_bool() {
            Some(b) => Ok(Some(b)),
            None => self.fallback(value, false),
        }
    }

    fn text<'a>(&self, value: &'a Value) -> Result<Option<Cow<'a, str>>> {
        let rendered: Cow<'a, str> = match value {
            Value::Null => {
                return self
                    .fallback(value, NULL_TEXT)
                    .map(|v| v.map(Cow::Borrowed));
            }
            Value::String(s) => Cow::Borrowed(s.as_str()),
            Value::Bytes(b) => String::from_utf8_lossy(b),
            Value::Date(d) => Cow::Owned(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Cow::Owned(t.format("%H:%M:%S%.f").to_string()),
            Value::DateTime(dt) => Cow::Owned(format_datetime(dt)),
            Value::DateTimeTz(dt) => Cow::Owned(format_datetime(&dt.naive_utc())),
            Value::Json(j) => Cow::Owned(j.to_string()),
            Value::Interval(us) => Cow::Owned(format_interval(*us)),
            Value::Array(_) => {
                return self
                    .fallback(value, UNSUPPORTED_TEXT)
                    .map(|v| v.map(Cow::Borrowed));
            }
            other => match other.as_string() {
                Some(s) => Cow::Owned(s),
                None => {
                    return self
                        .fallback(value, UNSUPPORTED_TEXT)
                        .map(|v| v.map(Cow::Borrowed));
                }
            },
        };
        Ok(Some(rendered))
    }

    fn binary<'a>(&self, value: &'a Value) -> Result<Option<Cow<'a, [u8]>>> {
        match value {
            Value::Bytes(b) => Ok(Some(Cow::Borrowed(b.as_slice()))),
            Value::String(s) => Ok(Some(Cow::Borrowed(s.as_bytes()))),
            other => Ok(self
                .fallback(other, &[][..])?
                .map(Cow::Borrowed)),
        }
    }

    fn decimal(&self, value: &Value, precision: u8, scale: u8) -> Result<Option<i128>> {
        let literal: Option<Cow<'_, str>> = match value {
            Value::Decimal(d) => Some(Cow::Owned(d.to_string())),
            Value::String(_) | Value::Bytes(_) => value.as_str().map(Cow::Borrowed),
            Value::Float32(f) => Some(Cow::Owned(f.to_string())),
            Value::Float64(f) => Some(Cow::Owned(f.to_string())),
            Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) | Value::UInt64(_) => {
                value.as_string().map(Cow::Owned)
            }
            _ => None,
        };
        match literal.and_then(|l| decimal_mantissa(&l, precision, scale)) {
            Some(m) => Ok(Some(m)),
            None => self.fallback(value, 0),
        }
    }

    fn timestamp(&self, value: &Value, unit: TimeUnit) -> Result<Option<i64>> {
        let instant = match value {
            Value::Null => return self.fallback(value, 0),
            Value::DateTime(dt) => Some(*dt),
            Value::DateTimeTz(dt) => Some(dt.naive_utc()),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::String(_) | Value::Bytes(_) => {
                let text = value.as_str().unwrap_or_default();
                match parse_datetime_text(text) {
                    Some(dt) => Some(dt),
                    None if self.policy == CoercionPolicy::Strict => return Err(self.reject(value)),
                    None => {
                        warn!(column = %self.name, value = %text, "Unparseable timestamp, using epoch 0");
                        return Ok(Some(0));
                    }
                }
            }
            _ => None,
        };
        let Some(instant) = instant else {
            return self.fallback(value, 0);
        };
        let utc = instant.and_utc();
        let ticks = match unit {
            TimeUnit::Second => Some(utc.timestamp()),
            TimeUnit::Millisecond => Some(utc.timestamp_millis()),
            TimeUnit::Microsecond => Some(utc.timestamp_micros()),
            TimeUnit::Nanosecond => utc.timestamp_nanos_opt(),
        };
        match ticks {
            Some(t) => Ok(Some(t)),
            None => self.fallback(value, 0),
        }
    }

    fn date(&self, value: &Value) -> Result<Option<i32>> {
        let date = match value {
            Value::Null => return self.temporal_null(value),
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::DateTimeTz(dt) => Some(dt.date_naive()),
            Value::String(_) | Value::Bytes(_) => value.as_str().and_then(parse_date_text),
            _ => None,
        };
        match date {
            Some(d) => Ok(Some(days_since_epoch(d))),
            None if self.policy == CoercionPolicy::Strict => Err(self.reject(value)),
            None => {
                warn!(column = %self.name, found = value.kind(), "Unparseable date, writing NULL");
                Ok(None)
            }
        }
    }
}

fn parse_int_text<T: TryFrom<i64> + TryFrom<u64>>(s: &str) -> Option<T> {
    let s = s.trim();
    match s.parse::<i64>() {
        Ok(n) => <T as TryFrom<i64>>::try_from(n).ok(),
        Err(_) => s
            .parse::<u64>()
            .ok()
            .and_then(|n| <T as TryFrom<u64>>::try_from(n).ok()),
    }
}

fn float_to_int<T: TryFrom<i64>>(f: f64) -> Option<T> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        T::try_from(f as i64).ok()
    } else {
        None
    }
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

fn format_interval(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let secs = abs / 1_000_000;
    let frac = abs % 1_000_000;
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if frac == 0 {
        format!("{}{:02}:{:02}:{:02}", sign, h, m, s)
    } else {
        format!("{}{:02}:{:02}:{:02}.{:06}", sign, h, m, s, frac)
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS[.f]` (also `T`-separated, RFC 3339, or a bare date) as UTC
pub fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime_text(text).map(|dt| dt.date()))
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    date.signed_duration_since(epoch).num_days() as i32
}

enum Builder {
    Bool(BooleanBuilder),
    Int8(Int8Builder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    UInt8(UInt8Builder),
    UInt16(UInt16Builder),
    UInt32(UInt32Builder),
    UInt64(UInt64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
    LargeUtf8(LargeStringBuilder),
    Binary(BinaryBuilder),
    Decimal(Decimal128Builder, u8, u8),
    Date32(Date32Builder),
    TsSecond(TimestampSecondBuilder),
    TsMilli(TimestampMillisecondBuilder),
    TsMicro(TimestampMicrosecondBuilder),
    TsNano(TimestampNanosecondBuilder),
}

/// Append-only builder for one canonical column
pub struct ColumnBuilder {
    target: Target,
    inner: Builder,
    len: usize,
}

impl ColumnBuilder {
    pub fn new(column: &CanonicalColumn, capacity: usize, policy: CoercionPolicy) -> Result<Self> {
        let inner = match column.data_type {
            CanonicalType::Bool => Builder::Bool(BooleanBuilder::with_capacity(capacity)),
            CanonicalType::Int8 => Builder::Int8(Int8Builder::with_capacity(capacity)),
            CanonicalType::Int16 => Builder::Int16(Int16Builder::with_capacity(capacity)),
            CanonicalType::Int32 => Builder::Int32(Int32Builder::with_capacity(capacity)),
            CanonicalType::Int64 => Builder::Int64(Int64Builder::with_capacity(capacity)),
            CanonicalType::UInt8 => Builder::UInt8(UInt8Builder::with_capacity(capacity)),
            CanonicalType::UInt16 => Builder::UInt16(UInt16Builder::with_capacity(capacity)),
            CanonicalType::UInt32 => Builder::UInt32(UInt32Builder::with_capacity(capacity)),
            CanonicalType::UInt64 => Builder::UInt64(UInt64Builder::with_capacity(capacity)),
            CanonicalType::Float32 => Builder::Float32(Float32Builder::with_capacity(capacity)),
            CanonicalType::Float64 => Builder::Float64(Float64Builder::with_capacity(capacity)),
            CanonicalType::Utf8 => Builder::Utf8(StringBuilder::with_capacity(capacity, capacity * 16)),
            CanonicalType::LargeUtf8 => {
                Builder::LargeUtf8(LargeStringBuilder::with_capacity(capacity, capacity * 32))
            }
            CanonicalType::Binary => Builder::Binary(BinaryBuilder::with_capacity(capacity, capacity * 16)),
            CanonicalType::Decimal128 { precision, scale } => Builder::Decimal(
                Decimal128Builder::with_capacity(capacity)
                    .with_precision_and_scale(precision, scale as i8)?,
                precision,
                scale,
            ),
            CanonicalType::Date32 => Builder::Date32(Date32Builder::with_capacity(capacity)),
            CanonicalType::Timestamp(TimeUnit::Second) => {
                Builder::TsSecond(TimestampSecondBuilder::with_capacity(capacity))
            }
            CanonicalType::Timestamp(TimeUnit::Millisecond) => {
                Builder::TsMilli(TimestampMillisecondBuilder::with_capacity(capacity))
            }
            CanonicalType::Timestamp(TimeUnit::Microsecond) => {
                Builder::TsMicro(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
            CanonicalType::Timestamp(TimeUnit::Nanosecond) => {
                Builder::TsNano(TimestampNanosecondBuilder::with_capacity(capacity))
            }
        };
        Ok(Self {
            target: Target {
                name: column.name.clone(),
                data_type: column.data_type,
                nullable: column.nullable,
                policy,
            },
            inner,
            len: 0,
        })
    }

    /// Coerce `value` into this column's type and append it
    pub fn append(&mut self, value: &Value) -> Result<()> {
        let t = &self.target;
        match &mut self.inner {
            Builder::Bool(b) => b.append_option(t.boolean(value)?),
            Builder::Int8(b) => b.append_option(t.int::<i8>(value)?),
            Builder::Int16(b) => b.append_option(t.int::<i16>(value)?),
            Builder::Int32(b) => b.append_option(t.int::<i32>(value)?),
            Builder::Int64(b) => b.append_option(t.int::<i64>(value)?),
            Builder::UInt8(b) => b.append_option(t.int::<u8>(value)?),
            Builder::UInt16(b) => b.append_option(t.int::<u16>(value)?),
            Builder::UInt32(b) => b.append_option(t.int::<u32>(value)?),
            Builder::UInt64(b) => b.append_option(t.int::<u64>(value)?),
            Builder::Float32(b) => b.append_option(t.float(value)?.map(|f| f as f32)),
            Builder::Float64(b) => b.append_option(t.float(value)?),
            Builder::Utf8(b) => b.append_option(t.text(value)?),
            Builder::LargeUtf8(b) => b.append_option(t.text(value)?),
            Builder::Binary(b) => b.append_option(t.binary(value)?),
            Builder::Decimal(b, precision, scale) => {
                b.append_option(t.decimal(value, *precision, *scale)?)
            }
            Builder::Date32(b) => b.append_option(t.date(value)?),
            Builder::TsSecond(b) => b.append_option(t.timestamp(value, TimeUnit::Second)?),
            Builder::TsMilli(b) => b.append_option(t.timestamp(value, TimeUnit::Millisecond)?),
            Builder::TsMicro(b) => b.append_option(t.timestamp(value, TimeUnit::Microsecond)?),
            Builder::TsNano(b) => b.append_option(t.timestamp(value, TimeUnit::Nanosecond)?),
        }
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Freeze the appended values into an array and reset the builder
    pub fn finish(&mut self) -> ArrayRef {
        self.len = 0;
        match &mut self.inner {
            Builder::Bool(b) => Arc::new(b.finish()),
            Builder::Int8(b) => Arc::new(b.finish()),
            Builder::Int16(b) => Arc::new(b.finish()),
            Builder::Int32(b) => Arc::new(b.finish()),
            Builder::Int64(b) => Arc::new(b.finish()),
            Builder::UInt8(b) => Arc::new(b.finish()),
            Builder::UInt16(b) => Arc::new(b.finish()),
            Builder::UInt32(b) => Arc::new(b.finish()),
            Builder::UInt64(b) => Arc::new(b.finish()),
            Builder::Float32(b) => Arc::new(b.finish()),
            Builder::Float64(b) => Arc::new(b.finish()),
            Builder::Utf8(b) => Arc::new(b.finish()),
            Builder::LargeUtf8(b) => Arc::new(b.finish()),
            Builder::Binary(b) => Arc::new(b.finish()),
            Builder::Decimal(b, _, _) => Arc::new(b.finish()),
            Builder::Date32(b) => Arc::new(b.finish()),
            Builder::TsSecond(b) => Arc::new(b.finish()),
            Builder::TsMilli(b) => Arc::new(b.finish()),
            Builder::TsMicro(b) => Arc::new(b.finish()),
            Builder::TsNano(b) => Arc::new(b.finish()),
        }
    }
}

/// Row-to-column batch builder for one canonical schema
pub struct BatchBuilder {
    arrow: SchemaRef,
    columns: Vec<ColumnBuilder>,
    rows: usize,
}

impl BatchBuilder {
    pub fn new(schema: &CanonicalSchema, capacity: usize, policy: CoercionPolicy) -> Result<Self> {
        let columns = schema
            .columns()
            .iter()
            .map(|c| ColumnBuilder::new(c, capacity, policy))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            arrow: schema.to_arrow(),
            columns,
            rows: 0,
        })
    }

    /// Arrow schema of the batches this builder produces
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.arrow)
    }

    /// Append one row; a row with the wrong arity is rejected before any column is touched
    pub fn append_row(&mut self, values: &[Value]) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(polygate_rdbc::Error::schema(format!(
                "row has {} values, schema has {} columns",
                values.len(),
                self.columns.len()
            ))
            .into());
        }
        for (builder, value) in self.columns.iter_mut().zip(values) {
            builder.append(value)?;
        }
        self.rows += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Freeze appended rows into a batch and start over
    pub fn finish(&mut self) -> Result<RecordBatch> {
        let arrays: Vec<ArrayRef> = self.columns.iter_mut().map(|c| c.finish()).collect();
        let options = RecordBatchOptions::new().with_row_count(Some(self.rows));
        self.rows = 0;
        Ok(RecordBatch::try_new_with_options(
            Arc::clone(&self.arrow),
            arrays,
            &options,
        )?)
    }
}

macro_rules! primitive_values {
    ($array:expr, $ty:ty, $map:expr) => {
        $array
            .as_primitive::<$ty>()
            .iter()
            .map(|v| v.map($map).unwrap_or(Value::Null))
            .collect()
    };
}

macro_rules! temporal_values {
    ($array:expr, $ty:ty, $convert:ident, $variant:expr) => {{
        let typed = $array.as_primitive::<$ty>();
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    Value::Null
                } else {
                    typed.$convert(i).map($variant).unwrap_or(Value::Null)
                }
            })
            .collect()
    }};
}

/// Decode one Arrow column into driver values.
///
/// Types outside the canonical set are rendered as text.
pub fn column_values(array: &ArrayRef) -> Result<Vec<Value>> {
    let values: Vec<Value> = match array.data_type() {
        DataType::Boolean => array
            .as_boolean()
            .iter()
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null))
            .collect(),
        DataType::Int8 => primitive_values!(array, Int8Type, Value::Int8),
        DataType::Int16 => primitive_values!(array, Int16Type, Value::Int16),
        DataType::Int32 => primitive_values!(array, Int32Type, Value::Int32),
        DataType::Int64 => primitive_values!(array, Int64Type, Value::Int64),
        DataType::UInt8 => primitive_values!(array, UInt8Type, |v| Value::Int16(i16::from(v))),
        DataType::UInt16 => primitive_values!(array, UInt16Type, |v| Value::Int32(i32::from(v))),
        DataType::UInt32 => primitive_values!(array, UInt32Type, |v| Value::Int64(i64::from(v))),
        DataType::UInt64 => primitive_values!(array, UInt64Type, Value::UInt64),
        DataType::Float32 => primitive_values!(array, Float32Type, Value::Float32),
        DataType::Float64 => primitive_values!(array, Float64Type, Value::Float64),
        DataType::Utf8 => array
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        DataType::LargeUtf8 => array
            .as_string::<i64>()
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        DataType::Binary => array
            .as_binary::<i32>()
            .iter()
            .map(|v| v.map(|b| Value::Bytes(b.to_vec())).unwrap_or(Value::Null))
            .collect(),
        DataType::Decimal128(_, scale) if *scale >= 0 => {
            let typed = array.as_primitive::<arrow_array::types::Decimal128Type>();
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        return Value::Null;
                    }
                    Decimal::try_from_i128_with_scale(typed.value(i), *scale as u32)
                        .map(Value::Decimal)
                        .unwrap_or_else(|_| Value::String(typed.value_as_string(i)))
                })
                .collect()
        }
        DataType::Date32 => temporal_values!(array, Date32Type, value_as_date, Value::Date),
        DataType::Timestamp(TimeUnit::Second, _) => {
            temporal_values!(array, TimestampSecondType, value_as_datetime, Value::DateTime)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            temporal_values!(array, TimestampMillisecondType, value_as_datetime, Value::DateTime)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            temporal_values!(array, TimestampMicrosecondType, value_as_datetime, Value::DateTime)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            temporal_values!(array, TimestampNanosecondType, value_as_datetime, Value::DateTime)
        }
        _ => {
            let options = FormatOptions::default();
            let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
            (0..array.len())
                .map(|i| {
                    if array.is_null(i) {
                        Value::Null
                    } else {
                        Value::String(formatter.value(i).to_string())
                    }
                })
                .collect()
        }
    };
    Ok(values)
}

/// Decode a batch into row-major values ready for binding
pub fn batch_rows(batch: &RecordBatch) -> Result<Vec<Vec<Value>>> {
    let mut columns = batch
        .columns()
        .iter()
        .map(|c| column_values(c).map(Vec::into_iter))
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for _ in 0..batch.num_rows() {
        let row = columns
            .iter_mut()
            .map(|c| c.next().unwrap_or(Value::Null))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

//! Row budget estimation for outbound batches
//!
//! The estimate is computed from column types alone, before the first row
//! is read, so the very first pull from a cursor is already sized to fit
//! under the transport ceiling.

use crate::type_bridge::CanonicalType;

/// Bytes assumed per row for variable-length columns
pub const VARIABLE_WIDTH_BYTES: usize = 100;

/// Bytes assumed per row for types with no known width
pub const DEFAULT_WIDTH_BYTES: usize = 8;

/// Columnar framing overhead applied to the raw estimate
pub const FRAMING_OVERHEAD: f64 = 1.2;

/// Default soft ceiling for one outbound batch (3 MiB)
pub const DEFAULT_SOFT_LIMIT_BYTES: usize = 3 * 1024 * 1024;

/// Estimated bytes one value of `ty` occupies
pub fn value_width(ty: &CanonicalType) -> usize {
    match ty {
        CanonicalType::Utf8 | CanonicalType::LargeUtf8 | CanonicalType::Binary => {
            VARIABLE_WIDTH_BYTES
        }
        CanonicalType::Bool | CanonicalType::Int8 | CanonicalType::UInt8 => 1,
        CanonicalType::Int16 | CanonicalType::UInt16 => 2,
        CanonicalType::Int32 | CanonicalType::UInt32 | CanonicalType::Float32 | CanonicalType::Date32 => 4,
        CanonicalType::Int64
        | CanonicalType::UInt64
        | CanonicalType::Float64
        | CanonicalType::Timestamp(_) => 8,
        CanonicalType::Decimal128 { .. } => 16,
    }
}

/// Computes how many rows fit into one outbound batch
#[derive(Debug, Clone, Copy)]
pub struct BatchSizer {
    max_message_bytes: usize,
}

impl Default for BatchSizer {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_LIMIT_BYTES)
    }
}

impl BatchSizer {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            max_message_bytes: max_message_bytes.max(1),
        }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Estimated bytes per row for a column layout
    pub fn row_bytes(&self, types: &[CanonicalType]) -> usize {
        types.iter().map(value_width).sum()
    }

    /// Scale `requested_rows` down so the estimated batch stays under the ceiling.
    ///
    /// Never returns less than one row for a non-zero request.
    pub fn estimate(&self, types: &[CanonicalType], requested_rows: usize) -> usize {
        let per_row = match self.row_bytes(types) {
            0 => DEFAULT_WIDTH_BYTES,
            n => n,
        };
        let estimated = per_row as f64 * requested_rows as f64 * FRAMING_OVERHEAD;
        if estimated <= self.max_message_bytes as f64 {
            return requested_rows;
        }
        let adjusted = requested_rows as f64 * (self.max_message_bytes as f64 / estimated);
        (adjusted as usize).max(1).min(requested_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::TimeUnit;

    const TEXT_AND_INTS: &[CanonicalType] = &[
        CanonicalType::Utf8,
        CanonicalType::Int32,
        CanonicalType::Int32,
    ];

    #[test]
    fn test_row_bytes() {
        let sizer = BatchSizer::default();
        assert_eq!(sizer.row_bytes(TEXT_AND_INTS), 108);
        assert_eq!(
            sizer.row_bytes(&[CanonicalType::Timestamp(TimeUnit::Microsecond), CanonicalType::Bool]),
            9
        );
    }

    #[test]
    fn test_under_ceiling_is_unchanged() {
        let sizer = BatchSizer::default();
        // 108 * 20000 * 1.2 = 2.59 MB < 3 MiB
        assert_eq!(sizer.estimate(TEXT_AND_INTS, 20_000), 20_000);
    }

    #[test]
    fn test_estimate_respects_ceiling() {
        let sizer = BatchSizer::new(1_000_000);
        let rows = sizer.estimate(TEXT_AND_INTS, 20_000);
        let bytes = 108.0 * rows as f64 * FRAMING_OVERHEAD;
        assert!(bytes <= 1_000_000.0);
        assert!(rows > 7_000);
    }

    #[test]
    fn test_halving_ceiling_halves_rows() {
        let full = BatchSizer::new(1_000_000).estimate(TEXT_AND_INTS, 20_000);
        let half = BatchSizer::new(500_000).estimate(TEXT_AND_INTS, 20_000);
        let ratio = full as f64 / half as f64;
        assert!((1.95..=2.05).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn test_minimum_one_row() {
        let sizer = BatchSizer::new(10);
        assert_eq!(sizer.estimate(&[CanonicalType::LargeUtf8; 50], 1_000), 1);
        assert_eq!(sizer.estimate(&[], 0), 0);
    }
}

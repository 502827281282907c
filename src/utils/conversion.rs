//! Decimal conversion and serialization helpers.
//!
//! Monetary sums are carried as `BigDecimal` end to end. Postgres `NUMERIC`
//! aggregates are selected as text and parsed here, and values are only
//! narrowed to `f64` when written to JSON.

use bigdecimal::BigDecimal;
use log::warn;
use num_traits::{ToPrimitive, Zero};
use serde::Serializer;
use std::str::FromStr;

// ============================================
// Parsing
// ============================================

/// Parse a decimal string as produced by `NUMERIC::text`.
///
/// `None` and empty strings read as zero (`SUM` over no rows yields NULL).
/// Returns `None` only for malformed input.
pub fn parse_decimal(value: Option<&str>) -> Option<BigDecimal> {
    match value.map(str::trim) {
        None | Some("") => Some(BigDecimal::zero()),
        Some(text) => BigDecimal::from_str(text).ok(),
    }
}

// ============================================
// Serialization
// ============================================

/// Convert a decimal to a finite f64, saturating to `f64::MAX` / `f64::MIN`
/// when it is out of range.
pub fn decimal_to_f64(value: &BigDecimal) -> f64 {
    match value.to_f64() {
        Some(v) if v.is_finite() => v,
        _ => {
            warn!("Decimal {} does not fit in f64, saturating", value);
            if *value < BigDecimal::zero() {
                f64::MIN
            } else {
                f64::MAX
            }
        },
    }
}

/// Serialize a decimal as a JSON number rather than a string.
pub fn serialize_decimal<S>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(decimal_to_f64(value))
}

//! Utility functions shared by the engine, sources and API.
//!
//! - [`conversion`] - Decimal parsing and JSON number serialization

mod conversion;

// ============================================
// Re-exports
// ============================================

pub use conversion::{decimal_to_f64, parse_decimal, serialize_decimal};

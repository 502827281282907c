//! Temporal aggregation engine.
//!
//! - [`range`] - Range tokens to concrete `[start, end)` windows
//! - [`granularity`] - Valid granularities per range and snapping
//! - [`bucket`] - Bucket keys, truncation SQL and labels
//! - [`merge`] - Fan-in of per-source rows
//! - [`ranking`] - Top asset paths by metric
//! - [`service`] - Request orchestration over all sources

pub mod bucket;
mod error;
mod granularity;
mod merge;
mod range;
mod ranking;
mod service;

// ============================================
// Re-exports
// ============================================

pub use bucket::BucketKey;
pub use error::{EngineError, EngineResult};
pub use granularity::{Granularity, GranularityPolicy, GranularitySet, GranularityThresholds};
pub use merge::{
    merge, merge_breakdown, merge_stacked, merge_totals, AggregatedPoint, BucketRow,
    DimensionTotals, SourceTotals, StackedPoint,
};
pub use range::{RangeKind, RangeResolver, TimeRange};
pub use ranking::{rank_paths, PathTotals, RankMetric, DEFAULT_PATH_LIMIT, MAX_PATH_LIMIT};
pub use service::{
    split_list, AnalyticsEngine, AnalyticsRequest, AnalyticsResponse, BreakdownResponse,
    RangeSummary, SourceSummary, StackedResponse, SummaryResponse, TopPathsResponse,
};

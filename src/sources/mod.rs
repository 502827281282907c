//! Source adapters.
//!
//! Every data source is exposed through [`SourceAdapter`], which maps the
//! source's own columns onto the engine's record shape (timestamp, volume,
//! fee, dimension). Each adapter owns a fixed row filter that callers cannot
//! change; totals, series and breakdowns of one source always share it.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::{
    BucketRow, DimensionTotals, EngineError, EngineResult, Granularity, SourceTotals, TimeRange,
};

mod aggregator_revenue;
mod memory;
mod native_swaps;
mod sql;

pub use aggregator_revenue::AGGREGATOR_REVENUE;
pub use memory::{MemorySource, SourceRecord};
pub use native_swaps::{EXCLUDED_PROVIDER, NATIVE_SWAPS};
pub use sql::{SourceSpec, SqlParam, SqlQuery, SqlSource};

/// Axis a source can be broken down or filtered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Provider,
    Platform,
    Chain,
    /// Asset pair as `"<in> -> <out>"`.
    Path,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Provider => "provider",
            Dimension::Platform => "platform",
            Dimension::Chain => "chain",
            Dimension::Path => "path",
        }
    }
}

impl FromStr for Dimension {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provider" | "source" => Ok(Dimension::Provider),
            "platform" => Ok(Dimension::Platform),
            "chain" => Ok(Dimension::Chain),
            "path" => Ok(Dimension::Path),
            _ => Err(EngineError::InvalidDimension(format!(
                "unknown dimension '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restricts a query to rows whose dimension equals any of `values`.
///
/// Values are stored lowercased and matched case-insensitively. An empty
/// set admits no row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionFilter {
    pub dimension: Dimension,
    pub values: Vec<String>,
}

impl DimensionFilter {
    pub fn new(dimension: Dimension, value: &str) -> Self {
        Self::any_of(dimension, [value])
    }

    pub fn any_of<'a, I>(dimension: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut values: Vec<String> = values
            .into_iter()
            .map(|value| value.trim().to_lowercase())
            .collect();
        values.sort();
        values.dedup();
        Self { dimension, values }
    }

    pub fn provider(value: &str) -> Self {
        Self::new(Dimension::Provider, value)
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.to_lowercase();
        self.values.iter().any(|value| *value == candidate)
    }

    /// Keep only the values both filters admit.
    pub fn intersect(mut self, other: &DimensionFilter) -> Self {
        self.values.retain(|value| other.values.contains(value));
        self
    }
}

/// Read-only access to one data source.
///
/// Implementations do not retry; a failed read is reported as
/// [`EngineError::DataUnavailable`].
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Volume and revenue per bucket over `range`.
    async fn fetch_bucketed(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<BucketRow>>;

    /// Like [`fetch_bucketed`](Self::fetch_bucketed) with rows split by `dimension`.
    async fn fetch_stacked(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        dimension: Dimension,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<BucketRow>>;

    async fn fetch_totals(
        &self,
        range: &TimeRange,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<SourceTotals>;

    async fn fetch_breakdown(
        &self,
        range: &TimeRange,
        dimension: Dimension,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<DimensionTotals>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filter_values_are_normalized() {
        let filter = DimensionFilter::any_of(Dimension::Provider, [" THORChain", "lifi", "LiFi"]);
        assert_eq!(filter.values, vec!["lifi".to_string(), "thorchain".to_string()]);
        assert!(filter.matches("ThorChain"));
        assert!(!filter.matches("mayachain"));
    }

    #[test]
    fn test_intersection_can_admit_nothing() {
        let listed = DimensionFilter::any_of(Dimension::Provider, ["thorchain", "lifi"]);
        let single = DimensionFilter::provider("LIFI");
        assert_eq!(single.clone().intersect(&listed).values, vec!["lifi".to_string()]);

        let disjoint = DimensionFilter::provider("mayachain").intersect(&listed);
        assert!(disjoint.values.is_empty());
        assert!(!disjoint.matches("mayachain"));
    }

    #[test]
    fn test_dimension_tokens() {
        assert_eq!("Path".parse::<Dimension>().unwrap(), Dimension::Path);
        assert_eq!("source".parse::<Dimension>().unwrap(), Dimension::Provider);
        assert!(matches!(
            "token".parse::<Dimension>(),
            Err(EngineError::InvalidDimension(_))
        ));
    }
}

//! Request orchestration.
//!
//! Validates the request (range, then granularity), fans the queries out to
//! every source concurrently and merges the results. Validation finishes
//! before any source is queried.

use std::{future::Future, sync::Arc, time::Duration};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use log::{debug, error, info};
use serde::Serialize;

use super::{
    error::{EngineError, EngineResult},
    granularity::{Granularity, GranularityPolicy, GranularitySet},
    merge::{
        merge, merge_breakdown, merge_stacked, merge_totals, AggregatedPoint, DimensionTotals,
        SourceTotals, StackedPoint,
    },
    range::{RangeKind, RangeResolver, TimeRange},
    ranking::{rank_paths, PathTotals, RankMetric, DEFAULT_PATH_LIMIT, MAX_PATH_LIMIT},
};
use crate::{
    config::EngineSettings,
    sources::{Dimension, DimensionFilter, SourceAdapter},
    utils::serialize_decimal,
};

/// Range used when a request names none.
pub const DEFAULT_RANGE: &str = "all";

/// Query parameters of an analytics request, unvalidated.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsRequest {
    pub range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub granularity: Option<String>,
    pub provider: Option<String>,
    /// Any of these providers. Combined with `provider`, both must hold.
    pub providers: Vec<String>,
}

impl AnalyticsRequest {
    pub fn new(range: &str) -> Self {
        Self {
            range: Some(range.to_string()),
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, start_date: &str, end_date: &str) -> Self {
        self.start_date = Some(start_date.to_string());
        self.end_date = Some(end_date.to_string());
        self
    }

    pub fn with_granularity(mut self, granularity: &str) -> Self {
        self.granularity = Some(granularity.to_string());
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    /// Comma-separated provider list, e.g. `thorchain,lifi`.
    pub fn with_providers(mut self, providers: &str) -> Self {
        self.providers = split_list(providers);
        self
    }

    fn filter(&self) -> Option<DimensionFilter> {
        let single = self
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|provider| !provider.is_empty())
            .map(DimensionFilter::provider);
        let listed = (!self.providers.is_empty()).then(|| {
            DimensionFilter::any_of(Dimension::Provider, self.providers.iter().map(String::as_str))
        });
        match (single, listed) {
            (Some(single), Some(listed)) => Some(single.intersect(&listed)),
            (single, listed) => single.or(listed),
        }
    }
}

/// Non-empty trimmed items of a comma-separated list.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeSummary {
    pub kind: RangeKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<&TimeRange> for RangeSummary {
    fn from(range: &TimeRange) -> Self {
        Self {
            kind: range.kind,
            start: range.lower_bound(),
            end: range.end,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub range: RangeSummary,
    pub granularity: Granularity,
    pub valid_granularities: GranularitySet,
    pub stats: SourceTotals,
    pub series: Vec<AggregatedPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakdownResponse {
    pub range: RangeSummary,
    pub dimension: Dimension,
    pub items: Vec<DimensionTotals>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackedResponse {
    pub range: RangeSummary,
    pub granularity: Granularity,
    pub dimension: Dimension,
    pub series: Vec<StackedPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopPathsResponse {
    pub range: RangeSummary,
    pub metric: RankMetric,
    pub items: Vec<PathTotals>,
}

/// Totals of one source, before merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub name: String,
    #[serde(flatten)]
    pub stats: SourceTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub range: RangeSummary,
    pub stats: SourceTotals,
    /// UTC days with at least one admitted row in any source.
    pub active_days: i64,
    #[serde(serialize_with = "serialize_decimal")]
    pub avg_daily_volume: BigDecimal,
    #[serde(serialize_with = "serialize_decimal")]
    pub avg_daily_fees: BigDecimal,
    pub sources: Vec<SourceSummary>,
}

/// Entry point of the engine. Holds no per-request state.
pub struct AnalyticsEngine {
    sources: Vec<Arc<dyn SourceAdapter>>,
    resolver: RangeResolver,
    policy: GranularityPolicy,
    query_timeout: Duration,
}

impl AnalyticsEngine {
    pub fn new(settings: &EngineSettings, sources: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            sources,
            resolver: RangeResolver::new(settings.history_start),
            policy: GranularityPolicy::new(settings.granularity),
            query_timeout: Duration::from_secs(settings.query_timeout_secs),
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    pub fn policy(&self) -> &GranularityPolicy {
        &self.policy
    }

    pub async fn analytics(&self, request: &AnalyticsRequest) -> EngineResult<AnalyticsResponse> {
        self.analytics_at(request, Utc::now()).await
    }

    /// Stats and series for `request`, resolved against `now`.
    pub async fn analytics_at(
        &self,
        request: &AnalyticsRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<AnalyticsResponse> {
        let started = std::time::Instant::now();
        let range = self.resolve(request, now)?;
        let granularity = self.granularity(request, &range)?;
        let filter = request.filter();

        let (series, stats) = futures::try_join!(
            self.series(&range, granularity, filter.as_ref()),
            self.totals(&range, filter.as_ref()),
        )?;

        info!(
            "Served analytics {} at {} in {:?} ({} points, {} sources)",
            range.kind,
            granularity,
            started.elapsed(),
            series.len(),
            self.sources.len()
        );

        Ok(AnalyticsResponse {
            range: RangeSummary::from(&range),
            granularity,
            valid_granularities: self.policy.valid_granularities(&range),
            stats,
            series,
        })
    }

    /// Merged series at exactly `granularity`.
    ///
    /// Unlike [`analytics`](Self::analytics) an illegal pairing is rejected
    /// with [`EngineError::InvalidGranularity`] instead of snapped.
    pub async fn series_at(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<AggregatedPoint>> {
        let granularity = self.policy.check(range, granularity)?;
        self.series(range, granularity, filter).await
    }

    /// Combined totals of every source.
    pub async fn totals(
        &self,
        range: &TimeRange,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<SourceTotals> {
        let per_source = self.source_totals(range, filter).await?;
        Ok(merge_totals(per_source.into_iter().map(|source| source.stats)))
    }

    pub async fn summary(&self, request: &AnalyticsRequest) -> EngineResult<SummaryResponse> {
        self.summary_at(request, Utc::now()).await
    }

    /// Totals with per-source detail and daily averages over active days.
    pub async fn summary_at(
        &self,
        request: &AnalyticsRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<SummaryResponse> {
        let range = self.resolve(request, now)?;
        let filter = request.filter();

        // day buckets only exist where some source has rows
        let (sources, days) = futures::try_join!(
            self.source_totals(&range, filter.as_ref()),
            self.series(&range, Granularity::Day, filter.as_ref()),
        )?;
        let stats = merge_totals(sources.iter().map(|source| source.stats.clone()));
        let active_days = days.len() as i64;
        let divisor = BigDecimal::from(active_days.max(1));

        Ok(SummaryResponse {
            range: RangeSummary::from(&range),
            avg_daily_volume: stats.total_volume.clone() / divisor.clone(),
            avg_daily_fees: stats.total_fees.clone() / divisor,
            active_days,
            stats,
            sources,
        })
    }

    pub async fn breakdown(
        &self,
        request: &AnalyticsRequest,
        dimension: Dimension,
    ) -> EngineResult<BreakdownResponse> {
        self.breakdown_at(request, dimension, Utc::now()).await
    }

    pub async fn breakdown_at(
        &self,
        request: &AnalyticsRequest,
        dimension: Dimension,
        now: DateTime<Utc>,
    ) -> EngineResult<BreakdownResponse> {
        let range = self.resolve(request, now)?;
        let filter = request.filter();

        let streams = try_join_all(self.sources.iter().map(|source| {
            self.guarded(
                source.name(),
                source.fetch_breakdown(&range, dimension, filter.as_ref()),
            )
        }))
        .await?;

        Ok(BreakdownResponse {
            range: RangeSummary::from(&range),
            dimension,
            items: merge_breakdown(streams),
        })
    }

    pub async fn stacked(
        &self,
        request: &AnalyticsRequest,
        dimension: Dimension,
    ) -> EngineResult<StackedResponse> {
        self.stacked_at(request, dimension, Utc::now()).await
    }

    /// Series split by `dimension`, one point per bucket and dimension value.
    pub async fn stacked_at(
        &self,
        request: &AnalyticsRequest,
        dimension: Dimension,
        now: DateTime<Utc>,
    ) -> EngineResult<StackedResponse> {
        let range = self.resolve(request, now)?;
        let granularity = self.granularity(request, &range)?;
        let filter = request.filter();

        let streams = try_join_all(self.sources.iter().map(|source| {
            self.guarded(
                source.name(),
                source.fetch_stacked(&range, granularity, dimension, filter.as_ref()),
            )
        }))
        .await?;

        Ok(StackedResponse {
            range: RangeSummary::from(&range),
            granularity,
            dimension,
            series: merge_stacked(granularity, streams),
        })
    }

    pub async fn top_paths(
        &self,
        request: &AnalyticsRequest,
        metric: RankMetric,
        limit: Option<usize>,
    ) -> EngineResult<TopPathsResponse> {
        self.top_paths_at(request, metric, limit, Utc::now()).await
    }

    /// Asset paths ranked by `metric`. `limit` defaults to 10 and is capped at 100.
    pub async fn top_paths_at(
        &self,
        request: &AnalyticsRequest,
        metric: RankMetric,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> EngineResult<TopPathsResponse> {
        let limit = limit.unwrap_or(DEFAULT_PATH_LIMIT).clamp(1, MAX_PATH_LIMIT);
        let breakdown = self.breakdown_at(request, Dimension::Path, now).await?;
        Ok(TopPathsResponse {
            range: breakdown.range,
            metric,
            items: rank_paths(breakdown.items, metric, limit),
        })
    }

    fn resolve(&self, request: &AnalyticsRequest, now: DateTime<Utc>) -> EngineResult<TimeRange> {
        let token = request.range.as_deref().unwrap_or(DEFAULT_RANGE);
        let range = self.resolver.resolve(
            token,
            request.start_date.as_deref(),
            request.end_date.as_deref(),
            now,
        )?;
        debug!(
            "Resolved range {} to [{}, {})",
            token,
            range.lower_bound().to_rfc3339(),
            range.end.to_rfc3339()
        );
        Ok(range)
    }

    /// Parses the requested granularity and snaps it to the range.
    fn granularity(&self, request: &AnalyticsRequest, range: &TimeRange) -> EngineResult<Granularity> {
        let requested = request
            .granularity
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .map(str::parse::<Granularity>)
            .transpose()?;
        let granularity = self.policy.snap(range, requested);
        if let Some(requested) = requested.filter(|requested| *requested != granularity) {
            debug!(
                "Granularity {} is not valid for {}, using {}",
                requested, range.kind, granularity
            );
        }
        Ok(granularity)
    }

    async fn source_totals(
        &self,
        range: &TimeRange,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<SourceSummary>> {
        try_join_all(self.sources.iter().map(|source| async move {
            let stats = self
                .guarded(source.name(), source.fetch_totals(range, filter))
                .await?;
            Ok::<_, EngineError>(SourceSummary {
                name: source.name().to_string(),
                stats,
            })
        }))
        .await
    }

    async fn series(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<AggregatedPoint>> {
        let streams = try_join_all(self.sources.iter().map(|source| {
            self.guarded(
                source.name(),
                source.fetch_bucketed(range, granularity, filter),
            )
        }))
        .await?;
        Ok(merge(granularity, streams))
    }

    async fn guarded<T>(
        &self,
        source: &str,
        query: impl Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result,
            Err(_) => {
                error!("[{}] query timed out after {:?}", source, self.query_timeout);
                Err(EngineError::data_unavailable(
                    source,
                    format!("query timed out after {:?}", self.query_timeout),
                ))
            },
        }
    }
}

//! In-process source over a fixed set of records.
//!
//! Applies the same rules as the SQL sources (UTC projection before
//! truncation, one row filter for every query, case-insensitive dimension
//! filters) and backs the engine and API tests.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, Utc};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Dimension, DimensionFilter, SourceAdapter};
use crate::engine::{
    bucket::BucketKey, BucketRow, DimensionTotals, EngineError, EngineResult, Granularity,
    SourceTotals, TimeRange,
};

#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub volume_usd: BigDecimal,
    pub fee_usd: BigDecimal,
    pub provider: Option<String>,
    pub platform: Option<String>,
    pub chain: Option<String>,
    pub actor: Option<String>,
    pub in_asset: Option<String>,
    pub out_asset: Option<String>,
}

impl SourceRecord {
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        provider: &str,
        volume_usd: BigDecimal,
        fee_usd: BigDecimal,
    ) -> Self {
        Self {
            timestamp,
            volume_usd,
            fee_usd,
            provider: Some(provider.to_string()),
            platform: None,
            chain: None,
            actor: None,
            in_asset: None,
            out_asset: None,
        }
    }

    pub fn with_chain(mut self, chain: &str) -> Self {
        self.chain = Some(chain.to_string());
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_string());
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn with_path(mut self, in_asset: &str, out_asset: &str) -> Self {
        self.in_asset = Some(in_asset.to_string());
        self.out_asset = Some(out_asset.to_string());
        self
    }

    fn dimension(&self, dimension: Dimension) -> String {
        let value = match dimension {
            Dimension::Provider => self.provider.as_deref(),
            Dimension::Platform => self.platform.as_deref(),
            Dimension::Chain => self.chain.as_deref(),
            Dimension::Path => {
                return format!(
                    "{} -> {}",
                    self.in_asset.as_deref().unwrap_or("Unknown"),
                    self.out_asset.as_deref().unwrap_or("Unknown")
                )
            },
        };
        value.unwrap_or("Unknown").to_string()
    }
}

pub struct MemorySource {
    name: String,
    records: Vec<SourceRecord>,
    excluded_providers: Vec<String>,
    failure: Option<String>,
}

impl MemorySource {
    pub fn new(name: &str, records: Vec<SourceRecord>) -> Self {
        Self {
            name: name.to_string(),
            records,
            excluded_providers: Vec::new(),
            failure: None,
        }
    }

    /// Source whose every read fails with [`EngineError::DataUnavailable`].
    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new(name, Vec::new())
        }
    }

    /// Drop records of `provider` (case-insensitive) from every query.
    pub fn excluding_provider(mut self, provider: &str) -> Self {
        self.excluded_providers.push(provider.to_ascii_lowercase());
        self
    }

    fn admits(&self, record: &SourceRecord) -> bool {
        match &record.provider {
            Some(provider) => !self
                .excluded_providers
                .contains(&provider.to_ascii_lowercase()),
            None => false,
        }
    }

    fn select(
        &self,
        range: &TimeRange,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<&SourceRecord>> {
        if let Some(reason) = &self.failure {
            return Err(EngineError::data_unavailable(&self.name, reason));
        }
        let (lower, upper) = (range.lower_bound(), range.end);
        Ok(self
            .records
            .iter()
            .filter(|record| self.admits(record))
            .filter(|record| {
                let instant = record.timestamp.with_timezone(&Utc);
                instant >= lower && instant < upper
            })
            .filter(|record| match filter {
                Some(filter) => filter.matches(&record.dimension(filter.dimension)),
                None => true,
            })
            .collect())
    }

    fn bucket(
        &self,
        records: Vec<&SourceRecord>,
        granularity: Granularity,
        dimension: Option<Dimension>,
    ) -> Vec<BucketRow> {
        let mut rows: FxHashMap<(BucketKey, Option<String>), BucketRow> = FxHashMap::default();
        for record in records {
            let bucket = BucketKey::truncate(&record.timestamp, granularity);
            let name = dimension.map(|d| record.dimension(d));
            let row = rows
                .entry((bucket, name.clone()))
                .or_insert_with(|| BucketRow {
                    dimension: name,
                    ..BucketRow::new(bucket, BigDecimal::default(), BigDecimal::default())
                });
            row.volume += &record.volume_usd;
            row.revenue += &record.fee_usd;
        }
        let mut rows: Vec<BucketRow> = rows.into_values().collect();
        rows.sort_by(|a, b| a.bucket.cmp(&b.bucket).then_with(|| a.dimension.cmp(&b.dimension)));
        rows
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_bucketed(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<BucketRow>> {
        let records = self.select(range, filter)?;
        Ok(self.bucket(records, granularity, None))
    }

    async fn fetch_stacked(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        dimension: Dimension,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<BucketRow>> {
        let records = self.select(range, filter)?;
        Ok(self.bucket(records, granularity, Some(dimension)))
    }

    async fn fetch_totals(
        &self,
        range: &TimeRange,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<SourceTotals> {
        let records = self.select(range, filter)?;
        let actors: FxHashSet<&str> = records.iter().filter_map(|r| r.actor.as_deref()).collect();

        let mut totals = SourceTotals::default();
        for record in &records {
            totals.total_volume += &record.volume_usd;
            totals.total_fees += &record.fee_usd;
        }
        totals.total_count = records.len() as i64;
        totals.unique_actors = actors.len() as i64;
        Ok(totals)
    }

    async fn fetch_breakdown(
        &self,
        range: &TimeRange,
        dimension: Dimension,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<DimensionTotals>> {
        let records = self.select(range, filter)?;
        let mut by_name: FxHashMap<String, DimensionTotals> = FxHashMap::default();
        for record in records {
            let name = record.dimension(dimension);
            let entry = by_name.entry(name.clone()).or_insert_with(|| DimensionTotals {
                name,
                volume: BigDecimal::default(),
                fees: BigDecimal::default(),
                count: 0,
            });
            entry.volume += &record.volume_usd;
            entry.fees += &record.fee_usd;
            entry.count += 1;
        }
        Ok(by_name.into_values().collect())
    }
}

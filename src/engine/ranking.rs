//! Ranking of asset paths by a chosen metric.

use std::{cmp::Ordering, fmt, str::FromStr};

use bigdecimal::BigDecimal;
use serde::Serialize;

use super::{error::EngineError, merge::DimensionTotals};
use crate::utils::serialize_decimal;

pub const DEFAULT_PATH_LIMIT: usize = 10;
pub const MAX_PATH_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMetric {
    #[default]
    Volume,
    Count,
    Fees,
}

impl RankMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankMetric::Volume => "volume",
            RankMetric::Count => "count",
            RankMetric::Fees => "fees",
        }
    }

    fn value(&self, totals: &DimensionTotals) -> BigDecimal {
        match self {
            RankMetric::Volume => totals.volume.clone(),
            RankMetric::Count => BigDecimal::from(totals.count),
            RankMetric::Fees => totals.fees.clone(),
        }
    }
}

impl FromStr for RankMetric {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volume" => Ok(RankMetric::Volume),
            "count" => Ok(RankMetric::Count),
            "fees" => Ok(RankMetric::Fees),
            _ => Err(EngineError::InvalidMetric(format!("unknown metric '{}'", s))),
        }
    }
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked `"<in> -> <out>"` path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathTotals {
    /// Short form, e.g. `BTC -> USDC`.
    pub name: String,
    pub path: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub value: BigDecimal,
    pub count: i64,
    #[serde(serialize_with = "serialize_decimal")]
    pub volume: BigDecimal,
    #[serde(serialize_with = "serialize_decimal")]
    pub fees: BigDecimal,
}

/// Top `limit` paths by `metric`, ties broken by path.
pub fn rank_paths(items: Vec<DimensionTotals>, metric: RankMetric, limit: usize) -> Vec<PathTotals> {
    let mut ranked: Vec<PathTotals> = items
        .into_iter()
        .map(|item| PathTotals {
            name: short_path(&item.name),
            value: metric.value(&item),
            path: item.name,
            count: item.count,
            volume: item.volume,
            fees: item.fees,
        })
        .collect();
    ranked.sort_by(|a, b| match b.value.cmp(&a.value) {
        Ordering::Equal => a.path.cmp(&b.path),
        ordering => ordering,
    });
    ranked.truncate(limit);
    ranked
}

/// `ETH.USDC-0XA0B8 -> BTC.BTC` becomes `USDC -> BTC`.
fn short_path(path: &str) -> String {
    match path.split_once(" -> ") {
        Some((from, to)) => format!("{} -> {}", short_asset(from), short_asset(to)),
        None => path.to_string(),
    }
}

fn short_asset(asset: &str) -> &str {
    let symbol = asset.split('-').next().unwrap_or(asset);
    match symbol.split_once('.') {
        Some((_, ticker)) => ticker,
        None => symbol,
    }
}

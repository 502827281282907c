//! Fan-in of per-source results.
//!
//! Rows from every source are grouped on their key and their metrics summed.
//! The result does not depend on the order sources are supplied in, so a new
//! source can be appended without touching the existing ones.
//!
//! A bucket reported by only some sources is emitted with the missing
//! sources contributing zero. That zero-default is a policy choice; the
//! output does not flag which sources were absent.

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::{bucket::BucketKey, granularity::Granularity};
use crate::utils::serialize_decimal;

/// One bucketed row as returned by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRow {
    pub bucket: BucketKey,
    pub dimension: Option<String>,
    pub volume: BigDecimal,
    pub revenue: BigDecimal,
}

impl BucketRow {
    pub fn new(bucket: BucketKey, volume: BigDecimal, revenue: BigDecimal) -> Self {
        Self {
            bucket,
            dimension: None,
            volume,
            revenue,
        }
    }
}

/// A point of the merged time series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedPoint {
    pub bucket: BucketKey,
    pub label: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub volume: BigDecimal,
    #[serde(serialize_with = "serialize_decimal")]
    pub revenue: BigDecimal,
}

/// Merge bucketed rows from any number of sources into one ascending series.
pub fn merge<S>(granularity: Granularity, streams: S) -> Vec<AggregatedPoint>
where
    S: IntoIterator,
    S::Item: IntoIterator<Item = BucketRow>,
{
    let mut points: BTreeMap<BucketKey, AggregatedPoint> = BTreeMap::new();

    for row in streams.into_iter().flatten() {
        let point = points.entry(row.bucket).or_insert_with(|| AggregatedPoint {
            bucket: row.bucket,
            label: row.bucket.label(granularity),
            volume: BigDecimal::zero(),
            revenue: BigDecimal::zero(),
        });
        point.volume += row.volume;
        point.revenue += row.revenue;
    }

    points.into_values().collect()
}

/// A point of a series split by dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackedPoint {
    pub bucket: BucketKey,
    pub label: String,
    pub name: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub volume: BigDecimal,
    #[serde(serialize_with = "serialize_decimal")]
    pub revenue: BigDecimal,
}

/// Like [`merge`], keyed on bucket and dimension value.
///
/// Rows without a dimension are grouped under `"Unknown"`.
pub fn merge_stacked<S>(granularity: Granularity, streams: S) -> Vec<StackedPoint>
where
    S: IntoIterator,
    S::Item: IntoIterator<Item = BucketRow>,
{
    let mut points: BTreeMap<(BucketKey, String), StackedPoint> = BTreeMap::new();

    for row in streams.into_iter().flatten() {
        let name = row.dimension.unwrap_or_else(|| "Unknown".to_string());
        let point = points
            .entry((row.bucket, name.clone()))
            .or_insert_with(|| StackedPoint {
                bucket: row.bucket,
                label: row.bucket.label(granularity),
                name,
                volume: BigDecimal::zero(),
                revenue: BigDecimal::zero(),
            });
        point.volume += row.volume;
        point.revenue += row.revenue;
    }

    points.into_values().collect()
}

/// Totals of one source over a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTotals {
    #[serde(serialize_with = "serialize_decimal")]
    pub total_volume: BigDecimal,
    #[serde(serialize_with = "serialize_decimal")]
    pub total_fees: BigDecimal,
    pub total_count: i64,
    pub unique_actors: i64,
}

impl Default for SourceTotals {
    fn default() -> Self {
        Self {
            total_volume: BigDecimal::zero(),
            total_fees: BigDecimal::zero(),
            total_count: 0,
            unique_actors: 0,
        }
    }
}

/// Sum per-source totals.
///
/// `unique_actors` is summed as well; sources that cannot identify actors
/// report zero, so no actor is counted by more than one source.
pub fn merge_totals<I>(totals: I) -> SourceTotals
where
    I: IntoIterator<Item = SourceTotals>,
{
    totals
        .into_iter()
        .fold(SourceTotals::default(), |mut acc, totals| {
            acc.total_volume += totals.total_volume;
            acc.total_fees += totals.total_fees;
            acc.total_count += totals.total_count;
            acc.unique_actors += totals.unique_actors;
            acc
        })
}

/// Totals of one dimension value (provider, platform or chain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionTotals {
    pub name: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub volume: BigDecimal,
    #[serde(serialize_with = "serialize_decimal")]
    pub fees: BigDecimal,
    pub count: i64,
}

/// Merge dimension breakdowns by name, largest volume first.
pub fn merge_breakdown<S>(streams: S) -> Vec<DimensionTotals>
where
    S: IntoIterator,
    S::Item: IntoIterator<Item = DimensionTotals>,
{
    let mut by_name: FxHashMap<String, DimensionTotals> = FxHashMap::default();

    for row in streams.into_iter().flatten() {
        match by_name.get_mut(&row.name) {
            Some(existing) => {
                existing.volume += row.volume;
                existing.fees += row.fees;
                existing.count += row.count;
            },
            None => {
                by_name.insert(row.name.clone(), row);
            },
        }
    }

    let mut merged: Vec<DimensionTotals> = by_name.into_values().collect();
    merged.sort_by(|a, b| b.volume.cmp(&a.volume).then_with(|| a.name.cmp(&b.name)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn key(day: u32) -> BucketKey {
        BucketKey::truncate(&Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(), Granularity::Day)
    }

    fn row(day: u32, volume: &str, revenue: &str) -> BucketRow {
        BucketRow::new(key(day), dec(volume), dec(revenue))
    }

    #[test]
    fn test_same_bucket_is_summed() {
        let native = vec![row(1, "100", "1.5")];
        let external = vec![row(1, "50", "0.25")];

        let merged = merge(Granularity::Day, [native, external]);

        assert_eq!(
            merged,
            vec![AggregatedPoint {
                bucket: key(1),
                label: "Mar 01".to_string(),
                volume: dec("150"),
                revenue: dec("1.75"),
            }]
        );
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = vec![row(3, "10.10", "1"), row(1, "5", "0.5"), row(2, "7", "0")];
        let b = vec![row(2, "3.333", "0.1"), row(4, "1", "1")];

        assert_eq!(
            merge(Granularity::Day, [a.clone(), b.clone()]),
            merge(Granularity::Day, [b, a])
        );
    }

    #[test]
    fn test_merge_is_associative() {
        let a = vec![row(1, "1", "0.1"), row(2, "2", "0.2")];
        let b = vec![row(2, "3", "0.3")];
        let c = vec![row(1, "4", "0.4"), row(5, "5", "0.5")];

        let ab: Vec<BucketRow> = merge(Granularity::Day, [a.clone(), b.clone()])
            .into_iter()
            .map(|p| BucketRow::new(p.bucket, p.volume, p.revenue))
            .collect();

        assert_eq!(
            merge(Granularity::Day, [ab, c.clone()]),
            merge(Granularity::Day, [a, b, c])
        );
    }

    #[test]
    fn test_merge_is_exactly_additive() {
        let a = vec![row(1, "0.1", "0.000000001")];
        let b = vec![row(1, "0.2", "0.000000002")];

        let merged = merge(Granularity::Day, [a, b]);
        assert_eq!(merged[0].volume, dec("0.3"));
        assert_eq!(merged[0].revenue, dec("0.000000003"));
    }

    #[test]
    fn test_single_source_bucket_is_kept_and_ordered() {
        let a = vec![row(5, "1", "0"), row(1, "2", "0")];
        let b = vec![row(3, "0", "9")];

        let merged = merge(Granularity::Day, [a, b]);
        let buckets: Vec<BucketKey> = merged.iter().map(|p| p.bucket).collect();
        assert_eq!(buckets, vec![key(1), key(3), key(5)]);
        assert_eq!(merged[1].volume, dec("0"));
        assert_eq!(merged[1].revenue, dec("9"));
    }

    #[test]
    fn test_empty_input_gives_empty_series() {
        let merged = merge(Granularity::Week, Vec::<Vec<BucketRow>>::new());
        assert!(merged.is_empty());
        assert_eq!(serde_json::to_string(&merged).unwrap(), "[]");
    }

    #[test]
    fn test_point_serializes_numbers() {
        let merged = merge(Granularity::Day, [vec![row(1, "100.5", "2")]]);
        let json = serde_json::to_value(&merged[0]).unwrap();
        assert_eq!(json["volume"], serde_json::json!(100.5));
        assert_eq!(json["revenue"], serde_json::json!(2.0));
        assert_eq!(json["label"], "Mar 01");
        assert_eq!(json["bucket"], "2024-03-01T00:00:00Z");
    }

    #[test]
    fn test_merge_stacked_keeps_dimensions_apart() {
        let tagged = |day: u32, name: &str, volume: &str| BucketRow {
            dimension: Some(name.to_string()),
            ..row(day, volume, "0")
        };
        let merged = merge_stacked(
            Granularity::Day,
            [
                vec![tagged(1, "thorchain", "10"), tagged(1, "lifi", "5")],
                vec![tagged(1, "thorchain", "2"), tagged(2, "lifi", "1")],
            ],
        );
        let flat: Vec<(u32, &str, BigDecimal)> = merged
            .iter()
            .map(|p| (p.bucket.instant().day(), p.name.as_str(), p.volume.clone()))
            .collect();
        assert_eq!(
            flat,
            vec![
                (1, "lifi", dec("5")),
                (1, "thorchain", dec("12")),
                (2, "lifi", dec("1")),
            ]
        );
    }

    #[test]
    fn test_merge_totals() {
        let merged = merge_totals([
            SourceTotals {
                total_volume: dec("10"),
                total_fees: dec("1"),
                total_count: 3,
                unique_actors: 2,
            },
            SourceTotals {
                total_volume: dec("5.5"),
                total_fees: dec("0.5"),
                total_count: 1,
                unique_actors: 0,
            },
        ]);
        assert_eq!(merged.total_volume, dec("15.5"));
        assert_eq!(merged.total_fees, dec("1.5"));
        assert_eq!(merged.total_count, 4);
        assert_eq!(merged.unique_actors, 2);
    }

    #[test]
    fn test_merge_breakdown_sums_by_name_and_sorts() {
        let item = |name: &str, volume: &str| DimensionTotals {
            name: name.to_string(),
            volume: dec(volume),
            fees: dec("1"),
            count: 1,
        };
        let merged = merge_breakdown([
            vec![item("ethereum", "10"), item("arbitrum", "30")],
            vec![item("ethereum", "25"), item("base", "30")],
        ]);
        let names: Vec<&str> = merged.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ethereum", "arbitrum", "base"]);
        assert_eq!(merged[0].volume, dec("35"));
        assert_eq!(merged[0].count, 2);
    }
}

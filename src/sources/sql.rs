//! Postgres-backed sources.
//!
//! A [`SourceSpec`] declares where a source keeps its time, metric and
//! dimension columns and which rows it admits. [`SqlSource`] turns it into
//! parameterized queries. Only identifiers declared in a `SourceSpec` and
//! enum-derived truncation units are spliced into SQL text. Range bounds and
//! filter values are always bound parameters.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::Pool;
use log::{debug, error};
use postgres_types::ToSql;
use tokio_postgres::Row;

use super::{Dimension, DimensionFilter, SourceAdapter};
use crate::{
    engine::{
        bucket::{key_expression, truncation_sql, utc_wall_clock_sql, BucketKey, TimeBasis, TimestampKind},
        BucketRow, DimensionTotals, EngineError, EngineResult, Granularity, SourceTotals, TimeRange,
    },
    utils::parse_decimal,
};

/// Bound query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    /// For `timestamptz` columns.
    Instant(DateTime<Utc>),
    /// For `timestamp` columns holding UTC wall-clock time.
    WallClock(NaiveDateTime),
    /// Bound as `text[]`.
    TextList(Vec<String>),
}

impl SqlParam {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Instant(value) => value,
            SqlParam::WallClock(value) => value,
            SqlParam::TextList(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Column layout and row policy of one relation.
#[derive(Debug)]
pub struct SourceSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub time_column: &'static str,
    pub time_kind: TimestampKind,
    /// Precomputed UTC calendar date, used for day and coarser buckets.
    pub date_column: Option<&'static str>,
    pub volume_column: &'static str,
    pub fee_column: &'static str,
    /// Column identifying the acting user, if the source records one.
    pub actor_column: Option<&'static str>,
    pub provider_sql: &'static str,
    pub platform_sql: &'static str,
    pub chain_sql: &'static str,
    pub path_sql: &'static str,
    /// Predicates every row must satisfy, in every query.
    pub row_filter: &'static [&'static str],
    /// Providers never counted from this relation, lowercase.
    pub excluded_providers: &'static [&'static str],
}

impl SourceSpec {
    pub fn dimension_sql(&self, dimension: Dimension) -> &'static str {
        match dimension {
            Dimension::Provider => self.provider_sql,
            Dimension::Platform => self.platform_sql,
            Dimension::Chain => self.chain_sql,
            Dimension::Path => self.path_sql,
        }
    }

    /// Bucket key expression for `granularity`, always a UTC wall-clock `timestamp`.
    pub fn bucket_sql(&self, granularity: Granularity) -> String {
        let key = key_expression(granularity);
        let wall_clock = match (key.basis, self.date_column) {
            (TimeBasis::CalendarDate, Some(date_column)) => {
                utc_wall_clock_sql(date_column, TimestampKind::Date)
            },
            _ => utc_wall_clock_sql(self.time_column, self.time_kind),
        };
        truncation_sql(key.unit, &wall_clock)
    }

    /// Shared WHERE clause: row policy, `[start, end)` window and optional
    /// dimension filter. Parameters are numbered from `$1`.
    pub fn where_clause(
        &self,
        range: &TimeRange,
        filter: Option<&DimensionFilter>,
    ) -> (String, Vec<SqlParam>) {
        let mut conditions: Vec<String> = self.row_filter.iter().map(|p| p.to_string()).collect();
        let mut params = Vec::with_capacity(4);

        let (lower, upper) = match self.time_kind {
            TimestampKind::WithTimeZone => (
                SqlParam::Instant(range.lower_bound()),
                SqlParam::Instant(range.end),
            ),
            TimestampKind::NaiveUtc | TimestampKind::Date => (
                SqlParam::WallClock(range.lower_bound().naive_utc()),
                SqlParam::WallClock(range.end.naive_utc()),
            ),
        };
        params.push(lower);
        conditions.push(format!("{} >= ${}", self.time_column, params.len()));
        params.push(upper);
        conditions.push(format!("{} < ${}", self.time_column, params.len()));

        if !self.excluded_providers.is_empty() {
            params.push(SqlParam::TextList(
                self.excluded_providers.iter().map(|p| p.to_string()).collect(),
            ));
            conditions.push(format!(
                "LOWER({}) <> ALL(${})",
                self.provider_sql,
                params.len()
            ));
        }

        if let Some(filter) = filter {
            params.push(SqlParam::TextList(filter.values.clone()));
            conditions.push(format!(
                "LOWER({}) = ANY(${})",
                self.dimension_sql(filter.dimension),
                params.len()
            ));
        }

        (conditions.join("\n  AND "), params)
    }

    pub fn bucketed_query(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        group_by: Option<Dimension>,
        filter: Option<&DimensionFilter>,
    ) -> SqlQuery {
        let (where_clause, params) = self.where_clause(range, filter);
        let (dimension_select, group) = match group_by {
            Some(dimension) => (
                format!(",\n    {} AS dimension", self.dimension_sql(dimension)),
                "1, 2",
            ),
            None => (String::new(), "1"),
        };
        let sql = format!(
            "SELECT\n    {bucket} AS bucket{dimension_select},\n    \
             COALESCE(SUM({volume}), 0)::text AS volume,\n    \
             COALESCE(SUM({fee}), 0)::text AS revenue\n\
             FROM {table}\n\
             WHERE {where_clause}\n\
             GROUP BY {group}\n\
             ORDER BY 1",
            bucket = self.bucket_sql(granularity),
            volume = self.volume_column,
            fee = self.fee_column,
            table = self.table,
        );
        SqlQuery { sql, params }
    }

    pub fn totals_query(&self, range: &TimeRange, filter: Option<&DimensionFilter>) -> SqlQuery {
        let (where_clause, params) = self.where_clause(range, filter);
        let actors = match self.actor_column {
            Some(column) => format!("COUNT(DISTINCT {})", column),
            None => "0::bigint".to_string(),
        };
        let sql = format!(
            "SELECT\n    \
             COALESCE(SUM({volume}), 0)::text AS total_volume,\n    \
             COALESCE(SUM({fee}), 0)::text AS total_fees,\n    \
             COUNT(*) AS total_count,\n    \
             {actors} AS unique_actors\n\
             FROM {table}\n\
             WHERE {where_clause}",
            volume = self.volume_column,
            fee = self.fee_column,
            table = self.table,
        );
        SqlQuery { sql, params }
    }

    pub fn breakdown_query(
        &self,
        range: &TimeRange,
        dimension: Dimension,
        filter: Option<&DimensionFilter>,
    ) -> SqlQuery {
        let (where_clause, params) = self.where_clause(range, filter);
        let sql = format!(
            "SELECT\n    {name} AS name,\n    \
             COALESCE(SUM({volume}), 0)::text AS volume,\n    \
             COALESCE(SUM({fee}), 0)::text AS fees,\n    \
             COUNT(*) AS count\n\
             FROM {table}\n\
             WHERE {where_clause}\n\
             GROUP BY 1",
            name = self.dimension_sql(dimension),
            volume = self.volume_column,
            fee = self.fee_column,
            table = self.table,
        );
        SqlQuery { sql, params }
    }
}

/// [`SourceAdapter`] reading one [`SourceSpec`] through the shared pool.
#[derive(Clone)]
pub struct SqlSource {
    spec: &'static SourceSpec,
    pool: Pool,
}

impl SqlSource {
    pub fn new(spec: &'static SourceSpec, pool: Pool) -> Self {
        Self { spec, pool }
    }

    pub fn spec(&self) -> &'static SourceSpec {
        self.spec
    }

    async fn run(&self, query: &SqlQuery) -> EngineResult<Vec<Row>> {
        let client = self.pool.get().await.map_err(|e| self.unavailable(e))?;
        let statement = client
            .prepare_cached(&query.sql)
            .await
            .map_err(|e| self.unavailable(e))?;
        let params: Vec<&(dyn ToSql + Sync)> = query.params.iter().map(SqlParam::as_sql).collect();

        let rows = client
            .query(&statement, &params)
            .await
            .map_err(|e| self.unavailable(e))?;
        debug!("[{}] query returned {} rows", self.spec.name, rows.len());
        Ok(rows)
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> EngineError {
        error!("[{}] query failed: {}", self.spec.name, e);
        EngineError::data_unavailable(self.spec.name, e)
    }

    fn decimal(&self, row: &Row, column: &str) -> EngineResult<bigdecimal::BigDecimal> {
        let text: Option<String> = row.try_get(column).map_err(|e| self.unavailable(e))?;
        parse_decimal(text.as_deref()).ok_or_else(|| {
            self.unavailable(format!("column {} is not a decimal: {:?}", column, text))
        })
    }

    fn bucket_row(&self, row: &Row, with_dimension: bool) -> EngineResult<BucketRow> {
        let bucket: NaiveDateTime = row.try_get("bucket").map_err(|e| self.unavailable(e))?;
        let dimension = if with_dimension {
            let name: Option<String> = row.try_get("dimension").map_err(|e| self.unavailable(e))?;
            Some(name.unwrap_or_else(|| "Unknown".to_string()))
        } else {
            None
        };
        Ok(BucketRow {
            bucket: BucketKey::from_utc_wall_clock(bucket),
            dimension,
            volume: self.decimal(row, "volume")?,
            revenue: self.decimal(row, "revenue")?,
        })
    }
}

#[async_trait]
impl SourceAdapter for SqlSource {
    fn name(&self) -> &str {
        self.spec.name
    }

    async fn fetch_bucketed(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<BucketRow>> {
        let query = self.spec.bucketed_query(range, granularity, None, filter);
        let rows = self.run(&query).await?;
        rows.iter().map(|row| self.bucket_row(row, false)).collect()
    }

    async fn fetch_stacked(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        dimension: Dimension,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<BucketRow>> {
        let query = self
            .spec
            .bucketed_query(range, granularity, Some(dimension), filter);
        let rows = self.run(&query).await?;
        rows.iter().map(|row| self.bucket_row(row, true)).collect()
    }

    async fn fetch_totals(
        &self,
        range: &TimeRange,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<SourceTotals> {
        let query = self.spec.totals_query(range, filter);
        let rows = self.run(&query).await?;
        let Some(row) = rows.first() else {
            return Ok(SourceTotals::default());
        };
        Ok(SourceTotals {
            total_volume: self.decimal(row, "total_volume")?,
            total_fees: self.decimal(row, "total_fees")?,
            total_count: row.try_get("total_count").map_err(|e| self.unavailable(e))?,
            unique_actors: row.try_get("unique_actors").map_err(|e| self.unavailable(e))?,
        })
    }

    async fn fetch_breakdown(
        &self,
        range: &TimeRange,
        dimension: Dimension,
        filter: Option<&DimensionFilter>,
    ) -> EngineResult<Vec<DimensionTotals>> {
        let query = self.spec.breakdown_query(range, dimension, filter);
        let rows = self.run(&query).await?;
        rows.iter()
            .map(|row| -> EngineResult<DimensionTotals> {
                let name: Option<String> = row.try_get("name").map_err(|e| self.unavailable(e))?;
                Ok(DimensionTotals {
                    name: name.unwrap_or_else(|| "Unknown".to_string()),
                    volume: self.decimal(row, "volume")?,
                    fees: self.decimal(row, "fees")?,
                    count: row.try_get("count").map_err(|e| self.unavailable(e))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{AGGREGATOR_REVENUE, NATIVE_SWAPS};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn range() -> TimeRange {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        TimeRange::custom(start, start + Duration::days(10)).unwrap()
    }

    fn where_of(sql: &str) -> &str {
        let start = sql.find("WHERE ").expect("query has a WHERE clause");
        let rest = &sql[start..];
        match rest.find("\nGROUP BY") {
            Some(end) => &rest[..end],
            None => rest,
        }
    }

    #[test]
    fn test_totals_and_series_share_the_row_filter() {
        let filter = DimensionFilter::provider("thorchain");
        for spec in [&NATIVE_SWAPS, &AGGREGATOR_REVENUE] {
            let totals = spec.totals_query(&range(), Some(&filter));
            let series = spec.bucketed_query(&range(), Granularity::Day, None, Some(&filter));
            let stacked = spec.bucketed_query(&range(), Granularity::Hour, Some(Dimension::Chain), Some(&filter));
            let breakdown = spec.breakdown_query(&range(), Dimension::Platform, Some(&filter));

            for query in [&series, &stacked, &breakdown] {
                assert_eq!(where_of(&query.sql), where_of(&totals.sql), "{}", spec.name);
                assert_eq!(query.params, totals.params);
            }
            for predicate in spec.row_filter {
                assert!(where_of(&totals.sql).contains(predicate));
            }
        }
    }

    #[test]
    fn test_filter_values_are_bound_not_interpolated() {
        let hostile = "x'); DROP TABLE swaps; --";
        let filter = DimensionFilter::provider(hostile);
        let query = NATIVE_SWAPS.totals_query(&range(), Some(&filter));

        assert!(!query.sql.contains(hostile));
        assert!(query.sql.contains("LOWER(source) = ANY($4)"));
        assert_eq!(
            query.params.last(),
            Some(&SqlParam::TextList(vec![hostile.to_lowercase()]))
        );
    }

    #[test]
    fn test_provider_list_is_one_array_parameter() {
        let filter = DimensionFilter::any_of(Dimension::Provider, ["thorchain", "LIFI"]);
        let query = AGGREGATOR_REVENUE.bucketed_query(&range(), Granularity::Day, None, Some(&filter));

        assert!(query.sql.contains("LOWER(protocol) = ANY($3)"));
        assert_eq!(query.params.len(), 3);
        assert_eq!(
            query.params[2],
            SqlParam::TextList(vec!["lifi".to_string(), "thorchain".to_string()])
        );
    }

    #[test]
    fn test_excluded_providers_are_bound() {
        let (sql, params) = NATIVE_SWAPS.where_clause(&range(), None);
        assert!(sql.contains("LOWER(source) <> ALL($3)"));
        assert!(!sql.contains("'1inch'"));
        assert_eq!(params[2], SqlParam::TextList(vec!["1inch".to_string()]));

        let (sql, params) = AGGREGATOR_REVENUE.where_clause(&range(), None);
        assert!(!sql.contains("<> ALL"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_path_breakdown_groups_by_asset_pair() {
        let query = NATIVE_SWAPS.breakdown_query(&range(), Dimension::Path, None);
        assert!(query.sql.contains("in_asset"));
        assert!(query.sql.contains("out_asset"));
        assert!(query.sql.contains("' -> '"));
        assert!(query.sql.contains("GROUP BY 1"));
    }

    #[test]
    fn test_bounds_follow_column_convention() {
        let (_, native) = NATIVE_SWAPS.where_clause(&range(), None);
        assert_eq!(
            native[..2],
            [
                SqlParam::Instant(range().lower_bound()),
                SqlParam::Instant(range().end),
            ]
        );

        let (_, external) = AGGREGATOR_REVENUE.where_clause(&range(), None);
        assert_eq!(
            external,
            vec![
                SqlParam::WallClock(range().lower_bound().naive_utc()),
                SqlParam::WallClock(range().end.naive_utc()),
            ]
        );
    }

    #[test]
    fn test_hour_buckets_never_use_the_date_column() {
        let hourly = NATIVE_SWAPS.bucket_sql(Granularity::Hour);
        assert!(!hourly.contains("date_only"));
        assert!(hourly.contains("AT TIME ZONE 'UTC'"));

        let daily = NATIVE_SWAPS.bucket_sql(Granularity::Day);
        assert!(daily.contains("date_only"));
    }

    #[test]
    fn test_no_bucket_expression_depends_on_session_time_zone() {
        for spec in [&NATIVE_SWAPS, &AGGREGATOR_REVENUE] {
            for granularity in Granularity::ALL {
                let sql = spec.bucket_sql(granularity);
                let projected = sql.contains("AT TIME ZONE 'UTC'")
                    || sql.contains("::timestamp")
                    || spec.time_kind == TimestampKind::NaiveUtc;
                assert!(projected, "{} {}: {}", spec.name, granularity, sql);
            }
        }
    }

    #[test]
    fn test_all_range_is_bounded_by_history_start() {
        let origin = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(crate::engine::RangeKind::All, None, end, origin).unwrap();
        let (_, params) = NATIVE_SWAPS.where_clause(&range, None);
        assert_eq!(params[0], SqlParam::Instant(origin));
    }
}

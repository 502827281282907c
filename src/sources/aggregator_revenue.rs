//! DEX aggregator fee feed (`dex_aggregator_revenue` table).
//!
//! Timestamps are stored as naive UTC and there is no precomputed date, so
//! every bucket is derived from the raw timestamp. The feed carries no user
//! address and no platform.

use super::sql::SourceSpec;
use crate::engine::bucket::TimestampKind;

pub static AGGREGATOR_REVENUE: SourceSpec = SourceSpec {
    name: "aggregator_revenue",
    table: "dex_aggregator_revenue",
    time_column: "\"timestamp\"",
    time_kind: TimestampKind::NaiveUtc,
    date_column: None,
    volume_column: "swap_volume_usd",
    fee_column: "actual_fee_usd",
    actor_column: None,
    provider_sql: "protocol",
    platform_sql: "'Unknown'",
    chain_sql: "chain",
    path_sql: "token_in_symbol || ' -> ' || COALESCE(token_out_symbol, 'Unknown')",
    row_filter: &["protocol IS NOT NULL", "token_in_symbol IS NOT NULL"],
    excluded_providers: &[],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Granularity;

    #[test]
    fn test_buckets_come_from_naive_timestamp() {
        assert_eq!(
            AGGREGATOR_REVENUE.bucket_sql(Granularity::Week),
            "date_trunc('week', \"timestamp\")"
        );
    }

    #[test]
    fn test_totals_report_no_actors() {
        let start = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        let range = crate::engine::TimeRange::custom(start, start).unwrap();
        let query = AGGREGATOR_REVENUE.totals_query(&range, None);
        assert!(query.sql.contains("0::bigint AS unique_actors"));
    }
}

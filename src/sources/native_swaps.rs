//! Swaps recorded by the indexer (`swaps` table).

use super::sql::SourceSpec;
use crate::engine::bucket::TimestampKind;

/// Provider whose swaps are mirrored by the aggregator feed and therefore
/// never counted from this table.
pub const EXCLUDED_PROVIDER: &str = "1inch";

/// Fees are the full cost of the swap (`total_fee_usd`), not only the
/// affiliate share.
pub static NATIVE_SWAPS: SourceSpec = SourceSpec {
    name: "native_swaps",
    table: "swaps",
    time_column: "\"timestamp\"",
    time_kind: TimestampKind::WithTimeZone,
    date_column: Some("date_only"),
    volume_column: "in_amount_usd",
    fee_column: "total_fee_usd",
    actor_column: Some("user_address"),
    provider_sql: "source",
    platform_sql: "COALESCE(platform, 'Unknown')",
    chain_sql: "CASE \
        WHEN LOWER(source) = 'thorchain' THEN 'THORChain' \
        WHEN LOWER(source) = 'mayachain' THEN 'MayaChain' \
        ELSE COALESCE(NULLIF(split_part(in_asset, '-', 2), ''), 'Unknown') \
        END",
    path_sql: "COALESCE(in_asset, 'Unknown') || ' -> ' || COALESCE(out_asset, 'Unknown')",
    row_filter: &["source IS NOT NULL"],
    excluded_providers: &[EXCLUDED_PROVIDER],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Dimension;

    #[test]
    fn test_excluded_provider_is_filtered() {
        assert_eq!(NATIVE_SWAPS.excluded_providers, &[EXCLUDED_PROVIDER]);
        assert!(NATIVE_SWAPS.row_filter.contains(&"source IS NOT NULL"));
    }

    #[test]
    fn test_fees_are_total_swap_fees() {
        assert_eq!(NATIVE_SWAPS.fee_column, "total_fee_usd");
        let schema = include_str!("../../schema/postgres.sql");
        assert!(schema.contains("total_fee_usd"));
        assert!(schema.contains("affiliate_fee_usd"));
    }

    #[test]
    fn test_protocol_chains_are_named() {
        let chain = NATIVE_SWAPS.dimension_sql(Dimension::Chain);
        assert!(chain.contains("'THORChain'"));
        assert!(chain.contains("'MayaChain'"));
        assert!(chain.contains("split_part(in_asset, '-', 2)"));
    }
}

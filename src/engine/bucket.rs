//! Bucket keys, truncation rules and display labels.
//!
//! All truncation happens on a UTC wall-clock timestamp. Sources store time in
//! different conventions (`timestamptz`, naive UTC `timestamp`, `date`), and
//! each convention gets its own projection so that buckets from different
//! sources line up regardless of the database session time zone.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::Serialize;

use super::granularity::Granularity;

/// `date_trunc` unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationUnit {
    Hour,
    Day,
    Week,
    Month,
}

impl TruncationUnit {
    pub fn as_sql(&self) -> &'static str {
        match self {
            TruncationUnit::Hour => "hour",
            TruncationUnit::Day => "day",
            TruncationUnit::Week => "week",
            TruncationUnit::Month => "month",
        }
    }
}

/// Which time column a bucket is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBasis {
    /// The raw event timestamp. Required for sub-day buckets.
    RawTimestamp,
    /// A calendar date, precomputed by the source or derived from the timestamp.
    CalendarDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyExpression {
    pub unit: TruncationUnit,
    pub basis: TimeBasis,
}

pub fn key_expression(granularity: Granularity) -> KeyExpression {
    match granularity {
        Granularity::Hour => KeyExpression {
            unit: TruncationUnit::Hour,
            basis: TimeBasis::RawTimestamp,
        },
        Granularity::Day => KeyExpression {
            unit: TruncationUnit::Day,
            basis: TimeBasis::CalendarDate,
        },
        Granularity::Week => KeyExpression {
            unit: TruncationUnit::Week,
            basis: TimeBasis::CalendarDate,
        },
        Granularity::Month => KeyExpression {
            unit: TruncationUnit::Month,
            basis: TimeBasis::CalendarDate,
        },
    }
}

/// strftime pattern for bucket labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSpec(pub &'static str);

pub fn label_format(granularity: Granularity) -> FormatSpec {
    match granularity {
        Granularity::Hour => FormatSpec("%b %d %H:00"),
        // weeks are labelled by their Monday
        Granularity::Day | Granularity::Week => FormatSpec("%b %d"),
        Granularity::Month => FormatSpec("%b %Y"),
    }
}

/// How a source stores a time column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    /// `timestamptz`
    WithTimeZone,
    /// `timestamp` holding UTC wall-clock time
    NaiveUtc,
    /// `date`, already a UTC calendar day
    Date,
}

/// SQL yielding a UTC wall-clock `timestamp` for `column`.
///
/// `date_trunc` on a `timestamptz` or on a bare `date` (which Postgres
/// promotes to `timestamptz`) truncates in the session time zone, so both are
/// converted to a plain `timestamp` first.
pub fn utc_wall_clock_sql(column: &str, kind: TimestampKind) -> String {
    match kind {
        TimestampKind::WithTimeZone => format!("({} AT TIME ZONE 'UTC')", column),
        TimestampKind::NaiveUtc => column.to_string(),
        TimestampKind::Date => format!("({})::timestamp", column),
    }
}

pub fn truncation_sql(unit: TruncationUnit, wall_clock_sql: &str) -> String {
    format!("date_trunc('{}', {})", unit.as_sql(), wall_clock_sql)
}

/// Truncated UTC instant identifying a bucket.
///
/// Ordering follows time. Labels are derived from the key and are not
/// sortable across years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BucketKey(DateTime<Utc>);

impl BucketKey {
    /// Projects `instant` into UTC, then truncates it to `granularity`.
    pub fn truncate<Tz: TimeZone>(instant: &DateTime<Tz>, granularity: Granularity) -> Self {
        let utc = instant.with_timezone(&Utc);
        let date = utc.date_naive();
        let truncated = match granularity {
            Granularity::Hour => date.and_time(NaiveTime::MIN) + Duration::hours(utc.hour() as i64),
            Granularity::Day => date.and_time(NaiveTime::MIN),
            Granularity::Week => week_start(date).and_time(NaiveTime::MIN),
            Granularity::Month => month_start(date).and_time(NaiveTime::MIN),
        };
        Self(Utc.from_utc_datetime(&truncated))
    }

    /// Key from a bucket value already truncated by the database.
    pub fn from_utc_wall_clock(truncated: NaiveDateTime) -> Self {
        Self(Utc.from_utc_datetime(&truncated))
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn label(&self, granularity: Granularity) -> String {
        self.0.format(label_format(granularity).0).to_string()
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_hour_uses_raw_timestamp() {
        assert_eq!(key_expression(Granularity::Hour).basis, TimeBasis::RawTimestamp);
        for granularity in [Granularity::Day, Granularity::Week, Granularity::Month] {
            assert_eq!(key_expression(granularity).basis, TimeBasis::CalendarDate);
        }
    }

    #[rstest]
    #[case(Granularity::Hour, utc(2024, 3, 7, 14, 0))]
    #[case(Granularity::Day, utc(2024, 3, 7, 0, 0))]
    #[case(Granularity::Week, utc(2024, 3, 4, 0, 0))]
    #[case(Granularity::Month, utc(2024, 3, 1, 0, 0))]
    fn test_truncate(#[case] granularity: Granularity, #[case] expected: DateTime<Utc>) {
        let instant = utc(2024, 3, 7, 14, 42);
        assert_eq!(BucketKey::truncate(&instant, granularity).instant(), expected);
    }

    #[test]
    fn test_offset_timestamps_are_projected_before_truncation() {
        // 02:00 local on Mar 1 in +05:30 is still Feb 29 in UTC
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let local = ist.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();

        assert_eq!(
            BucketKey::truncate(&local, Granularity::Day).instant(),
            utc(2024, 2, 29, 0, 0)
        );
        assert_eq!(
            BucketKey::truncate(&local, Granularity::Hour).instant(),
            utc(2024, 2, 29, 20, 0)
        );
        assert_eq!(
            BucketKey::truncate(&local, Granularity::Month).instant(),
            utc(2024, 2, 1, 0, 0)
        );
    }

    #[test]
    fn test_same_instant_in_different_offsets_shares_a_bucket() {
        let west = FixedOffset::west_opt(8 * 3600).unwrap();
        let east = FixedOffset::east_opt(9 * 3600).unwrap();
        let a = west.with_ymd_and_hms(2024, 5, 31, 20, 15, 0).unwrap();
        let b = east.with_ymd_and_hms(2024, 6, 1, 13, 15, 0).unwrap();

        for granularity in Granularity::ALL {
            assert_eq!(
                BucketKey::truncate(&a, granularity),
                BucketKey::truncate(&b, granularity)
            );
        }
    }

    #[test]
    fn test_week_starts_on_monday_across_month_boundary() {
        let sunday = utc(2024, 6, 2, 23, 59);
        assert_eq!(
            BucketKey::truncate(&sunday, Granularity::Week).instant(),
            utc(2024, 5, 27, 0, 0)
        );
    }

    #[rstest]
    #[case(Granularity::Hour, "Mar 07 14:00")]
    #[case(Granularity::Day, "Mar 07")]
    #[case(Granularity::Week, "Mar 04")]
    #[case(Granularity::Month, "Mar 2024")]
    fn test_labels(#[case] granularity: Granularity, #[case] expected: &str) {
        let key = BucketKey::truncate(&utc(2024, 3, 7, 14, 42), granularity);
        assert_eq!(key.label(granularity), expected);
    }

    #[test]
    fn test_day_and_month_labels_preserve_order_within_a_year() {
        let mut day_keys: Vec<BucketKey> = (0..366)
            .step_by(9)
            .map(|d| BucketKey::truncate(&(utc(2024, 1, 1, 6, 0) + Duration::days(d)), Granularity::Day))
            .collect();
        day_keys.sort();
        let reparsed: Vec<NaiveDate> = day_keys
            .iter()
            .map(|k| {
                NaiveDate::parse_from_str(&format!("{} 2024", k.label(Granularity::Day)), "%b %d %Y")
                    .unwrap()
            })
            .collect();
        assert!(reparsed.windows(2).all(|w| w[0] < w[1]));

        let month_keys: Vec<BucketKey> = (1..=12)
            .map(|m| BucketKey::truncate(&utc(2024, m, 15, 0, 0), Granularity::Month))
            .collect();
        let reparsed: Vec<NaiveDate> = month_keys
            .iter()
            .map(|k| {
                NaiveDate::parse_from_str(&format!("01 {}", k.label(Granularity::Month)), "%d %b %Y")
                    .unwrap()
            })
            .collect();
        assert!(reparsed.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_wall_clock_projection_sql() {
        assert_eq!(
            utc_wall_clock_sql("s.timestamp", TimestampKind::WithTimeZone),
            "(s.timestamp AT TIME ZONE 'UTC')"
        );
        assert_eq!(utc_wall_clock_sql("r.timestamp", TimestampKind::NaiveUtc), "r.timestamp");
        assert_eq!(
            utc_wall_clock_sql("s.date_only", TimestampKind::Date),
            "(s.date_only)::timestamp"
        );
        assert_eq!(
            truncation_sql(TruncationUnit::Week, "(s.date_only)::timestamp"),
            "date_trunc('week', (s.date_only)::timestamp)"
        );
    }

    #[test]
    fn test_wall_clock_key_matches_rust_truncation() {
        let naive = utc(2024, 3, 1, 0, 0).naive_utc();
        assert_eq!(
            BucketKey::from_utc_wall_clock(naive),
            BucketKey::truncate(&utc(2024, 3, 1, 17, 5), Granularity::Day)
        );
    }
}

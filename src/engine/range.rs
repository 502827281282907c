//! Resolution of logical range tokens into concrete `[start, end)` windows.
//!
//! Preset ranges are derived from an injected "now" so the resolver stays a
//! pure function of wall-clock time and token. `All` has no explicit start and
//! falls back to the configured history start.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use super::{
    error::{EngineError, EngineResult},
    granularity::Granularity,
};

/// Logical range selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RangeKind {
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "7d")]
    Day7,
    #[serde(rename = "30d")]
    Day30,
    #[serde(rename = "90d")]
    Day90,
    #[serde(rename = "ytd")]
    Ytd,
    #[serde(rename = "365d")]
    Year1,
    #[serde(rename = "all")]
    All,
    #[serde(rename = "custom")]
    Custom,
}

impl RangeKind {
    pub const ALL: [RangeKind; 8] = [
        RangeKind::Day1,
        RangeKind::Day7,
        RangeKind::Day30,
        RangeKind::Day90,
        RangeKind::Ytd,
        RangeKind::Year1,
        RangeKind::All,
        RangeKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeKind::Day1 => "1d",
            RangeKind::Day7 => "7d",
            RangeKind::Day30 => "30d",
            RangeKind::Day90 => "90d",
            RangeKind::Ytd => "ytd",
            RangeKind::Year1 => "365d",
            RangeKind::All => "all",
            RangeKind::Custom => "custom",
        }
    }

    /// Fixed look-back for rolling presets.
    pub fn lookback(&self) -> Option<Duration> {
        match self {
            RangeKind::Day1 => Some(Duration::hours(24)),
            RangeKind::Day7 => Some(Duration::days(7)),
            RangeKind::Day30 => Some(Duration::days(30)),
            RangeKind::Day90 => Some(Duration::days(90)),
            RangeKind::Year1 => Some(Duration::days(365)),
            RangeKind::Ytd | RangeKind::All | RangeKind::Custom => None,
        }
    }

    /// Granularity used when the caller supplies none.
    ///
    /// `Custom` has no fixed default; it is derived from the span by
    /// [`GranularityPolicy::preferred`](super::granularity::GranularityPolicy::preferred).
    pub fn default_granularity(&self) -> Option<Granularity> {
        match self {
            RangeKind::Day1 => Some(Granularity::Hour),
            RangeKind::Day7 | RangeKind::Day30 => Some(Granularity::Day),
            RangeKind::Day90 | RangeKind::Ytd | RangeKind::Year1 | RangeKind::All => {
                Some(Granularity::Week)
            },
            RangeKind::Custom => None,
        }
    }
}

impl FromStr for RangeKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        RangeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == token)
            .ok_or_else(|| EngineError::InvalidRange(format!("unknown range token '{}'", s)))
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved query window.
///
/// `start == None` means "beginning of recorded history"; [`lower_bound`]
/// substitutes the history start the range was resolved with.
///
/// [`lower_bound`]: TimeRange::lower_bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
    pub kind: RangeKind,
    origin: DateTime<Utc>,
    /// End as the caller wrote it. Only differs from `end` for a date-only
    /// custom end, which is widened to cover its whole day.
    requested_end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(
        kind: RangeKind,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
        origin: DateTime<Utc>,
    ) -> EngineResult<Self> {
        if let Some(start) = start {
            if start > end {
                return Err(EngineError::InvalidRange(format!(
                    "start {} is after end {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
        }
        Ok(Self {
            start,
            end,
            kind,
            origin,
            requested_end: end,
        })
    }

    /// Explicit custom window.
    pub fn custom(start: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<Self> {
        Self::new(RangeKind::Custom, Some(start), end, start)
    }

    pub fn lower_bound(&self) -> DateTime<Utc> {
        self.start.unwrap_or(self.origin)
    }

    pub fn span(&self) -> Duration {
        (self.end - self.lower_bound()).max(Duration::zero())
    }

    pub fn requested_end(&self) -> DateTime<Utc> {
        self.requested_end
    }

    /// Whole days between the bounds as requested, rounded up.
    ///
    /// Measured against [`requested_end`](Self::requested_end), so
    /// `2024-01-01..2024-01-01` is 0 days even though the window covers
    /// all of January 1st.
    pub fn elapsed_days(&self) -> i64 {
        let seconds = (self.requested_end - self.lower_bound())
            .max(Duration::zero())
            .num_seconds();
        let day = Duration::days(1).num_seconds();
        (seconds + day - 1) / day
    }
}

/// Turns range tokens and optional explicit bounds into [`TimeRange`]s.
#[derive(Debug, Clone, Copy)]
pub struct RangeResolver {
    history_start: DateTime<Utc>,
}

impl RangeResolver {
    pub fn new(history_start: NaiveDate) -> Self {
        Self {
            history_start: start_of_day(history_start),
        }
    }

    pub fn history_start(&self) -> DateTime<Utc> {
        self.history_start
    }

    /// Resolve raw request values.
    pub fn resolve(
        &self,
        token: &str,
        explicit_start: Option<&str>,
        explicit_end: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<TimeRange> {
        let kind = token.parse::<RangeKind>()?;
        if kind != RangeKind::Custom {
            if explicit_start.is_some() || explicit_end.is_some() {
                log::debug!("Ignoring explicit bounds for preset range {}", kind);
            }
            return self.resolve_kind(kind, None, None, now);
        }

        let start = explicit_start
            .map(|raw| parse_bound(raw, "startDate"))
            .transpose()?;
        let end = explicit_end
            .map(|raw| parse_bound(raw, "endDate"))
            .transpose()?;

        // A date-only end covers its whole day, so order is checked against
        // the widened end.
        let mut range = self.resolve_kind(
            kind,
            start.as_ref().map(|bound| bound.instant),
            end.as_ref().map(ParsedBound::inclusive_end),
            now,
        )?;
        if let Some(end) = end {
            range.requested_end = end.instant;
        }
        Ok(range)
    }

    /// Resolve an already-parsed kind. Explicit bounds are only read for `Custom`.
    pub fn resolve_kind(
        &self,
        kind: RangeKind,
        explicit_start: Option<DateTime<Utc>>,
        explicit_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> EngineResult<TimeRange> {
        let start = match kind {
            RangeKind::Custom => {
                let (Some(start), Some(end)) = (explicit_start, explicit_end) else {
                    return Err(EngineError::InvalidRange(
                        "custom range requires both startDate and endDate".to_string(),
                    ));
                };
                return TimeRange::new(kind, Some(start), end, self.history_start);
            },
            RangeKind::All => None,
            RangeKind::Ytd => Some(start_of_year(now)),
            _ => kind.lookback().map(|lookback| now - lookback),
        };

        TimeRange::new(kind, start, now, self.history_start)
    }
}

struct ParsedBound {
    instant: DateTime<Utc>,
    date_only: bool,
}

impl ParsedBound {
    fn inclusive_end(&self) -> DateTime<Utc> {
        if self.date_only {
            self.instant + Duration::days(1)
        } else {
            self.instant
        }
    }
}

/// Accepts RFC 3339 instants, naive `YYYY-MM-DDTHH:MM:SS` (read as UTC) and
/// plain `YYYY-MM-DD` dates.
fn parse_bound(raw: &str, field: &str) -> EngineResult<ParsedBound> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ParsedBound {
            instant: instant.with_timezone(&Utc),
            date_only: false,
        });
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(ParsedBound {
            instant: Utc.from_utc_datetime(&naive),
            date_only: false,
        });
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(ParsedBound {
            instant: start_of_day(date),
            date_only: true,
        });
    }
    Err(EngineError::InvalidRange(format!(
        "{} '{}' is not an ISO-8601 date or timestamp",
        field, raw
    )))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn start_of_year(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), 1, 1)
        .map(start_of_day)
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 30, 0).unwrap()
    }

    fn resolver() -> RangeResolver {
        RangeResolver::new(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
    }

    #[rstest]
    #[case("1d", Duration::hours(24))]
    #[case("7d", Duration::days(7))]
    #[case("30d", Duration::days(30))]
    #[case("90d", Duration::days(90))]
    #[case("365d", Duration::days(365))]
    fn test_rolling_presets(#[case] token: &str, #[case] lookback: Duration) {
        let range = resolver().resolve(token, None, None, now()).unwrap();
        assert_eq!(range.start, Some(now() - lookback));
        assert_eq!(range.end, now());
    }

    #[test]
    fn test_ytd_starts_on_january_first() {
        let range = resolver().resolve("ytd", None, None, now()).unwrap();
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_all_uses_history_start() {
        let range = resolver().resolve("ALL", None, None, now()).unwrap();
        assert_eq!(range.kind, RangeKind::All);
        assert_eq!(range.start, None);
        assert_eq!(
            range.lower_bound(),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_custom_requires_both_bounds() {
        let err = resolver()
            .resolve("custom", Some("2024-01-01"), None, now())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));

        let err = resolver()
            .resolve("custom", None, Some("2024-01-01"), now())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
    }

    #[test]
    fn test_custom_rejects_reversed_bounds() {
        let err = resolver()
            .resolve("custom", Some("2024-02-01"), Some("2024-01-01"), now())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
    }

    #[test]
    fn test_custom_date_only_end_covers_whole_day() {
        let range = resolver()
            .resolve("custom", Some("2024-01-01"), Some("2024-01-01"), now())
            .unwrap();
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(range.elapsed_days(), 0);
    }

    #[rstest]
    #[case("2024-01-01", "2024-01-01", 0)]
    #[case("2024-01-01", "2024-01-02", 1)]
    #[case("2024-01-01", "2024-01-08", 7)]
    #[case("2024-01-01", "2024-01-31", 30)]
    #[case("2024-01-01", "2024-02-01", 31)]
    fn test_elapsed_days_ignore_end_of_day_widening(
        #[case] start: &str,
        #[case] end: &str,
        #[case] days: i64,
    ) {
        let range = resolver().resolve("custom", Some(start), Some(end), now()).unwrap();
        assert_eq!(range.elapsed_days(), days);
        assert_eq!(range.span(), Duration::days(days + 1));
    }

    #[test]
    fn test_date_only_end_covers_start_later_that_day() {
        let range = resolver()
            .resolve("custom", Some("2024-01-01T12:00:00Z"), Some("2024-01-01"), now())
            .unwrap();
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(range.elapsed_days(), 0);

        let err = resolver()
            .resolve("custom", Some("2024-01-02T00:00:00Z"), Some("2024-01-01T23:00:00Z"), now())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
    }

    #[test]
    fn test_custom_rfc3339_bounds_are_normalized_to_utc() {
        let range = resolver()
            .resolve(
                "custom",
                Some("2024-03-01T05:30:00+05:30"),
                Some("2024-03-02T00:00:00Z"),
                now(),
            )
            .unwrap();
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(range.elapsed_days(), 1);
    }

    #[test]
    fn test_preset_ignores_explicit_bounds() {
        let range = resolver()
            .resolve("7d", Some("2021-01-01"), Some("2021-02-01"), now())
            .unwrap();
        assert_eq!(range.start, Some(now() - Duration::days(7)));
    }

    #[rstest]
    #[case("yesterday")]
    #[case("")]
    #[case("14d")]
    fn test_unknown_tokens_are_invalid_ranges(#[case] token: &str) {
        let err = resolver().resolve(token, None, None, now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
    }

    #[test]
    fn test_malformed_bound_is_invalid_range() {
        let err = resolver()
            .resolve("custom", Some("01/02/2024"), Some("2024-02-01"), now())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
    }

    #[test]
    fn test_elapsed_days_rounds_up() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::custom(start, start + Duration::hours(25)).unwrap();
        assert_eq!(range.elapsed_days(), 2);

        let range = TimeRange::custom(start, start).unwrap();
        assert_eq!(range.elapsed_days(), 0);
    }
}

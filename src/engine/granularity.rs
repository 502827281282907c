//! Granularity validity rules.
//!
//! A range/granularity pairing is legal only if it renders at least two
//! buckets. Presets are an explicit lookup table; custom ranges go through a
//! small decision table over elapsed whole days whose thresholds come from
//! configuration.

use std::{fmt, str::FromStr};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::{
    bucket::BucketKey,
    error::{EngineError, EngineResult},
    range::{RangeKind, TimeRange},
};

/// Bucket width. Variants are ordered finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Width used for bucket-count estimates. Months count as 30 days.
    pub fn nominal_width(&self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
            Granularity::Week => Duration::days(7),
            Granularity::Month => Duration::days(30),
        }
    }

    /// Number of buckets `span` covers at this width, rounded up.
    pub fn nominal_bucket_count(&self, span: Duration) -> i64 {
        let width = self.nominal_width().num_seconds();
        let span = span.num_seconds().max(0);
        (span + width - 1) / width
    }
}

impl FromStr for Granularity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "h" | "hourly" => Ok(Granularity::Hour),
            "day" | "d" | "daily" => Ok(Granularity::Day),
            "week" | "w" | "weekly" => Ok(Granularity::Week),
            "month" | "m" | "monthly" => Ok(Granularity::Month),
            _ => Err(EngineError::InvalidGranularity(format!(
                "unknown granularity token '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-empty, ordered set of granularities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GranularitySet(&'static [Granularity]);

impl GranularitySet {
    pub fn contains(&self, granularity: Granularity) -> bool {
        self.0.contains(&granularity)
    }

    pub fn iter(&self) -> impl Iterator<Item = Granularity> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[Granularity] {
        self.0
    }

    pub fn coarsest(&self) -> Granularity {
        self.0.last().copied().unwrap_or(Granularity::Hour)
    }
}

const HOUR_ONLY: &[Granularity] = &[Granularity::Hour];
const SUB_WEEK: &[Granularity] = &[Granularity::Hour, Granularity::Day];
const SUB_MONTH: &[Granularity] = &[Granularity::Day, Granularity::Week];
const LONG: &[Granularity] = &[Granularity::Day, Granularity::Week, Granularity::Month];

/// Valid set and preferred fallback per preset.
const PRESETS: &[(RangeKind, &[Granularity], Granularity)] = &[
    (RangeKind::Day1, HOUR_ONLY, Granularity::Hour),
    (RangeKind::Day7, SUB_WEEK, Granularity::Day),
    (RangeKind::Day30, SUB_MONTH, Granularity::Day),
    (RangeKind::Day90, LONG, Granularity::Week),
    (RangeKind::Ytd, LONG, Granularity::Week),
    (RangeKind::Year1, LONG, Granularity::Week),
    (RangeKind::All, LONG, Granularity::Week),
];

/// Elapsed-day thresholds for custom ranges.
///
/// A custom range of `d` whole days is hour-only while `d <= hour_only_max_days`,
/// keeps hourly buckets while `d <= hourly_max_days`, and gains monthly buckets
/// once `d > weekly_max_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GranularityThresholds {
    #[serde(default = "default_hour_only_max_days")]
    pub hour_only_max_days: i64,
    #[serde(default = "default_hourly_max_days")]
    pub hourly_max_days: i64,
    #[serde(default = "default_weekly_max_days")]
    pub weekly_max_days: i64,
}

fn default_hour_only_max_days() -> i64 {
    1
}

fn default_hourly_max_days() -> i64 {
    7
}

fn default_weekly_max_days() -> i64 {
    30
}

impl Default for GranularityThresholds {
    fn default() -> Self {
        Self {
            hour_only_max_days: default_hour_only_max_days(),
            hourly_max_days: default_hourly_max_days(),
            weekly_max_days: default_weekly_max_days(),
        }
    }
}

/// Decides which granularities a range may be charted at.
#[derive(Debug, Clone, Copy, Default)]
pub struct GranularityPolicy {
    thresholds: GranularityThresholds,
}

impl GranularityPolicy {
    pub fn new(thresholds: GranularityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GranularityThresholds {
        &self.thresholds
    }

    pub fn valid_granularities(&self, range: &TimeRange) -> GranularitySet {
        GranularitySet(self.entry(range).0)
    }

    /// Range-specific fallback, also the default when no granularity is given.
    pub fn preferred(&self, range: &TimeRange) -> Granularity {
        self.entry(range).1
    }

    /// Keep `requested` if legal for `range`, otherwise use the preferred fallback.
    pub fn snap(&self, range: &TimeRange, requested: Option<Granularity>) -> Granularity {
        let (valid, preferred) = self.entry(range);
        match requested {
            Some(granularity) if valid.contains(&granularity) => granularity,
            _ => preferred,
        }
    }

    /// Reject illegal pairings instead of snapping them.
    pub fn check(&self, range: &TimeRange, granularity: Granularity) -> EngineResult<Granularity> {
        if self.valid_granularities(range).contains(granularity) {
            Ok(granularity)
        } else {
            Err(EngineError::InvalidGranularity(format!(
                "{} is not available for range {} ({} days)",
                granularity,
                range.kind,
                range.elapsed_days()
            )))
        }
    }

    fn entry(&self, range: &TimeRange) -> (&'static [Granularity], Granularity) {
        if range.kind == RangeKind::Custom {
            let entry = self.custom_entry(range.elapsed_days());
            // a month-plus span can still sit inside one 31-day month
            if entry.0 == LONG && within_one_month(range) {
                return (SUB_MONTH, Granularity::Day);
            }
            return entry;
        }
        PRESETS
            .iter()
            .find(|(kind, _, _)| *kind == range.kind)
            .map(|(_, valid, preferred)| (*valid, *preferred))
            .unwrap_or((LONG, Granularity::Week))
    }

    fn custom_entry(&self, days: i64) -> (&'static [Granularity], Granularity) {
        let t = &self.thresholds;
        if days <= t.hour_only_max_days {
            (HOUR_ONLY, Granularity::Hour)
        } else if days <= t.hourly_max_days {
            (SUB_WEEK, Granularity::Day)
        } else if days <= t.weekly_max_days {
            (SUB_MONTH, Granularity::Day)
        } else {
            (LONG, Granularity::Day)
        }
    }
}

/// True when every instant of the window falls in the same calendar month.
fn within_one_month(range: &TimeRange) -> bool {
    let last = (range.end - Duration::nanoseconds(1)).max(range.lower_bound());
    BucketKey::truncate(&range.lower_bound(), Granularity::Month)
        == BucketKey::truncate(&last, Granularity::Month)
}

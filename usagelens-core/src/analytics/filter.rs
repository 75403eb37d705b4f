//! Time ranges and query filters.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest span `all` resolves to, in days
pub const MAX_ALL_DAYS: i64 = 365;

/// Query window, aligned to UTC days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "7d")]
    Days7,
    #[default]
    #[serde(rename = "30d")]
    Days30,
    #[serde(rename = "90d")]
    Days90,
    /// From the earliest indexed event, capped at [`MAX_ALL_DAYS`]
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Today => "today",
            TimeRange::Days7 => "7d",
            TimeRange::Days30 => "30d",
            TimeRange::Days90 => "90d",
            TimeRange::All => "all",
        }
    }

    /// Resolve to concrete bounds as of `as_of`.
    ///
    /// `earliest` is only consulted for [`TimeRange::All`].
    pub fn resolve(&self, as_of: DateTime<Utc>, earliest: Option<DateTime<Utc>>) -> Window {
        let today = as_of.date_naive();
        let days = match self {
            TimeRange::Today => 1,
            TimeRange::Days7 => 7,
            TimeRange::Days30 => 30,
            TimeRange::Days90 => 90,
            TimeRange::All => earliest
                .map(|e| (today - e.date_naive()).num_days() + 1)
                .unwrap_or(1)
                .clamp(1, MAX_ALL_DAYS),
        };
        let first_day = today - Duration::days(days - 1);
        Window {
            start: start_of_day(first_day),
            end: start_of_day(today + Duration::days(1)),
            first_day,
            days: days as usize,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" | "1d" => Ok(TimeRange::Today),
            "7d" => Ok(TimeRange::Days7),
            "30d" => Ok(TimeRange::Days30),
            "90d" => Ok(TimeRange::Days90),
            "all" => Ok(TimeRange::All),
            other => Err(format!(
                "unknown time range '{other}' (expected today, 7d, 30d, 90d or all)"
            )),
        }
    }
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Concrete bounds of a resolved [`TimeRange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Inclusive
    pub start: DateTime<Utc>,
    /// Exclusive (start of the day after `as_of`)
    pub end: DateTime<Utc>,
    pub first_day: NaiveDate,
    pub days: usize,
}

impl Window {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Every day in the window, oldest first.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.days as i64).map(move |i| self.first_day + Duration::days(i))
    }
}

/// Parameters shared by every analytics query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    pub time_range: TimeRange,
    /// Reference instant; defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn new(time_range: TimeRange) -> Self {
        Self {
            time_range,
            ..Default::default()
        }
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn window(&self, earliest: Option<DateTime<Utc>>) -> Window {
        self.time_range
            .resolve(self.as_of.unwrap_or_else(Utc::now), earliest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_and_display() {
        for range in ["today", "7d", "30d", "90d", "all"] {
            assert_eq!(range.parse::<TimeRange>().unwrap().to_string(), range);
        }
        assert_eq!(" 7D ".parse::<TimeRange>(), Ok(TimeRange::Days7));
        assert!("week".parse::<TimeRange>().is_err());
    }

    #[test]
    fn test_seven_day_window_bounds() {
        let window = TimeRange::Days7.resolve(ts("2025-03-10T15:00:00Z"), None);
        assert_eq!(window.start, ts("2025-03-04T00:00:00Z"));
        assert_eq!(window.end, ts("2025-03-11T00:00:00Z"));
        assert_eq!(window.days().count(), 7);

        assert!(window.contains(ts("2025-03-04T00:00:00Z")));
        assert!(!window.contains(ts("2025-03-03T23:59:59.999Z")));
        assert!(window.contains(ts("2025-03-10T23:59:59Z")));
        assert!(!window.contains(ts("2025-03-11T00:00:00Z")));
    }

    #[test]
    fn test_today_window() {
        let window = TimeRange::Today.resolve(ts("2025-03-10T00:00:00Z"), None);
        assert_eq!(window.start, ts("2025-03-10T00:00:00Z"));
        assert_eq!(window.days, 1);
    }

    #[test]
    fn test_all_uses_earliest_event_and_is_capped() {
        let as_of = ts("2025-03-10T12:00:00Z");
        let window = TimeRange::All.resolve(as_of, Some(ts("2025-03-01T08:00:00Z")));
        assert_eq!(window.start, ts("2025-03-01T00:00:00Z"));
        assert_eq!(window.days, 10);

        let window = TimeRange::All.resolve(as_of, Some(ts("2020-01-01T00:00:00Z")));
        assert_eq!(window.days, MAX_ALL_DAYS as usize);

        let window = TimeRange::All.resolve(as_of, None);
        assert_eq!(window.days, 1);
    }

    #[test]
    fn test_serde_uses_short_names() {
        let json = serde_json::to_string(&TimeRange::Days90).unwrap();
        assert_eq!(json, "\"90d\"");
    }
}

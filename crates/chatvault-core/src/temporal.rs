//! Date/time normalization into canonical UTC.
//!
//! Parsing is strict first (RFC 3339 and ISO-8601 shapes), then lenient with a
//! configurable day-before-month bias, then `dateparser` for free-form text.
//! Values without an offset are localized to the configured zone. Instants are
//! truncated to whole seconds so every store holds the same value.

use std::fmt;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, TimeDelta, TimeZone,
    Utc,
};
use chrono_tz::Tz;

use crate::config::TimeConfig;
use crate::error::{Error, Result};

/// Canonical UTC instant format.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Canonical calendar date format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const ISO_OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%z",
];

const ISO_NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DAY_FIRST_DATES: &[&str] = &["%d.%m.%Y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%y", "%d/%m/%y"];
const MONTH_FIRST_DATES: &[&str] = &["%m/%d/%Y", "%m.%d.%Y", "%m-%d-%Y", "%m/%d/%y", "%m.%d.%y"];
const NAMED_MONTH_DATES: &[&str] = &["%d-%b-%Y", "%d %b %Y", "%d-%b-%y", "%d %b %y"];
const TIMES: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];
const SEPARATORS: &[&str] = &[" ", ", "];
// `%z` takes both `+0200` and `+02:00`.
const OFFSET_SUFFIXES: &[&str] = &[" %z", " UTC%z", " GMT%z"];

/// Output precision for [`TemporalNormalizer::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Full instant converted to UTC.
    Instant,
    /// Calendar date as written, without zone conversion.
    DateOnly,
}

/// A normalized timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalTimestamp {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
}

impl fmt::Display for CanonicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalTimestamp::Instant(dt) => write!(f, "{}", dt.format(CANONICAL_FORMAT)),
            CanonicalTimestamp::Date(date) => write!(f, "{}", date.format(DATE_FORMAT)),
        }
    }
}

/// Render an instant as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_canonical(dt: &DateTime<Utc>) -> String {
    dt.format(CANONICAL_FORMAT).to_string()
}

/// Parse a canonical instant back; used when reading SQLite rows.
pub fn parse_canonical(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, CANONICAL_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy)]
enum Parsed {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

/// Date/time normalizer bound to a default zone.
#[derive(Debug, Clone)]
pub struct TemporalNormalizer {
    zone: Tz,
    day_first: bool,
}

impl TemporalNormalizer {
    pub fn new(zone: Tz, day_first: bool) -> Self {
        Self { zone, day_first }
    }

    /// Build from configuration, validating the zone name.
    pub fn from_config(config: &TimeConfig) -> Result<Self> {
        let zone: Tz = config
            .zone
            .parse()
            .map_err(|e| Error::Config(format!("Unknown time zone '{}': {e}", config.zone)))?;
        Ok(Self::new(zone, config.day_first))
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Normalize `text`; `None` when no parser accepts it.
    pub fn normalize(&self, text: &str, precision: Precision) -> Option<CanonicalTimestamp> {
        match precision {
            Precision::Instant => self.instant(text).map(CanonicalTimestamp::Instant),
            Precision::DateOnly => self.date(text).map(CanonicalTimestamp::Date),
        }
    }

    /// Parse into a UTC instant with whole-second precision.
    pub fn instant(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        let parsed = match self.parse(text) {
            Some(Parsed::Aware(dt)) => Some(dt.with_timezone(&Utc)),
            Some(Parsed::Naive(naive)) => self.localize(naive),
            None => dateparser::parse_with(text, &self.zone, NaiveTime::MIN).ok(),
        }
        .map(|dt| dt.trunc_subsecs(0));
        if parsed.is_none() {
            tracing::warn!("Unparseable timestamp: {text:?}");
        }
        parsed
    }

    /// Parse into a calendar date. The date is taken as written, so a zone
    /// shift can never move it across midnight.
    pub fn date(&self, text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        let parsed = match self.parse(text) {
            Some(Parsed::Aware(dt)) => Some(dt.date_naive()),
            Some(Parsed::Naive(naive)) => Some(naive.date()),
            None => dateparser::parse_with(text, &Utc, NaiveTime::MIN)
                .ok()
                .map(|dt| dt.date_naive()),
        };
        if parsed.is_none() {
            tracing::warn!("Unparseable date: {text:?}");
        }
        parsed
    }

    fn parse(&self, text: &str) -> Option<Parsed> {
        if text.is_empty() {
            return None;
        }
        parse_strict(text).or_else(|| self.parse_lenient(text))
    }

    fn parse_lenient(&self, text: &str) -> Option<Parsed> {
        let dates = if self.day_first {
            DAY_FIRST_DATES
        } else {
            MONTH_FIRST_DATES
        };

        for date_format in dates.iter().chain(NAMED_MONTH_DATES) {
            for time_format in TIMES {
                for separator in SEPARATORS {
                    let format = format!("{date_format}{separator}{time_format}");
                    if let Ok(naive) = NaiveDateTime::parse_from_str(text, &format) {
                        if plausible_year(naive.date()) {
                            return Some(Parsed::Naive(naive));
                        }
                    }
                    for suffix in OFFSET_SUFFIXES {
                        let zoned = format!("{format}{suffix}");
                        if let Ok(dt) = DateTime::parse_from_str(text, &zoned) {
                            if plausible_year(dt.date_naive()) {
                                return Some(Parsed::Aware(dt));
                            }
                        }
                    }
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, date_format) {
                if plausible_year(date) {
                    return Some(Parsed::Naive(date.and_time(NaiveTime::MIN)));
                }
            }
        }
        None
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        // Local times inside a DST gap do not exist; push them past the gap.
        self.zone
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.zone
                    .from_local_datetime(&(naive + TimeDelta::hours(1)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn parse_strict(text: &str) -> Option<Parsed> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Parsed::Aware(dt));
    }
    for format in ISO_OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(Parsed::Aware(dt));
        }
    }
    for format in ISO_NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Parsed::Naive(naive));
        }
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .map(|date| Parsed::Naive(date.and_time(NaiveTime::MIN)))
}

/// `%Y` happily reads "23" as year 23; leave two-digit years to `%y`.
fn plausible_year(date: NaiveDate) -> bool {
    use chrono::Datelike;
    date.year() >= 100
}

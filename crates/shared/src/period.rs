//! Calendar billing periods
//!
//! A billing period is one UTC calendar month, keyed as `YYYY-MM`. The key
//! format is what the snapshot store uniques on, so every derivation of a
//! period from a timestamp must go through this type.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::PeriodParseError;

/// One UTC calendar month, keyed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingPeriod {
    year: i32,
    /// 1-12, validated at construction
    month: u8,
}

impl BillingPeriod {
    /// Build a period from a year and a 1-based month.
    pub fn new(year: i32, month: u8) -> Result<Self, PeriodParseError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodParseError(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// The period containing the given instant (UTC).
    pub fn containing(ts: OffsetDateTime) -> Self {
        Self {
            year: ts.year(),
            month: u8::from(ts.month()),
        }
    }

    /// The immediately preceding calendar month.
    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The immediately following calendar month.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    fn month_enum(&self) -> Month {
        match self.month {
            1 => Month::January,
            2 => Month::February,
            3 => Month::March,
            4 => Month::April,
            5 => Month::May,
            6 => Month::June,
            7 => Month::July,
            8 => Month::August,
            9 => Month::September,
            10 => Month::October,
            11 => Month::November,
            _ => Month::December,
        }
    }

    /// First instant of the period: day 1, 00:00:00 UTC.
    pub fn first_instant(&self) -> OffsetDateTime {
        // Day 1 is valid for every month
        let date = Date::from_calendar_date(self.year, self.month_enum(), 1)
            .unwrap_or(Date::MIN);
        PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc()
    }

    /// Last instant of the period: last day, 23:59:59 UTC.
    ///
    /// Events timestamped exactly here belong to this period, not the next.
    pub fn last_instant(&self) -> OffsetDateTime {
        let month = self.month_enum();
        let last_day = time::util::days_in_year_month(self.year, month);
        let date = Date::from_calendar_date(self.year, month, last_day)
            .unwrap_or(Date::MIN);
        let time = Time::from_hms(23, 59, 59).unwrap_or(Time::MIDNIGHT);
        PrimitiveDateTime::new(date, time).assume_utc()
    }

    /// Exclusive upper bound of the period, i.e. the next period's first instant.
    ///
    /// Window queries filter `[first_instant, end_exclusive)` so that every
    /// event lands in exactly one period, including sub-second timestamps
    /// between 23:59:59 and midnight.
    pub fn end_exclusive(&self) -> OffsetDateTime {
        self.next().first_instant()
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingPeriod {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeriodParseError(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for BillingPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BillingPeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

//! Calendar day-of-year keys that ignore the year.

use crate::error::ClimatologyError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A (month, day) pair identifying "the same time of year" across years.
///
/// Feb 29 is a valid key. In years without a leap day it resolves to the
/// Feb 28 / Mar 1 pair, see [`DateKey::anchors_in`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateKey {
    month: u32,
    day: u32,
}

impl DateKey {
    pub fn new(month: u32, day: u32) -> Result<Self, ClimatologyError> {
        // 2000 is a leap year, so Feb 29 validates.
        if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
            return Err(ClimatologyError::InvalidDateKey { month, day });
        }
        Ok(Self { month, day })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn is_leap_day(&self) -> bool {
        self.month == 2 && self.day == 29
    }

    /// The calendar date(s) this key stands for in `year`.
    ///
    /// Returns one date, except for Feb 29 in a non-leap year which yields
    /// `(Feb 28, Some(Mar 1))`. `None` only for years chrono cannot represent.
    pub fn anchors_in(&self, year: i32) -> Option<(NaiveDate, Option<NaiveDate>)> {
        if let Some(date) = NaiveDate::from_ymd_opt(year, self.month, self.day) {
            return Some((date, None));
        }
        if self.is_leap_day() {
            let feb_28 = NaiveDate::from_ymd_opt(year, 2, 28)?;
            let mar_1 = NaiveDate::from_ymd_opt(year, 3, 1)?;
            return Some((feb_28, Some(mar_1)));
        }
        None
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }
}

impl FromStr for DateKey {
    type Err = ClimatologyError;

    /// Accepts `MM-DD` or a full `YYYY-MM-DD` date.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(date.into());
        }
        let invalid = || ClimatologyError::DateParsing(s.to_string());
        let (month, day) = s.split_once('-').ok_or_else(invalid)?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        let day = day.parse::<u32>().map_err(|_| invalid())?;
        Self::new(month, day)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

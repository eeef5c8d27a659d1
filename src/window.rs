//! Temporal window selection: which historical days count as "the same time of year".
//!
//! For every year in a [`YearRange`] the window covers the days within
//! `half_width_days` of the target [`DateKey`]. Each day is attributed to the year
//! that anchors its window, so a window around Dec 28, 1995 runs into early
//! January 1996 and those January days still belong to the 1995 sample.

use crate::error::ClimatologyError;
use crate::types::date_key::DateKey;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Keeps per-year windows from overlapping, even with the Feb 28/Mar 1 leap pair.
pub const MAX_HALF_WIDTH_DAYS: u32 = 181;

/// An inclusive range of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Result<Self, ClimatologyError> {
        if start > end || start < 1 || end > 9998 {
            return Err(ClimatologyError::InvalidYearRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}", self.start, self.end)
    }
}

/// An inclusive span of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// One historical day in a window: the anchoring year and the actual date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowDay {
    pub year: i32,
    pub date: NaiveDate,
}

impl WindowDay {
    pub fn date_key(&self) -> DateKey {
        self.date.into()
    }
}

/// A climatological window: target day, half width and the years sampled.
///
/// Also serves as the window part of cache keys, so equal windows always select
/// the same days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowKey {
    pub center: DateKey,
    pub half_width_days: u32,
    pub years: YearRange,
}

impl WindowKey {
    pub fn new(
        center: DateKey,
        half_width_days: u32,
        years: YearRange,
    ) -> Result<Self, ClimatologyError> {
        if half_width_days > MAX_HALF_WIDTH_DAYS {
            return Err(ClimatologyError::InvalidWindow {
                half_width_days,
                max: MAX_HALF_WIDTH_DAYS,
            });
        }
        Ok(Self {
            center,
            half_width_days,
            years,
        })
    }

    /// The date span sampled for each anchor year, in year order.
    pub fn year_spans(&self) -> Vec<(i32, DateSpan)> {
        let half = Duration::days(self.half_width_days as i64);
        self.years
            .iter()
            .filter_map(|year| {
                let (first, second) = self.center.anchors_in(year)?;
                let last = second.unwrap_or(first);
                Some((
                    year,
                    DateSpan {
                        start: first.checked_sub_signed(half)?,
                        end: last.checked_add_signed(half)?,
                    },
                ))
            })
            .collect()
    }

    /// Every (year, date) pair in the window.
    pub fn days(&self) -> BTreeSet<WindowDay> {
        self.year_spans()
            .into_iter()
            .flat_map(|(year, span)| span.dates().map(move |date| WindowDay { year, date }))
            .collect()
    }

    /// Contiguous date spans covering the whole window, with touching per-year
    /// spans merged. These are the units of upstream retrieval.
    pub fn fetch_spans(&self) -> Vec<DateSpan> {
        let mut spans: Vec<DateSpan> = self.year_spans().into_iter().map(|(_, s)| s).collect();
        spans.sort();
        let mut merged: Vec<DateSpan> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if span.start <= last.end + Duration::days(1) => {
                    last.end = last.end.max(span.end);
                }
                _ => merged.push(span),
            }
        }
        merged
    }

    /// Anchor year owning `date`, if the date falls inside the window.
    pub fn anchor_year(&self, date: NaiveDate) -> Option<i32> {
        self.year_spans()
            .into_iter()
            .find(|(_, span)| span.contains(date))
            .map(|(year, _)| year)
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+-{}_{}",
            self.center, self.half_width_days, self.years
        )
    }
}

/// Enumerates the window around `center` for every year in `years`.
pub fn window(
    center: DateKey,
    half_width_days: u32,
    years: YearRange,
) -> Result<BTreeSet<WindowDay>, ClimatologyError> {
    Ok(WindowKey::new(center, half_width_days, years)?.days())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn count_for_year(days: &BTreeSet<WindowDay>, year: i32) -> usize {
        days.iter().filter(|d| d.year == year).count()
    }

    #[test]
    fn test_size_per_year_for_every_day_of_year() {
        let years = YearRange::new(1995, 2004).unwrap();
        for half_width in [0u32, 3, 7, 15] {
            for day in date(2001, 1, 1).iter_days().take(365) {
                let key = DateKey::from(day);
                let days = window(key, half_width, years).unwrap();
                for year in years.iter() {
                    assert_eq!(
                        count_for_year(&days, year),
                        (half_width * 2 + 1) as usize,
                        "key {} year {}",
                        key,
                        year
                    );
                }
            }
        }
    }

    #[test]
    fn test_idempotent() {
        let years = YearRange::new(1980, 2020).unwrap();
        let key = DateKey::new(3, 1).unwrap();
        assert_eq!(window(key, 7, years).unwrap(), window(key, 7, years).unwrap());
    }

    #[test]
    fn test_year_end_wraps_into_following_january() {
        let years = YearRange::new(1995, 1996).unwrap();
        let days = window(DateKey::new(12, 28).unwrap(), 7, years).unwrap();

        let first_1995 = days.iter().find(|d| d.year == 1995).unwrap();
        let last_1995 = days.iter().filter(|d| d.year == 1995).last().unwrap();
        assert_eq!(first_1995.date, date(1995, 12, 21));
        assert_eq!(last_1995.date, date(1996, 1, 4));
        // January 1996 days near the 1995 anchor belong to 1995, not 1996.
        assert!(!days.contains(&WindowDay {
            year: 1996,
            date: date(1996, 1, 2)
        }));
    }

    #[test]
    fn test_january_reaches_back_into_december() {
        let years = YearRange::new(2000, 2000).unwrap();
        let days = window(DateKey::new(1, 2).unwrap(), 3, years).unwrap();
        let first = days.iter().next().unwrap();
        assert_eq!(first.date, date(1999, 12, 30));
        assert_eq!(first.year, 2000);
    }

    #[test]
    fn test_leap_day_center() {
        let years = YearRange::new(2019, 2020).unwrap();
        let days = window(DateKey::new(2, 29).unwrap(), 2, years).unwrap();
        // 2020 is a leap year: the usual 2h + 1 days.
        assert_eq!(count_for_year(&days, 2020), 5);
        // 2019 anchors on the Feb 28 / Mar 1 pair.
        assert_eq!(count_for_year(&days, 2019), 6);
        assert!(days.contains(&WindowDay {
            year: 2019,
            date: date(2019, 2, 28)
        }));
        assert!(days.contains(&WindowDay {
            year: 2019,
            date: date(2019, 3, 1)
        }));
    }

    #[test]
    fn test_fetch_spans_never_overlap() {
        let years = YearRange::new(2000, 2002).unwrap();
        let narrow = WindowKey::new(DateKey::new(7, 14).unwrap(), 7, years).unwrap();
        let spans = narrow.fetch_spans();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0], DateSpan { start: date(2000, 7, 7), end: date(2000, 7, 21) });

        for key in [DateKey::new(7, 1).unwrap(), DateKey::new(2, 29).unwrap()] {
            let wide = WindowKey::new(key, MAX_HALF_WIDTH_DAYS, years).unwrap();
            let spans = wide.fetch_spans();
            for pair in spans.windows(2) {
                assert!(pair[0].end < pair[1].start, "overlap in {pair:?}");
            }
            let covered: i64 = spans.iter().map(DateSpan::len_days).sum();
            assert_eq!(covered as usize, wide.days().len());
        }
    }

    #[test]
    fn test_anchor_year_lookup() {
        let years = YearRange::new(1995, 1996).unwrap();
        let key = WindowKey::new(DateKey::new(12, 28).unwrap(), 7, years).unwrap();
        assert_eq!(key.anchor_year(date(1996, 1, 3)), Some(1995));
        assert_eq!(key.anchor_year(date(1996, 12, 30)), Some(1996));
        assert_eq!(key.anchor_year(date(1996, 6, 1)), None);
    }

    #[test]
    fn test_rejects_oversized_window() {
        let years = YearRange::new(2000, 2001).unwrap();
        assert!(WindowKey::new(DateKey::new(1, 1).unwrap(), 200, years).is_err());
        assert!(YearRange::new(2001, 2000).is_err());
    }
}

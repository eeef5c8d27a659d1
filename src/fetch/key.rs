use crate::archive::DatasetVersion;
use crate::grid::cell::CellId;
use crate::types::sample::HistoricalSample;
use crate::types::variable::Variable;
use crate::window::{WindowKey, YearRange};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one cached fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub version: DatasetVersion,
    pub cell: CellId,
    pub window: WindowKey,
    pub variable: Variable,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.version, self.variable, self.cell, self.window
        )
    }
}

/// Result of fetching one (cell, window, variable): the samples found plus the
/// years for which the archive had nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedSamples {
    pub samples: Vec<HistoricalSample>,
    pub requested_years: YearRange,
    pub missing_years: Vec<i32>,
}

impl FetchedSamples {
    pub(crate) fn new(samples: Vec<HistoricalSample>, requested_years: YearRange) -> Self {
        let missing_years = requested_years
            .iter()
            .filter(|year| !samples.iter().any(|s| s.year == *year))
            .collect();
        Self {
            samples,
            requested_years,
            missing_years,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.missing_years.is_empty()
    }

    pub fn available_years(&self) -> usize {
        self.requested_years.len() - self.missing_years.len()
    }

    /// Approximate heap footprint, used for the cache memory budget.
    pub(crate) fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.samples.len() * std::mem::size_of::<HistoricalSample>()
            + self.missing_years.len() * std::mem::size_of::<i32>()
    }
}

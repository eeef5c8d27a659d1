//! Climate variables the engine can summarize.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Values at or above this magnitude are archive fill values (MERRA-2 uses 1e15).
const FILL_VALUE_THRESHOLD: f64 = 1.0e14;

/// A physical variable available in the reanalysis archive.
///
/// Wind is handled as scalar speed. Direction would need circular statistics and
/// is not part of the variable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    /// Daily mean 2 m air temperature, °C.
    Temperature,
    /// Daily precipitation, mm/day.
    Precipitation,
    /// Daily mean 10 m wind speed, m/s.
    WindSpeed,
}

/// How the estimator should summarize a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Median and percentile band.
    Continuous,
    /// Percentile band plus probability of exceeding a threshold.
    Threshold,
}

impl Variable {
    pub const ALL: [Variable; 3] = [
        Variable::Temperature,
        Variable::Precipitation,
        Variable::WindSpeed,
    ];

    pub(crate) fn path_segment(&self) -> &'static str {
        match self {
            Variable::Temperature => "temperature",
            Variable::Precipitation => "precipitation",
            Variable::WindSpeed => "wind_speed",
        }
    }

    /// Column holding this variable in the bulk archive files.
    pub(crate) fn archive_column(&self) -> &'static str {
        match self {
            Variable::Temperature => "T2MMEAN",
            Variable::Precipitation => "TPRECMAX",
            Variable::WindSpeed => "WS10MMEAN",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Variable::Temperature => "°C",
            Variable::Precipitation => "mm/day",
            Variable::WindSpeed => "m/s",
        }
    }

    pub fn kind(&self) -> VariableKind {
        match self {
            Variable::Precipitation => VariableKind::Threshold,
            Variable::Temperature | Variable::WindSpeed => VariableKind::Continuous,
        }
    }

    /// Converts a raw archive value into engine units, discarding fill values.
    pub(crate) fn from_archive_units(&self, raw: f64) -> Option<f64> {
        if !raw.is_finite() || raw.abs() >= FILL_VALUE_THRESHOLD {
            return None;
        }
        match self {
            Variable::Temperature => Some(raw - 273.15),
            // Precipitation cannot be negative; small negatives are reanalysis noise.
            Variable::Precipitation => Some(raw.max(0.0)),
            Variable::WindSpeed => Some(raw.max(0.0)),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

use crate::archive::error::ArchiveError;
use crate::fetch::error::{FetchError, StoreError};
use crate::grid::error::GridError;
use crate::pipeline::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Broad failure classes an API layer can render differently: "no data for this
/// location", "temporarily unavailable, try again", or a bad request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfBounds,
    UpstreamUnavailable,
    InvalidRequest,
    Internal,
}

#[derive(Debug, Error)]
pub enum ClimatologyError {
    #[error("Invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Invalid month/day {month:02}-{day:02}")]
    InvalidDateKey { month: u32, day: u32 },

    #[error("Unable to parse date: {0}")]
    DateParsing(String),

    #[error("Invalid year range {start}..={end}")]
    InvalidYearRange { start: i32, end: i32 },

    #[error("Window half width {half_width_days} exceeds the maximum of {max} days")]
    InvalidWindow { half_width_days: u32, max: u32 },

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to determine cache directory")]
    CacheDirResolution,
}

impl ClimatologyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClimatologyError::InvalidCoordinate { .. }
            | ClimatologyError::InvalidDateKey { .. }
            | ClimatologyError::DateParsing(_)
            | ClimatologyError::InvalidYearRange { .. }
            | ClimatologyError::InvalidWindow { .. } => ErrorKind::InvalidRequest,
            ClimatologyError::Grid(GridError::OutOfBounds { .. }) => ErrorKind::OutOfBounds,
            ClimatologyError::Grid(
                GridError::NetworkRequest(..) | GridError::HttpStatus { .. },
            ) => ErrorKind::UpstreamUnavailable,
            ClimatologyError::Archive(e) if e.is_transient() => ErrorKind::UpstreamUnavailable,
            ClimatologyError::Fetch(FetchError::UpstreamUnavailable { .. }) => {
                ErrorKind::UpstreamUnavailable
            }
            ClimatologyError::Fetch(FetchError::NoData { .. }) => ErrorKind::OutOfBounds,
            _ => ErrorKind::Internal,
        }
    }
}

/// A failed prediction, with the stage at which the request moved to `Failed`.
#[derive(Debug, Error)]
#[error("Prediction failed while {stage}: {source}")]
pub struct PredictionError {
    pub stage: Stage,
    #[source]
    pub source: ClimatologyError,
}

impl PredictionError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

mod aggregate;
mod archive;
mod climatology;
mod config;
mod error;
mod estimate;
mod fetch;
mod grid;
mod pipeline;
mod types;
mod utils;
mod window;

#[cfg(test)]
mod test_support;

pub use climatology::*;
pub use config::{EngineConfig, DEFAULT_YEARS};
pub use error::{ClimatologyError, ErrorKind, PredictionError};

pub use types::date_key::DateKey;
pub use types::geo_point::GeoPoint;
pub use types::prediction::{Annotation, PredictionMetadata, PredictionResult};
pub use types::sample::{HistoricalSample, QualityFlag};
pub use types::variable::{Variable, VariableKind};

pub use grid::cell::{CellId, GridCell, GridSpec};
pub use grid::error::GridError;
pub use grid::index::{CellWeight, GridIndex, Resolution};
pub use grid::manifest::GridManifest;

pub use window::{window, DateSpan, WindowDay, WindowKey, YearRange, MAX_HALF_WIDTH_DAYS};

pub use archive::config::{ArchiveConfig, Credentials, PASSWORD_ENV, USER_ENV};
pub use archive::error::ArchiveError;
pub use archive::http::HttpArchive;
pub use archive::{Archive, ArchiveValue, DatasetVersion};

pub use fetch::disk_store::SampleStore;
pub use fetch::error::{FetchError, StoreError};
pub use fetch::fetcher::{DatasetFetcher, FetcherConfig};
pub use fetch::key::{CacheKey, FetchedSamples};
pub use fetch::memory_cache::{CacheStats, SampleCache};
pub use fetch::retry::{RetryDecision, RetryPolicy, RetryState};

pub use aggregate::{aggregate, aggregate_weighted, DailyValue, VariableDistribution};
pub use estimate::{
    estimate, percentile, Confidence, ConfidenceThresholds, Estimate, EstimatorConfig,
    LabelThresholds, Occurrence, WeatherLabel,
};
pub use pipeline::{PipelineState, Stage};

/// The archive trait is implemented with `async_trait`; re-exported so
/// downstream implementations use the same macro version.
pub use async_trait::async_trait;

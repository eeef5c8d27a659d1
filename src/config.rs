//! Engine-wide settings.

use crate::estimate::EstimatorConfig;
use crate::fetch::fetcher::FetcherConfig;
use crate::fetch::retry::RetryPolicy;
use crate::window::YearRange;
use bon::Builder;
use std::path::PathBuf;
use std::time::Duration;

/// The MERRA-2 daily record used when no year range is given.
pub const DEFAULT_YEARS: YearRange = YearRange {
    start: 1980,
    end: 2024,
};

/// Settings for a [`crate::Climatology`] engine. Every field has a default, so
/// `EngineConfig::builder().build()` is a complete configuration.
///
/// # Examples
///
/// ```
/// use climatology::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::builder()
///     .half_width_days(10)
///     .request_timeout(Duration::from_secs(10))
///     .build();
/// assert_eq!(config.half_width_days, 10);
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct EngineConfig {
    /// Days either side of the target day sampled in every year.
    #[builder(default = 7)]
    pub half_width_days: u32,
    #[builder(default = DEFAULT_YEARS)]
    pub years: YearRange,
    /// Memory budget of the in-process sample cache, bytes.
    #[builder(default = 64 * 1024 * 1024)]
    pub memory_budget_bytes: usize,
    /// Distance from a cell center, in cell units, that counts as "on" the cell.
    #[builder(default = 0.1)]
    pub snap_tolerance: f64,
    /// Requests `predict_many` runs at once.
    #[builder(default = 8)]
    pub concurrency: usize,
    /// Deadline for each archive call.
    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default)]
    pub estimator: EstimatorConfig,
    /// Fall back to the nearest covered cell within this radius when a point is
    /// outside coverage. Without it such points are rejected.
    pub fallback_radius_km: Option<f64>,
    /// Root of the on-disk cache. Samples are only persisted when this is set;
    /// the HTTP constructors fill in the platform cache directory.
    #[builder(into)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    pub(crate) fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            retry: self.retry,
            request_timeout: self.request_timeout,
            memory_budget_bytes: self.memory_budget_bytes,
            ..FetcherConfig::default()
        }
    }
}

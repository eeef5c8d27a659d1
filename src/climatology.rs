//! The main entry point: resolve a location, pick the seasonal window, fetch the
//! historical record and summarise it into a [`PredictionResult`].

use crate::aggregate::{aggregate_weighted, VariableDistribution};
use crate::archive::config::ArchiveConfig;
use crate::archive::http::HttpArchive;
use crate::archive::{Archive, DatasetVersion};
use crate::config::EngineConfig;
use crate::error::{ClimatologyError, PredictionError};
use crate::estimate::{estimate, Estimate};
use crate::fetch::disk_store::SampleStore;
use crate::fetch::error::FetchError;
use crate::fetch::fetcher::DatasetFetcher;
use crate::fetch::key::FetchedSamples;
use crate::fetch::memory_cache::CacheStats;
use crate::grid::cell::CellId;
use crate::grid::index::{GridIndex, Resolution};
use crate::grid::manifest::GridManifest;
use crate::pipeline::{PipelineState, Stage};
use crate::types::date_key::DateKey;
use crate::types::geo_point::GeoPoint;
use crate::types::prediction::{Annotation, PredictionMetadata, PredictionResult};
use crate::types::sample::HistoricalSample;
use crate::types::variable::Variable;
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use crate::window::{WindowKey, YearRange};
use bon::{bon, Builder};
use chrono::Utc;
use futures_util::future::try_join_all;
use futures_util::{stream, StreamExt};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// One prediction request, as taken by [`Climatology::predict_many`].
///
/// Unset options fall back to the engine's [`EngineConfig`].
#[derive(Debug, Clone, Builder)]
pub struct PredictionRequest {
    pub location: GeoPoint,
    #[builder(into)]
    pub date: DateKey,
    pub variables: Option<Vec<Variable>>,
    pub half_width_days: Option<u32>,
    pub years: Option<YearRange>,
    pub fallback_radius_km: Option<f64>,
}

/// The climatology engine.
///
/// Owns the grid index and the dataset fetcher, whose cache is the only state
/// shared between requests. Requests themselves are independent and can run
/// concurrently on one engine.
///
/// Create one against the HTTP archive with [`Climatology::new`] or
/// [`Climatology::with_config`], or plug in any [`Archive`] implementation with
/// [`Climatology::from_parts`].
///
/// # Examples
///
/// ```rust,no_run
/// # use climatology::{ArchiveConfig, Climatology, ClimatologyError};
/// # async fn run() -> Result<(), ClimatologyError> {
/// let archive = ArchiveConfig::from_env("https://archive.example.org/merra2-daily", "5.12.4");
/// let engine = Climatology::new(archive).await?;
/// # Ok(())
/// # }
/// ```
pub struct Climatology {
    grid: Arc<GridIndex>,
    fetcher: DatasetFetcher,
    config: EngineConfig,
}

#[bon]
impl Climatology {
    /// Creates an engine backed by the HTTP archive, with default settings and
    /// the platform cache directory (`~/.cache/climatology_rs_cache` on Linux).
    ///
    /// # Errors
    ///
    /// Returns [`ClimatologyError::CacheDirResolution`] or
    /// [`ClimatologyError::CacheDirCreation`] when no cache directory is available,
    /// and [`ClimatologyError::Grid`] when the grid manifest cannot be loaded.
    pub async fn new(archive: ArchiveConfig) -> Result<Self, ClimatologyError> {
        Self::with_config(archive, EngineConfig::default()).await
    }

    /// Creates an engine backed by the HTTP archive with explicit settings.
    ///
    /// The grid manifest for the archive's dataset version is loaded from the
    /// cache directory, or downloaded once when it is not there yet.
    pub async fn with_config(
        archive: ArchiveConfig,
        mut config: EngineConfig,
    ) -> Result<Self, ClimatologyError> {
        let cache_dir = match config.cache_dir.clone() {
            Some(dir) => dir,
            None => get_cache_dir()?,
        };
        ensure_cache_dir_exists(&cache_dir).await?;
        config.cache_dir = Some(cache_dir.clone());

        let manifest = GridManifest::load(&archive, &cache_dir).await?;
        let grid = GridIndex::from_manifest(manifest)?;
        let archive = HttpArchive::new(archive, &cache_dir)?;
        Self::from_parts(Arc::new(archive), grid, config).await
    }

    /// Creates an engine from an archive and a grid index.
    ///
    /// Samples are persisted under `config.cache_dir` when it is set, and kept in
    /// memory only otherwise.
    pub async fn from_parts(
        archive: Arc<dyn Archive>,
        grid: GridIndex,
        config: EngineConfig,
    ) -> Result<Self, ClimatologyError> {
        let version = archive.dataset_version().await?;
        let store = config
            .cache_dir
            .as_ref()
            .map(|dir| SampleStore::new(dir.join("samples")));
        let grid = grid.with_snap_tolerance(config.snap_tolerance);
        info!(
            "Climatology engine ready: dataset {}, {} covered cells, years {}",
            version,
            grid.covered_cells(),
            config.years
        );
        Ok(Self {
            grid: Arc::new(grid),
            fetcher: DatasetFetcher::new(archive, version, store, config.fetcher_config()),
            config,
        })
    }

    /// Estimates the likely weather at `location` on the calendar day `date`.
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.location(GeoPoint)`: **Required.** Where to estimate.
    /// * `.date(impl Into<DateKey>)`: **Required.** The calendar day; a `NaiveDate` works, its year is ignored.
    /// * `.variables(Vec<Variable>)`: Optional. Defaults to all variables.
    /// * `.half_width_days(u32)`: Optional. Overrides the configured window half width.
    /// * `.years(YearRange)`: Optional. Overrides the configured historical years.
    /// * `.fallback_radius_km(f64)`: Optional. Use the nearest covered cell within this radius
    ///   for points outside coverage.
    ///
    /// # Errors
    ///
    /// Fails with a [`PredictionError`] naming the pipeline stage. Only an
    /// out-of-coverage location, an invalid request, or an archive that stays
    /// unavailable through all retries fail a prediction. Missing years and
    /// low-quality data are reported as [`Annotation`]s on the result instead.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use climatology::{ArchiveConfig, Climatology, GeoPoint, Variable};
    /// # use chrono::NaiveDate;
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// # let engine = Climatology::new(ArchiveConfig::from_env("https://archive.example.org", "5.12.4")).await?;
    /// let paris = GeoPoint::new(48.8566, 2.3522)?;
    /// let result = engine
    ///     .predict()
    ///     .location(paris)
    ///     .date(NaiveDate::from_ymd_opt(2025, 7, 14).unwrap())
    ///     .variables(vec![Variable::Temperature, Variable::Precipitation])
    ///     .call()
    ///     .await?;
    ///
    /// if let Some(temperature) = result.estimate(Variable::Temperature) {
    ///     println!("median {:?} {}", temperature.median, temperature.unit);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub async fn predict(
        &self,
        location: GeoPoint,
        #[builder(into)] date: DateKey,
        variables: Option<Vec<Variable>>,
        half_width_days: Option<u32>,
        years: Option<YearRange>,
        fallback_radius_km: Option<f64>,
    ) -> Result<PredictionResult, PredictionError> {
        self.run(PredictionRequest {
            location,
            date,
            variables,
            half_width_days,
            years,
            fallback_radius_km,
        })
        .await
    }

    /// Runs independent requests concurrently, at most `config.concurrency` at a
    /// time. Results come back in request order.
    pub async fn predict_many(
        &self,
        requests: Vec<PredictionRequest>,
    ) -> Vec<Result<PredictionResult, PredictionError>> {
        let mut results: Vec<_> = stream::iter(requests.into_iter().enumerate())
            .map(|(i, request)| async move { (i, self.run(request).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Asks the archive for its current dataset version. On a change, cached
    /// samples of the old version are dropped from memory and disk. Returns
    /// whether the version changed.
    ///
    /// [`HttpArchive`] is pinned to the version in its [`ArchiveConfig`] and never
    /// reports a change; build a new engine to move it to another version.
    pub async fn refresh_dataset_version(&self) -> Result<bool, ClimatologyError> {
        let version = self.fetcher.archive().dataset_version().await?;
        if !self.fetcher.set_dataset_version(version.clone()) {
            return Ok(false);
        }
        if let Some(store) = self.fetcher.store() {
            let removed = store.purge_stale_versions(&version).await?;
            info!("Purged {} stale dataset version(s) from disk", removed);
        }
        Ok(true)
    }

    pub fn dataset_version(&self) -> DatasetVersion {
        self.fetcher.dataset_version()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.fetcher.stats()
    }

    pub fn grid(&self) -> &GridIndex {
        &self.grid
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Releases the in-memory cache. Persisted samples stay on disk.
    pub fn shutdown(self) {
        let stats = self.fetcher.stats();
        self.fetcher.clear_memory();
        info!(
            "Climatology engine shut down after {} cache hits, {} misses, {} upstream calls",
            stats.hits, stats.misses, stats.upstream_calls
        );
    }
}

impl Climatology {
    async fn run(&self, request: PredictionRequest) -> Result<PredictionResult, PredictionError> {
        let mut state = PipelineState::new();
        match self.execute(&request, &mut state).await {
            Ok(result) => Ok(result),
            Err(source) => {
                let stage = state.fail();
                warn!(
                    "Prediction for {} on {} failed while {}: {}",
                    request.location, request.date, stage, source
                );
                Err(PredictionError { stage, source })
            }
        }
    }

    async fn execute(
        &self,
        request: &PredictionRequest,
        state: &mut PipelineState,
    ) -> Result<PredictionResult, ClimatologyError> {
        let fallback_km = request.fallback_radius_km.or(self.config.fallback_radius_km);
        let resolution = self.grid.resolve_or_nearest(request.location, fallback_km)?;

        state.advance(Stage::SelectingWindow)?;
        let window = WindowKey::new(
            request.date,
            request.half_width_days.unwrap_or(self.config.half_width_days),
            request.years.unwrap_or(self.config.years),
        )?;
        let variables: BTreeSet<Variable> = match &request.variables {
            Some(vars) if !vars.is_empty() => vars.iter().copied().collect(),
            _ => Variable::ALL.into_iter().collect(),
        };

        state.advance(Stage::Fetching)?;
        let dataset_version = self.fetcher.dataset_version();
        let fetched = self.fetch_all(&resolution, window, &variables).await?;

        state.advance(Stage::Aggregating)?;
        let mut annotations = Vec::new();
        let mut samples: Vec<HistoricalSample> = Vec::new();
        for (variable, cell, result) in &fetched {
            match result {
                Some(found) => {
                    if found.is_partial() {
                        annotations.push(Annotation::PartialData {
                            variable: *variable,
                            cell: *cell,
                            available_years: found.available_years(),
                            missing_years: found.missing_years.clone(),
                        });
                    }
                    samples.extend(found.samples.iter().cloned());
                }
                None => annotations.push(Annotation::NoData {
                    variable: *variable,
                    cell: *cell,
                }),
            }
        }
        let weights: HashMap<CellId, f64> = resolution
            .cells()
            .iter()
            .map(|c| (c.cell.id, c.weight))
            .collect();
        let mut distributions = aggregate_weighted(&samples, &weights);
        for dist in distributions.values().filter(|d| d.degraded) {
            annotations.push(Annotation::DegradedQuality {
                variable: dist.variable,
            });
        }

        state.advance(Stage::Estimating)?;
        let estimates: BTreeMap<Variable, Estimate> = variables
            .iter()
            .map(|variable| {
                let dist = distributions
                    .remove(variable)
                    .unwrap_or_else(|| VariableDistribution::empty(*variable));
                (*variable, estimate(&dist, &self.config.estimator))
            })
            .collect();

        state.advance(Stage::Done)?;
        Ok(PredictionResult {
            estimates,
            metadata: PredictionMetadata {
                location: request.location,
                date_key: request.date,
                resolution,
                window,
                dataset_version,
                generated_at: Utc::now(),
            },
            annotations,
        })
    }

    /// Fetches every (cell, variable) pair concurrently. Cells without data come
    /// back as `None`; any other fetch failure aborts the request.
    async fn fetch_all(
        &self,
        resolution: &Resolution,
        window: WindowKey,
        variables: &BTreeSet<Variable>,
    ) -> Result<Vec<(Variable, CellId, Option<Arc<FetchedSamples>>)>, FetchError> {
        let fetches = variables.iter().flat_map(|variable| {
            resolution.cells().iter().map(move |weighted| {
                let cell = weighted.cell.id;
                async move {
                    match self.fetcher.fetch(cell, window, *variable).await {
                        Ok(samples) => Ok((*variable, cell, Some(samples))),
                        Err(FetchError::NoData { .. }) => Ok((*variable, cell, None)),
                        Err(e) => Err(e),
                    }
                }
            })
        });
        try_join_all(fetches).await
    }
}

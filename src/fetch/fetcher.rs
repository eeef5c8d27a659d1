//! The dataset fetcher: memory cache, durable store and the upstream archive
//! behind one `fetch(cell, window, variable)` call.
//!
//! Concurrent requests for the same key share one retrieval. The retrieval is a
//! `Shared` future registered by weak handle, so it lives exactly as long as
//! somebody is waiting on it: a requester that gives up does not cancel it for
//! the others, and it is dropped once the last one is gone.

use crate::archive::error::ArchiveError;
use crate::archive::{Archive, ArchiveValue, DatasetVersion};
use crate::fetch::disk_store::SampleStore;
use crate::fetch::error::FetchError;
use crate::fetch::key::{CacheKey, FetchedSamples};
use crate::fetch::memory_cache::{CacheStats, SampleCache};
use crate::fetch::retry::{RetryDecision, RetryPolicy};
use crate::grid::cell::CellId;
use crate::types::sample::HistoricalSample;
use crate::types::variable::Variable;
use crate::window::{DateSpan, WindowKey};
use futures_util::future::{BoxFuture, Shared, WeakShared};
use futures_util::{stream, FutureExt, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

type Retrieval = BoxFuture<'static, Result<Arc<FetchedSamples>, FetchError>>;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub retry: RetryPolicy,
    /// Deadline for a single archive call.
    pub request_timeout: Duration,
    pub memory_budget_bytes: usize,
    /// Archive calls one retrieval may have outstanding at once.
    pub span_concurrency: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            memory_budget_bytes: 64 * 1024 * 1024,
            span_concurrency: 4,
        }
    }
}

#[derive(Clone)]
pub struct DatasetFetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    archive: Arc<dyn Archive>,
    store: Option<SampleStore>,
    config: FetcherConfig,
    version: RwLock<DatasetVersion>,
    cache: Mutex<SampleCache>,
    in_flight: Mutex<HashMap<CacheKey, WeakShared<Retrieval>>>,
    upstream_calls: AtomicU64,
    disk_hits: AtomicU64,
}

impl DatasetFetcher {
    pub fn new(
        archive: Arc<dyn Archive>,
        version: DatasetVersion,
        store: Option<SampleStore>,
        config: FetcherConfig,
    ) -> Self {
        let cache = SampleCache::new(config.memory_budget_bytes);
        Self {
            inner: Arc::new(FetcherInner {
                archive,
                store,
                config,
                version: RwLock::new(version),
                cache: Mutex::new(cache),
                in_flight: Mutex::new(HashMap::new()),
                upstream_calls: AtomicU64::new(0),
                disk_hits: AtomicU64::new(0),
            }),
        }
    }

    pub fn archive(&self) -> &Arc<dyn Archive> {
        &self.inner.archive
    }

    pub fn store(&self) -> Option<&SampleStore> {
        self.inner.store.as_ref()
    }

    pub fn dataset_version(&self) -> DatasetVersion {
        self.inner
            .version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switches to a new dataset version and drops memory entries of the old one.
    /// Returns whether the version actually changed.
    pub fn set_dataset_version(&self, version: DatasetVersion) -> bool {
        {
            let mut current = self
                .inner
                .version
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *current == version {
                return false;
            }
            info!("Dataset version changed from {} to {}", current, version);
            *current = version.clone();
        }
        let dropped = self.inner.cache().retain_version(&version);
        debug!("Dropped {} cached entries of the previous dataset version", dropped);
        true
    }

    /// Samples for one cell, window and variable under the current dataset version.
    ///
    /// Fails with [`FetchError::NoData`] when the archive has nothing at all for
    /// the key. Missing years short of that are reported in
    /// [`FetchedSamples::missing_years`].
    pub async fn fetch(
        &self,
        cell: CellId,
        window: WindowKey,
        variable: Variable,
    ) -> Result<Arc<FetchedSamples>, FetchError> {
        let key = CacheKey {
            version: self.dataset_version(),
            cell,
            window,
            variable,
        };

        let cached = self.inner.cache().get(&key);
        let samples = match cached {
            Some(hit) => {
                debug!("Cache hit for {}", key);
                hit
            }
            None => self.join_or_start(&key).await?,
        };

        if samples.samples.is_empty() {
            return Err(FetchError::NoData {
                key: key.to_string(),
            });
        }
        Ok(samples)
    }

    fn join_or_start(&self, key: &CacheKey) -> Shared<Retrieval> {
        let mut in_flight = self.inner.in_flight();
        if let Some(existing) = in_flight.get(key).and_then(WeakShared::upgrade) {
            debug!("Joining in-flight fetch for {}", key);
            return existing;
        }

        let retrieval = retrieve(Arc::clone(&self.inner), key.clone())
            .boxed()
            .shared();
        if let Some(weak) = retrieval.downgrade() {
            in_flight.insert(key.clone(), weak);
        }
        retrieval
    }

    /// Retrievals currently registered as in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            upstream_calls: self.inner.upstream_calls.load(Ordering::Relaxed),
            disk_hits: self.inner.disk_hits.load(Ordering::Relaxed),
            ..self.inner.cache().stats()
        }
    }

    pub fn clear_memory(&self) {
        self.inner.cache().clear();
    }
}

impl FetcherInner {
    fn cache(&self) -> MutexGuard<'_, SampleCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, WeakShared<Retrieval>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, version: &DatasetVersion) -> bool {
        *self.version.read().unwrap_or_else(PoisonError::into_inner) == *version
    }

    async fn retrieve_uncached(&self, key: &CacheKey) -> Result<FetchedSamples, FetchError> {
        if let Some(store) = &self.store {
            match store.load(key).await {
                Ok(Some(samples)) => {
                    self.disk_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(samples);
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable stored samples for {}: {}", key, e),
            }
        }

        let spans = key.window.fetch_spans();
        let year_spans = key.window.year_spans();
        debug!("Fetching {} from archive in {} span(s)", key, spans.len());

        let batches: Vec<Vec<ArchiveValue>> = stream::iter(spans)
            .map(|span| self.call_archive(key, span))
            .buffered(self.config.span_concurrency.max(1))
            .try_collect()
            .await?;

        let mut samples: Vec<HistoricalSample> = batches
            .into_iter()
            .flatten()
            .filter_map(|value| {
                let (year, _) = year_spans.iter().find(|(_, span)| span.contains(value.date))?;
                Some(HistoricalSample {
                    year: *year,
                    date: value.date,
                    cell: key.cell,
                    variable: key.variable,
                    value: value.value,
                    quality: value.quality,
                })
            })
            .collect();
        samples.sort_by_key(|s| s.date);

        let fetched = FetchedSamples::new(samples, key.window.years);
        if fetched.is_partial() {
            info!(
                "Archive had {} of {} years for {}",
                fetched.available_years(),
                key.window.years.len(),
                key
            );
        }

        if let Some(store) = &self.store {
            if !self.is_current(&key.version) {
                debug!("Not persisting {}: dataset version changed mid-fetch", key);
            } else if let Err(e) = store.save(key, &fetched).await {
                warn!("Failed to persist samples for {}: {}", key, e);
            }
        }
        Ok(fetched)
    }

    /// One archive call with timeout and bounded exponential backoff.
    async fn call_archive(
        &self,
        key: &CacheKey,
        span: DateSpan,
    ) -> Result<Vec<ArchiveValue>, FetchError> {
        let mut retry = self.config.retry.start();
        loop {
            let attempt = retry.attempt();
            self.upstream_calls.fetch_add(1, Ordering::Relaxed);
            debug!("Archive call for {} span {} (attempt {})", key, span, attempt);

            let outcome = match tokio::time::timeout(
                self.config.request_timeout,
                self.archive.get_values(key.cell, span, key.variable),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ArchiveError::Unavailable(format!(
                    "request timed out after {:?}",
                    self.config.request_timeout
                ))),
            };

            let error = match outcome {
                Ok(values) => return Ok(values),
                Err(e) => e,
            };
            match retry.on_failure(error.is_transient()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "Archive call for {} span {} failed on attempt {}: {}. Retrying in {:?}",
                        key, span, attempt, error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp if error.is_transient() => {
                    warn!(
                        "Giving up on {} span {} after {} attempt(s): {}",
                        key, span, attempt, error
                    );
                    return Err(FetchError::UpstreamUnavailable {
                        key: key.to_string(),
                        attempts: attempt,
                        message: error.to_string(),
                    });
                }
                RetryDecision::GiveUp => {
                    return Err(FetchError::UpstreamRejected {
                        key: key.to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
    }
}

async fn retrieve(
    inner: Arc<FetcherInner>,
    key: CacheKey,
) -> Result<Arc<FetchedSamples>, FetchError> {
    let mut guard = InFlightGuard {
        inner: inner.as_ref(),
        key: &key,
        finished: false,
    };

    // A retrieval that finished just before this one was registered.
    let cached = inner.cache().peek(&key);
    let result = match cached {
        Some(hit) => Ok(hit),
        None => inner.retrieve_uncached(&key).await.map(Arc::new),
    };

    // Results of a superseded dataset version go back to their requesters only.
    if let Ok(samples) = &result {
        if inner.is_current(&key.version) {
            inner.cache().insert(key.clone(), Arc::clone(samples));
        }
    }
    guard.finished = true;
    result
}

/// Unregisters a retrieval when it completes or when every requester has dropped it.
struct InFlightGuard<'a> {
    inner: &'a FetcherInner,
    key: &'a CacheKey,
    finished: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight();
        // After cancellation the slot may already hold a newer retrieval; keep that one.
        let live = if self.finished {
            None
        } else {
            in_flight.get(self.key).and_then(WeakShared::upgrade)
        };
        if live.is_none() {
            in_flight.remove(self.key);
            if !self.finished {
                debug!("Dropped abandoned fetch for {}", self.key);
            }
        }
        drop(in_flight);
        drop(live);
    }
}

//! Scripted archive and fixtures shared by the unit tests.

use crate::archive::error::ArchiveError;
use crate::archive::{Archive, ArchiveValue, DatasetVersion};
use crate::grid::cell::{CellId, GridSpec};
use crate::grid::index::GridIndex;
use crate::types::geo_point::GeoPoint;
use crate::types::sample::{HistoricalSample, QualityFlag};
use crate::types::variable::Variable;
use crate::window::DateSpan;
use async_compression::tokio::bufread::GzipEncoder;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

type ValueFn = Arc<dyn Fn(CellId, Variable, NaiveDate) -> Option<f64> + Send + Sync>;

/// In-memory archive with a call counter and injectable latency, gaps and failures.
pub(crate) struct StubArchive {
    version: Mutex<DatasetVersion>,
    values: ValueFn,
    latency: Duration,
    missing_years: HashSet<i32>,
    flagged_years: HashSet<i32>,
    empty_cells: HashSet<CellId>,
    transient_failures: AtomicU32,
    permanent_failure: bool,
    calls: AtomicUsize,
}

impl StubArchive {
    pub fn from_fn(
        values: impl Fn(CellId, Variable, NaiveDate) -> Option<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version: Mutex::new(DatasetVersion::new("v1")),
            values: Arc::new(values),
            latency: Duration::ZERO,
            missing_years: HashSet::new(),
            flagged_years: HashSet::new(),
            empty_cells: HashSet::new(),
            transient_failures: AtomicU32::new(0),
            permanent_failure: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::from_fn(move |_, _, _| Some(value))
    }

    /// A Paris-like July: afternoons between 24 and 31 °C, a wet day in five,
    /// light winds.
    pub fn paris_summer() -> Self {
        Self::from_fn(|_, variable, date| {
            let spread = ((date.year() * 7 + date.ordinal() as i32) % 8) as f64;
            Some(match variable {
                Variable::Temperature => 24.0 + spread,
                Variable::Precipitation => {
                    if date.ordinal() % 5 == 0 {
                        4.0
                    } else {
                        0.0
                    }
                }
                Variable::WindSpeed => 3.0 + spread / 4.0,
            })
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_missing_years(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.missing_years.extend(years);
        self
    }

    pub fn with_flagged_years(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.flagged_years.extend(years);
        self
    }

    pub fn with_empty_cells(mut self, cells: impl IntoIterator<Item = CellId>) -> Self {
        self.empty_cells.extend(cells);
        self
    }

    pub fn with_transient_failures(self, failures: u32) -> Self {
        self.transient_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn with_permanent_failure(mut self) -> Self {
        self.permanent_failure = true;
        self
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = DatasetVersion::new(version);
    }

    /// Number of `get_values` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Archive for StubArchive {
    async fn dataset_version(&self) -> Result<DatasetVersion, ArchiveError> {
        Ok(self.version.lock().unwrap().clone())
    }

    async fn get_values(
        &self,
        cell: CellId,
        span: DateSpan,
        variable: Variable,
    ) -> Result<Vec<ArchiveValue>, ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.permanent_failure {
            return Err(ArchiveError::MissingColumn {
                cell: cell.to_string(),
                column: variable.archive_column().to_string(),
            });
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ArchiveError::Unavailable("scripted outage".to_string()));
        }
        if self.empty_cells.contains(&cell) {
            return Ok(Vec::new());
        }

        Ok(span
            .dates()
            .filter(|date| !self.missing_years.contains(&date.year()))
            .filter_map(|date| {
                let value = (self.values)(cell, variable, date)?;
                let quality = self
                    .flagged_years
                    .contains(&date.year())
                    .then_some(QualityFlag::Suspect);
                Some(ArchiveValue {
                    date,
                    value,
                    quality,
                })
            })
            .collect())
    }
}

/// A 0.5° x 0.625° grid over Europe, rows from 35°N and columns from 10°W.
pub(crate) fn europe_spec() -> GridSpec {
    GridSpec {
        origin_latitude: 35.0,
        origin_longitude: -10.0,
        lat_step: 0.5,
        lon_step: 0.625,
        rows: 60,
        cols: 80,
    }
}

pub(crate) fn europe_grid() -> GridIndex {
    GridIndex::full(europe_spec()).unwrap()
}

/// The Europe grid with every column east of 15°E left uncovered.
pub(crate) fn western_europe_grid() -> GridIndex {
    let spec = europe_spec();
    let covered = (0..spec.rows).flat_map(|row| (0..40).map(move |col| CellId::new(row, col)));
    GridIndex::with_coverage(spec, covered).unwrap()
}

pub(crate) fn paris() -> GeoPoint {
    GeoPoint::new(48.8566, 2.3522).unwrap()
}

/// `count` consecutive daily samples from July 7 of `year`, all equal to `value`.
pub(crate) fn sample_run(
    cell: CellId,
    variable: Variable,
    year: i32,
    count: usize,
    value: f64,
) -> Vec<HistoricalSample> {
    let start = NaiveDate::from_ymd_opt(year, 7, 7).unwrap();
    start
        .iter_days()
        .take(count)
        .map(|date| HistoricalSample {
            year,
            date,
            cell,
            variable,
            value,
            quality: None,
        })
        .collect()
}

/// Gzip-compresses `bytes` the way the archive serves its files.
pub(crate) async fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(bytes);
    let mut compressed = Vec::new();
    encoder.read_to_end(&mut compressed).await.unwrap();
    compressed
}

/// Minimal HTTP/1.1 file server on a loopback port. Serves `files` by request
/// path, answers 404 for anything else and counts every request.
pub(crate) struct FileServer {
    base_url: String,
    requests: Arc<AtomicUsize>,
    accept_loop: JoinHandle<()>,
}

impl FileServer {
    pub async fn start(files: HashMap<String, Vec<u8>>, latency: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let files = Arc::new(files);
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        let accept_loop = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let files = Arc::clone(&files);
                let counter = Arc::clone(&counter);
                tokio::spawn(serve_one(socket, files, counter, latency));
            }
        });
        Self {
            base_url,
            requests,
            accept_loop,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve_one(
    mut socket: TcpStream,
    files: Arc<HashMap<String, Vec<u8>>>,
    counter: Arc<AtomicUsize>,
    latency: Duration,
) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&chunk[..n]),
        }
    }
    counter.fetch_add(1, Ordering::SeqCst);
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }

    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = match files.get(path) {
        Some(body) => ("200 OK", body.as_slice()),
        None => ("404 Not Found", &[][..]),
    };
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(body).await;
    let _ = socket.shutdown().await;
}

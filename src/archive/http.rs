//! Bulk HTTP archive: one gzipped CSV per grid cell holding the full daily record.
//!
//! Files live at `{base_url}/{version}/{cell}.csv.gz` with the header
//! `date,T2MMEAN,TPRECMAX,WS10MMEAN,QC`. A cell file is downloaded once, stored
//! as parquet under the cache directory and queried lazily from then on.

use crate::archive::config::ArchiveConfig;
use crate::archive::error::ArchiveError;
use crate::archive::{Archive, ArchiveValue, DatasetVersion};
use crate::grid::cell::CellId;
use crate::types::sample::QualityFlag;
use crate::types::variable::Variable;
use crate::window::DateSpan;
use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use polars::prelude::*;
use reqwest::Client;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, OnceCell};
use tokio::{fs, task};
use tokio_util::io::StreamReader;

const DATE_COLUMN: &str = "date";
const QC_COLUMN: &str = "QC";

type FrameSlot = Arc<OnceCell<Option<LazyFrame>>>;

/// [`Archive`] over the bulk HTTP archive of one dataset version.
///
/// The version is part of every file URL, so an `HttpArchive` always reports the
/// version it was configured with. Moving to a new dataset version means building
/// a new engine from an [`ArchiveConfig`] naming it;
/// `Climatology::refresh_dataset_version` only sees changes from archives that
/// report a live version.
pub struct HttpArchive {
    config: ArchiveConfig,
    cache_dir: PathBuf,
    download_client: Client,
    frames: Mutex<HashMap<CellId, FrameSlot>>,
}

impl HttpArchive {
    /// Creates a client storing parquet copies under
    /// `cache_dir/archive/{dataset_version}`.
    pub fn new(config: ArchiveConfig, cache_dir: &Path) -> Result<Self, ArchiveError> {
        let download_client = config
            .http_client()
            .map_err(|e| ArchiveError::NetworkRequest(config.base_url.clone(), e))?;
        let cache_dir = cache_dir.join("archive").join(&config.dataset_version);
        Ok(Self {
            config,
            cache_dir,
            download_client,
            frames: Mutex::new(HashMap::new()),
        })
    }

    /// The cell's full record, loaded once per cell. `None` when the archive has
    /// no file for the cell.
    async fn cell_frame(&self, cell: CellId) -> Result<Option<LazyFrame>, ArchiveError> {
        let slot = {
            let mut frames = self.frames.lock().await;
            Arc::clone(frames.entry(cell).or_default())
        };
        // Concurrent callers for a cold cell wait on the one load. A failed load
        // leaves the slot empty for the next caller.
        let frame = slot.get_or_try_init(|| self.load_frame(cell)).await?;
        Ok(frame.clone())
    }

    async fn load_frame(&self, cell: CellId) -> Result<Option<LazyFrame>, ArchiveError> {
        let parquet_path = self.cache_dir.join(format!("{}.parquet", cell));

        if fs::metadata(&parquet_path).await.is_ok() {
            debug!("Archive cache hit for cell {} at {:?}", cell, parquet_path);
        } else {
            info!("Archive cache miss for cell {}. Downloading.", cell);
            let raw_bytes = match self.download(cell).await {
                Ok(bytes) => bytes,
                Err(ArchiveError::CellNotFound { .. }) => {
                    info!("Archive has no file for cell {}", cell);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            let df = Self::csv_to_dataframe(raw_bytes, cell).await?;

            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| ArchiveError::CacheDirCreation(self.cache_dir.clone(), e))?;
            Self::cache_dataframe(df, &parquet_path).await?;
            info!("Cached archive data for cell {} to {:?}", cell, parquet_path);
        }

        LazyFrame::scan_parquet(&parquet_path, Default::default())
            .map(Some)
            .map_err(|e| ArchiveError::ParquetScan(parquet_path.clone(), e))
    }

    async fn download(&self, cell: CellId) -> Result<Vec<u8>, ArchiveError> {
        let url = self.config.version_url(&format!("{}.csv.gz", cell));
        debug!("Downloading {}", url);

        let response = self
            .config
            .authorize(self.download_client.get(&url))
            .send()
            .await
            .map_err(|e| ArchiveError::NetworkRequest(url.clone(), e))?;

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("HTTP error for {}: {:?}", url, e);
                return Err(match e.status() {
                    Some(reqwest::StatusCode::NOT_FOUND) => ArchiveError::CellNotFound {
                        cell: cell.to_string(),
                    },
                    Some(status) => ArchiveError::HttpStatus {
                        url,
                        status,
                        source: e,
                    },
                    None => ArchiveError::NetworkRequest(url, e),
                });
            }
        };

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let stream_reader = StreamReader::new(stream);
        let mut decoder = GzipDecoder::new(stream_reader);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).await?;
        info!(
            "Downloaded and decompressed {} bytes for cell {}",
            decompressed.len(),
            cell
        );
        Ok(decompressed)
    }

    /// Parses CSV bytes on a blocking thread and checks the expected columns exist.
    async fn csv_to_dataframe(bytes: Vec<u8>, cell: CellId) -> Result<DataFrame, ArchiveError> {
        let cell_name = cell.to_string();
        task::spawn_blocking(move || {
            let io_err = |source| ArchiveError::CsvReadIo {
                cell: cell_name.clone(),
                source,
            };
            let mut temp_file = NamedTempFile::new().map_err(io_err)?;
            temp_file.write_all(&bytes).map_err(io_err)?;
            temp_file.flush().map_err(io_err)?;

            let polars_err = |source| ArchiveError::CsvReadPolars {
                cell: cell_name.clone(),
                source,
            };
            let df = CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(temp_file.path().to_path_buf()))
                .map_err(polars_err)?
                .finish()
                .map_err(polars_err)?;

            let names = df.get_column_names();
            let required = std::iter::once(DATE_COLUMN)
                .chain(Variable::ALL.iter().map(|v| v.archive_column()));
            for column in required {
                if !names.iter().any(|n| n.as_str() == column) {
                    return Err(ArchiveError::MissingColumn {
                        cell: cell_name.clone(),
                        column: column.to_string(),
                    });
                }
            }
            Ok(df)
        })
        .await?
    }

    /// Writes the parquet file next to its final path and renames it into place,
    /// so the path never holds a partial file.
    async fn cache_dataframe(mut df: DataFrame, path: &Path) -> Result<(), ArchiveError> {
        let path_buf = path.to_path_buf();
        task::spawn_blocking(move || {
            let dir = path_buf.parent().unwrap_or_else(|| Path::new("."));
            let mut temp_file = NamedTempFile::new_in(dir)
                .map_err(|e| ArchiveError::ParquetWriteIo(path_buf.clone(), e))?;
            ParquetWriter::new(temp_file.as_file_mut())
                .with_compression(ParquetCompression::Snappy)
                .finish(&mut df)
                .map_err(|e| ArchiveError::ParquetWritePolars(path_buf.clone(), e))?;
            temp_file
                .persist(&path_buf)
                .map_err(|e| ArchiveError::ParquetWriteIo(path_buf.clone(), e.error))?;
            Ok::<(), ArchiveError>(())
        })
        .await??;
        Ok(())
    }
}

/// Pulls `(date, value, qc)` rows for one variable out of a cell frame.
fn extract_values(
    frame: LazyFrame,
    span: DateSpan,
    variable: Variable,
) -> Result<Vec<ArchiveValue>, ArchiveError> {
    let column = variable.archive_column();
    let has_qc = frame
        .clone()
        .collect_schema()?
        .iter_names()
        .any(|n| n.as_str() == QC_COLUMN);
    let qc_expr = if has_qc {
        col(QC_COLUMN).cast(DataType::String)
    } else {
        lit(NULL).cast(DataType::String).alias(QC_COLUMN)
    };

    let df = frame
        .select([
            col(DATE_COLUMN).cast(DataType::String),
            col(column).cast(DataType::Float64),
            qc_expr,
        ])
        .filter(
            col(DATE_COLUMN)
                .gt_eq(lit(span.start.format("%Y-%m-%d").to_string()))
                .and(col(DATE_COLUMN).lt_eq(lit(span.end.format("%Y-%m-%d").to_string()))),
        )
        .collect()?;

    let dates = df.column(DATE_COLUMN)?.str()?;
    let values = df.column(column)?.f64()?;
    let flags = df.column(QC_COLUMN)?.str()?;

    let rows = dates
        .into_iter()
        .zip(values.into_iter())
        .zip(flags.into_iter())
        .filter_map(|((date, raw), qc)| {
            let date = NaiveDate::parse_from_str(date?, "%Y-%m-%d").ok()?;
            let value = variable.from_archive_units(raw?)?;
            Some(ArchiveValue {
                date,
                value,
                quality: qc.and_then(QualityFlag::from_code),
            })
        })
        .collect();
    Ok(rows)
}

#[async_trait]
impl Archive for HttpArchive {
    async fn dataset_version(&self) -> Result<DatasetVersion, ArchiveError> {
        Ok(DatasetVersion::new(self.config.dataset_version.clone()))
    }

    async fn get_values(
        &self,
        cell: CellId,
        span: DateSpan,
        variable: Variable,
    ) -> Result<Vec<ArchiveValue>, ArchiveError> {
        // A missing cell file means the archive has nothing for this cell.
        let Some(frame) = self.cell_frame(cell).await? else {
            return Ok(Vec::new());
        };
        task::spawn_blocking(move || extract_values(frame, span, variable)).await?
    }
}

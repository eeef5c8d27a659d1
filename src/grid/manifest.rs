//! Grid manifests: the geometry of a dataset grid plus the cells that carry data.
//!
//! The archive publishes the manifest as gzipped JSON next to the cell files. It is
//! downloaded once per dataset version and kept on disk in bincode form.

use crate::archive::config::ArchiveConfig;
use crate::grid::cell::{CellId, GridSpec};
use crate::grid::error::GridError;
use async_compression::tokio::bufread::GzipDecoder;
use bincode::config::{Configuration, Fixint, LittleEndian};
use futures_util::TryStreamExt;
use log::info;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

const MANIFEST_FILE_NAME: &str = "grid.json.gz";
const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridManifest {
    pub spec: GridSpec,
    /// `None` means every cell of the grid has data.
    #[serde(default)]
    pub covered_cells: Option<Vec<CellId>>,
}

impl GridManifest {
    /// Loads the manifest for the configured dataset version, downloading it when
    /// no cached copy exists in `cache_dir`.
    pub async fn load(config: &ArchiveConfig, cache_dir: &Path) -> Result<Self, GridError> {
        let cache_file = Self::cache_path(cache_dir, &config.dataset_version);

        if cache_file.exists() {
            let path_clone = cache_file.clone();
            let manifest =
                tokio::task::spawn_blocking(move || Self::read_cached(&path_clone)).await??;
            info!("Loaded grid manifest from cache {:?}", cache_file);
            return Ok(manifest);
        }

        let manifest = Self::fetch(config).await?;
        manifest.write_cache(&cache_file).await?;
        Ok(manifest)
    }

    fn cache_path(cache_dir: &Path, version: &str) -> PathBuf {
        cache_dir.join(format!("grid-{}.bin", version))
    }

    fn read_cached(cache_path: &Path) -> Result<Self, GridError> {
        let bytes = std::fs::read(cache_path)
            .map_err(|e| GridError::CacheRead(cache_path.to_path_buf(), e))?;
        let (manifest, _) = bincode::serde::decode_from_slice::<GridManifest, _>(
            &bytes,
            BINCODE_CONFIG,
        )
        .map_err(|e| GridError::CacheDecode(cache_path.to_path_buf(), Box::from(e)))?;
        Ok(manifest)
    }

    async fn fetch(config: &ArchiveConfig) -> Result<Self, GridError> {
        let url = config.version_url(MANIFEST_FILE_NAME);
        info!("Grid manifest not cached. Fetching from URL: {}", url);

        let client = config
            .http_client()
            .map_err(|e| GridError::NetworkRequest(url.clone(), e))?;
        let response = config
            .authorize(client.get(&url))
            .send()
            .await
            .map_err(|e| GridError::NetworkRequest(url.clone(), e))?;
        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                return Err(match e.status() {
                    Some(status) => GridError::HttpStatus {
                        url,
                        status,
                        source: e,
                    },
                    None => GridError::NetworkRequest(url, e),
                });
            }
        };

        let stream = response.bytes_stream().map_err(io::Error::other);
        let stream_reader = StreamReader::new(stream);
        let gzip_decoder = GzipDecoder::new(BufReader::new(stream_reader));
        let mut decoder_reader = BufReader::new(gzip_decoder);
        let mut decompressed_json = Vec::new();
        decoder_reader.read_to_end(&mut decompressed_json).await?;

        let parse_start = std::time::Instant::now();
        let manifest = tokio::task::spawn_blocking(move || {
            serde_json::from_slice::<GridManifest>(&decompressed_json).map_err(GridError::from)
        })
        .await??;
        info!(
            "Parsed grid manifest ({}x{} grid, {} covered cells) in {:?}",
            manifest.spec.rows,
            manifest.spec.cols,
            manifest
                .covered_cells
                .as_ref()
                .map_or("all".to_string(), |c| c.len().to_string()),
            parse_start.elapsed()
        );
        Ok(manifest)
    }

    async fn write_cache(&self, cache_path: &Path) -> Result<(), GridError> {
        let manifest = self.clone();
        let bincode_data = tokio::task::spawn_blocking(move || {
            bincode::serde::encode_to_vec(manifest, BINCODE_CONFIG)
                .map_err(|e| GridError::CacheEncode(Box::new(e)))
        })
        .await??;
        let path = cache_path.to_path_buf();
        let written = bincode_data.len();
        tokio::task::spawn_blocking(move || {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let write_err = |e| GridError::CacheWrite(path.clone(), e);
            let mut temp_file = NamedTempFile::new_in(dir).map_err(write_err)?;
            temp_file.write_all(&bincode_data).map_err(write_err)?;
            temp_file
                .persist(&path)
                .map_err(|e| GridError::CacheWrite(path.clone(), e.error))?;
            Ok::<(), GridError>(())
        })
        .await??;
        info!(
            "Wrote grid manifest cache ({} bytes) to {}",
            written,
            cache_path.display()
        );
        Ok(())
    }
}

//! Durable copy of fetched samples, laid out as
//! `{root}/{version}/{variable}/{cell}/{window}.bin`.
//!
//! Survives restarts so a warm machine never goes back to the archive for a window
//! it has already seen under the same dataset version.

use crate::archive::DatasetVersion;
use crate::fetch::error::StoreError;
use crate::fetch::key::{CacheKey, FetchedSamples};
use bincode::config::{Configuration, Fixint, LittleEndian};
use log::{debug, info};
use std::path::{Path, PathBuf};

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.version.as_str())
            .join(key.variable.path_segment())
            .join(key.cell.to_string())
            .join(format!("{}.bin", key.window))
    }

    /// Reads the stored samples for `key`, or `None` when nothing is stored.
    pub async fn load(&self, key: &CacheKey) -> Result<Option<FetchedSamples>, StoreError> {
        let path = self.path_for(key);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::Read(path.clone(), e))?;
        let samples = tokio::task::spawn_blocking(move || {
            bincode::serde::decode_from_slice::<FetchedSamples, _>(&bytes, BINCODE_CONFIG)
                .map(|(samples, _)| samples)
                .map_err(|e| StoreError::Decode(path, Box::new(e)))
        })
        .await??;
        debug!("Loaded {} samples for {} from disk", samples.samples.len(), key);
        Ok(Some(samples))
    }

    /// Writes samples for `key`. The file is written beside its final name and
    /// renamed into place, so readers never see a half-written entry.
    pub async fn save(&self, key: &CacheKey, samples: &FetchedSamples) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Write(parent.to_path_buf(), e))?;
        }

        let owned = samples.clone();
        let bincode_data = tokio::task::spawn_blocking(move || {
            bincode::serde::encode_to_vec(owned, BINCODE_CONFIG)
                .map_err(|e| StoreError::Encode(Box::new(e)))
        })
        .await??;

        let partial = path.with_extension("bin.partial");
        tokio::fs::write(&partial, &bincode_data)
            .await
            .map_err(|e| StoreError::Write(partial.clone(), e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| StoreError::Write(path.clone(), e))?;
        debug!("Stored {} bytes for {}", bincode_data.len(), key);
        Ok(())
    }

    /// Deletes every version directory other than `current`. Returns how many were removed.
    pub async fn purge_stale_versions(&self, current: &DatasetVersion) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::Read(self.root.clone(), e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Read(self.root.clone(), e))?
        {
            let path = entry.path();
            if !path.is_dir() || entry.file_name().to_string_lossy() == current.as_str() {
                continue;
            }
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| StoreError::CacheDeletion(path.clone(), e))?;
            info!("Removed stale sample cache {}", path.display());
            removed += 1;
        }
        Ok(removed)
    }
}

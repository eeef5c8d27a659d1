use crate::error::ClimatologyError;
use log::info;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_DIR_NAME: &str = "climatology_rs_cache";

pub fn get_cache_dir() -> Result<PathBuf, ClimatologyError> {
    dirs::cache_dir()
        .ok_or(ClimatologyError::CacheDirResolution)
        .map(|p| p.join(CACHE_DIR_NAME))
}

pub async fn ensure_cache_dir_exists(path: &Path) -> Result<(), ClimatologyError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(ClimatologyError::CacheDirCreation(
            path.to_path_buf(),
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "cache path exists but is not a directory",
            ),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating cache directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| ClimatologyError::CacheDirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(ClimatologyError::CacheDirCreation(path.to_path_buf(), e)),
    }
}

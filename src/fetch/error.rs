use std::path::PathBuf;
use thiserror::Error;

/// Failure of a (cell, window, variable) fetch.
///
/// Cloneable because one in-flight fetch can have several requesters waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("Upstream archive unavailable for {key} after {attempts} attempt(s): {message}")]
    UpstreamUnavailable {
        key: String,
        attempts: u32,
        message: String,
    },

    /// The archive answered with an error retrying cannot fix.
    #[error("Archive rejected request for {key}: {message}")]
    UpstreamRejected { key: String, message: String },

    #[error("Archive returned no data for {key}")]
    NoData { key: String },
}

/// Failures of the on-disk sample store. These never fail a fetch; the fetcher
/// logs them and carries on without the durable copy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read sample file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to write sample file '{0}'")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("Failed to decode sample file '{0}'")]
    Decode(PathBuf, #[source] Box<bincode::error::DecodeError>),

    #[error("Failed to encode samples")]
    Encode(#[source] Box<bincode::error::EncodeError>),

    #[error("Failed to delete stale cache '{0}'")]
    CacheDeletion(PathBuf, #[source] std::io::Error),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

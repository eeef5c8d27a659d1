//! The upstream reanalysis archive, seen by the engine as a read-only query
//! `get_values(cell, date span, variable)`.

pub mod config;
pub mod error;
pub mod http;

use crate::archive::error::ArchiveError;
use crate::grid::cell::CellId;
use crate::types::sample::QualityFlag;
use crate::types::variable::Variable;
use crate::window::DateSpan;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version tag of the upstream dataset. Part of every cache key, so a bump
/// strands old entries instead of serving them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetVersion(pub String);

impl DatasetVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One value returned by the archive, already in engine units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveValue {
    pub date: NaiveDate,
    pub value: f64,
    pub quality: Option<QualityFlag>,
}

/// Read access to the historical archive.
///
/// Implementations may be slow, rate limited or briefly unavailable; the fetcher
/// wraps every call in a timeout and retries transient errors. Returned data is
/// trusted. Days with no data are simply absent from the result.
#[async_trait]
pub trait Archive: Send + Sync {
    async fn dataset_version(&self) -> Result<DatasetVersion, ArchiveError>;

    async fn get_values(
        &self,
        cell: CellId,
        span: DateSpan,
        variable: Variable,
    ) -> Result<Vec<ArchiveValue>, ArchiveError>;
}

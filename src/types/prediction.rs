use crate::archive::DatasetVersion;
use crate::estimate::{Confidence, Estimate};
use crate::grid::cell::CellId;
use crate::grid::index::Resolution;
use crate::types::date_key::DateKey;
use crate::types::geo_point::GeoPoint;
use crate::types::variable::Variable;
use crate::window::WindowKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Non-fatal conditions met while answering a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Annotation {
    /// The archive had data for only some of the requested years.
    PartialData {
        variable: Variable,
        cell: CellId,
        available_years: usize,
        missing_years: Vec<i32>,
    },
    /// The archive had nothing at all for a cell.
    NoData { variable: Variable, cell: CellId },
    /// Low-quality samples could not be filtered out.
    DegradedQuality { variable: Variable },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionMetadata {
    pub location: GeoPoint,
    pub date_key: DateKey,
    pub resolution: Resolution,
    pub window: WindowKey,
    pub dataset_version: DatasetVersion,
    pub generated_at: DateTime<Utc>,
}

/// Climatological estimates for one place and calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub estimates: BTreeMap<Variable, Estimate>,
    pub metadata: PredictionMetadata,
    pub annotations: Vec<Annotation>,
}

impl PredictionResult {
    pub fn estimate(&self, variable: Variable) -> Option<&Estimate> {
        self.estimates.get(&variable)
    }

    /// Some years or cells were missing from the archive.
    pub fn is_partial(&self) -> bool {
        self.annotations.iter().any(|a| {
            matches!(
                a,
                Annotation::PartialData { .. } | Annotation::NoData { .. }
            )
        })
    }

    pub fn has_degraded_quality(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| matches!(a, Annotation::DegradedQuality { .. }))
    }

    /// Any estimate at `low` or `none` confidence.
    pub fn is_low_confidence(&self) -> bool {
        self.estimates
            .values()
            .any(|e| e.confidence <= Confidence::Low)
    }

    /// At least one variable has data behind it.
    pub fn has_data(&self) -> bool {
        self.estimates.values().any(|e| e.sample_size > 0)
    }
}

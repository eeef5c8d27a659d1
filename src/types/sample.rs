use crate::grid::cell::CellId;
use crate::types::date_key::DateKey;
use crate::types::variable::Variable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Quality marker attached by the archive to a questionable value.
/// Any flag marks the sample as low quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Failed a plausibility check upstream.
    Suspect,
    /// Gap-filled or modelled rather than assimilated.
    Estimated,
}

impl QualityFlag {
    /// Parses the archive QC codes: `S` suspect, `E` estimated, anything else is clean.
    pub(crate) fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "S" | "s" => Some(QualityFlag::Suspect),
            "E" | "e" => Some(QualityFlag::Estimated),
            _ => None,
        }
    }
}

/// One observed value for one cell, variable and historical day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalSample {
    /// Year anchoring the window this day belongs to.
    pub year: i32,
    pub date: NaiveDate,
    pub cell: CellId,
    pub variable: Variable,
    pub value: f64,
    pub quality: Option<QualityFlag>,
}

impl HistoricalSample {
    pub fn date_key(&self) -> DateKey {
        self.date.into()
    }

    pub fn is_flagged(&self) -> bool {
        self.quality.is_some()
    }
}

//! Grid geometry and cell identities, plus the `rstar` glue used for spatial lookups.

use crate::grid::error::GridError;
use rstar::{PointDistance, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row/column address of a cell in a regular latitude/longitude grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    pub row: u32,
    pub col: u32,
}

impl CellId {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Formats as `r0123c0456`, which is also the file stem used by the archive.
impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{:04}c{:04}", self.row, self.col)
    }
}

/// A dataset grid cell: identity, center coordinates and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub id: CellId,
    pub latitude: f64,
    pub longitude: f64,
    /// Cell size in degrees as (latitude, longitude).
    pub resolution: (f64, f64),
}

/// Geometry of a regular latitude/longitude grid.
///
/// Cell `(row, col)` is centered on
/// `(origin_latitude + row * lat_step, origin_longitude + col * lon_step)`.
/// A grid whose columns span the full 360° wraps around in longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSpec {
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub lat_step: f64,
    pub lon_step: f64,
    pub rows: u32,
    pub cols: u32,
}

impl GridSpec {
    /// The MERRA-2 native grid: 0.5° x 0.625°, 361 x 576 cells.
    pub fn merra2() -> Self {
        Self {
            origin_latitude: -90.0,
            origin_longitude: -180.0,
            lat_step: 0.5,
            lon_step: 0.625,
            rows: 361,
            cols: 576,
        }
    }

    pub fn validate(&self) -> Result<(), GridError> {
        let steps_ok = self.lat_step.is_finite()
            && self.lon_step.is_finite()
            && self.lat_step > 0.0
            && self.lon_step > 0.0;
        if !steps_ok || self.rows == 0 || self.cols == 0 {
            return Err(GridError::InvalidGrid(format!(
                "grid needs positive steps and at least one cell, got {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn wraps_longitude(&self) -> bool {
        (self.cols as f64) * self.lon_step >= 360.0 - 1e-9
    }

    pub fn contains(&self, id: CellId) -> bool {
        id.row < self.rows && id.col < self.cols
    }

    pub fn cell(&self, id: CellId) -> GridCell {
        GridCell {
            id,
            latitude: self.origin_latitude + id.row as f64 * self.lat_step,
            longitude: normalize_longitude(self.origin_longitude + id.col as f64 * self.lon_step),
            resolution: (self.lat_step, self.lon_step),
        }
    }

    /// Fractional (row, col) position of a coordinate. Columns are unwrapped into
    /// `[0, cols)` on wrapping grids.
    pub(crate) fn fractional_index(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let row = (latitude - self.origin_latitude) / self.lat_step;
        let mut col = (longitude - self.origin_longitude) / self.lon_step;
        if self.wraps_longitude() {
            col = col.rem_euclid(self.cols as f64);
        }
        (row, col)
    }

    /// Maps a possibly out-of-range (row, col) to a cell, wrapping columns when the
    /// grid is global.
    pub(crate) fn cell_id_at(&self, row: i64, col: i64) -> Option<CellId> {
        if row < 0 || row >= self.rows as i64 {
            return None;
        }
        let col = if self.wraps_longitude() {
            col.rem_euclid(self.cols as i64)
        } else if col < 0 || col >= self.cols as i64 {
            return None;
        } else {
            col
        };
        Some(CellId::new(row as u32, col as u32))
    }
}

pub(crate) fn normalize_longitude(longitude: f64) -> f64 {
    let wrapped = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && longitude > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Cells are indexed as degenerate boxes at their centers.
impl RTreeObject for GridCell {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.latitude, self.longitude])
    }
}

/// Planar squared distance in degrees. Only used to order candidates; callers
/// re-check with great-circle distance.
impl PointDistance for GridCell {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.latitude - point[0];
        let dy = self.longitude - point[1];
        dx * dx + dy * dy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merra_grid_wraps() {
        let spec = GridSpec::merra2();
        assert!(spec.wraps_longitude());
        assert_eq!(spec.cell_id_at(10, -1), Some(CellId::new(10, 575)));
        assert_eq!(spec.cell_id_at(-1, 0), None);
        let cell = spec.cell(CellId::new(180, 288));
        assert_eq!(cell.latitude, 0.0);
        assert_eq!(cell.longitude, 0.0);
    }

    #[test]
    fn test_regional_grid_does_not_wrap() {
        let spec = GridSpec {
            origin_latitude: 40.0,
            origin_longitude: -5.0,
            lat_step: 1.0,
            lon_step: 1.0,
            rows: 20,
            cols: 20,
        };
        assert!(!spec.wraps_longitude());
        assert_eq!(spec.cell_id_at(0, -1), None);
        assert_eq!(spec.cell_id_at(0, 20), None);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_cell_id_display() {
        assert_eq!(CellId::new(7, 123).to_string(), "r0007c0123");
    }
}

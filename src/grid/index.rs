use crate::grid::cell::{CellId, GridCell, GridSpec};
use crate::grid::error::GridError;
use crate::grid::manifest::GridManifest;
use crate::types::geo_point::GeoPoint;
use log::debug;
use ordered_float::OrderedFloat;
use rstar::RTree;
use serde::Serialize;
use std::collections::HashSet;

/// Corner weights below this are treated as zero.
const WEIGHT_EPSILON: f64 = 1e-12;

/// A grid cell together with its interpolation weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellWeight {
    pub cell: GridCell,
    pub weight: f64,
}

/// How a location was mapped onto the grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", content = "cells", rename_all = "snake_case")]
pub enum Resolution {
    /// The point sits close enough to one cell center to use that cell alone.
    NearestNeighbor(CellWeight),
    /// Bilinear blend of the surrounding covered cells, heaviest first.
    Bilinear(Vec<CellWeight>),
}

impl Resolution {
    /// Cells ordered by descending weight. Weights sum to 1.
    pub fn cells(&self) -> &[CellWeight] {
        match self {
            Resolution::NearestNeighbor(cell) => std::slice::from_ref(cell),
            Resolution::Bilinear(cells) => cells,
        }
    }

    pub fn dominant(&self) -> &GridCell {
        &self.cells()[0].cell
    }

    pub fn weight_of(&self, id: CellId) -> Option<f64> {
        self.cells()
            .iter()
            .find(|c| c.cell.id == id)
            .map(|c| c.weight)
    }
}

/// Maps coordinates onto the cells of a gridded dataset.
///
/// Only covered cells take part in resolution. A land-only dataset, for instance,
/// lists just its land cells, and points whose surrounding cells are all
/// uncovered fail with [`GridError::OutOfBounds`].
#[derive(Debug, Clone)]
pub struct GridIndex {
    spec: GridSpec,
    covered: Option<HashSet<CellId>>,
    rtree: RTree<GridCell>,
    snap_tolerance: f64,
}

impl GridIndex {
    /// Index where every cell of `spec` has data.
    pub fn full(spec: GridSpec) -> Result<Self, GridError> {
        spec.validate()?;
        let cells = (0..spec.rows)
            .flat_map(|row| (0..spec.cols).map(move |col| CellId::new(row, col)))
            .map(|id| spec.cell(id))
            .collect();
        Ok(Self {
            spec,
            covered: None,
            rtree: RTree::bulk_load(cells),
            snap_tolerance: 0.1,
        })
    }

    /// Index restricted to the listed cells. Ids outside the grid are rejected.
    pub fn with_coverage(
        spec: GridSpec,
        covered: impl IntoIterator<Item = CellId>,
    ) -> Result<Self, GridError> {
        spec.validate()?;
        let covered: HashSet<CellId> = covered.into_iter().collect();
        if let Some(bad) = covered.iter().find(|id| !spec.contains(**id)) {
            return Err(GridError::InvalidGrid(format!(
                "covered cell {} lies outside a {}x{} grid",
                bad, spec.rows, spec.cols
            )));
        }
        let cells = covered.iter().map(|id| spec.cell(*id)).collect();
        Ok(Self {
            spec,
            covered: Some(covered),
            rtree: RTree::bulk_load(cells),
            snap_tolerance: 0.1,
        })
    }

    pub fn from_manifest(manifest: GridManifest) -> Result<Self, GridError> {
        match manifest.covered_cells {
            Some(cells) => Self::with_coverage(manifest.spec, cells),
            None => Self::full(manifest.spec),
        }
    }

    /// Distance from a cell center, in cell units, within which nearest-neighbor
    /// lookup replaces interpolation.
    pub fn with_snap_tolerance(mut self, snap_tolerance: f64) -> Self {
        self.snap_tolerance = snap_tolerance.clamp(0.0, 0.5);
        self
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn covered_cells(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_covered(&self, id: CellId) -> bool {
        self.spec.contains(id)
            && self
                .covered
                .as_ref()
                .map_or(true, |covered| covered.contains(&id))
    }

    /// Resolves a point to one dominant cell or a bilinear blend of up to four.
    pub fn resolve(&self, point: GeoPoint) -> Result<Resolution, GridError> {
        let out_of_bounds = || GridError::OutOfBounds {
            latitude: point.latitude(),
            longitude: point.longitude(),
        };
        let (fr, fc) = self
            .spec
            .fractional_index(point.latitude(), point.longitude());

        // Each outermost cell still owns the half cell beyond its center.
        let in_rows = fr >= -0.5 && fr <= self.spec.rows as f64 - 0.5;
        let in_cols =
            self.spec.wraps_longitude() || (fc >= -0.5 && fc <= self.spec.cols as f64 - 0.5);
        if !in_rows || !in_cols {
            return Err(out_of_bounds());
        }

        let (nr, nc) = (fr.round(), fc.round());
        if (fr - nr).abs() <= self.snap_tolerance && (fc - nc).abs() <= self.snap_tolerance {
            if let Some(id) = self.covered_cell_at(nr as i64, nc as i64) {
                debug!("{} snapped to cell {}", point, id);
                return Ok(Resolution::NearestNeighbor(CellWeight {
                    cell: self.spec.cell(id),
                    weight: 1.0,
                }));
            }
        }

        let (r0, c0) = (fr.floor(), fc.floor());
        let (tr, tc) = (fr - r0, fc - c0);
        let (r0, c0) = (r0 as i64, c0 as i64);
        let corners = [
            (r0, c0, (1.0 - tr) * (1.0 - tc)),
            (r0 + 1, c0, tr * (1.0 - tc)),
            (r0, c0 + 1, (1.0 - tr) * tc),
            (r0 + 1, c0 + 1, tr * tc),
        ];

        let mut weighted: Vec<CellWeight> = corners
            .iter()
            .filter(|(_, _, w)| *w > WEIGHT_EPSILON)
            .filter_map(|(r, c, w)| {
                self.covered_cell_at(*r, *c).map(|id| CellWeight {
                    cell: self.spec.cell(id),
                    weight: *w,
                })
            })
            .collect();

        let total: f64 = weighted.iter().map(|c| c.weight).sum();
        if weighted.is_empty() || total <= WEIGHT_EPSILON {
            return Err(out_of_bounds());
        }
        for c in weighted.iter_mut() {
            c.weight /= total;
        }
        weighted.sort_by(|a, b| {
            OrderedFloat(b.weight)
                .cmp(&OrderedFloat(a.weight))
                .then(a.cell.id.cmp(&b.cell.id))
        });

        if weighted.len() == 1 {
            let only = weighted[0];
            return Ok(Resolution::NearestNeighbor(CellWeight {
                cell: only.cell,
                weight: 1.0,
            }));
        }
        Ok(Resolution::Bilinear(weighted))
    }

    /// Closest covered cell within `max_distance_km` of the point, by great-circle
    /// distance. Callers use this as the fallback when [`GridIndex::resolve`]
    /// reports the point as out of bounds.
    pub fn nearest_valid(
        &self,
        point: GeoPoint,
        max_distance_km: f64,
    ) -> Result<(GridCell, f64), GridError> {
        // Planar R-tree distance ignores the antimeridian, so also search from the
        // point shifted by a full turn.
        let candidate_limit = 16;
        let queries = [
            [point.latitude(), point.longitude()],
            [point.latitude(), point.longitude() - 360.0],
            [point.latitude(), point.longitude() + 360.0],
        ];

        queries
            .iter()
            .flat_map(|q| self.rtree.nearest_neighbor_iter(q).take(candidate_limit))
            .filter_map(|cell| {
                let center = GeoPoint::new(cell.latitude, cell.longitude).ok()?;
                let dist_km = point.distance_km(&center);
                (dist_km <= max_distance_km).then_some((*cell, dist_km))
            })
            .min_by_key(|(cell, dist)| (OrderedFloat(*dist), cell.id))
            .ok_or(GridError::OutOfBounds {
                latitude: point.latitude(),
                longitude: point.longitude(),
            })
    }

    /// [`GridIndex::resolve`], falling back to the nearest covered cell within
    /// `fallback_km` when one is given.
    pub fn resolve_or_nearest(
        &self,
        point: GeoPoint,
        fallback_km: Option<f64>,
    ) -> Result<Resolution, GridError> {
        match (self.resolve(point), fallback_km) {
            (Err(GridError::OutOfBounds { .. }), Some(max_km)) => {
                let (cell, dist_km) = self.nearest_valid(point, max_km)?;
                debug!(
                    "{} outside coverage, falling back to cell {} at {:.1} km",
                    point, cell.id, dist_km
                );
                Ok(Resolution::NearestNeighbor(CellWeight { cell, weight: 1.0 }))
            }
            (result, _) => result,
        }
    }

    fn covered_cell_at(&self, row: i64, col: i64) -> Option<CellId> {
        self.spec
            .cell_id_at(row, col)
            .filter(|id| self.is_covered(*id))
    }
}

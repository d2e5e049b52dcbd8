//! Pluggable grid systems for discretizing the globe.
//!
//! A grid system turns points into cell ids at a caller-selected precision
//! and computes coverings: sets of cells whose union is guaranteed to
//! contain a query region. Coverings may contain false positives (cells
//! that overhang the region); the executors correct those with an exact
//! geometric check. They must never contain false negatives.
//!
//! Two implementations are provided, selected by [`GridKind`]:
//! hex-hierarchical (H3) and quadtree-style (geohash).

mod hex;
mod quad;

pub use hex::HexGrid;
pub use quad::QuadGrid;

use crate::error::Result;
use crate::geom::{GeoBoundingBox, GeoPoint, Region, haversine_m};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque grid-cell identifier.
///
/// The string form is only meaningful to the grid system that produced it
/// (an H3 index in hex form, or a geohash). Cell ids double as partition
/// keys in the default store layout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Tag selecting a concrete grid system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridKind {
    /// Hex-hierarchical grid (H3), precisions 0-15.
    Hex,
    /// Quadtree-style grid (geohash), precisions 1-12.
    Quad,
}

impl GridKind {
    /// The grid system implementation for this tag.
    pub fn system(self) -> &'static dyn GridSystem {
        match self {
            GridKind::Hex => &HexGrid,
            GridKind::Quad => &QuadGrid,
        }
    }

    /// Compute the covering for a region at the given precision.
    pub fn cover(
        self,
        region: &Region,
        precision: u8,
        max_cells: Option<usize>,
    ) -> Result<Covering> {
        match region {
            Region::Circle { center, radius_m } => {
                self.system()
                    .cover_circle(*center, *radius_m, precision, max_cells)
            }
            Region::Box { bounds } => self.system().cover_box(bounds, precision, max_cells),
        }
    }
}

/// A set of cells guaranteed to contain a query region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Covering {
    /// The covering cells. Order is deterministic for identical inputs.
    pub cells: Vec<CellId>,
    /// `false` when the true covering was truncated by a `max_cells` budget.
    pub is_complete: bool,
}

/// A tiling of the sphere into identifiable cells at multiple precisions.
///
/// Contract for the covering operations: the returned cells must be a
/// superset of every cell that can contain a point of the region (false
/// negatives are forbidden; false positives are expected and filtered
/// downstream). When the true covering exceeds `max_cells`, the cells
/// closest to the region center are kept and `is_complete` is `false`.
pub trait GridSystem: Send + Sync {
    /// The tag this implementation answers to.
    fn kind(&self) -> GridKind;

    /// Cell containing `point` at `precision`.
    fn cell_at(&self, point: GeoPoint, precision: u8) -> Result<CellId>;

    /// Representative point (center) of a cell.
    fn cell_center(&self, cell: &CellId) -> Result<GeoPoint>;

    /// Bounding box of a cell. May overhang the true cell shape, never
    /// undershoot it.
    fn cell_bounds(&self, cell: &CellId) -> Result<GeoBoundingBox>;

    /// Covering for all points within `radius_m` meters of `center`.
    fn cover_circle(
        &self,
        center: GeoPoint,
        radius_m: f64,
        precision: u8,
        max_cells: Option<usize>,
    ) -> Result<Covering>;

    /// Covering for a (possibly antimeridian-wrapping) bounding box.
    fn cover_box(
        &self,
        bounds: &GeoBoundingBox,
        precision: u8,
        max_cells: Option<usize>,
    ) -> Result<Covering>;
}

/// Ceiling on materialized candidate cells per covering computation.
///
/// A valid but absurd region/precision combination (a continent at
/// street-level precision) would otherwise expand millions of cells
/// before any budget applies. Grids that hit the ceiling keep the cells
/// nearest the region center and flag the covering incomplete, same as a
/// `max_cells` truncation.
pub(crate) const MAX_CANDIDATE_CELLS: usize = 100_000;

/// Apply a cell budget to a candidate covering.
///
/// Cells are ordered by ascending distance of their center to the region
/// center (ties broken by cell id, so identical inputs always produce the
/// same sequence). When the candidate set exceeds the budget, the closest
/// `max_cells` cells are kept and the covering is flagged incomplete.
pub(crate) fn apply_budget(
    grid: &dyn GridSystem,
    cells: Vec<CellId>,
    region_center: GeoPoint,
    max_cells: Option<usize>,
) -> Result<Covering> {
    let mut ranked: Vec<(f64, CellId)> = Vec::with_capacity(cells.len());
    for cell in cells {
        let center = grid.cell_center(&cell)?;
        ranked.push((haversine_m(region_center, center), cell));
    }
    ranked.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut is_complete = true;
    if let Some(budget) = max_cells {
        if ranked.len() > budget {
            ranked.truncate(budget);
            is_complete = false;
        }
    }

    Ok(Covering {
        cells: ranked.into_iter().map(|(_, cell)| cell).collect(),
        is_complete,
    })
}

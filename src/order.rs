//! Deterministic orderings for cells and results.
//!
//! Identical queries over identical data must return identical sequences,
//! whichever execution mode ran them. Circle queries visit cells spiraling
//! out from the center and return matches by ascending distance; box
//! queries use lexical cell order and return matches in storage order.

use crate::error::Result;
use crate::geom::{Region, haversine_m};
use crate::grid::{CellId, GridSystem};
use std::cmp::Ordering;

/// Order covering cells for traversal.
///
/// The input order is already deterministic; this fixes the traversal
/// sequence that pagination tokens index into, so it must not change
/// between releases for a given region shape.
pub fn order_cells(
    grid: &dyn GridSystem,
    mut cells: Vec<CellId>,
    region: &Region,
) -> Result<Vec<CellId>> {
    match region {
        Region::Circle { center, .. } => {
            let mut ranked: Vec<(f64, CellId)> = Vec::with_capacity(cells.len());
            for cell in cells {
                let cell_center = grid.cell_center(&cell)?;
                ranked.push((haversine_m(*center, cell_center), cell));
            }
            ranked.sort_by(|a, b| compare_distance(a.0, b.0).then_with(|| a.1.cmp(&b.1)));
            Ok(ranked.into_iter().map(|(_, cell)| cell).collect())
        }
        Region::Box { .. } => {
            cells.sort();
            Ok(cells)
        }
    }
}

/// Total order over distances. Distances here come from the haversine
/// formula over validated coordinates, so NaN never occurs; equal ties
/// are fine either way.
pub fn compare_distance(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Compare two matched records for the final circle-query ordering:
/// ascending distance, ties broken by record key.
pub fn compare_matches(a_dist: f64, a_key: &[u8], b_dist: f64, b_key: &[u8]) -> Ordering {
    compare_distance(a_dist, b_dist).then_with(|| a_key.cmp(b_key))
}

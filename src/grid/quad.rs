//! Quadtree-style grid backed by geohash.
//!
//! Geohash cells are rectangular in lat/lng space, which makes box
//! coverings a straightforward lattice walk: start at the cell holding the
//! southwest corner and step east and north with `geohash::neighbor` until
//! the box is tiled. Circle coverings reuse the walk over the circle's
//! circumscribing bounding box.

use super::{CellId, Covering, GridKind, GridSystem, MAX_CANDIDATE_CELLS, apply_budget};
use crate::error::{GeoQueryError, Result};
use crate::geom::{GeoBoundingBox, GeoPoint, normalize_lng};
use geohash::{Coord, Direction};
use rustc_hash::FxHashSet;

/// Meters per degree of latitude, and of longitude at the equator.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Margin applied when converting a radius to degrees, so that spherical
/// distortion near the box edges cannot shave cells off the covering.
const RADIUS_MARGIN: f64 = 1.01;

/// Quadtree-style grid. Precisions 1 through 12 (geohash lengths).
pub struct QuadGrid;

impl QuadGrid {
    fn check_precision(precision: u8) -> Result<usize> {
        if (1..=12).contains(&precision) {
            Ok(precision as usize)
        } else {
            Err(GeoQueryError::InvalidInput(format!(
                "quad grid precision must be 1..=12, got {precision}"
            )))
        }
    }

    fn decode(cell: &CellId) -> Result<(Coord, f64, f64)> {
        geohash::decode(cell.as_str())
            .map_err(|e| GeoQueryError::InvalidCell(format!("{}: {e}", cell.as_str())))
    }

    /// Cell width and height in degrees. Uniform across the globe for a
    /// given precision.
    fn cell_dims(precision: usize) -> Result<(f64, f64)> {
        let hash = geohash::encode(Coord { x: 0.0, y: 0.0 }, precision)
            .map_err(|e| GeoQueryError::InvalidInput(e.to_string()))?;
        let (_, lng_err, lat_err) = geohash::decode(&hash)
            .map_err(|e| GeoQueryError::InvalidCell(format!("{hash}: {e}")))?;
        Ok((2.0 * lng_err, 2.0 * lat_err))
    }

    /// Tile one non-wrapping box with cells at `precision`, appending into
    /// `out`. Duplicate cells from overlapping split halves are fine, the
    /// caller dedups.
    fn walk_box(bounds: &GeoBoundingBox, precision: usize, out: &mut Vec<CellId>) -> Result<()> {
        let sw_hash = geohash::encode(
            Coord {
                x: bounds.southwest.lng,
                y: bounds.southwest.lat,
            },
            precision,
        )
        .map_err(|e| GeoQueryError::InvalidInput(e.to_string()))?;

        let (cell_w, cell_h) = Self::cell_dims(precision)?;
        let span_lng = bounds.northeast.lng - bounds.southwest.lng;
        let span_lat = bounds.northeast.lat - bounds.southwest.lat;
        let cols = (span_lng / cell_w).ceil() as usize + 1;
        let rows = (span_lat / cell_h).ceil() as usize + 1;

        let mut row_start = sw_hash;
        for _ in 0..rows {
            let mut cur = row_start.clone();
            for _ in 0..cols {
                out.push(CellId::new(cur.clone()));
                match geohash::neighbor(&cur, Direction::E) {
                    Ok(next) => cur = next,
                    Err(_) => break,
                }
            }
            // Stepping north fails at the pole; the box ends there anyway.
            match geohash::neighbor(&row_start, Direction::N) {
                Ok(next) => row_start = next,
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn cover_bounds(
        &self,
        bounds: &GeoBoundingBox,
        center: GeoPoint,
        precision: u8,
        max_cells: Option<usize>,
    ) -> Result<Covering> {
        let precision = Self::check_precision(precision)?;
        let (cell_w, cell_h) = Self::cell_dims(precision)?;

        // Estimate the lattice size up front; a region much larger than
        // the precision warrants would materialize unboundedly otherwise.
        // Shrink the walked area around the region center so the cells
        // that survive are the nearest ones, and report the covering
        // incomplete.
        let width = bounds.width_deg();
        let height = bounds.northeast.lat - bounds.southwest.lat;
        let estimate = ((width / cell_w).ceil() + 2.0) * ((height / cell_h).ceil() + 2.0);

        let mut truncated = false;
        let mut work = *bounds;
        if estimate > MAX_CANDIDATE_CELLS as f64 {
            truncated = true;
            let scale = (MAX_CANDIDATE_CELLS as f64 / estimate).sqrt();
            let half_w = (width * scale).max(cell_w) / 2.0;
            let half_h = (height * scale).max(cell_h) / 2.0;
            work = GeoBoundingBox {
                southwest: GeoPoint {
                    lat: (center.lat - half_h).clamp(-90.0, 90.0),
                    lng: normalize_lng(center.lng - half_w),
                },
                northeast: GeoPoint {
                    lat: (center.lat + half_h).clamp(-90.0, 90.0),
                    lng: normalize_lng(center.lng + half_w),
                },
            };
        }

        let mut raw = Vec::new();
        for part in work.split() {
            Self::walk_box(&part, precision, &mut raw)?;
        }

        let mut seen = FxHashSet::default();
        raw.retain(|cell| seen.insert(cell.clone()));

        let mut covering = apply_budget(self, raw, center, max_cells)?;
        if truncated {
            covering.is_complete = false;
        }
        Ok(covering)
    }
}

impl GridSystem for QuadGrid {
    fn kind(&self) -> GridKind {
        GridKind::Quad
    }

    fn cell_at(&self, point: GeoPoint, precision: u8) -> Result<CellId> {
        let precision = Self::check_precision(precision)?;
        let hash = geohash::encode(
            Coord {
                x: point.lng,
                y: point.lat,
            },
            precision,
        )
        .map_err(|e| GeoQueryError::InvalidInput(e.to_string()))?;
        Ok(CellId::new(hash))
    }

    fn cell_center(&self, cell: &CellId) -> Result<GeoPoint> {
        let (coord, _, _) = Self::decode(cell)?;
        Ok(GeoPoint {
            lat: coord.y.clamp(-90.0, 90.0),
            lng: normalize_lng(coord.x),
        })
    }

    fn cell_bounds(&self, cell: &CellId) -> Result<GeoBoundingBox> {
        let (coord, lng_err, lat_err) = Self::decode(cell)?;
        // Raw clamped values, not the normalizing constructor: a cell edge
        // sitting exactly on the antimeridian must stay at -180/180 rather
        // than flip sides and read as a wrapping box.
        Ok(GeoBoundingBox {
            southwest: GeoPoint {
                lat: (coord.y - lat_err).clamp(-90.0, 90.0),
                lng: (coord.x - lng_err).clamp(-180.0, 180.0),
            },
            northeast: GeoPoint {
                lat: (coord.y + lat_err).clamp(-90.0, 90.0),
                lng: (coord.x + lng_err).clamp(-180.0, 180.0),
            },
        })
    }

    fn cover_circle(
        &self,
        center: GeoPoint,
        radius_m: f64,
        precision: u8,
        max_cells: Option<usize>,
    ) -> Result<Covering> {
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(GeoQueryError::InvalidInput(format!(
                "radius must be a positive finite number of meters, got {radius_m}"
            )));
        }

        let dlat = radius_m * RADIUS_MARGIN / METERS_PER_DEGREE;
        let south = (center.lat - dlat).clamp(-90.0, 90.0);
        let north = (center.lat + dlat).clamp(-90.0, 90.0);

        // Longitude degrees shrink toward the poles; size the box for the
        // worst latitude it reaches.
        let worst_lat = south.abs().max(north.abs()).min(89.9);
        let cos_lat = worst_lat.to_radians().cos();
        let dlng = radius_m * RADIUS_MARGIN / (METERS_PER_DEGREE * cos_lat);

        let bounds = if dlng >= 180.0 || north >= 90.0 || south <= -90.0 {
            // The circle rounds a pole or laps the globe; take the full
            // longitude span.
            GeoBoundingBox {
                southwest: GeoPoint {
                    lat: south,
                    lng: -180.0,
                },
                northeast: GeoPoint {
                    lat: north,
                    lng: 180.0,
                },
            }
        } else {
            GeoBoundingBox {
                southwest: GeoPoint {
                    lat: south,
                    lng: normalize_lng(center.lng - dlng),
                },
                northeast: GeoPoint {
                    lat: north,
                    lng: normalize_lng(center.lng + dlng),
                },
            }
        };

        self.cover_bounds(&bounds, center, precision, max_cells)
    }

    fn cover_box(
        &self,
        bounds: &GeoBoundingBox,
        precision: u8,
        max_cells: Option<usize>,
    ) -> Result<Covering> {
        self.cover_bounds(bounds, bounds.center(), precision, max_cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng).unwrap()
    }

    #[test]
    fn test_cell_at_round_trips_through_center() {
        let grid = QuadGrid;
        let p = pt(48.8566, 2.3522);
        let cell = grid.cell_at(p, 7).unwrap();
        assert_eq!(cell.as_str().len(), 7);

        let center = grid.cell_center(&cell).unwrap();
        let again = grid.cell_at(center, 7).unwrap();
        assert_eq!(cell, again);
    }

    #[test]
    fn test_precision_bounds_rejected() {
        let grid = QuadGrid;
        let p = pt(0.0, 0.0);
        assert!(grid.cell_at(p, 0).is_err());
        assert!(grid.cell_at(p, 13).is_err());
        assert!(grid.cell_at(p, 12).is_ok());
    }

    #[test]
    fn test_invalid_radius_rejected() {
        let grid = QuadGrid;
        let c = pt(10.0, 10.0);
        assert!(grid.cover_circle(c, 0.0, 5, None).is_err());
        assert!(grid.cover_circle(c, -1.0, 5, None).is_err());
        assert!(grid.cover_circle(c, f64::NAN, 5, None).is_err());
    }

    #[test]
    fn test_circle_covering_contains_points_inside() {
        let grid = QuadGrid;
        let center = pt(37.7749, -122.4194);
        let covering = grid.cover_circle(center, 5_000.0, 6, None).unwrap();
        assert!(covering.is_complete);

        // A point 4 km east of the center must land inside the covering.
        let east = pt(37.7749, -122.4194 + 4_000.0 / (111_320.0 * 37.7749f64.to_radians().cos()));
        let east_cell = grid.cell_at(east, 6).unwrap();
        assert!(covering.cells.contains(&east_cell));
    }

    #[test]
    fn test_box_covering_tiles_all_corners() {
        let grid = QuadGrid;
        let bounds = GeoBoundingBox::new(pt(40.70, -74.02), pt(40.80, -73.93)).unwrap();
        let covering = grid.cover_box(&bounds, 6, None).unwrap();

        for corner in [
            pt(40.70, -74.02),
            pt(40.70, -73.93),
            pt(40.80, -74.02),
            pt(40.80, -73.93),
        ] {
            let cell = grid.cell_at(corner, 6).unwrap();
            assert!(covering.cells.contains(&cell), "missing corner {corner:?}");
        }
    }

    #[test]
    fn test_wrapping_box_covers_both_sides() {
        let grid = QuadGrid;
        let bounds = GeoBoundingBox::new(pt(-5.0, 178.0), pt(5.0, -178.0)).unwrap();
        assert!(bounds.wraps());
        let covering = grid.cover_box(&bounds, 4, None).unwrap();

        let west_side = grid.cell_at(pt(0.0, 179.0), 4).unwrap();
        let east_side = grid.cell_at(pt(0.0, -179.0), 4).unwrap();
        assert!(covering.cells.contains(&west_side));
        assert!(covering.cells.contains(&east_side));

        // No duplicates survive the split merge.
        let mut sorted = covering.cells.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), covering.cells.len());
    }

    #[test]
    fn test_polar_circle_does_not_error() {
        let grid = QuadGrid;
        let covering = grid.cover_circle(pt(89.5, 0.0), 100_000.0, 3, None).unwrap();
        assert!(!covering.cells.is_empty());
    }

    #[test]
    fn test_oversized_covering_truncates_instead_of_materializing() {
        let grid = QuadGrid;
        // A near-hemispheric radius at full precision would tile
        // trillions of cells if walked in full.
        let covering = grid
            .cover_circle(pt(37.7749, -122.4194), 10_000_000.0, 12, Some(100))
            .unwrap();
        assert_eq!(covering.cells.len(), 100);
        assert!(!covering.is_complete);

        // The kept cells hug the center.
        let center_cell = grid.cell_at(pt(37.7749, -122.4194), 12).unwrap();
        assert!(covering.cells.contains(&center_cell));
    }

    #[test]
    fn test_cell_bounds_contain_cell_center() {
        let grid = QuadGrid;
        let cell = grid.cell_at(pt(35.0, 139.0), 6).unwrap();
        let bounds = grid.cell_bounds(&cell).unwrap();
        let center = grid.cell_center(&cell).unwrap();
        assert!(bounds.contains(&center));
    }
}

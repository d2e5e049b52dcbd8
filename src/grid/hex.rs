//! Hex-hierarchical grid backed by H3.
//!
//! Hexagonal cells have no shared lattice axes to walk, so coverings are
//! built from `grid_disk` rings around a seed cell. The ring count is
//! derived from the average edge length at the precision, padded so that
//! cell-size distortion across the globe cannot shave cells off the
//! covering.

use super::{CellId, Covering, GridKind, GridSystem, MAX_CANDIDATE_CELLS, apply_budget};
use crate::error::{GeoQueryError, Result};
use crate::geom::{GeoBoundingBox, GeoPoint, haversine_m, normalize_lng};
use h3o::{CellIndex, LatLng, Resolution};
use std::str::FromStr;

/// Average hexagon edge length in meters, indexed by resolution 0-15.
const HEX_EDGE_M: [f64; 16] = [
    1_107_712.591,
    418_676.0055,
    158_244.6558,
    59_810.857_94,
    22_606.379_4,
    8_544.408_276,
    3_229.482_772,
    1_220.629_759,
    461.354_684,
    174.375_668,
    65.907_807,
    24.910_561,
    9.415_526,
    3.559_893,
    1.348_575,
    0.509_713,
];

/// Fractional padding added to vertex-derived cell boxes. Geodesic cell
/// edges bulge past the chord between their vertices, so the vertex
/// extremes alone can undershoot the true extent.
const BOUNDS_PAD: f64 = 0.1;

/// Hex-hierarchical grid. Precisions 0 through 15 (H3 resolutions).
pub struct HexGrid;

impl HexGrid {
    fn resolution(precision: u8) -> Result<Resolution> {
        Resolution::try_from(precision).map_err(|_| {
            GeoQueryError::InvalidInput(format!(
                "hex grid precision must be 0..=15, got {precision}"
            ))
        })
    }

    fn parse(cell: &CellId) -> Result<CellIndex> {
        CellIndex::from_str(cell.as_str())
            .map_err(|e| GeoQueryError::InvalidCell(format!("{}: {e}", cell.as_str())))
    }

    fn pole_cell(lat: f64, resolution: Resolution) -> Result<CellIndex> {
        Ok(LatLng::new(lat, 0.0)
            .map_err(|e| GeoQueryError::InvalidInput(e.to_string()))?
            .to_cell(resolution))
    }

    /// Disk of cells reaching `radius_m` meters out from the cell
    /// containing `center`. The second value is `true` when the ring
    /// count was clamped to the candidate ceiling, in which case the disk
    /// holds only the cells nearest the center.
    fn disk(
        center: GeoPoint,
        radius_m: f64,
        resolution: Resolution,
    ) -> Result<(Vec<CellId>, bool)> {
        let origin = LatLng::new(center.lat, center.lng)
            .map_err(|e| GeoQueryError::InvalidInput(e.to_string()))?
            .to_cell(resolution);

        // Ring spacing is at least the average edge length even for the
        // most distorted cells, so dividing by the edge over-counts rings
        // rather than under-counting them.
        let edge = HEX_EDGE_M[usize::from(u8::from(resolution))];
        let k = (radius_m / edge).ceil() as u32 + 1;

        // A disk of k rings holds 3k(k+1)+1 cells; keep that under the
        // materialization ceiling.
        let k_max = ((MAX_CANDIDATE_CELLS as f64 / 3.0).sqrt() as u32).saturating_sub(1);
        let clamped = k > k_max;
        let k = k.min(k_max);

        let cells: Vec<CellIndex> = origin.grid_disk(k);
        Ok((
            cells
                .into_iter()
                .map(|c| CellId::new(c.to_string()))
                .collect(),
            clamped,
        ))
    }
}

impl GridSystem for HexGrid {
    fn kind(&self) -> GridKind {
        GridKind::Hex
    }

    fn cell_at(&self, point: GeoPoint, precision: u8) -> Result<CellId> {
        let resolution = Self::resolution(precision)?;
        let cell = LatLng::new(point.lat, point.lng)
            .map_err(|e| GeoQueryError::InvalidInput(e.to_string()))?
            .to_cell(resolution);
        Ok(CellId::new(cell.to_string()))
    }

    fn cell_center(&self, cell: &CellId) -> Result<GeoPoint> {
        let center = LatLng::from(Self::parse(cell)?);
        Ok(GeoPoint {
            lat: center.lat().clamp(-90.0, 90.0),
            lng: normalize_lng(center.lng()),
        })
    }

    fn cell_bounds(&self, cell: &CellId) -> Result<GeoBoundingBox> {
        let index = Self::parse(cell)?;
        let resolution = index.resolution();
        let boundary = index.boundary();

        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;
        for vertex in boundary.iter() {
            min_lat = min_lat.min(vertex.lat());
            max_lat = max_lat.max(vertex.lat());
            min_lng = min_lng.min(vertex.lng());
            max_lng = max_lng.max(vertex.lng());
        }

        // A pole cell extends past all of its vertices to the pole itself
        // and spans every longitude; vertex extremes alone would undershoot
        // it badly.
        let north_pole = index == Self::pole_cell(90.0, resolution)?;
        let south_pole = index == Self::pole_cell(-90.0, resolution)?;
        if north_pole || south_pole {
            let lat_pad = (max_lat - min_lat) * BOUNDS_PAD;
            return Ok(GeoBoundingBox {
                southwest: GeoPoint {
                    lat: if south_pole {
                        -90.0
                    } else {
                        (min_lat - lat_pad).clamp(-90.0, 90.0)
                    },
                    lng: -180.0,
                },
                northeast: GeoPoint {
                    lat: if north_pole {
                        90.0
                    } else {
                        (max_lat + lat_pad).clamp(-90.0, 90.0)
                    },
                    lng: 180.0,
                },
            });
        }

        // Vertices more than a hemisphere apart in longitude mean the cell
        // straddles the antimeridian; flip to the wrapping representation
        // so the box stays tight instead of spanning the globe.
        let (sw_lng, ne_lng) = if max_lng - min_lng > 180.0 {
            let west = boundary
                .iter()
                .map(|v| v.lng())
                .filter(|l| *l >= 0.0)
                .fold(f64::MAX, f64::min);
            let east = boundary
                .iter()
                .map(|v| v.lng())
                .filter(|l| *l < 0.0)
                .fold(f64::MIN, f64::max);
            (west, east)
        } else {
            (min_lng, max_lng)
        };

        let lat_pad = (max_lat - min_lat) * BOUNDS_PAD;
        let lng_span = if sw_lng <= ne_lng {
            ne_lng - sw_lng
        } else {
            360.0 - sw_lng + ne_lng
        };
        let lng_pad = lng_span * BOUNDS_PAD;

        Ok(GeoBoundingBox {
            southwest: GeoPoint {
                lat: (min_lat - lat_pad).clamp(-90.0, 90.0),
                lng: normalize_lng(sw_lng - lng_pad),
            },
            northeast: GeoPoint {
                lat: (max_lat + lat_pad).clamp(-90.0, 90.0),
                lng: normalize_lng(ne_lng + lng_pad),
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
        let resolution = Self::resolution(precision)?;
        let (cells, clamped) = Self::disk(center, radius_m, resolution)?;
        let mut covering = apply_budget(self, cells, center, max_cells)?;
        if clamped {
            covering.is_complete = false;
        }
        Ok(covering)
    }

    fn cover_box(
        &self,
        bounds: &GeoBoundingBox,
        precision: u8,
        max_cells: Option<usize>,
    ) -> Result<Covering> {
        let resolution = Self::resolution(precision)?;
        let edge = HEX_EDGE_M[usize::from(u8::from(resolution))];

        // Cover each non-wrapping half with the disk around its
        // circumscribing circle, then drop cells that cannot touch the box.
        let mut cells = Vec::new();
        let mut truncated = false;
        for part in bounds.split() {
            let center = part.center();
            let corners = [
                part.southwest,
                part.northeast,
                GeoPoint {
                    lat: part.southwest.lat,
                    lng: part.northeast.lng,
                },
                GeoPoint {
                    lat: part.northeast.lat,
                    lng: part.southwest.lng,
                },
            ];
            let radius = corners
                .iter()
                .map(|c| haversine_m(center, *c))
                .fold(0.0_f64, f64::max)
                + edge;

            let (disk, clamped) = Self::disk(center, radius, resolution)?;
            truncated |= clamped;
            for cell in disk {
                if self.cell_bounds(&cell)?.intersects(bounds) {
                    cells.push(cell);
                }
            }
        }
        cells.sort();
        cells.dedup();

        let mut covering = apply_budget(self, cells, bounds.center(), max_cells)?;
        if truncated {
            covering.is_complete = false;
        }
        Ok(covering)
    }
}

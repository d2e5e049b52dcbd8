//! Geographic primitives: points, wrap-aware bounding boxes, query regions.
//!
//! Longitude is normalized into `(-180, 180]` everywhere. A bounding box
//! whose southwest longitude exceeds its northeast longitude spans the
//! antimeridian; that is a valid region, not an error.

use crate::error::{GeoQueryError, Result};
use geo::{Distance, Haversine};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A geographic point in degrees.
///
/// Latitude is validated into `[-90, 90]`; longitude is normalized into
/// `(-180, 180]` on construction.
///
/// # Examples
///
/// ```
/// use geoquery::GeoPoint;
///
/// let sf = GeoPoint::new(37.7749, -122.4194).unwrap();
/// assert_eq!(sf.lat, 37.7749);
///
/// // 200° east normalizes to -160°
/// let p = GeoPoint::new(0.0, 200.0).unwrap();
/// assert_eq!(p.lng, -160.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a point, validating latitude and normalizing longitude.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(GeoQueryError::InvalidInput(format!(
                "latitude {} outside [-90, 90]",
                lat
            )));
        }
        if !lng.is_finite() {
            return Err(GeoQueryError::InvalidInput(format!(
                "longitude {} is not finite",
                lng
            )));
        }
        Ok(Self {
            lat,
            lng: normalize_lng(lng),
        })
    }

    /// Convert to a `geo` point (x = longitude, y = latitude).
    pub(crate) fn to_geo(self) -> geo::Point<f64> {
        geo::Point::new(self.lng, self.lat)
    }
}

/// Normalize a longitude into `(-180, 180]`.
pub fn normalize_lng(lng: f64) -> f64 {
    let mut l = (lng + 180.0).rem_euclid(360.0) - 180.0;
    if l == -180.0 {
        l = 180.0;
    }
    l
}

/// Great-circle distance between two points in meters (haversine).
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    Haversine.distance(a.to_geo(), b.to_geo())
}

/// A latitude/longitude bounding box.
///
/// `southwest.lat <= northeast.lat` always holds. The longitude span may
/// cross the antimeridian: `southwest.lng > northeast.lng` signals a box
/// that wraps through ±180°.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    pub southwest: GeoPoint,
    pub northeast: GeoPoint,
}

impl GeoBoundingBox {
    /// Create a bounding box from its southwest and northeast corners.
    pub fn new(southwest: GeoPoint, northeast: GeoPoint) -> Result<Self> {
        if southwest.lat > northeast.lat {
            return Err(GeoQueryError::InvalidInput(format!(
                "southwest latitude {} exceeds northeast latitude {}",
                southwest.lat, northeast.lat
            )));
        }
        Ok(Self {
            southwest,
            northeast,
        })
    }

    /// Whether the longitude span crosses the antimeridian.
    pub fn wraps(&self) -> bool {
        self.southwest.lng > self.northeast.lng
    }

    /// Longitudinal width in degrees, wrap-aware.
    pub fn width_deg(&self) -> f64 {
        if self.wraps() {
            360.0 - self.southwest.lng + self.northeast.lng
        } else {
            self.northeast.lng - self.southwest.lng
        }
    }

    /// Center of the box, wrap-aware for the longitude component.
    pub fn center(&self) -> GeoPoint {
        let lat = (self.southwest.lat + self.northeast.lat) / 2.0;
        let lng = normalize_lng(self.southwest.lng + self.width_deg() / 2.0);
        GeoPoint { lat, lng }
    }

    /// Whether a point lies inside the box (inclusive), wrap-aware.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.lat < self.southwest.lat || point.lat > self.northeast.lat {
            return false;
        }
        if self.wraps() {
            point.lng >= self.southwest.lng || point.lng <= self.northeast.lng
        } else {
            point.lng >= self.southwest.lng && point.lng <= self.northeast.lng
        }
    }

    /// Whether this box overlaps another, wrap-aware on both sides.
    pub fn intersects(&self, other: &GeoBoundingBox) -> bool {
        if self.northeast.lat < other.southwest.lat || self.southwest.lat > other.northeast.lat {
            return false;
        }
        for a in self.split() {
            for b in other.split() {
                if a.southwest.lng <= b.northeast.lng && b.southwest.lng <= a.northeast.lng {
                    return true;
                }
            }
        }
        false
    }

    /// Split into at most two boxes, neither of which wraps the antimeridian.
    pub fn split(&self) -> SmallVec<[GeoBoundingBox; 2]> {
        let mut parts = SmallVec::new();
        if self.wraps() {
            parts.push(GeoBoundingBox {
                southwest: self.southwest,
                northeast: GeoPoint {
                    lat: self.northeast.lat,
                    lng: 180.0,
                },
            });
            parts.push(GeoBoundingBox {
                southwest: GeoPoint {
                    lat: self.southwest.lat,
                    lng: -180.0,
                },
                northeast: self.northeast,
            });
        } else {
            parts.push(*self);
        }
        parts
    }
}

/// The spatial predicate of a query: a circle or a bounding box.
///
/// The region drives both the grid covering and the final exact check that
/// removes the covering's false positives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// All points within `radius_m` meters of `center`.
    Circle { center: GeoPoint, radius_m: f64 },
    /// All points inside a (possibly antimeridian-wrapping) box.
    Box { bounds: GeoBoundingBox },
}

impl Region {
    /// Exact geometric membership test, applied to every candidate.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        match self {
            Region::Circle { center, radius_m } => haversine_m(*center, *point) <= *radius_m,
            Region::Box { bounds } => bounds.contains(point),
        }
    }

    /// Representative center used to order cells and truncate coverings.
    pub fn center(&self) -> GeoPoint {
        match self {
            Region::Circle { center, .. } => *center,
            Region::Box { bounds } => bounds.center(),
        }
    }

    /// Distance from the region center, when the region has a distance metric.
    ///
    /// `Some` for circles (used to sort results), `None` for boxes.
    pub fn distance_from_center(&self, point: &GeoPoint) -> Option<f64> {
        match self {
            Region::Circle { center, .. } => Some(haversine_m(*center, *point)),
            Region::Box { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng).unwrap()
    }

    #[test]
    fn test_normalize_lng() {
        assert_eq!(normalize_lng(0.0), 0.0);
        assert_eq!(normalize_lng(180.0), 180.0);
        assert_eq!(normalize_lng(-180.0), 180.0);
        assert_eq!(normalize_lng(190.0), -170.0);
        assert_eq!(normalize_lng(-190.0), 170.0);
        assert_eq!(normalize_lng(540.0), 180.0);
    }

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(-91.0, 0.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::new(45.0, 720.5).is_ok());
    }

    #[test]
    fn test_haversine_sanity() {
        let nyc = pt(40.7128, -74.0060);
        let la = pt(34.0522, -118.2437);
        let d = haversine_m(nyc, la);
        assert!(d > 3_900_000.0 && d < 4_000_000.0);
        assert_eq!(haversine_m(nyc, nyc), 0.0);
    }

    #[test]
    fn test_bbox_contains_simple() {
        let bbox = GeoBoundingBox::new(pt(40.7, -74.0), pt(40.8, -73.9)).unwrap();
        assert!(!bbox.wraps());
        assert!(bbox.contains(&pt(40.75, -73.95)));
        assert!(!bbox.contains(&pt(40.75, -73.85)));
        assert!(!bbox.contains(&pt(40.85, -73.95)));
    }

    #[test]
    fn test_bbox_contains_wrapping() {
        // Spans from 170°E through the antimeridian to 170°W.
        let bbox = GeoBoundingBox::new(pt(-10.0, 170.0), pt(10.0, -170.0)).unwrap();
        assert!(bbox.wraps());
        assert!(bbox.contains(&pt(0.0, 175.0)));
        assert!(bbox.contains(&pt(0.0, -175.0)));
        assert!(bbox.contains(&pt(0.0, 180.0)));
        assert!(!bbox.contains(&pt(0.0, 0.0)));
        assert!(!bbox.contains(&pt(0.0, 160.0)));
    }

    #[test]
    fn test_bbox_center_wrapping() {
        let bbox = GeoBoundingBox::new(pt(-10.0, 170.0), pt(10.0, -170.0)).unwrap();
        let center = bbox.center();
        assert_eq!(center.lat, 0.0);
        assert_eq!(center.lng, 180.0);
        assert!((bbox.width_deg() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_bbox_split() {
        let plain = GeoBoundingBox::new(pt(0.0, 10.0), pt(1.0, 20.0)).unwrap();
        assert_eq!(plain.split().len(), 1);

        let wrapped = GeoBoundingBox::new(pt(-10.0, 170.0), pt(10.0, -170.0)).unwrap();
        let parts = wrapped.split();
        assert_eq!(parts.len(), 2);
        assert!(!parts[0].wraps());
        assert!(!parts[1].wraps());
        assert_eq!(parts[0].northeast.lng, 180.0);
        assert_eq!(parts[1].southwest.lng, -180.0);
    }

    #[test]
    fn test_bbox_invalid_latitudes() {
        assert!(GeoBoundingBox::new(pt(10.0, 0.0), pt(-10.0, 1.0)).is_err());
    }

    #[test]
    fn test_region_circle_contains() {
        let region = Region::Circle {
            center: pt(37.7749, -122.4194),
            radius_m: 5_000.0,
        };
        assert!(region.contains(&pt(37.7749, -122.4194)));
        // Oakland is ~13km away
        assert!(!region.contains(&pt(37.8044, -122.2712)));
    }

    #[test]
    fn test_region_box_distance_is_none() {
        let region = Region::Box {
            bounds: GeoBoundingBox::new(pt(0.0, 0.0), pt(1.0, 1.0)).unwrap(),
        };
        assert!(region.distance_from_center(&pt(0.5, 0.5)).is_none());
    }
}

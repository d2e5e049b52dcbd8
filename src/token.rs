//! Opaque continuation tokens for paginated queries.
//!
//! A token snapshots where a traversal stopped: the index of the next
//! covering cell plus the store's native cursor inside it, alongside the
//! query parameters that shaped the covering. Clients treat the string as
//! opaque; the engine verifies on resume that the token was minted for
//! the same query, since a covering computed from different parameters
//! would make the cell index meaningless.

use crate::error::{GeoQueryError, Result};
use crate::geom::Region;
use crate::grid::GridKind;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Current token format version. Bump on any layout change; old tokens
/// are rejected rather than misread.
pub const TOKEN_VERSION: u32 = 1;

/// Traversal snapshot carried between paginated calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub version: u32,
    pub grid: GridKind,
    pub precision: u8,
    pub region: Region,
    pub max_cells: Option<usize>,
    /// Index into the deterministic cell traversal order.
    pub next_cell: usize,
    /// Native cursor inside `next_cell`, when it was left partially read.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub store_cursor: Option<Vec<u8>>,
}

impl ContinuationToken {
    pub fn new(grid: GridKind, precision: u8, region: Region, max_cells: Option<usize>) -> Self {
        Self {
            version: TOKEN_VERSION,
            grid,
            precision,
            region,
            max_cells,
            next_cell: 0,
            store_cursor: None,
        }
    }

    /// Serialize to the opaque wire form (URL-safe base64 over JSON).
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| GeoQueryError::InvalidToken(format!("token serialization: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parse the opaque wire form. Anything malformed, truncated, or from
    /// a different format version is an invalid-token error.
    pub fn decode(token: &str) -> Result<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| GeoQueryError::InvalidToken(format!("bad base64: {e}")))?;
        let decoded: Self = serde_json::from_slice(&json)
            .map_err(|e| GeoQueryError::InvalidToken(format!("bad payload: {e}")))?;
        if decoded.version != TOKEN_VERSION {
            return Err(GeoQueryError::InvalidToken(format!(
                "unsupported token version {}",
                decoded.version
            )));
        }
        Ok(decoded)
    }

    /// Reject resumption under different query parameters.
    pub fn ensure_matches(
        &self,
        grid: GridKind,
        precision: u8,
        region: &Region,
        max_cells: Option<usize>,
    ) -> Result<()> {
        if self.grid != grid {
            return Err(GeoQueryError::TokenMismatch(format!(
                "grid changed: token {:?}, query {:?}",
                self.grid, grid
            )));
        }
        if self.precision != precision {
            return Err(GeoQueryError::TokenMismatch(format!(
                "precision changed: token {}, query {}",
                self.precision, precision
            )));
        }
        if self.region != *region {
            return Err(GeoQueryError::TokenMismatch(
                "query region changed".to_string(),
            ));
        }
        if self.max_cells != max_cells {
            return Err(GeoQueryError::TokenMismatch(format!(
                "cell budget changed: token {:?}, query {:?}",
                self.max_cells, max_cells
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::GeoPoint;

    fn circle() -> Region {
        Region::Circle {
            center: GeoPoint::new(37.7749, -122.4194).unwrap(),
            radius_m: 5_000.0,
        }
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let mut token = ContinuationToken::new(GridKind::Hex, 8, circle(), Some(32));
        token.next_cell = 7;
        token.store_cursor = Some(b"native-cursor".to_vec());

        let encoded = token.encode().unwrap();
        let decoded = ContinuationToken::decode(&encoded).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_coordinates_survive_exactly() {
        // JSON round-trips f64 exactly; distances recomputed on resume
        // must match the original run bit for bit.
        let token = ContinuationToken::new(GridKind::Quad, 6, circle(), None);
        let decoded = ContinuationToken::decode(&token.encode().unwrap()).unwrap();
        match (decoded.region, circle()) {
            (
                Region::Circle { center: a, .. },
                Region::Circle { center: b, .. },
            ) => {
                assert_eq!(a.lat.to_bits(), b.lat.to_bits());
                assert_eq!(a.lng.to_bits(), b.lng.to_bits());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_garbage_is_invalid_token() {
        assert!(matches!(
            ContinuationToken::decode("not base64!!"),
            Err(GeoQueryError::InvalidToken(_))
        ));
        assert!(matches!(
            ContinuationToken::decode(&URL_SAFE_NO_PAD.encode(b"{\"nope\":1}")),
            Err(GeoQueryError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut token = ContinuationToken::new(GridKind::Hex, 8, circle(), None);
        token.version = TOKEN_VERSION + 1;
        let encoded = token.encode().unwrap();
        assert!(matches!(
            ContinuationToken::decode(&encoded),
            Err(GeoQueryError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_parameter_mismatch_rejected() {
        let token = ContinuationToken::new(GridKind::Hex, 8, circle(), None);
        assert!(token.ensure_matches(GridKind::Hex, 8, &circle(), None).is_ok());

        assert!(matches!(
            token.ensure_matches(GridKind::Quad, 8, &circle(), None),
            Err(GeoQueryError::TokenMismatch(_))
        ));
        assert!(matches!(
            token.ensure_matches(GridKind::Hex, 9, &circle(), None),
            Err(GeoQueryError::TokenMismatch(_))
        ));
        assert!(matches!(
            token.ensure_matches(GridKind::Hex, 8, &circle(), Some(4)),
            Err(GeoQueryError::TokenMismatch(_))
        ));

        let other = Region::Circle {
            center: GeoPoint::new(37.7749, -122.4194).unwrap(),
            radius_m: 6_000.0,
        };
        assert!(matches!(
            token.ensure_matches(GridKind::Hex, 8, &other, None),
            Err(GeoQueryError::TokenMismatch(_))
        ));
    }
}

//! Geospatial proximity and bounding-box queries over partition/range
//! key-value stores.
//!
//! Records are bucketed into grid cells (H3 or geohash) used as partition
//! keys; a query covers its region with cells, fans per-cell store reads
//! out, and exact-filters the candidates, so the store itself needs no
//! spatial support.
//!
//! ```rust
//! use bytes::Bytes;
//! use geoquery::{
//!     BasicMapper, GeoPoint, GeoRecord, GridKind, MemoryStore, RecordMapper, SpatialQuery,
//! };
//!
//! # fn main() -> geoquery::Result<()> {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let store = MemoryStore::new();
//! let grid = GridKind::Quad.system();
//!
//! let position = GeoPoint::new(40.7128, -74.0060)?;
//! let record = GeoRecord {
//!     key: Bytes::from_static(b"nyc"),
//!     position,
//!     payload: Bytes::from_static(b"NYC"),
//! };
//! let cell = grid.cell_at(position, 6)?;
//! store.insert(cell.as_str(), "nyc", BasicMapper.to_raw(&record));
//!
//! let nearby = SpatialQuery::circle(&store, position, 1_000.0)
//!     .grid(GridKind::Quad)
//!     .precision(6)
//!     .execute()
//!     .await?;
//! assert_eq!(nearby.matches.len(), 1);
//! # Ok(())
//! # })
//! # }
//! ```

pub mod config;
pub mod error;
pub mod geom;
pub mod grid;
pub mod order;
pub mod query;
pub mod store;
pub mod token;

pub use config::{QueryConfig, RetryPolicy};
pub use error::{GeoQueryError, Result, StoreError, StoreErrorKind, StoreResult};
pub use geom::{GeoBoundingBox, GeoPoint, Region, haversine_m};
pub use grid::{CellId, Covering, GridKind, GridSystem};
pub use query::{QueryMatch, QueryResponse, SpatialQuery};
pub use store::{
    BasicMapper, CellQuery, GeoRecord, MemoryStore, RawRecord, RecordMapper, SortKeyCondition,
    SpatialStore, StoreCursor, StorePage,
};
pub use token::ContinuationToken;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoBoundingBox, GeoPoint, Region};

    pub use crate::{CellId, GridKind};

    pub use crate::{GeoQueryError, Result};

    pub use crate::{QueryConfig, QueryMatch, QueryResponse, SpatialQuery};

    pub use crate::{BasicMapper, GeoRecord, MemoryStore, RecordMapper, SpatialStore};

    pub use tokio_util::sync::CancellationToken;
}

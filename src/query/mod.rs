//! Query execution.
//!
//! [`SpatialQuery`] is the public entry point: a builder over a store and
//! a record mapper that runs one spatial query to completion. Without a
//! page size it scatter-gathers the whole covering concurrently; with a
//! page size (or a continuation token) it walks cells sequentially and
//! stops at the page boundary.

mod paginate;
mod scatter;

use crate::config::{QueryConfig, RetryPolicy};
use crate::error::{GeoQueryError, Result};
use crate::geom::{GeoBoundingBox, GeoPoint, Region};
use crate::grid::{CellId, GridKind};
use crate::store::{
    BasicMapper, CellQuery, GeoRecord, RecordMapper, SpatialStore, StoreCursor, StorePage,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-cell query customization hook.
type ConditionFn = Arc<dyn Fn(&CellId) -> CellQuery + Send + Sync>;

/// Default grid when the caller does not pick one.
pub const DEFAULT_GRID: GridKind = GridKind::Hex;

/// Default precision for [`DEFAULT_GRID`]. Roughly neighborhood-sized
/// cells, a reasonable fit for radii in the hundreds of meters to a few
/// kilometers.
pub const DEFAULT_PRECISION: u8 = 7;

/// One record that passed the exact region filter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub record: GeoRecord,
    /// Meters from the circle center. `None` for box queries.
    pub distance_m: Option<f64>,
}

/// Outcome of one [`SpatialQuery::execute`] call.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub matches: Vec<QueryMatch>,
    /// Opaque continuation for paginated queries; `None` when the
    /// traversal is exhausted (and always for scatter/gather).
    pub next_token: Option<String>,
    /// Cells actually queried by this call.
    pub cells_queried: usize,
    /// Raw candidates read from the store before dedup and filtering.
    pub items_scanned: usize,
    /// `false` when a `max_cells` budget truncated the covering, so some
    /// matching records may have been unreachable.
    pub is_complete: bool,
}

/// Builder for one spatial query.
///
/// # Examples
///
/// ```
/// use geoquery::{GeoPoint, GridKind, MemoryStore, SpatialQuery};
///
/// # async fn run() -> geoquery::Result<()> {
/// let store = MemoryStore::new();
/// let center = GeoPoint::new(37.7749, -122.4194)?;
/// let response = SpatialQuery::circle(&store, center, 5_000.0)
///     .grid(GridKind::Quad)
///     .precision(6)
///     .execute()
///     .await?;
/// assert!(response.is_complete);
/// # Ok(())
/// # }
/// ```
pub struct SpatialQuery<'a, S: SpatialStore + ?Sized, M: RecordMapper = BasicMapper> {
    store: &'a S,
    mapper: M,
    grid: GridKind,
    precision: u8,
    region: Region,
    max_cells: Option<usize>,
    page_size: Option<usize>,
    resume_token: Option<String>,
    condition: Option<ConditionFn>,
    config: QueryConfig,
    cancel: CancellationToken,
}

impl<'a, S: SpatialStore + ?Sized> SpatialQuery<'a, S, BasicMapper> {
    /// Query for records within `radius_m` meters of `center`.
    pub fn circle(store: &'a S, center: GeoPoint, radius_m: f64) -> Self {
        Self::new(store, Region::Circle { center, radius_m })
    }

    /// Query for records inside a bounding box.
    pub fn bounding_box(store: &'a S, bounds: GeoBoundingBox) -> Self {
        Self::new(store, Region::Box { bounds })
    }

    fn new(store: &'a S, region: Region) -> Self {
        Self {
            store,
            mapper: BasicMapper,
            grid: DEFAULT_GRID,
            precision: DEFAULT_PRECISION,
            region,
            max_cells: None,
            page_size: None,
            resume_token: None,
            condition: None,
            config: QueryConfig::default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl<'a, S: SpatialStore + ?Sized, M: RecordMapper> SpatialQuery<'a, S, M> {
    pub fn grid(mut self, grid: GridKind) -> Self {
        self.grid = grid;
        self
    }

    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    /// Cap the covering size. Responses report `is_complete = false` when
    /// the cap bites.
    pub fn max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = Some(max_cells);
        self
    }

    /// Switch to paginated execution with at most `page_size` matches per
    /// call.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Resume a paginated traversal from a previously returned token.
    pub fn resume(mut self, token: impl Into<String>) -> Self {
        self.resume_token = Some(token.into());
        self
    }

    /// Customize the per-cell store query (sort-key conditions, filters).
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&CellId) -> CellQuery + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Tie the query to an external cancellation signal. Checked before
    /// every store call.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Swap the record mapper.
    pub fn with_mapper<M2: RecordMapper>(self, mapper: M2) -> SpatialQuery<'a, S, M2> {
        SpatialQuery {
            store: self.store,
            mapper,
            grid: self.grid,
            precision: self.precision,
            region: self.region,
            max_cells: self.max_cells,
            page_size: self.page_size,
            resume_token: self.resume_token,
            condition: self.condition,
            config: self.config,
            cancel: self.cancel,
        }
    }

    /// Run the query.
    pub async fn execute(self) -> Result<QueryResponse> {
        if let Some(0) = self.page_size {
            return Err(GeoQueryError::InvalidInput(
                "page size must be at least 1".to_string(),
            ));
        }
        if self.resume_token.is_some() && self.page_size.is_none() {
            return Err(GeoQueryError::InvalidInput(
                "a continuation token requires a page size".to_string(),
            ));
        }

        let ctx = ExecContext {
            store: self.store,
            mapper: &self.mapper,
            grid: self.grid,
            precision: self.precision,
            region: self.region,
            max_cells: self.max_cells,
            condition: self.condition,
            config: self.config,
            cancel: self.cancel,
        };

        match self.page_size {
            Some(page_size) => paginate::execute(&ctx, page_size, self.resume_token).await,
            None => scatter::execute(&ctx).await,
        }
    }
}

/// Everything an executor needs, borrowed from the builder.
pub(crate) struct ExecContext<'a, S: SpatialStore + ?Sized, M: RecordMapper> {
    pub store: &'a S,
    pub mapper: &'a M,
    pub grid: GridKind,
    pub precision: u8,
    pub region: Region,
    pub max_cells: Option<usize>,
    pub condition: Option<ConditionFn>,
    pub config: QueryConfig,
    pub cancel: CancellationToken,
}

impl<S: SpatialStore + ?Sized, M: RecordMapper> ExecContext<'_, S, M> {
    pub fn cell_query(&self, cell: &CellId) -> CellQuery {
        match &self.condition {
            Some(build) => build(cell),
            None => CellQuery::for_partition(cell),
        }
    }
}

/// Fetch one native page, retrying transient faults with bounded
/// exponential backoff. Cancellation wins over both the in-flight call
/// and the backoff sleep.
pub(crate) async fn fetch_page_with_retry<S: SpatialStore + ?Sized>(
    store: &S,
    query: &CellQuery,
    cursor: Option<&StoreCursor>,
    limit: Option<usize>,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<StorePage> {
    let mut attempt: u32 = 0;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GeoQueryError::Cancelled),
            outcome = store.query(query, cursor, limit) => outcome,
        };
        match outcome {
            Ok(page) => return Ok(page),
            Err(err) if err.is_transient() && attempt + 1 < retry.max_attempts => {
                let delay = retry.backoff(attempt);
                attempt += 1;
                log::warn!(
                    "transient store fault on partition {} (attempt {attempt}/{}), retrying in {delay:?}: {err}",
                    query.partition_key,
                    retry.max_attempts,
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GeoQueryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                log::error!("store query failed on partition {}: {err}", query.partition_key);
                return Err(err.into());
            }
        }
    }
}

//! Scatter/gather execution: fan the covering out across concurrent
//! per-cell queries, drain each cell fully, then merge.
//!
//! Cell tasks carry their traversal index so the merge can restore the
//! deterministic cell order after `buffer_unordered` scrambles completion
//! order. The first fatal error aborts the whole query; in-flight sibling
//! futures are dropped at that point, which cancels them cooperatively.

use super::{ExecContext, QueryMatch, QueryResponse, fetch_page_with_retry};
use crate::error::{GeoQueryError, Result};
use crate::order::{compare_matches, order_cells};
use crate::store::{RawRecord, RecordMapper, SpatialStore};
use futures::stream::{self, StreamExt, TryStreamExt};
use rustc_hash::FxHashSet;

pub(crate) async fn execute<S, M>(ctx: &ExecContext<'_, S, M>) -> Result<QueryResponse>
where
    S: SpatialStore + ?Sized,
    M: RecordMapper,
{
    let grid = ctx.grid.system();
    let covering = ctx.grid.cover(&ctx.region, ctx.precision, ctx.max_cells)?;
    let is_complete = covering.is_complete;
    let ordered = order_cells(grid, covering.cells, &ctx.region)?;
    let cells_queried = ordered.len();

    if ordered.is_empty() {
        return Ok(QueryResponse {
            is_complete,
            ..QueryResponse::default()
        });
    }

    log::debug!(
        "scatter query over {cells_queried} cells ({:?} precision {}, parallelism {})",
        ctx.grid,
        ctx.precision,
        ctx.config.parallelism,
    );

    // Drain every cell concurrently, keeping the traversal index so the
    // merge is deterministic.
    let mut drained: Vec<(usize, Vec<RawRecord>)> = stream::iter(
        ordered.iter().enumerate().map(|(index, cell)| {
            let query = ctx.cell_query(cell);
            async move {
                let mut records = Vec::new();
                let mut cursor = None;
                loop {
                    let page = fetch_page_with_retry(
                        ctx.store,
                        &query,
                        cursor.as_ref(),
                        None,
                        &ctx.config.retry,
                        &ctx.cancel,
                    )
                    .await?;
                    records.extend(page.records);
                    match page.cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Ok::<_, GeoQueryError>((index, records))
            }
        }),
    )
    .buffer_unordered(ctx.config.parallelism)
    .try_collect()
    .await?;

    drained.sort_by_key(|(index, _)| *index);

    let mut items_scanned = 0;
    let mut seen = FxHashSet::default();
    let mut matches = Vec::new();
    for (_, records) in drained {
        for raw in records {
            items_scanned += 1;
            let record = ctx.mapper.to_record(&raw)?;
            // Boundary duplicates share a key; keep the first sighting.
            if !seen.insert(record.key.clone()) {
                continue;
            }
            if !ctx.region.contains(&record.position) {
                continue;
            }
            let distance_m = ctx.region.distance_from_center(&record.position);
            matches.push(QueryMatch { record, distance_m });
        }
    }

    // Circle results come back nearest first; box results keep cell
    // traversal order with storage order inside each cell.
    if matches.iter().any(|m| m.distance_m.is_some()) {
        matches.sort_by(|a, b| {
            compare_matches(
                a.distance_m.unwrap_or(f64::MAX),
                &a.record.key,
                b.distance_m.unwrap_or(f64::MAX),
                &b.record.key,
            )
        });
    }

    Ok(QueryResponse {
        matches,
        next_token: None,
        cells_queried,
        items_scanned,
        is_complete,
    })
}

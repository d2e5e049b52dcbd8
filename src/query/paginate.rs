//! Paginated execution: walk the covering sequentially and stop at the
//! page boundary.
//!
//! The traversal order is recomputed deterministically on every call, so
//! a continuation token only needs the index of the next cell plus the
//! store's native cursor inside it. Store calls are capped to the
//! remaining page capacity, which keeps the native cursor parked exactly
//! where consumption stopped. Dedup is page-local; cross-page duplicates
//! from cells split across calls are the documented trade-off.

use super::{ExecContext, QueryMatch, QueryResponse, fetch_page_with_retry};
use crate::error::{GeoQueryError, Result};
use crate::order::{compare_matches, order_cells};
use crate::store::{RecordMapper, SpatialStore, StoreCursor};
use crate::token::ContinuationToken;
use rustc_hash::FxHashSet;

pub(crate) async fn execute<S, M>(
    ctx: &ExecContext<'_, S, M>,
    page_size: usize,
    resume: Option<String>,
) -> Result<QueryResponse>
where
    S: SpatialStore + ?Sized,
    M: RecordMapper,
{
    let token = match resume {
        Some(encoded) => {
            let token = ContinuationToken::decode(&encoded)?;
            token.ensure_matches(ctx.grid, ctx.precision, &ctx.region, ctx.max_cells)?;
            token
        }
        None => ContinuationToken::new(ctx.grid, ctx.precision, ctx.region, ctx.max_cells),
    };

    let grid = ctx.grid.system();
    let covering = ctx.grid.cover(&ctx.region, ctx.precision, ctx.max_cells)?;
    let is_complete = covering.is_complete;
    let ordered = order_cells(grid, covering.cells, &ctx.region)?;

    if token.next_cell > ordered.len() {
        return Err(GeoQueryError::InvalidToken(format!(
            "cell index {} out of range for a {}-cell traversal",
            token.next_cell,
            ordered.len()
        )));
    }

    log::debug!(
        "paginated query over {} cells ({:?} precision {}), resuming at cell {} ({})",
        ordered.len(),
        ctx.grid,
        ctx.precision,
        token.next_cell,
        if token.store_cursor.is_some() {
            "mid-cell"
        } else {
            "cell start"
        },
    );

    let mut idx = token.next_cell;
    let mut cursor = token.store_cursor.clone().map(StoreCursor);
    let mut matches: Vec<QueryMatch> = Vec::with_capacity(page_size);
    let mut seen = FxHashSet::default();
    let mut items_scanned = 0;
    let mut cells_queried = 0;
    let mut next_token = None;

    'cells: while idx < ordered.len() {
        // Page filled exactly at a cell boundary: resume at this cell.
        if matches.len() >= page_size {
            next_token = Some(mint(&token, idx, cursor.take()));
            break;
        }

        let query = ctx.cell_query(&ordered[idx]);
        cells_queried += 1;
        loop {
            let remaining = page_size - matches.len();
            if remaining == 0 {
                // Page filled mid-cell: resume from the native cursor.
                next_token = Some(mint(&token, idx, cursor.take()));
                break 'cells;
            }

            let page = fetch_page_with_retry(
                ctx.store,
                &query,
                cursor.as_ref(),
                Some(remaining),
                &ctx.config.retry,
                &ctx.cancel,
            )
            .await?;

            for raw in &page.records {
                items_scanned += 1;
                let record = ctx.mapper.to_record(raw)?;
                if !seen.insert(record.key.clone()) {
                    continue;
                }
                if !ctx.region.contains(&record.position) {
                    continue;
                }
                let distance_m = ctx.region.distance_from_center(&record.position);
                matches.push(QueryMatch { record, distance_m });
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        // Cell exhausted; the native cursor must not leak into the next
        // cell's first call.
        cursor = None;
        idx += 1;
    }

    // Keep each page internally ordered the way scatter/gather orders the
    // full result set.
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

    let next_token = match next_token {
        Some(token) => {
            log::trace!(
                "page full after {cells_queried} cells, continuing at cell {}",
                token.next_cell
            );
            Some(token.encode()?)
        }
        None => {
            log::trace!("traversal exhausted after {cells_queried} cells this call");
            None
        }
    };

    Ok(QueryResponse {
        matches,
        next_token,
        cells_queried,
        items_scanned,
        is_complete,
    })
}

fn mint(base: &ContinuationToken, next_cell: usize, cursor: Option<StoreCursor>) -> ContinuationToken {
    let mut token = base.clone();
    token.next_cell = next_cell;
    token.store_cursor = cursor.map(|StoreCursor(bytes)| bytes);
    token
}

use arrow_array::types::UInt32Type;
use arrow_array::{Array, ArrayRef, UInt32Array};
use arrow_select::take::take;
use rayon::ThreadPool;
use rayon::prelude::*;

use super::{Bins, PartitionScheme, index_bins, value_bins};
use crate::error::{ExecError, Result};
use crate::lookup::keys::with_key_slices;
use crate::lookup::{KeyColumn, LookupStrategy, positions_with, select_strategy};

/// Queries routed to one block, by original row.
struct BlockTask {
    block: usize,
    rows: UInt32Array,
}

/// `LOOKUP` split over `num_cores` key blocks and evaluated on `pool` (or
/// sequentially without one). The result is in the original query order and
/// identical to [`crate::lookup::lookup_with`] on the same inputs.
///
/// Any block failing fails the whole call.
pub fn lookup_partitioned(
    values: &dyn Array,
    search_range: &dyn Array,
    result_range: &dyn Array,
    num_cores: usize,
    scheme: PartitionScheme,
    strategy: Option<LookupStrategy>,
    pool: Option<&ThreadPool>,
) -> Result<ArrayRef> {
    if num_cores == 0 {
        return Err(ExecError::precondition("number of cores must be positive"));
    }
    if search_range.len() != result_range.len() {
        return Err(ExecError::precondition(format!(
            "search range has {} rows but result range has {}",
            search_range.len(),
            result_range.len()
        )));
    }
    let (keys, queries) = KeyColumn::pair(values, search_range)?;
    let bins = match scheme {
        PartitionScheme::Index => index_bins(&keys, num_cores)?,
        PartitionScheme::Value => value_bins(values, &keys, num_cores)?,
    };
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!(
        "lookup_partitioned",
        values = values.len(),
        blocks = bins.num_blocks()
    )
    .entered();

    let tasks = route(&bins, &queries, &keys)?;
    let run = |task: &BlockTask| -> Result<(UInt32Array, UInt32Array)> {
        let span = bins.block_rows(task.block);
        let block_keys = keys.slice(span.start, span.len());
        let block_queries = queries.take(&task.rows)?;
        let strategy = strategy.unwrap_or_else(|| select_strategy(&block_queries));
        let local = positions_with(strategy, &block_queries, &block_keys)?;
        let offset = span.start as u32;
        Ok((task.rows.clone(), local.unary::<_, UInt32Type>(|i| i + offset)))
    };
    let results: Vec<(UInt32Array, UInt32Array)> = match pool {
        Some(pool) => pool.install(|| tasks.par_iter().map(run).collect::<Result<Vec<_>>>())?,
        None => tasks.iter().map(run).collect::<Result<Vec<_>>>()?,
    };

    // Reassemble in original row order, keyed by each block's source rows.
    let mut positions: Vec<Option<u32>> = vec![None; queries.len()];
    for (rows, matched) in &results {
        for (row, pos) in rows.values().iter().zip(matched.iter()) {
            positions[*row as usize] = pos;
        }
    }
    Ok(take(result_range, &UInt32Array::from(positions), None)?)
}

fn route(bins: &Bins, queries: &KeyColumn, keys: &KeyColumn) -> Result<Vec<BlockTask>> {
    fn assign<T: crate::lookup::keys::Key>(
        bins: &Bins,
        keys: &[T],
        queries: &[Option<T>],
    ) -> Vec<Vec<u32>> {
        let mut blocks = vec![Vec::new(); bins.num_blocks()];
        for (row, q) in queries.iter().enumerate() {
            blocks[bins.partition_for(keys, *q)].push(row as u32);
        }
        blocks
    }
    let blocks = with_key_slices(
        keys,
        queries,
        |k, q| assign(bins, k, q),
        |k, q| assign(bins, k, q),
        |k, q| assign(bins, k, q),
    )?;
    Ok(blocks
        .into_iter()
        .enumerate()
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(block, rows)| BlockTask {
            block,
            rows: UInt32Array::from(rows),
        })
        .collect())
}

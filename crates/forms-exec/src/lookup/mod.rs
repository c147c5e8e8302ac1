//! Approximate-match lookups (`LOOKUP`, `VLOOKUP`) over Arrow columns.
//!
//! For a search column `K` sorted ascending and a query `v`:
//! - `v < K[0]` (or `v` empty) is a miss: the result row is null;
//! - otherwise the match is the last row whose key is at or below `v`, so a
//!   key repeated in `K` resolves to its last copy.
//!
//! Seven implementations of the match computation are kept side by side (see
//! [`LookupStrategy`]); they return identical positions and are exercised
//! against each other in the differential tests. [`lookup`] and [`vlookup`]
//! choose one automatically.
//!
//! Integral inputs are compared as `Int64`, other numeric mixes as `Float64`,
//! text as `Utf8`. Result columns keep their own type: a miss is a null, never a widened
//! sentinel.

mod algorithm;
pub(crate) mod keys;

use std::fmt;

use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::{Array, ArrayRef, UInt32Array};
use arrow_cast::cast::cast;
use arrow_schema::DataType;
use arrow_select::interleave::interleave;
use arrow_select::take::take;
use rustc_hash::FxHashMap;

pub(crate) use keys::KeyColumn;

use crate::error::{ExecError, Result};

/// Below this many queries the scalar binary search beats the batched paths.
pub const SMALL_QUERY_THRESHOLD: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupStrategy {
    /// Scalar binary search per query.
    BinarySearch,
    /// Batched insertion points with a per-query correction loop.
    SearchSorted,
    /// Batched insertion points, batched correction, batched gather.
    SearchSortedTwoPass,
    /// Arrow kernels end to end.
    Vectorized,
    /// Sorted queries merged against the keys, O(m log m + n).
    SortMerge,
    /// Backward as-of join on numerically coerced keys.
    AsOfJoin,
    /// One search replicated across a batch of identical queries.
    Broadcast,
}

impl LookupStrategy {
    pub const ALL: [LookupStrategy; 7] = [
        LookupStrategy::BinarySearch,
        LookupStrategy::SearchSorted,
        LookupStrategy::SearchSortedTwoPass,
        LookupStrategy::Vectorized,
        LookupStrategy::SortMerge,
        LookupStrategy::AsOfJoin,
        LookupStrategy::Broadcast,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            LookupStrategy::BinarySearch => "binary_search",
            LookupStrategy::SearchSorted => "search_sorted",
            LookupStrategy::SearchSortedTwoPass => "search_sorted_two_pass",
            LookupStrategy::Vectorized => "vectorized",
            LookupStrategy::SortMerge => "sort_merge",
            LookupStrategy::AsOfJoin => "as_of_join",
            LookupStrategy::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a query must relate to its matched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Largest key at or below the query.
    #[default]
    Approximate,
    /// The query itself must be a key.
    Exact,
}

pub(crate) fn select_strategy(queries: &KeyColumn) -> LookupStrategy {
    let strategy = if queries.len() > 1 && queries.is_constant() {
        LookupStrategy::Broadcast
    } else if queries.len() < SMALL_QUERY_THRESHOLD {
        LookupStrategy::BinarySearch
    } else {
        LookupStrategy::Vectorized
    };
    #[cfg(feature = "tracing")]
    tracing::debug!(queries = queries.len(), strategy = strategy.name(), "lookup strategy");
    strategy
}

/// Match positions of `values` in `search_range`, computed by `strategy`
/// (automatic selection when `None`).
pub fn match_positions(
    values: &dyn Array,
    search_range: &dyn Array,
    strategy: Option<LookupStrategy>,
    mode: MatchMode,
) -> Result<UInt32Array> {
    let (keys, queries) = KeyColumn::pair(values, search_range)?;
    let strategy = strategy.unwrap_or_else(|| select_strategy(&queries));
    let positions = positions_with(strategy, &queries, &keys)?;
    match mode {
        MatchMode::Approximate => Ok(positions),
        MatchMode::Exact => algorithm::retain_exact(&positions, &queries, &keys),
    }
}

pub(crate) fn positions_with(
    strategy: LookupStrategy,
    queries: &KeyColumn,
    keys: &KeyColumn,
) -> Result<UInt32Array> {
    match strategy {
        LookupStrategy::BinarySearch => algorithm::binary_search(queries, keys),
        LookupStrategy::SearchSorted => algorithm::search_sorted(queries, keys),
        LookupStrategy::SearchSortedTwoPass => algorithm::search_sorted_two_pass(queries, keys),
        LookupStrategy::Vectorized => algorithm::vectorized(queries, keys),
        LookupStrategy::SortMerge => algorithm::sort_merge(queries, keys),
        LookupStrategy::AsOfJoin => algorithm::as_of_join(queries.as_array(), keys.as_array()),
        LookupStrategy::Broadcast => algorithm::broadcast(queries, keys),
    }
}

/// `LOOKUP(values, search_range, result_range)` with automatic strategy selection.
pub fn lookup(
    values: &dyn Array,
    search_range: &dyn Array,
    result_range: &dyn Array,
) -> Result<ArrayRef> {
    lookup_with(None, values, search_range, result_range)
}

pub fn lookup_with(
    strategy: Option<LookupStrategy>,
    values: &dyn Array,
    search_range: &dyn Array,
    result_range: &dyn Array,
) -> Result<ArrayRef> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("lookup", values = values.len(), keys = search_range.len())
        .entered();
    if search_range.len() != result_range.len() {
        return Err(ExecError::precondition(format!(
            "search range has {} rows but result range has {}",
            search_range.len(),
            result_range.len()
        )));
    }
    let positions = match_positions(values, search_range, strategy, MatchMode::Approximate)?;
    Ok(take(result_range, &positions, None)?)
}

/// `VLOOKUP(values, table, col_indexes)`: approximate match on `table[0]`,
/// returning for each row the column its 1-based `col_indexes` entry selects.
pub fn vlookup(values: &dyn Array, table: &[ArrayRef], col_indexes: &dyn Array) -> Result<ArrayRef> {
    vlookup_with(None, MatchMode::Approximate, values, table, col_indexes)
}

pub fn vlookup_with(
    strategy: Option<LookupStrategy>,
    mode: MatchMode,
    values: &dyn Array,
    table: &[ArrayRef],
    col_indexes: &dyn Array,
) -> Result<ArrayRef> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("vlookup", values = values.len(), columns = table.len())
        .entered();
    let Some(search_range) = table.first() else {
        return Err(ExecError::precondition("VLOOKUP table has no columns"));
    };
    if col_indexes.len() != values.len() {
        return Err(ExecError::precondition(format!(
            "{} column indexes for {} lookup values",
            col_indexes.len(),
            values.len()
        )));
    }
    let positions = match_positions(values, search_range.as_ref(), strategy, mode)?;
    gather_columns(table, &positions, col_indexes)
}

/// Row `positions[i]` of column `col_indexes[i] - 1`, for every `i`.
pub(crate) fn gather_columns(
    table: &[ArrayRef],
    positions: &UInt32Array,
    col_indexes: &dyn Array,
) -> Result<ArrayRef> {
    let width = table.len();
    let col_indexes = cast(col_indexes, &DataType::Int64)?;
    let col_indexes = col_indexes.as_primitive::<Int64Type>();
    if col_indexes.null_count() > 0 {
        return Err(ExecError::precondition("column index is empty"));
    }
    if let Some(bad) = col_indexes
        .values()
        .iter()
        .find(|c| **c < 1 || **c as usize > width)
    {
        return Err(ExecError::precondition(format!(
            "column index {bad} is outside a table of {width} columns"
        )));
    }

    // One take per distinct column, then a row-wise interleave.
    let mut slots: FxHashMap<usize, usize> = FxHashMap::default();
    let mut gathered: Vec<ArrayRef> = Vec::new();
    let mut picks: Vec<(usize, usize)> = Vec::with_capacity(positions.len());
    for (row, col) in col_indexes.values().iter().enumerate() {
        let col = *col as usize - 1;
        let slot = match slots.get(&col) {
            Some(slot) => *slot,
            None => {
                gathered.push(take(table[col].as_ref(), positions, None)?);
                slots.insert(col, gathered.len() - 1);
                gathered.len() - 1
            }
        };
        picks.push((slot, row));
    }

    match gathered.len() {
        0 => Ok(arrow_array::new_empty_array(table[0].data_type())),
        1 => Ok(gathered.swap_remove(0)),
        _ => {
            let data_type = gathered[0].data_type().clone();
            if let Some(other) = gathered.iter().find(|g| *g.data_type() != data_type) {
                return Err(ExecError::type_mismatch(format!(
                    "selected columns mix {data_type} and {}",
                    other.data_type()
                )));
            }
            let refs: Vec<&dyn Array> = gathered.iter().map(|g| g.as_ref()).collect();
            Ok(interleave(&refs, &picks)?)
        }
    }
}

//! Splitting lookup work across cores.
//!
//! Two ways to cut a sorted key column into blocks:
//!
//! - **Index bins** cut the row space into `cores` contiguous blocks of
//!   (almost) equal size: boundary `k` sits at row `k * rows / cores`.
//! - **Value bins** follow the distribution of the query values instead:
//!   `cores + 1` quantiles of the queries are mapped onto the key column by
//!   insertion point, so a skewed batch still spreads evenly.
//!
//! Either way the result is a set of block start rows. A query is routed to
//! the block holding its match (see [`Bins::partition_for`]): the last block
//! whose first key is at or below the query. Its match then lies inside that
//! block, so a routed query resolves exactly as it would against the whole
//! column.

mod parallel;

pub use parallel::lookup_partitioned;

use std::ops::Range;

use arrow_array::cast::AsArray;
use arrow_array::types::Float64Type;
use arrow_array::{Array, ArrayRef, UInt32Array};
use arrow_cast::cast::cast;
use arrow_schema::DataType;
use forms_common::{RefType, Reference};

use crate::error::{ExecError, Result};
use crate::lookup::KeyColumn;
use crate::lookup::keys::{Key, insertion_point};
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PartitionScheme {
    /// Equal row counts per block.
    #[default]
    Index,
    /// Equal query mass per block, from quantiles of the query values.
    Value,
}

/// Block boundaries over a sorted key column.
#[derive(Debug, Clone)]
pub struct Bins {
    /// Key value at each boundary row.
    pub boundary_values: ArrayRef,
    /// Boundary rows. Index bins hold the `cores - 1` interior starts; value
    /// bins hold all `cores + 1` quantile positions.
    pub boundary_indices: Vec<usize>,
    scheme: PartitionScheme,
    rows: usize,
}

impl Bins {
    pub fn scheme(&self) -> PartitionScheme {
        self.scheme
    }

    /// First row of every block after the first. Non-decreasing.
    pub fn block_starts(&self) -> &[usize] {
        match self.scheme {
            PartitionScheme::Index => &self.boundary_indices,
            PartitionScheme::Value => {
                let n = self.boundary_indices.len();
                if n <= 2 {
                    &[]
                } else {
                    &self.boundary_indices[1..n - 1]
                }
            }
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.block_starts().len() + 1
    }

    /// Key rows searched for queries routed to `block`.
    pub fn block_rows(&self, block: usize) -> Range<usize> {
        let starts = self.block_starts();
        let lo = if block == 0 { 0 } else { starts[block - 1] };
        let hi = starts.get(block).copied().unwrap_or(self.rows);
        lo..hi
    }

    /// Block whose key slice holds the match for `value`: the number of block
    /// starts whose key is at or below `value`.
    pub(crate) fn partition_for<T: Key>(&self, keys: &[T], value: Option<T>) -> usize {
        match value {
            Some(v) => self.block_starts().partition_point(|&s| keys[s] <= v),
            None => 0,
        }
    }
}

/// Interior boundaries of `cores` near-equal contiguous blocks over `rows`
/// rows: `k * rows / cores` for `k` in `1..cores`. The core count is capped at
/// the row count so boundaries stay strictly increasing.
pub fn index_boundaries(rows: usize, cores: usize) -> Vec<usize> {
    let cores = cores.min(rows).max(1);
    (1..cores).map(|k| k * rows / cores).collect()
}

/// Contiguous half-open ranges covering `0..rows`, one per block.
pub fn contiguous_ranges(rows: usize, cores: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::with_capacity(cores);
    let mut start = 0;
    for boundary in index_boundaries(rows, cores)
        .into_iter()
        .chain(std::iter::once(rows))
    {
        ranges.push(start..boundary);
        start = boundary;
    }
    ranges
}

fn key_column(table: &dyn Table) -> Result<KeyColumn> {
    let rows = table.num_rows();
    if rows == 0 || table.num_columns() == 0 {
        return Err(ExecError::precondition("cannot partition an empty table"));
    }
    let first = Reference::new(0, 0, rows - 1, 0, RefType::FF)?;
    let columns = table.read_range(&first)?;
    KeyColumn::search_range(columns[0].as_ref())
}

fn check_cores(num_cores: usize) -> Result<()> {
    if num_cores == 0 {
        return Err(ExecError::precondition("number of cores must be positive"));
    }
    Ok(())
}

/// Range partitioning of the table's first column into `num_cores` blocks.
pub fn get_index_bins(table: &dyn Table, num_cores: usize) -> Result<Bins> {
    check_cores(num_cores)?;
    index_bins(&key_column(table)?, num_cores)
}

/// Quantile partitioning driven by the numeric `values` that will be looked
/// up in the table's first column.
pub fn get_value_bins(values: &dyn Array, table: &dyn Table, num_cores: usize) -> Result<Bins> {
    check_cores(num_cores)?;
    value_bins(values, &key_column(table)?, num_cores)
}

pub(crate) fn index_bins(keys: &KeyColumn, num_cores: usize) -> Result<Bins> {
    let rows = keys.len();
    let boundary_indices = index_boundaries(rows, num_cores);
    #[cfg(feature = "tracing")]
    tracing::debug!(rows, num_cores, boundaries = ?boundary_indices, "index bins");
    Ok(Bins {
        boundary_values: boundary_values(keys, &boundary_indices)?,
        boundary_indices,
        scheme: PartitionScheme::Index,
        rows,
    })
}

pub(crate) fn value_bins(values: &dyn Array, keys: &KeyColumn, num_cores: usize) -> Result<Bins> {
    if !(values.data_type().is_numeric() || values.data_type().is_null()) {
        return Err(ExecError::type_mismatch(format!(
            "value bins need numeric values, got {}",
            values.data_type()
        )));
    }
    let key_numbers = match keys {
        KeyColumn::Text(_) => {
            return Err(ExecError::type_mismatch(
                "value bins need a numeric search range",
            ));
        }
        numeric => cast(numeric.as_array(), &DataType::Float64)?,
    };
    let rows = keys.len();
    let key_numbers: &[f64] = key_numbers.as_primitive::<Float64Type>().values();

    let mut sample: Vec<f64> = KeyColumn::numeric(values)?.iter().flatten().collect();
    sample.sort_by(f64::total_cmp);

    let boundary_indices: Vec<usize> = (0..=num_cores)
        .map(|k| match quantile(&sample, k as f64 / num_cores as f64) {
            Some(q) => insertion_point(key_numbers, q).min(rows - 1),
            None => 0,
        })
        .collect();
    #[cfg(feature = "tracing")]
    tracing::debug!(rows, num_cores, boundaries = ?boundary_indices, "value bins");
    Ok(Bins {
        boundary_values: boundary_values(keys, &boundary_indices)?,
        boundary_indices,
        scheme: PartitionScheme::Value,
        rows,
    })
}

/// Linear-interpolated quantile of an ascending sample.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn boundary_values(keys: &KeyColumn, indices: &[usize]) -> Result<ArrayRef> {
    let idx = UInt32Array::from(indices.iter().map(|&i| i as u32).collect::<Vec<u32>>());
    Ok(keys.take(&idx)?.to_array_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ArrowTable;
    use arrow_array::types::Int64Type;
    use arrow_array::{Float64Array, Int64Array, StringArray};
    use std::sync::Arc;

    fn table(rows: i64) -> ArrowTable {
        ArrowTable::try_new(vec![Arc::new(Int64Array::from((0..rows).collect::<Vec<_>>()))])
            .unwrap()
    }

    #[test]
    fn index_bins_for_ten_rows_on_four_cores() {
        let bins = get_index_bins(&table(10), 4).unwrap();
        assert_eq!(bins.boundary_indices, vec![2, 5, 7]);
        let values = bins.boundary_values.as_primitive::<Int64Type>();
        assert_eq!(values.values(), &[2, 5, 7]);
        assert_eq!(bins.num_blocks(), 4);
        assert_eq!(bins.block_rows(0), 0..2);
        assert_eq!(bins.block_rows(3), 7..10);
    }

    #[test]
    fn index_bins_are_strictly_increasing_and_in_range() {
        for rows in 1..40 {
            for cores in 1..12 {
                let b = index_boundaries(rows, cores);
                assert_eq!(b.len(), cores.min(rows) - 1);
                assert!(b.windows(2).all(|w| w[0] < w[1]));
                assert!(b.iter().all(|&i| i <= rows - 1));
            }
        }
    }

    #[test]
    fn contiguous_ranges_cover_every_row_once() {
        let ranges = contiguous_ranges(10, 4);
        assert_eq!(ranges, vec![0..2, 2..5, 5..7, 7..10]);
        assert_eq!(contiguous_ranges(3, 8).len(), 3);
    }

    #[test]
    fn value_bins_follow_query_skew() {
        let t = table(100);
        // Every query falls in the top tenth of the key range.
        let values = Float64Array::from((0..50).map(|i| 90.0 + i as f64 / 5.0).collect::<Vec<_>>());
        let bins = get_value_bins(&values, &t, 4).unwrap();
        assert_eq!(bins.boundary_indices.len(), 5);
        assert!(bins.boundary_indices.windows(2).all(|w| w[0] <= w[1]));
        assert!(bins.boundary_indices.iter().all(|&i| i <= 99));
        assert!(bins.block_starts().iter().all(|&s| s >= 90));
    }

    #[test]
    fn value_bins_clamp_past_the_last_key() {
        let t = table(10);
        let values = Float64Array::from(vec![50.0, 60.0]);
        let bins = get_value_bins(&values, &t, 2).unwrap();
        assert_eq!(bins.boundary_indices, vec![9, 9, 9]);
    }

    #[test]
    fn value_bins_reject_text() {
        let t = table(10);
        let err = get_value_bins(&StringArray::from(vec!["a"]), &t, 2).unwrap_err();
        assert!(matches!(err, ExecError::TypeMismatch(_)));
    }

    #[test]
    fn routing_picks_the_block_holding_the_match() {
        let bins = get_index_bins(&table(10), 4).unwrap();
        let keys: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(bins.partition_for(&keys, Some(-1.0)), 0);
        assert_eq!(bins.partition_for(&keys, Some(1.5)), 0);
        assert_eq!(bins.partition_for(&keys, Some(2.0)), 1);
        assert_eq!(bins.partition_for(&keys, Some(2.5)), 1);
        assert_eq!(bins.partition_for(&keys, Some(5.0)), 2);
        assert_eq!(bins.partition_for(&keys, Some(100.0)), 3);
        assert_eq!(bins.partition_for(&keys, None), 0);
    }

    #[test]
    fn zero_cores_is_rejected() {
        assert!(get_index_bins(&table(10), 0).is_err());
    }
}

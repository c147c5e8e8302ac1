//! The approximate-match implementations.
//!
//! Every function here maps `(queries, sorted keys)` to a nullable `UInt32Array`
//! of match positions: for a query `v`, the last row whose key is at or below
//! `v` (so an exact key resolves to its last copy), and null when `v` is below
//! the first key (or is itself null). Gathering result values from those
//! positions is shared by all implementations and lives in the parent module.

use arrow::compute::kernels::boolean::not;
use arrow::compute::kernels::cmp::eq;
use arrow::compute::kernels::numeric::sub;
use arrow::compute::{SortOptions, sort_to_indices};
use arrow_array::builder::UInt32Builder;
use arrow_array::cast::AsArray;
use arrow_array::types::UInt32Type;
use arrow_array::{Array, Int64Array, UInt32Array};
use arrow_buffer::{NullBuffer, ScalarBuffer};
use arrow_cast::cast::cast;
use arrow_schema::DataType;
use arrow_select::nullif::nullif;
use arrow_select::take::take;

use super::keys::{Key, KeyColumn, correct, insertion_points, with_key_slices};
use crate::error::{ExecError, Result};

/// Scalar binary search for one query. `None` when `value` is below every key.
///
/// `keys` must be non-empty and sorted ascending.
pub(crate) fn approx_binary_search<T: Key>(value: T, keys: &[T]) -> Option<usize> {
    debug_assert!(!keys.is_empty());
    if value < keys[0] {
        return None;
    }
    let (mut lo, mut hi) = (0usize, keys.len());
    // Invariant: keys[..lo] <= value < keys[hi..]
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if keys[mid] <= value {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    correct(lo)
}

/// One scalar binary search per query.
pub(crate) fn binary_search(queries: &KeyColumn, keys: &KeyColumn) -> Result<UInt32Array> {
    fn run<T: Key>(keys: &[T], queries: &[Option<T>]) -> UInt32Array {
        queries
            .iter()
            .map(|q| q.and_then(|v| approx_binary_search(v, keys)).map(|i| i as u32))
            .collect()
    }
    with_key_slices(keys, queries, run, run, run)
}

/// Batched insertion points, then one loop that corrects each point and
/// appends the gather index.
pub(crate) fn search_sorted(queries: &KeyColumn, keys: &KeyColumn) -> Result<UInt32Array> {
    fn run<T: Key>(keys: &[T], queries: &[Option<T>]) -> UInt32Array {
        let points = insertion_points(keys, queries);
        let mut out = UInt32Builder::with_capacity(queries.len());
        for point in points {
            match point {
                Some(p) if p > 0 => out.append_value(p - 1),
                _ => out.append_null(),
            }
        }
        out.finish()
    }
    with_key_slices(keys, queries, run, run, run)
}

/// Batched insertion points, a batched correction pass producing `-1`
/// sentinels, and a second pass turning sentinels into the validity buffer.
pub(crate) fn search_sorted_two_pass(queries: &KeyColumn, keys: &KeyColumn) -> Result<UInt32Array> {
    fn run<T: Key>(keys: &[T], queries: &[Option<T>]) -> UInt32Array {
        let corrected: Vec<i64> = insertion_points(keys, queries)
            .into_iter()
            .map(|point| point.map_or(-1, |p| p as i64 - 1))
            .collect();
        let validity = NullBuffer::from(corrected.iter().map(|&i| i >= 0).collect::<Vec<bool>>());
        let values = ScalarBuffer::from(
            corrected
                .iter()
                .map(|&i| i.max(0) as u32)
                .collect::<Vec<u32>>(),
        );
        UInt32Array::new(values, Some(validity))
    }
    with_key_slices(keys, queries, run, run, run)
}

/// The production path: every step after the insertion-point search is an
/// Arrow kernel over the whole batch.
pub(crate) fn vectorized(queries: &KeyColumn, keys: &KeyColumn) -> Result<UInt32Array> {
    let points: UInt32Array = with_key_slices(
        keys,
        queries,
        |k, q| UInt32Array::from(insertion_points(k, q)),
        |k, q| UInt32Array::from(insertion_points(k, q)),
        |k, q| UInt32Array::from(insertion_points(k, q)),
    )?;
    let adjusted = sub(
        &cast(&points, &DataType::Int64)?,
        &Int64Array::new_scalar(1),
    )?;
    let below_first = eq(&adjusted, &Int64Array::new_scalar(-1))?;
    let positions = nullif(adjusted.as_ref(), &below_first)?;
    Ok(cast(positions.as_ref(), &DataType::UInt32)?
        .as_primitive::<UInt32Type>()
        .clone())
}

/// Sort the queries once and walk them against the keys with two pointers.
pub(crate) fn sort_merge(queries: &KeyColumn, keys: &KeyColumn) -> Result<UInt32Array> {
    fn run<T: Key>(keys: &[T], queries: &[Option<T>]) -> UInt32Array {
        let mut order: Vec<(usize, T)> = queries
            .iter()
            .enumerate()
            .filter_map(|(pos, q)| q.map(|v| (pos, v)))
            .collect();
        order.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut out: Vec<Option<u32>> = vec![None; queries.len()];
        let mut cursor = 0usize;
        for (pos, value) in order {
            while cursor < keys.len() && keys[cursor] <= value {
                cursor += 1;
            }
            out[pos] = correct(cursor).map(|i| i as u32);
        }
        UInt32Array::from(out)
    }
    with_key_slices(keys, queries, run, run, run)
}

/// Backward join of already sorted queries: each one takes the last key row
/// at or below it.
fn backward_join<T: Key>(keys: &[T], sorted: &[Option<T>]) -> UInt32Array {
    let mut joined = UInt32Builder::with_capacity(sorted.len());
    let mut cursor = 0usize;
    for value in sorted {
        match value {
            Some(v) => {
                while cursor < keys.len() && keys[cursor] <= *v {
                    cursor += 1;
                }
                joined.append_option(correct(cursor).map(|i| i as u32));
            }
            None => joined.append_null(),
        }
    }
    joined.finish()
}

/// As-of join: both sides are coerced to numbers (integers stay exact when
/// both sides are integral), queries are sorted, each sorted query is joined
/// backward to its key row, and the join column is put back into the
/// original query order.
pub(crate) fn as_of_join(queries: &dyn Array, keys: &dyn Array) -> Result<UInt32Array> {
    let (left, right) = KeyColumn::numeric_pair(queries, keys)?;
    if right.as_array().null_count() > 0 {
        return Err(ExecError::precondition("join key column contains empty cells"));
    }

    let order = sort_to_indices(
        left.as_array(),
        Some(SortOptions {
            descending: false,
            nulls_first: false,
        }),
        None,
    )?;
    let sorted = left.take(&order)?;
    let joined = with_key_slices(&right, &sorted, backward_join, backward_join, backward_join)?;

    // `order[k]` is the original row of sorted row `k`; invert it to restore.
    let mut inverse = vec![0u32; order.len()];
    for (sorted_row, original_row) in order.values().iter().enumerate() {
        inverse[*original_row as usize] = sorted_row as u32;
    }
    let restored = take(&joined, &UInt32Array::from(inverse), None)?;
    Ok(restored.as_primitive::<UInt32Type>().clone())
}

/// One search for a batch whose queries are all the same key.
pub(crate) fn broadcast(queries: &KeyColumn, keys: &KeyColumn) -> Result<UInt32Array> {
    fn first<T: Key>(keys: &[T], queries: &[Option<T>]) -> Option<usize> {
        queries[0].and_then(|v| approx_binary_search(v, keys))
    }
    let len = queries.len();
    if len == 0 {
        return Ok(UInt32Array::from(Vec::<u32>::new()));
    }
    if !queries.is_constant() {
        return Err(ExecError::precondition(
            "broadcast lookup needs a single repeated, non-empty query value",
        ));
    }
    let position = with_key_slices(keys, &queries.slice(0, 1), first, first, first)?;
    Ok(match position {
        Some(p) => UInt32Array::from(vec![p as u32; len]),
        None => UInt32Array::new_null(len),
    })
}

/// Exact-only variant of a set of approximate positions: rows whose key is not
/// equal to the query become null.
pub(crate) fn retain_exact(
    positions: &UInt32Array,
    queries: &KeyColumn,
    keys: &KeyColumn,
) -> Result<UInt32Array> {
    let found = take(keys.as_array(), positions, None)?;
    let exact = eq(&queries.as_array(), &found)?;
    let retained = nullif(positions, &not(&exact)?)?;
    Ok(retained.as_primitive::<UInt32Type>().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Float64Array, StringArray};

    fn keys() -> KeyColumn {
        KeyColumn::search_range(&Int64Array::from(vec![1, 3, 5, 7])).unwrap()
    }

    fn positions(arr: &UInt32Array) -> Vec<Option<u32>> {
        arr.iter().collect()
    }

    #[test]
    fn scalar_search_edges() {
        let k = [1, 3, 5, 7];
        assert_eq!(approx_binary_search(4, &k), Some(1));
        assert_eq!(approx_binary_search(0, &k), None);
        assert_eq!(approx_binary_search(7, &k), Some(3));
        assert_eq!(approx_binary_search(100, &k), Some(3));
        assert_eq!(approx_binary_search(1, &k), Some(0));
    }

    #[test]
    fn duplicate_keys_resolve_to_the_last_copy() {
        let k = [1, 2, 2, 2, 5];
        assert_eq!(approx_binary_search(2, &k), Some(3));
        assert_eq!(approx_binary_search(3, &k), Some(3));
        assert_eq!(approx_binary_search(1, &k), Some(0));
    }

    fn all_positions(q: &KeyColumn, keys: &KeyColumn) -> Vec<Vec<Option<u32>>> {
        vec![
            positions(&binary_search(q, keys).unwrap()),
            positions(&search_sorted(q, keys).unwrap()),
            positions(&search_sorted_two_pass(q, keys).unwrap()),
            positions(&vectorized(q, keys).unwrap()),
            positions(&sort_merge(q, keys).unwrap()),
            positions(&as_of_join(q.as_array(), keys.as_array()).unwrap()),
        ]
    }

    #[test]
    fn negative_zero_matches_zero_everywhere() {
        let keys = KeyColumn::search_range(&Float64Array::from(vec![0.0, 1.0, 2.0])).unwrap();
        let q = keys.queries_like(&Float64Array::from(vec![-0.0])).unwrap();
        for found in all_positions(&q, &keys) {
            assert_eq!(found, vec![Some(0)]);
        }
        let approx = vectorized(&q, &keys).unwrap();
        assert_eq!(positions(&retain_exact(&approx, &q, &keys).unwrap()), vec![Some(0)]);

        let negative_keys =
            KeyColumn::search_range(&Float64Array::from(vec![-0.0, 1.0])).unwrap();
        let zero = negative_keys.queries_like(&Float64Array::from(vec![0.0])).unwrap();
        for found in all_positions(&zero, &negative_keys) {
            assert_eq!(found, vec![Some(0)]);
        }
    }

    #[test]
    fn integers_past_f64_precision_stay_distinct() {
        let base = 1i64 << 53;
        let keys = KeyColumn::search_range(&Int64Array::from(vec![base, base + 1, base + 2])).unwrap();
        let q = keys.queries_like(&Int64Array::from(vec![base + 1, base - 1])).unwrap();
        for found in all_positions(&q, &keys) {
            assert_eq!(found, vec![Some(1), None]);
        }

        let top = KeyColumn::search_range(&Int64Array::from(vec![i64::MAX - 1, i64::MAX])).unwrap();
        let q = top.queries_like(&Int64Array::from(vec![i64::MAX - 1, i64::MAX])).unwrap();
        for found in all_positions(&q, &top) {
            assert_eq!(found, vec![Some(0), Some(1)]);
        }
    }

    #[test]
    fn every_batched_implementation_matches_the_examples() {
        let keys = keys();
        let q = keys
            .queries_like(&Int64Array::from(vec![Some(4), Some(0), Some(7), None, Some(9)]))
            .unwrap();
        let expected = vec![Some(1), None, Some(3), None, Some(3)];
        assert_eq!(positions(&binary_search(&q, &keys).unwrap()), expected);
        assert_eq!(positions(&search_sorted(&q, &keys).unwrap()), expected);
        assert_eq!(positions(&search_sorted_two_pass(&q, &keys).unwrap()), expected);
        assert_eq!(positions(&vectorized(&q, &keys).unwrap()), expected);
        assert_eq!(positions(&sort_merge(&q, &keys).unwrap()), expected);
        assert_eq!(
            positions(&as_of_join(q.as_array(), keys.as_array()).unwrap()),
            expected
        );
    }

    #[test]
    fn vectorized_handles_text_keys() {
        let keys = KeyColumn::search_range(&StringArray::from(vec!["apple", "kiwi", "pear"])).unwrap();
        let q = keys
            .queries_like(&StringArray::from(vec!["banana", "aardvark", "pear", "zebra"]))
            .unwrap();
        assert_eq!(
            positions(&vectorized(&q, &keys).unwrap()),
            vec![Some(0), None, Some(2), Some(2)]
        );
    }

    #[test]
    fn broadcast_requires_constant_queries() {
        let keys = keys();
        let q = keys.queries_like(&Int64Array::from(vec![6, 6, 6])).unwrap();
        assert_eq!(positions(&broadcast(&q, &keys).unwrap()), vec![Some(2); 3]);

        let low = keys.queries_like(&Int64Array::from(vec![0, 0])).unwrap();
        assert_eq!(positions(&broadcast(&low, &keys).unwrap()), vec![None, None]);

        let mixed = keys.queries_like(&Int64Array::from(vec![1, 2])).unwrap();
        assert!(matches!(
            broadcast(&mixed, &keys),
            Err(ExecError::Precondition(_))
        ));
    }

    #[test]
    fn as_of_join_rejects_non_numeric_text() {
        let keys = StringArray::from(vec!["a", "b"]);
        let q = StringArray::from(vec!["a"]);
        assert!(matches!(
            as_of_join(&q, &keys),
            Err(ExecError::TypeMismatch(_))
        ));
    }

    #[test]
    fn exact_filter_drops_approximate_hits() {
        let keys = keys();
        let q = keys.queries_like(&Int64Array::from(vec![3, 4, 0])).unwrap();
        let approx = vectorized(&q, &keys).unwrap();
        let exact = retain_exact(&approx, &q, &keys).unwrap();
        assert_eq!(positions(&exact), vec![Some(1), None, None]);
    }
}

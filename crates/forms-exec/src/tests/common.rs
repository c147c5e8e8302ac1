use arrow_array::UInt32Array;

/// Reference match by linear scan: the last row whose key is at or below `v`.
pub(crate) fn expected_match<T: PartialOrd>(keys: &[T], v: &T) -> Option<u32> {
    keys.iter().rposition(|k| k <= v).map(|i| i as u32)
}

pub(crate) fn positions(arr: &UInt32Array) -> Vec<Option<u32>> {
    arr.iter().collect()
}

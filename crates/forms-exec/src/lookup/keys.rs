//! Key coercion and the batched sorted-search primitive shared by the lookup
//! implementations.
//!
//! Search and query columns are brought to one of three comparable lanes:
//! integer (and boolean) columns compare as `Int64` when both sides are
//! integral, any other numeric mix compares as `Float64`, and every string
//! type becomes `Utf8`. NaN queries are turned into nulls so that every
//! implementation treats them as misses, and `-0.0` is folded into `0.0` so
//! that the Arrow comparison kernels agree with `PartialOrd`.

use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type};
use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, UInt32Array};
use arrow_cast::cast::{CastOptions, cast, cast_with_options};
use arrow_schema::DataType;
use arrow_select::take::take;
use rayon::prelude::*;

use crate::error::{ExecError, Result};

/// Query batches at or above this size are searched on the rayon pool.
const PAR_SEARCH_THRESHOLD: usize = 16 * 1024;

/// Values comparable with `PartialOrd` and cheap to pass around by value.
pub(crate) trait Key: PartialOrd + Copy + Send + Sync {}
impl<T: PartialOrd + Copy + Send + Sync> Key for T {}

#[derive(Debug, Clone)]
pub(crate) enum KeyColumn {
    Int(Int64Array),
    Number(Float64Array),
    Text(StringArray),
}

/// Types that convert to `Int64` without loss. `UInt64` can overflow and so
/// compares as a float.
fn is_integral(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::Boolean
            | DataType::Null
    )
}

fn lane_of(data_type: &DataType) -> Option<DataType> {
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Some(DataType::Utf8),
        t if is_integral(t) => Some(DataType::Int64),
        t if t.is_numeric() => Some(DataType::Float64),
        _ => None,
    }
}

/// NaN becomes null, `-0.0` becomes `0.0`.
fn normalize_floats(numbers: &Float64Array) -> Float64Array {
    numbers.unary_opt::<_, Float64Type>(|v| match v {
        v if v.is_nan() => None,
        v if v == 0.0 => Some(0.0),
        v => Some(v),
    })
}

impl KeyColumn {
    /// Coerce a search column. Nulls are rejected: a sorted key column has no
    /// position for them.
    pub fn search_range(array: &dyn Array) -> Result<Self> {
        if array.is_empty() {
            return Err(ExecError::precondition("search range is empty"));
        }
        if u32::try_from(array.len()).is_err() {
            return Err(ExecError::precondition(format!(
                "search range of {} rows exceeds the u32 row space",
                array.len()
            )));
        }
        if array.logical_null_count() > 0 {
            return Err(ExecError::precondition("search range contains empty cells"));
        }
        let lane = lane_of(array.data_type()).ok_or_else(|| {
            ExecError::type_mismatch(format!(
                "search range of type {} is not comparable",
                array.data_type()
            ))
        })?;
        Self::from_lane(array, &lane)
    }

    /// Search keys and query values brought to one common lane. Integer keys
    /// are widened to `Float64` when the queries are fractional.
    pub fn pair(values: &dyn Array, search_range: &dyn Array) -> Result<(Self, Self)> {
        let keys = Self::search_range(search_range)?;
        let queries = keys.queries_like(values)?;
        let keys = match (keys, &queries) {
            (KeyColumn::Int(k), KeyColumn::Number(_)) => Self::from_lane(&k, &DataType::Float64)?,
            (keys, _) => keys,
        };
        Ok((keys, queries))
    }

    /// Coerce query values into a lane comparable with `self`. Against
    /// integer keys, fractional queries stay `Float64`; use [`Self::pair`] to
    /// widen the keys to match.
    pub fn queries_like(&self, array: &dyn Array) -> Result<Self> {
        let source = array.data_type();
        let target = match (self, lane_of(source)) {
            (_, _) if source.is_null() => self.lane(),
            (KeyColumn::Text(_), Some(DataType::Utf8)) => DataType::Utf8,
            (KeyColumn::Int(_), Some(DataType::Int64)) => DataType::Int64,
            (KeyColumn::Int(_) | KeyColumn::Number(_), Some(DataType::Float64 | DataType::Int64)) => {
                DataType::Float64
            }
            _ => {
                return Err(ExecError::type_mismatch(format!(
                    "cannot compare {source} values against {} keys",
                    self.lane()
                )));
            }
        };
        Self::from_lane(array, &target)
    }

    fn lane(&self) -> DataType {
        match self {
            KeyColumn::Int(_) => DataType::Int64,
            KeyColumn::Number(_) => DataType::Float64,
            KeyColumn::Text(_) => DataType::Utf8,
        }
    }

    fn from_lane(array: &dyn Array, lane: &DataType) -> Result<Self> {
        let coerced = cast(array, lane)?;
        Ok(match lane {
            DataType::Utf8 => KeyColumn::Text(coerced.as_string::<i32>().clone()),
            DataType::Int64 => KeyColumn::Int(coerced.as_primitive::<Int64Type>().clone()),
            _ => KeyColumn::Number(normalize_floats(coerced.as_primitive::<Float64Type>())),
        })
    }

    /// Strict numeric coercion: text that does not parse is an error rather
    /// than a null.
    pub fn numeric(array: &dyn Array) -> Result<Float64Array> {
        let coerced = strict_cast(array, &DataType::Float64)?;
        Ok(normalize_floats(coerced.as_primitive::<Float64Type>()))
    }

    /// Strict numeric coercion of both join sides, keeping integers exact when
    /// both sides are integral.
    pub fn numeric_pair(queries: &dyn Array, keys: &dyn Array) -> Result<(Self, Self)> {
        if is_integral(queries.data_type()) && is_integral(keys.data_type()) {
            let as_int = |a: &dyn Array| -> Result<Self> {
                let coerced = strict_cast(a, &DataType::Int64)?;
                Ok(KeyColumn::Int(coerced.as_primitive::<Int64Type>().clone()))
            };
            return Ok((as_int(queries)?, as_int(keys)?));
        }
        Ok((
            KeyColumn::Number(Self::numeric(queries)?),
            KeyColumn::Number(Self::numeric(keys)?),
        ))
    }

    pub fn len(&self) -> usize {
        self.as_array().len()
    }

    pub fn as_array(&self) -> &dyn Array {
        match self {
            KeyColumn::Int(a) => a,
            KeyColumn::Number(a) => a,
            KeyColumn::Text(a) => a,
        }
    }

    pub fn to_array_ref(&self) -> ArrayRef {
        match self {
            KeyColumn::Int(a) => Arc::new(a.clone()),
            KeyColumn::Number(a) => Arc::new(a.clone()),
            KeyColumn::Text(a) => Arc::new(a.clone()),
        }
    }

    pub fn slice(&self, offset: usize, len: usize) -> Self {
        match self {
            KeyColumn::Int(a) => KeyColumn::Int(a.slice(offset, len)),
            KeyColumn::Number(a) => KeyColumn::Number(a.slice(offset, len)),
            KeyColumn::Text(a) => KeyColumn::Text(a.slice(offset, len)),
        }
    }

    pub fn take(&self, indices: &UInt32Array) -> Result<Self> {
        let taken = take(self.as_array(), indices, None)?;
        Ok(match self {
            KeyColumn::Int(_) => KeyColumn::Int(taken.as_primitive::<Int64Type>().clone()),
            KeyColumn::Number(_) => KeyColumn::Number(taken.as_primitive::<Float64Type>().clone()),
            KeyColumn::Text(_) => KeyColumn::Text(taken.as_string::<i32>().clone()),
        })
    }

    /// True when every query is the same non-null key.
    pub fn is_constant(&self) -> bool {
        if self.len() == 0 || self.as_array().null_count() > 0 {
            return false;
        }
        match self {
            KeyColumn::Int(a) => {
                let first = a.value(0);
                a.values().iter().all(|v| *v == first)
            }
            KeyColumn::Number(a) => {
                let first = a.value(0);
                a.values().iter().all(|v| *v == first)
            }
            KeyColumn::Text(a) => {
                let first = a.value(0);
                a.iter().all(|v| v == Some(first))
            }
        }
    }
}

fn strict_cast(array: &dyn Array, to: &DataType) -> Result<ArrayRef> {
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(array, to, &options).map_err(|e| {
        ExecError::type_mismatch(format!(
            "cannot coerce {} to a numeric join key: {e}",
            array.data_type()
        ))
    })
}

/// Run `number`, `integer` or `text` on slice views of a key column and its
/// queries, whichever lane they share.
pub(crate) fn with_key_slices<'a, R>(
    keys: &'a KeyColumn,
    queries: &'a KeyColumn,
    number: impl FnOnce(&[f64], &[Option<f64>]) -> R,
    integer: impl FnOnce(&[i64], &[Option<i64>]) -> R,
    text: impl FnOnce(&[&'a str], &[Option<&'a str>]) -> R,
) -> Result<R> {
    match (keys, queries) {
        (KeyColumn::Number(k), KeyColumn::Number(q)) => {
            let q: Vec<Option<f64>> = q.iter().collect();
            Ok(number(&k.values()[..], &q[..]))
        }
        (KeyColumn::Int(k), KeyColumn::Int(q)) => {
            let q: Vec<Option<i64>> = q.iter().collect();
            Ok(integer(&k.values()[..], &q[..]))
        }
        (KeyColumn::Text(k), KeyColumn::Text(q)) => {
            let k: Vec<&str> = k.iter().map(Option::unwrap_or_default).collect();
            let q: Vec<Option<&str>> = q.iter().collect();
            Ok(text(&k[..], &q[..]))
        }
        _ => Err(ExecError::type_mismatch(
            "query values and search range are in different key lanes",
        )),
    }
}

/// Right insertion point of `value`: the first index `i` with
/// `keys[i] > value`, so every key equal to `value` lies before it.
#[inline]
pub(crate) fn insertion_point<T: Key>(keys: &[T], value: T) -> usize {
    keys.partition_point(|k| *k <= value)
}

/// Batched sorted search: right insertion point of every query, `None`
/// for null queries. Large batches fan out over the rayon pool.
pub(crate) fn insertion_points<T: Key>(keys: &[T], queries: &[Option<T>]) -> Vec<Option<u32>> {
    let point = |q: &Option<T>| q.map(|v| insertion_point(keys, v) as u32);
    if queries.len() >= PAR_SEARCH_THRESHOLD {
        queries.par_iter().map(point).collect()
    } else {
        queries.iter().map(point).collect()
    }
}

/// Turn a right insertion point into a match position: the last key at or
/// below the query, `None` when the query is below the first key.
#[inline]
pub(crate) fn correct(point: usize) -> Option<usize> {
    point.checked_sub(1)
}

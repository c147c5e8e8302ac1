//! `LOOKUP` and `VLOOKUP` function nodes.
//!
//! Every argument of a lookup node is one of three things: a literal, a
//! reference into the backing table, or a nested formula that is evaluated
//! first. [`LookupArg`] names which, and the argument readers below match on
//! it once.

use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, UInt32Array,
    new_null_array,
};
use arrow_schema::DataType;
use arrow_select::concat::concat;
use arrow_select::take::take;
use forms_common::{Axis, Function, LiteralValue, unquote};

use super::node::{ExecNodeKind, ExecutionContext, ExecutionNode, FunctionExecNode, RefExecNode};
use super::plan_executor::{EvalOptions, evaluate_node};
use crate::error::{ExecError, Result};
use crate::lookup::{MatchMode, lookup_with, vlookup_with};
use crate::partition::lookup_partitioned;

#[derive(Debug, Clone, Copy)]
pub enum LookupArg<'a> {
    Literal(&'a LiteralValue),
    Reference {
        node: &'a RefExecNode,
        ctx: Option<&'a ExecutionContext>,
    },
    NestedFormula(&'a ExecutionNode),
}

impl<'a> From<&'a ExecutionNode> for LookupArg<'a> {
    fn from(node: &'a ExecutionNode) -> Self {
        match &node.kind {
            ExecNodeKind::Literal(value) => LookupArg::Literal(value),
            ExecNodeKind::Ref(r) => LookupArg::Reference {
                node: r,
                ctx: node.exec_context.as_ref(),
            },
            ExecNodeKind::Function(_) => LookupArg::NestedFormula(node),
        }
    }
}

/// `LOOKUP(value, search[, result])`. With two arguments the first column of
/// `search` holds the keys and its last column the results.
pub fn execute_lookup(node: &ExecutionNode, opts: &EvalOptions<'_>) -> Result<ArrayRef> {
    let (f, rows) = function_parts(node, Function::Lookup)?;
    let (value_arg, search_arg, result_arg) = match f.children.as_slice() {
        [v, s] => (v, s, None),
        [v, s, r] => (v, s, Some(r)),
        other => return Err(arity_error(Function::Lookup, other.len())),
    };
    let values = values_column(value_arg.into(), rows, node.out_ref_axis, opts)?;
    let search = range_columns(search_arg.into(), opts)?;
    let keys = first_column(&search)?;
    let result = match result_arg {
        None => search
            .last()
            .cloned()
            .ok_or_else(|| ExecError::precondition("LOOKUP search range is empty"))?,
        Some(r) => first_column(&range_columns(r.into(), opts)?)?,
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        rows,
        keys = keys.len(),
        key_partitions = opts.key_partitions,
        "LOOKUP"
    );
    if opts.key_partitions > 1 {
        lookup_partitioned(
            values.as_ref(),
            keys.as_ref(),
            result.as_ref(),
            opts.key_partitions,
            opts.scheme,
            opts.strategy,
            opts.pool,
        )
    } else {
        lookup_with(opts.strategy, values.as_ref(), keys.as_ref(), result.as_ref())
    }
}

/// `VLOOKUP(value, table, col_index[, approximate])`. A false fourth argument
/// asks for exact matches only.
pub fn execute_vlookup(node: &ExecutionNode, opts: &EvalOptions<'_>) -> Result<ArrayRef> {
    let (f, rows) = function_parts(node, Function::Vlookup)?;
    let (value_arg, table_arg, col_arg, approx_arg) = match f.children.as_slice() {
        [v, t, c] => (v, t, c, None),
        [v, t, c, a] => (v, t, c, Some(a)),
        other => return Err(arity_error(Function::Vlookup, other.len())),
    };
    let mode = match approx_arg.map(LookupArg::from) {
        None => MatchMode::Approximate,
        Some(LookupArg::Literal(flag)) if flag.is_truthy() => MatchMode::Approximate,
        Some(LookupArg::Literal(_)) => MatchMode::Exact,
        Some(_) => {
            return Err(ExecError::Unsupported(
                "VLOOKUP match mode computed from a range".to_string(),
            ));
        }
    };
    let values = values_column(value_arg.into(), rows, node.out_ref_axis, opts)?;
    let table = range_columns(table_arg.into(), opts)?;
    let col_indexes = values_column(col_arg.into(), rows, node.out_ref_axis, opts)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(rows, columns = table.len(), ?mode, "VLOOKUP");
    vlookup_with(
        opts.strategy,
        mode,
        values.as_ref(),
        &table,
        col_indexes.as_ref(),
    )
}

fn function_parts(node: &ExecutionNode, expected: Function) -> Result<(&FunctionExecNode, usize)> {
    match &node.kind {
        ExecNodeKind::Function(f) if f.function == expected => {
            let rows = node
                .exec_context
                .map_or_else(|| f.reference.extent(node.out_ref_axis), |c| c.len());
            Ok((f, rows))
        }
        _ => Err(ExecError::precondition(format!("not a {expected} node"))),
    }
}

fn arity_error(function: Function, actual: usize) -> ExecError {
    ExecError::Arity {
        function,
        expected: function.arity(),
        actual,
    }
}

/// One value per formula row: literals and single cells are broadcast, text
/// loses its formula quotes.
fn values_column(
    arg: LookupArg<'_>,
    rows: usize,
    axis: Axis,
    opts: &EvalOptions<'_>,
) -> Result<ArrayRef> {
    let column = match arg {
        LookupArg::Literal(value) => return Ok(literal_array(value, rows)),
        LookupArg::Reference { node, ctx } => leading_line(node.read(ctx)?, axis)?,
        LookupArg::NestedFormula(nested) => evaluate_node(nested, opts)?,
    };
    let column = unquote_text(column);
    match column.len() {
        n if n == rows => Ok(column),
        1 => Ok(take(
            column.as_ref(),
            &UInt32Array::from(vec![0u32; rows]),
            None,
        )?),
        n => Err(ExecError::precondition(format!(
            "argument has {n} values for {rows} formula rows"
        ))),
    }
}

/// Every column an argument covers, for search ranges and tables.
fn range_columns(arg: LookupArg<'_>, opts: &EvalOptions<'_>) -> Result<Vec<ArrayRef>> {
    match arg {
        LookupArg::Literal(value) => Ok(vec![literal_array(value, 1)]),
        LookupArg::Reference { node, ctx } => node.read(ctx),
        LookupArg::NestedFormula(nested) => Ok(vec![evaluate_node(nested, opts)?]),
    }
}

fn first_column(columns: &[ArrayRef]) -> Result<ArrayRef> {
    columns
        .first()
        .cloned()
        .ok_or_else(|| ExecError::precondition("range has no columns"))
}

/// The first column of a row-wise range, or the first row of a column-wise
/// one laid out as a column.
fn leading_line(columns: Vec<ArrayRef>, axis: Axis) -> Result<ArrayRef> {
    match axis {
        Axis::AlongRow => first_column(&columns),
        Axis::AlongColumn => {
            let heads: Vec<ArrayRef> = columns.iter().map(|c| c.slice(0, 1)).collect();
            let refs: Vec<&dyn Array> = heads.iter().map(|c| c.as_ref()).collect();
            if refs.is_empty() {
                return Err(ExecError::precondition("range has no columns"));
            }
            Ok(concat(&refs)?)
        }
    }
}

fn unquote_text(column: ArrayRef) -> ArrayRef {
    match column.data_type() {
        DataType::Utf8 => {
            let text = column.as_string::<i32>();
            Arc::new(text.iter().map(|s| s.map(unquote)).collect::<StringArray>())
        }
        _ => column,
    }
}

/// `value` repeated `len` times, in the narrowest matching Arrow type.
pub(crate) fn literal_array(value: &LiteralValue, len: usize) -> ArrayRef {
    match value {
        LiteralValue::Int(i) => Arc::new(Int64Array::from(vec![*i; len])),
        LiteralValue::Number(n) => Arc::new(Float64Array::from(vec![*n; len])),
        LiteralValue::Text(s) => Arc::new(StringArray::from(vec![unquote(s); len])),
        LiteralValue::Boolean(b) => Arc::new(BooleanArray::from(vec![*b; len])),
        LiteralValue::Empty => new_null_array(&DataType::Null, len),
    }
}

//! Physical execution trees.
//!
//! An [`ExecutionNode`] mirrors one logical plan node. Trees are translated
//! once, then deep-cloned per partition; each clone receives its own
//! [`ExecutionContext`] and [`PartitionMetadata`] and shares only the
//! read-only backing table.

use std::sync::Arc;

use arrow_array::ArrayRef;
use forms_common::{Axis, FrRfOptimization, Function, LiteralValue, RefType, Reference};

use crate::error::{ExecError, Result};
use crate::planner::{LogicalPlan, PlanNodeId, PlanNodeKind};
use crate::table::Table;

/// Half-open, partition-local index range along `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub start: usize,
    pub end: usize,
    pub axis: Axis,
}

impl ExecutionContext {
    pub fn new(start: usize, end: usize, axis: Axis) -> Self {
        Self { start, end, axis }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which partition a subtree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub cores: usize,
    pub subtree_index: usize,
}

impl Default for PartitionMetadata {
    fn default() -> Self {
        Self {
            cores: 1,
            subtree_index: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionNode {
    pub out_ref_type: RefType,
    pub out_ref_axis: Axis,
    pub exec_context: Option<ExecutionContext>,
    pub metadata: PartitionMetadata,
    pub kind: ExecNodeKind,
}

#[derive(Debug, Clone)]
pub enum ExecNodeKind {
    Function(FunctionExecNode),
    Ref(RefExecNode),
    Literal(LiteralValue),
}

#[derive(Debug, Clone)]
pub struct FunctionExecNode {
    pub function: Function,
    /// Range the formula writes to.
    pub reference: Reference,
    pub fr_rf_optimization: FrRfOptimization,
    pub children: Vec<ExecutionNode>,
}

#[derive(Debug, Clone)]
pub struct RefExecNode {
    pub reference: Reference,
    pub table: Arc<dyn Table>,
    /// Position of `table`'s first row (column) in the table `reference`
    /// addresses, once the node reads through a partition-local view.
    pub row_offset: Option<usize>,
    pub col_offset: Option<usize>,
}

impl RefExecNode {
    /// The cells this node covers for the formulas in `ctx`, in the
    /// coordinates of the full table.
    pub fn window(&self, ctx: Option<&ExecutionContext>) -> Reference {
        match ctx {
            Some(ctx) if !ctx.is_empty() => self.reference.window(ctx.start, ctx.end, ctx.axis),
            _ => self.reference,
        }
    }

    /// Columns of the window, read through this node's table.
    pub fn read(&self, ctx: Option<&ExecutionContext>) -> Result<Vec<ArrayRef>> {
        let window = self.window(ctx);
        let (dr, dc) = (self.row_offset.unwrap_or(0), self.col_offset.unwrap_or(0));
        if window.row() < dr || window.col() < dc {
            return Err(ExecError::precondition(format!(
                "{window} starts before the view at row {dr}, column {dc}"
            )));
        }
        let local = Reference::new(
            window.row() - dr,
            window.col() - dc,
            window.last_row() - dr,
            window.last_col() - dc,
            RefType::FF,
        )?;
        self.table.read_range(&local)
    }

    /// Narrow the backing table to the rows the window for `ctx` touches.
    pub fn localize(&mut self, ctx: &ExecutionContext) -> Result<()> {
        if ctx.axis != Axis::AlongRow || ctx.is_empty() || self.row_offset.is_some() {
            return Ok(());
        }
        let window = self.window(Some(ctx));
        self.table = self.table.slice_rows(window.row(), window.height())?;
        self.row_offset = Some(window.row());
        self.col_offset = Some(0);
        Ok(())
    }
}

impl ExecutionNode {
    fn new(out_ref_type: RefType, out_ref_axis: Axis, kind: ExecNodeKind) -> Self {
        Self {
            out_ref_type,
            out_ref_axis,
            exec_context: None,
            metadata: PartitionMetadata::default(),
            kind,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionExecNode> {
        match &self.kind {
            ExecNodeKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_ref_node(&self) -> Option<&RefExecNode> {
        match &self.kind {
            ExecNodeKind::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn children(&self) -> &[ExecutionNode] {
        match &self.kind {
            ExecNodeKind::Function(f) => &f.children,
            ExecNodeKind::Ref(_) | ExecNodeKind::Literal(_) => &[],
        }
    }

    /// Deep copy for one partition. Ref nodes get a fresh view of their table.
    pub fn clone_for_partition(&self) -> ExecutionNode {
        let kind = match &self.kind {
            ExecNodeKind::Function(f) => ExecNodeKind::Function(FunctionExecNode {
                function: f.function,
                reference: f.reference,
                fr_rf_optimization: f.fr_rf_optimization,
                children: f.children.iter().map(Self::clone_for_partition).collect(),
            }),
            ExecNodeKind::Ref(r) => ExecNodeKind::Ref(RefExecNode {
                reference: r.reference,
                table: r.table.view_for_execution(),
                row_offset: r.row_offset,
                col_offset: r.col_offset,
            }),
            ExecNodeKind::Literal(v) => ExecNodeKind::Literal(v.clone()),
        };
        ExecutionNode {
            out_ref_type: self.out_ref_type,
            out_ref_axis: self.out_ref_axis,
            exec_context: self.exec_context,
            metadata: self.metadata,
            kind,
        }
    }

    pub fn propagate_context(&mut self, ctx: ExecutionContext) {
        self.exec_context = Some(ctx);
        if let ExecNodeKind::Function(f) = &mut self.kind {
            for child in &mut f.children {
                child.propagate_context(ctx);
            }
        }
    }

    pub fn propagate_metadata(&mut self, cores: usize, subtree_index: usize) {
        self.metadata = PartitionMetadata {
            cores,
            subtree_index,
        };
        if let ExecNodeKind::Function(f) = &mut self.kind {
            for child in &mut f.children {
                child.propagate_metadata(cores, subtree_index);
            }
        }
    }

    /// Ref leaves under this node, depth first, left to right.
    pub fn collect_leaf_references(&self) -> Vec<&ExecutionNode> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a ExecutionNode>) {
        match &self.kind {
            ExecNodeKind::Ref(_) => out.push(self),
            ExecNodeKind::Function(f) => f.children.iter().for_each(|c| c.collect_into(out)),
            ExecNodeKind::Literal(_) => {}
        }
    }

    /// Visit every Ref leaf mutably, in the same order as
    /// [`collect_leaf_references`](Self::collect_leaf_references). Stops at the
    /// first error.
    pub fn for_each_leaf_reference_mut<F>(&mut self, f: &mut F) -> Result<()>
    where
        F: FnMut(&mut ExecutionNode) -> Result<()>,
    {
        if let ExecNodeKind::Function(func) = &mut self.kind {
            for child in &mut func.children {
                child.for_each_leaf_reference_mut(f)?;
            }
            return Ok(());
        }
        if matches!(self.kind, ExecNodeKind::Ref(_)) {
            f(self)
        } else {
            Ok(())
        }
    }
}

/// Build the execution tree for `plan`, with every Ref leaf reading `table`.
pub fn translate(plan: &LogicalPlan, table: &Arc<dyn Table>) -> Result<ExecutionNode> {
    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!("translate", nodes = plan.len()).entered();
    translate_node(plan, plan.root(), table)
}

fn translate_node(
    plan: &LogicalPlan,
    id: PlanNodeId,
    table: &Arc<dyn Table>,
) -> Result<ExecutionNode> {
    let node = plan
        .node(id)
        .ok_or_else(|| ExecError::translation(format!("plan has no node {}", id.as_index())))?;
    let kind = match &node.kind {
        PlanNodeKind::Function {
            function,
            reference,
        } => {
            let arity = function.arity();
            if !arity.accepts(node.children().len()) {
                return Err(ExecError::Arity {
                    function: *function,
                    expected: arity,
                    actual: node.children().len(),
                });
            }
            let children = node
                .children()
                .iter()
                .map(|&c| translate_node(plan, c, table))
                .collect::<Result<Vec<_>>>()?;
            ExecNodeKind::Function(FunctionExecNode {
                function: *function,
                reference: *reference,
                fr_rf_optimization: node.fr_rf_optimization,
                children,
            })
        }
        _ if !node.children().is_empty() => {
            return Err(ExecError::translation(format!(
                "leaf node {} has {} children",
                id.as_index(),
                node.children().len()
            )));
        }
        PlanNodeKind::Ref { reference } => ExecNodeKind::Ref(RefExecNode {
            reference: *reference,
            table: Arc::clone(table),
            row_offset: None,
            col_offset: None,
        }),
        PlanNodeKind::Literal(value) => ExecNodeKind::Literal(value.clone()),
    };
    Ok(ExecutionNode::new(node.out_ref_type, node.out_ref_axis, kind))
}

/// A Ref node standing in for the materialized result of `completed`.
///
/// The context spans the whole of `table` along the subtree's axis and the
/// partition metadata is copied from the subtree. A subtree with a fixed
/// output range becomes an `FF` reference over the whole table; otherwise the
/// reference is the table's first row (column) with the subtree's ref type,
/// so that it slides with the formulas that read it.
pub fn materialize_intermediate_ref(
    table: Arc<dyn Table>,
    completed: &ExecutionNode,
) -> Result<ExecutionNode> {
    if completed.as_function().is_none() {
        return Err(ExecError::precondition(
            "only a function subtree can be materialized",
        ));
    }
    let (rows, cols) = (table.num_rows(), table.num_columns());
    if rows == 0 || cols == 0 {
        return Err(ExecError::precondition("materialized table is empty"));
    }
    let axis = completed.exec_context.map_or(Axis::default(), |c| c.axis);
    let ref_type = completed.out_ref_type;
    let reference = match (ref_type, axis) {
        (RefType::FF, _) => Reference::new(0, 0, rows - 1, cols - 1, RefType::FF)?,
        (_, Axis::AlongRow) => Reference::new(0, 0, 0, cols - 1, ref_type)?,
        (_, Axis::AlongColumn) => Reference::new(0, 0, rows - 1, 0, ref_type)?,
    };
    let extent = match axis {
        Axis::AlongRow => rows,
        Axis::AlongColumn => cols,
    };
    Ok(ExecutionNode {
        out_ref_type: completed.out_ref_type,
        out_ref_axis: completed.out_ref_axis,
        exec_context: Some(ExecutionContext::new(0, extent, axis)),
        metadata: completed.metadata,
        kind: ExecNodeKind::Ref(RefExecNode {
            reference,
            table,
            row_offset: None,
            col_offset: None,
        }),
    })
}

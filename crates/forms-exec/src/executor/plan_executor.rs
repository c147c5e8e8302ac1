use std::sync::Arc;

use arrow_array::{Array, ArrayRef};
use arrow_select::concat::concat;
use forms_common::{Function, RefType};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::lookup::{execute_lookup, execute_vlookup, literal_array};
use super::node::{
    ExecNodeKind, ExecutionContext, ExecutionNode, materialize_intermediate_ref, translate,
};
use crate::config::ExecConfig;
use crate::error::{ExecError, Result};
use crate::lookup::LookupStrategy;
use crate::partition::{PartitionScheme, contiguous_ranges};
use crate::planner::{LogicalPlan, PlanRewriter};
use crate::table::{ArrowTable, Table};

/// Per-run knobs threaded through node evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalOptions<'p> {
    pub strategy: Option<LookupStrategy>,
    /// Key-side blocks for a partitioned `LOOKUP`; 1 searches the whole
    /// column at once.
    pub key_partitions: usize,
    pub scheme: PartitionScheme,
    pub pool: Option<&'p ThreadPool>,
}

impl Default for EvalOptions<'_> {
    fn default() -> Self {
        Self {
            strategy: None,
            key_partitions: 1,
            scheme: PartitionScheme::Index,
            pool: None,
        }
    }
}

/// Evaluate one (partition-local) subtree, children before parents.
pub fn evaluate_node(node: &ExecutionNode, opts: &EvalOptions<'_>) -> Result<ArrayRef> {
    match &node.kind {
        ExecNodeKind::Function(f) => match f.function {
            Function::Lookup => execute_lookup(node, opts),
            Function::Vlookup => execute_vlookup(node, opts),
            other => Err(ExecError::Unsupported(other.to_string())),
        },
        ExecNodeKind::Ref(r) => r
            .read(node.exec_context.as_ref())?
            .into_iter()
            .next()
            .ok_or_else(|| ExecError::precondition("reference has no columns")),
        ExecNodeKind::Literal(value) => Ok(literal_array(
            value,
            node.exec_context.map_or(1, |c| c.len()),
        )),
    }
}

/// Runs formula plans: rewrite, translate, split the output range into
/// partitions, evaluate each partition's private tree clone, and stitch the
/// results back together in row order.
pub struct PlanExecutor {
    config: ExecConfig,
    rewriter: PlanRewriter,
    thread_pool: Option<Arc<ThreadPool>>,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("config", &self.config)
            .field("rewriter", &self.rewriter)
            .field("parallel", &self.thread_pool.is_some())
            .finish()
    }
}

impl PlanExecutor {
    pub fn new(config: ExecConfig) -> Self {
        let thread_pool = if config.enable_parallel {
            let mut builder = ThreadPoolBuilder::new();
            if let Some(max_threads) = config.max_threads {
                builder = builder.num_threads(max_threads);
            }

            match builder.build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(_e) => {
                    // Fall back to sequential evaluation if the pool cannot be built
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "thread pool unavailable, running sequentially");
                    None
                }
            }
        } else {
            None
        };
        Self {
            rewriter: PlanRewriter::new(&config),
            config,
            thread_pool,
        }
    }

    /// Share an existing pool between executors.
    pub fn with_thread_pool(config: ExecConfig, thread_pool: Arc<ThreadPool>) -> Self {
        Self {
            rewriter: PlanRewriter::new(&config),
            config,
            thread_pool: Some(thread_pool),
        }
    }

    pub fn with_rewriter(mut self, rewriter: PlanRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn thread_pool(&self) -> Option<&Arc<ThreadPool>> {
        self.thread_pool.as_ref()
    }

    /// Evaluate the formula `plan` against `table`. The result has one column
    /// holding one value per cell of the root's output range.
    pub fn execute_formula_plan(
        &self,
        table: Arc<dyn Table>,
        plan: LogicalPlan,
    ) -> Result<ArrowTable> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("execute_formula_plan", nodes = plan.len()).entered();
        let plan = self.rewriter.rewrite_plan(plan);
        let tree = translate(&plan, &table)?;
        let tree = self.stage_fixed_subtrees(tree)?;
        self.execute_tree(&tree)
    }

    /// Nested formulas with a fixed output range are computed over their own
    /// range first and replaced by a reference to the materialized result.
    fn stage_fixed_subtrees(&self, mut tree: ExecutionNode) -> Result<ExecutionNode> {
        if let ExecNodeKind::Function(f) = &mut tree.kind {
            let children = std::mem::take(&mut f.children);
            f.children = children
                .into_iter()
                .map(|child| {
                    let child = self.stage_fixed_subtrees(child)?;
                    if child.as_function().is_some() && child.out_ref_type == RefType::FF {
                        let table = self.execute_tree(&child)?.into_shared();
                        materialize_intermediate_ref(table, &child)
                    } else {
                        Ok(child)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(tree)
    }

    /// Partition-local clones of `tree`, each with its context, metadata and
    /// localized leaves in place.
    pub fn partition(&self, tree: &ExecutionNode) -> Result<Vec<ExecutionNode>> {
        let f = tree
            .as_function()
            .ok_or_else(|| ExecError::precondition("formula plan root must be a function"))?;
        let axis = tree.out_ref_axis;
        let extent = f.reference.extent(axis);
        let ranges = if self.partitions_keys(f.function) {
            vec![0..extent]
        } else {
            contiguous_ranges(extent, self.config.cores.max(1))
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(extent, partitions = ranges.len(), "partition formula range");

        let cores = ranges.len();
        ranges
            .into_iter()
            .enumerate()
            .map(|(subtree_index, range)| {
                let mut part = tree.clone_for_partition();
                part.propagate_context(ExecutionContext::new(range.start, range.end, axis));
                part.propagate_metadata(cores, subtree_index);
                part.for_each_leaf_reference_mut(&mut |leaf| {
                    let ctx = leaf.exec_context;
                    match (&mut leaf.kind, ctx) {
                        (ExecNodeKind::Ref(r), Some(ctx)) => r.localize(&ctx),
                        _ => Ok(()),
                    }
                })?;
                Ok(part)
            })
            .collect()
    }

    /// Value-scheme `LOOKUP`s split the search keys by query quantiles
    /// instead of splitting the formula rows.
    fn partitions_keys(&self, function: Function) -> bool {
        self.config.partition_scheme == PartitionScheme::Value
            && function == Function::Lookup
            && self.config.cores > 1
    }

    /// Evaluate a translated tree over its whole output range.
    pub fn execute_tree(&self, tree: &ExecutionNode) -> Result<ArrowTable> {
        let parts = self.partition(tree)?;
        let pool = self.thread_pool.as_deref();
        let key_side = tree
            .as_function()
            .is_some_and(|f| self.partitions_keys(f.function));
        let opts = EvalOptions {
            strategy: self.config.lookup_strategy,
            key_partitions: if key_side { self.config.cores } else { 1 },
            scheme: self.config.partition_scheme,
            pool,
        };

        let run = |part: &ExecutionNode| -> Result<ArrayRef> {
            #[cfg(feature = "tracing")]
            let _span = tracing::debug_span!(
                "partition",
                index = part.metadata.subtree_index,
                rows = part.exec_context.map_or(0, |c| c.len())
            )
            .entered();
            let out = evaluate_node(part, &opts)?;
            let expected = part.exec_context.map_or(out.len(), |c| c.len());
            if out.len() != expected {
                return Err(ExecError::precondition(format!(
                    "partition {} produced {} rows, expected {expected}",
                    part.metadata.subtree_index,
                    out.len()
                )));
            }
            Ok(out)
        };
        let results = match pool {
            Some(pool) if parts.len() > 1 => {
                pool.install(|| parts.par_iter().map(run).collect::<Result<Vec<_>>>())?
            }
            _ => parts.iter().map(run).collect::<Result<Vec<_>>>()?,
        };

        let column = match results.len() {
            1 => results.into_iter().next().ok_or_else(|| {
                ExecError::precondition("formula produced no partitions")
            })?,
            _ => {
                let refs: Vec<&dyn Array> = results.iter().map(|r| r.as_ref()).collect();
                concat(&refs)?
            }
        };
        ArrowTable::try_new(vec![column])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanNode;
    use arrow_array::cast::AsArray;
    use arrow_array::{Int64Array, StringArray};
    use forms_common::{Axis, Reference};

    const LETTERS: [&str; 10] = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];

    /// Keys in A, letters in B, queries in C.
    fn table() -> Arc<dyn Table> {
        ArrowTable::try_new(vec![
            Arc::new(Int64Array::from(vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19])),
            Arc::new(StringArray::from(LETTERS.to_vec())),
            Arc::new(Int64Array::from(vec![4, 0, 7, 20, 1, 12, 3, 19, 8, 100])),
        ])
        .unwrap()
        .into_shared()
    }

    fn expected() -> Vec<Option<&'static str>> {
        vec![
            Some("b"),
            None,
            Some("d"),
            Some("j"),
            Some("a"),
            Some("f"),
            Some("b"),
            Some("j"),
            Some("d"),
            Some("j"),
        ]
    }

    fn ff(col: usize) -> Reference {
        Reference::new(0, col, 9, col, RefType::FF).unwrap()
    }

    fn lookup_plan(values: LogicalPlan, result: LogicalPlan, out_col: usize) -> LogicalPlan {
        LogicalPlan::new(
            PlanNode::call(
                Function::Lookup,
                Reference::new(0, out_col, 9, out_col, RefType::RR).unwrap(),
            ),
            [values, LogicalPlan::leaf(PlanNode::range(ff(0))), result],
        )
    }

    fn queries() -> LogicalPlan {
        LogicalPlan::leaf(PlanNode::range(Reference::cell(0, 2, RefType::RR)))
    }

    fn letters() -> LogicalPlan {
        LogicalPlan::leaf(PlanNode::range(ff(1)))
    }

    fn column(out: &ArrowTable) -> Vec<Option<&str>> {
        out.column(0).unwrap().as_string::<i32>().iter().collect()
    }

    #[test]
    fn lookup_over_a_formula_range() {
        let exec = PlanExecutor::new(ExecConfig::sequential());
        let out = exec
            .execute_formula_plan(table(), lookup_plan(queries(), letters(), 3))
            .unwrap();
        assert_eq!(out.num_rows(), 10);
        assert_eq!(column(&out), expected());
    }

    #[test]
    fn partition_count_does_not_change_the_result() {
        for cores in [1, 2, 3, 4, 10, 16] {
            for scheme in [PartitionScheme::Index, PartitionScheme::Value] {
                let config = ExecConfig::default()
                    .with_cores(cores)
                    .with_partition_scheme(scheme);
                let exec = PlanExecutor::new(config);
                let out = exec
                    .execute_formula_plan(table(), lookup_plan(queries(), letters(), 3))
                    .unwrap();
                assert_eq!(column(&out), expected(), "{cores} cores, {scheme:?}");
            }
        }
    }

    #[test]
    fn executors_can_share_one_pool() {
        let pool = Arc::new(ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        let by_rows =
            PlanExecutor::with_thread_pool(ExecConfig::default().with_cores(4), pool.clone());
        let by_keys = PlanExecutor::with_thread_pool(
            ExecConfig::default()
                .with_cores(3)
                .with_partition_scheme(PartitionScheme::Value),
            pool.clone(),
        );
        for exec in [&by_rows, &by_keys] {
            assert!(Arc::ptr_eq(exec.thread_pool().unwrap(), &pool));
            let out = exec
                .execute_formula_plan(table(), lookup_plan(queries(), letters(), 3))
                .unwrap();
            assert_eq!(column(&out), expected());
        }
    }

    #[test]
    fn partitions_carry_their_own_context_and_metadata() {
        let exec = PlanExecutor::new(ExecConfig::sequential().with_cores(4));
        let tree = translate(&lookup_plan(queries(), letters(), 3), &table()).unwrap();
        let parts = exec.partition(&tree).unwrap();
        let bounds: Vec<(usize, usize)> = parts
            .iter()
            .map(|p| {
                let c = p.exec_context.unwrap();
                (c.start, c.end)
            })
            .collect();
        assert_eq!(bounds, vec![(0, 2), (2, 5), (5, 7), (7, 10)]);
        for (idx, part) in parts.iter().enumerate() {
            assert_eq!(part.metadata.cores, 4);
            assert_eq!(part.metadata.subtree_index, idx);
            for leaf in part.collect_leaf_references() {
                assert_eq!(leaf.exec_context, part.exec_context);
                assert_eq!(leaf.metadata, part.metadata);
            }
        }
        // The original tree is untouched.
        assert!(tree.exec_context.is_none());
    }

    #[test]
    fn nested_formula_feeds_the_outer_lookup() {
        // LOOKUP(LOOKUP(C1, $A, $A), $A, $B): the inner call returns the matched key.
        let inner = LogicalPlan::new(
            PlanNode::call(
                Function::Lookup,
                Reference::new(0, 4, 9, 4, RefType::RR).unwrap(),
            ),
            [
                queries(),
                LogicalPlan::leaf(PlanNode::range(ff(0))),
                LogicalPlan::leaf(PlanNode::range(ff(0))),
            ],
        );
        let exec = PlanExecutor::new(ExecConfig::default().with_cores(3));
        let out = exec
            .execute_formula_plan(table(), lookup_plan(inner, letters(), 3))
            .unwrap();
        // Misses stay misses: a null inner result is a null outer query.
        assert_eq!(column(&out), expected());
    }

    #[test]
    fn fixed_nested_formula_is_materialized_first() {
        // The result range is itself a formula over the whole of A..B.
        let staged = LogicalPlan::new(
            PlanNode::call(
                Function::Lookup,
                Reference::new(0, 4, 9, 4, RefType::RR).unwrap(),
            )
            .with_out_ref_type(RefType::FF),
            [
                LogicalPlan::leaf(PlanNode::range(Reference::cell(0, 0, RefType::RR))),
                LogicalPlan::leaf(PlanNode::range(ff(0))),
                letters(),
            ],
        );
        let exec = PlanExecutor::new(ExecConfig::default().with_cores(4));
        let out = exec
            .execute_formula_plan(table(), lookup_plan(queries(), staged, 3))
            .unwrap();
        assert_eq!(column(&out), expected());
    }

    #[test]
    fn vlookup_exact_mode_from_a_literal_flag() {
        let plan = LogicalPlan::new(
            PlanNode::call(
                Function::Vlookup,
                Reference::new(0, 3, 9, 3, RefType::RR).unwrap(),
            ),
            [
                queries(),
                LogicalPlan::leaf(PlanNode::range(
                    Reference::new(0, 0, 9, 1, RefType::FF).unwrap(),
                )),
                LogicalPlan::leaf(PlanNode::literal(2i64)),
                LogicalPlan::leaf(PlanNode::literal(false)),
            ],
        );
        let exec = PlanExecutor::new(ExecConfig::default().with_cores(2));
        let out = exec.execute_formula_plan(table(), plan).unwrap();
        assert_eq!(
            column(&out),
            vec![
                None,
                None,
                Some("d"),
                None,
                Some("a"),
                None,
                Some("b"),
                Some("j"),
                None,
                None
            ]
        );
    }

    #[test]
    fn column_axis_reads_along_the_row() {
        // Queries laid out across row 0 in columns C..E.
        let t = ArrowTable::try_new(vec![
            Arc::new(Int64Array::from(vec![1, 3, 5])),
            Arc::new(StringArray::from(vec!["a", "b", "c"])),
            Arc::new(Int64Array::from(vec![4, 0, 0])),
            Arc::new(Int64Array::from(vec![0, 0, 0])),
            Arc::new(Int64Array::from(vec![9, 0, 0])),
        ])
        .unwrap()
        .into_shared();
        let plan = LogicalPlan::new(
            PlanNode::call(
                Function::Lookup,
                Reference::new(5, 2, 5, 4, RefType::RR).unwrap(),
            )
            .with_axis(Axis::AlongColumn),
            [
                LogicalPlan::leaf(PlanNode::range(Reference::cell(0, 2, RefType::RR))),
                LogicalPlan::leaf(PlanNode::range(
                    Reference::new(0, 0, 2, 0, RefType::FF).unwrap(),
                )),
                LogicalPlan::leaf(PlanNode::range(
                    Reference::new(0, 1, 2, 1, RefType::FF).unwrap(),
                )),
            ],
        );
        let exec = PlanExecutor::new(ExecConfig::default().with_cores(2));
        let out = exec.execute_formula_plan(t, plan).unwrap();
        assert_eq!(column(&out), vec![Some("b"), None, Some("c")]);
    }

    #[test]
    fn unsupported_functions_and_failing_partitions_abort() {
        let sum = LogicalPlan::new(
            PlanNode::call(Function::Sum, Reference::new(0, 3, 9, 3, RefType::RR).unwrap()),
            [queries()],
        );
        let exec = PlanExecutor::new(ExecConfig::default().with_cores(2));
        assert!(matches!(
            exec.execute_formula_plan(table(), sum),
            Err(ExecError::Unsupported(_))
        ));

        // Text queries against numeric keys fail in every partition.
        let text_queries = LogicalPlan::leaf(PlanNode::range(Reference::cell(0, 1, RefType::RR)));
        let err = exec
            .execute_formula_plan(table(), lookup_plan(text_queries, letters(), 3))
            .unwrap_err();
        assert!(matches!(err, ExecError::TypeMismatch(_)));
    }

    #[test]
    fn forced_strategy_is_used_everywhere() {
        for strategy in [
            LookupStrategy::BinarySearch,
            LookupStrategy::SearchSorted,
            LookupStrategy::SearchSortedTwoPass,
            LookupStrategy::Vectorized,
            LookupStrategy::SortMerge,
            LookupStrategy::AsOfJoin,
        ] {
            let exec =
                PlanExecutor::new(ExecConfig::default().with_cores(3).with_lookup_strategy(strategy));
            let out = exec
                .execute_formula_plan(table(), lookup_plan(queries(), letters(), 3))
                .unwrap();
            assert_eq!(column(&out), expected(), "{strategy}");
        }
    }
}

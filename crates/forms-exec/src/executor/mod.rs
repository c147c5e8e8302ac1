//! Physical execution: plan translation, per-partition trees, and the
//! partition-parallel plan executor.

pub mod lookup;
pub mod node;
pub mod plan_executor;

pub use lookup::{LookupArg, execute_lookup, execute_vlookup};
pub use node::{
    ExecNodeKind, ExecutionContext, ExecutionNode, FunctionExecNode, PartitionMetadata,
    RefExecNode, materialize_intermediate_ref, translate,
};
pub use plan_executor::{EvalOptions, PlanExecutor, evaluate_node};

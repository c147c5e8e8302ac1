//! Partition-parallel execution core for FormS formula plans.
//!
//! A logical plan is rewritten ([`planner`]), translated into an execution
//! tree ([`executor::translate`]), cloned once per partition of its output
//! range, and evaluated on a rayon pool ([`PlanExecutor`]). The lookup family
//! ([`lookup`]) and the key-side partitioning that splits a single lookup over
//! several cores ([`partition`]) are usable on their own over Arrow arrays.

pub mod config;
pub mod error;
pub mod executor;
pub mod lookup;
pub mod partition;
pub mod planner;
pub mod table;

#[cfg(test)]
mod tests;

pub use config::ExecConfig;
pub use error::{ExecError, Result};
pub use executor::{
    ExecutionContext, ExecutionNode, PartitionMetadata, PlanExecutor,
    materialize_intermediate_ref, translate,
};
pub use lookup::{
    LookupStrategy, MatchMode, lookup, lookup_with, match_positions, vlookup, vlookup_with,
};
pub use partition::{Bins, PartitionScheme, get_index_bins, get_value_bins, lookup_partitioned};
pub use planner::{LogicalPlan, PlanNode, PlanRewriter, RewritingRule};
pub use table::{ArrowTable, Table};

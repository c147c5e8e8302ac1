//! Logical plans and the rule-based rewriter that runs before translation.

pub mod logical;
pub mod rewriter;
pub mod rules;

pub use logical::{LogicalPlan, PlanNode, PlanNodeId, PlanNodeKind};
pub use rewriter::PlanRewriter;
pub use rules::{FrRfAnnotation, RewritingRule, default_rules};

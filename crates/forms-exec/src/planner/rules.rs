use forms_common::{FrRfOptimization, RefType};

use super::logical::{LogicalPlan, PlanNodeKind};

/// A pure plan-to-plan transform.
///
/// Rules take the plan by value and hand back the rewritten plan; they never
/// see any other rule's intermediate state.
pub trait RewritingRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn rewrite(&self, plan: LogicalPlan) -> LogicalPlan;
}

/// Flags distributive aggregates over growing (`FR`) or shrinking (`RF`)
/// windows so the executor can evaluate them incrementally.
///
/// Only the plan root is inspected: the rewriter hands every immediate child
/// to the rule as a root of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrRfAnnotation;

impl RewritingRule for FrRfAnnotation {
    fn name(&self) -> &'static str {
        "fr_rf_annotation"
    }

    fn rewrite(&self, mut plan: LogicalPlan) -> LogicalPlan {
        let Some(function) = plan.root_node().function() else {
            return plan;
        };
        if !function.is_distributive() {
            return plan;
        }
        let mut arg_types = plan.root_node().children().iter().map(|&c| {
            plan.node(c).and_then(|n| match &n.kind {
                PlanNodeKind::Ref { reference } => Some(reference.ref_type()),
                _ => None,
            })
        });
        let flag = match arg_types.next().flatten() {
            Some(RefType::FR) if arg_types.all(|t| t == Some(RefType::FR)) => FrRfOptimization::Fr,
            Some(RefType::RF) if arg_types.all(|t| t == Some(RefType::RF)) => FrRfOptimization::Rf,
            _ => return plan,
        };
        plan.root_node_mut().fr_rf_optimization = flag;
        plan
    }
}

/// Rules run by a default [`super::PlanRewriter`], in order.
pub fn default_rules() -> Vec<Box<dyn RewritingRule>> {
    vec![Box::new(FrRfAnnotation)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::logical::PlanNode;
    use forms_common::{Function, Reference};

    fn aggregate(function: Function, arg_types: &[RefType]) -> LogicalPlan {
        LogicalPlan::new(
            PlanNode::call(function, Reference::cell(0, 5, RefType::RR)),
            arg_types
                .iter()
                .map(|&t| LogicalPlan::leaf(PlanNode::range(Reference::cell(0, 0, t)))),
        )
    }

    #[test]
    fn growing_sum_is_flagged_fr() {
        let plan = FrRfAnnotation.rewrite(aggregate(Function::Sum, &[RefType::FR, RefType::FR]));
        assert_eq!(plan.root_node().fr_rf_optimization, FrRfOptimization::Fr);
    }

    #[test]
    fn shrinking_min_is_flagged_rf() {
        let plan = FrRfAnnotation.rewrite(aggregate(Function::Min, &[RefType::RF]));
        assert_eq!(plan.root_node().fr_rf_optimization, FrRfOptimization::Rf);
    }

    #[test]
    fn mixed_or_non_distributive_is_untouched() {
        let mixed = FrRfAnnotation.rewrite(aggregate(Function::Sum, &[RefType::FR, RefType::RF]));
        assert_eq!(mixed.root_node().fr_rf_optimization, FrRfOptimization::NoOpt);

        let avg = FrRfAnnotation.rewrite(aggregate(Function::Average, &[RefType::FR]));
        assert_eq!(avg.root_node().fr_rf_optimization, FrRfOptimization::NoOpt);

        let literal = LogicalPlan::leaf(PlanNode::literal(3i64));
        assert_eq!(FrRfAnnotation.rewrite(literal.clone()), literal);
    }
}

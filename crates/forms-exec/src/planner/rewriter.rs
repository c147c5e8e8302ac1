use super::logical::LogicalPlan;
use super::rules::{RewritingRule, default_rules};
use crate::config::ExecConfig;

/// Runs an ordered list of [`RewritingRule`]s over a logical plan.
pub struct PlanRewriter {
    enabled: bool,
    rules: Vec<Box<dyn RewritingRule>>,
}

impl std::fmt::Debug for PlanRewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanRewriter")
            .field("enabled", &self.enabled)
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PlanRewriter {
    pub fn new(config: &ExecConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    pub fn with_rules(config: &ExecConfig, rules: Vec<Box<dyn RewritingRule>>) -> Self {
        Self {
            enabled: config.enable_rewriting,
            rules,
        }
    }

    /// Left fold of the rule list over `root`. Each rule rewrites the root,
    /// then each immediate child subtree independently; rewritten children are
    /// grafted back under the rewritten root.
    ///
    /// With rewriting disabled the plan is returned unchanged.
    pub fn rewrite_plan(&self, root: LogicalPlan) -> LogicalPlan {
        if !self.enabled {
            return root;
        }
        self.rules.iter().fold(root, |plan, rule| {
            #[cfg(feature = "tracing")]
            tracing::debug!(rule = rule.name(), nodes = plan.len(), "apply rewriting rule");
            apply_one_rule(plan, rule.as_ref())
        })
    }
}

fn apply_one_rule(plan: LogicalPlan, rule: &dyn RewritingRule) -> LogicalPlan {
    let plan = rule.rewrite(plan);
    let children = plan
        .child_plans()
        .into_iter()
        .map(|child| rule.rewrite(child))
        .collect();
    plan.with_children(children)
}

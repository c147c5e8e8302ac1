//! Arena-backed logical plans.
//!
//! Nodes live in one `Vec` and point at each other by [`PlanNodeId`]. Children
//! are ownership edges in the sense that a plan is always a tree rooted at
//! [`LogicalPlan::root`]; `parent` is a back-reference resolved by lookup and
//! is kept consistent by every constructor here.

use forms_common::{Axis, FrRfOptimization, Function, LiteralValue, RefType, Reference};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Position of a node inside its plan's arena.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlanNodeId(pub(crate) u32);

impl PlanNodeId {
    pub(crate) fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    pub fn as_index(self) -> usize {
        self.0 as usize
    }

    fn shifted(self, offset: usize) -> Self {
        Self::new(self.as_index() + offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNodeKind {
    /// A function call; `reference` is the range the formula writes to.
    Function {
        function: Function,
        reference: Reference,
    },
    Ref {
        reference: Reference,
    },
    Literal(LiteralValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub kind: PlanNodeKind,
    pub out_ref_type: RefType,
    pub out_ref_axis: Axis,
    pub fr_rf_optimization: FrRfOptimization,
    pub(crate) children: SmallVec<[PlanNodeId; 4]>,
    parent: Option<PlanNodeId>,
}

impl PlanNode {
    fn with_kind(kind: PlanNodeKind, out_ref_type: RefType) -> Self {
        Self {
            kind,
            out_ref_type,
            out_ref_axis: Axis::default(),
            fr_rf_optimization: FrRfOptimization::NoOpt,
            children: SmallVec::new(),
            parent: None,
        }
    }

    pub fn call(function: Function, reference: Reference) -> Self {
        Self::with_kind(
            PlanNodeKind::Function {
                function,
                reference,
            },
            reference.ref_type(),
        )
    }

    pub fn range(reference: Reference) -> Self {
        Self::with_kind(PlanNodeKind::Ref { reference }, reference.ref_type())
    }

    pub fn literal(value: impl Into<LiteralValue>) -> Self {
        Self::with_kind(PlanNodeKind::Literal(value.into()), RefType::FF)
    }

    pub fn with_axis(mut self, axis: Axis) -> Self {
        self.out_ref_axis = axis;
        self
    }

    pub fn with_out_ref_type(mut self, ref_type: RefType) -> Self {
        self.out_ref_type = ref_type;
        self
    }

    pub fn children(&self) -> &[PlanNodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<PlanNodeId> {
        self.parent
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self.kind, PlanNodeKind::Function { .. })
    }

    /// Reference carried by function and ref nodes.
    pub fn reference(&self) -> Option<&Reference> {
        match &self.kind {
            PlanNodeKind::Function { reference, .. } | PlanNodeKind::Ref { reference } => {
                Some(reference)
            }
            PlanNodeKind::Literal(_) => None,
        }
    }

    pub fn function(&self) -> Option<Function> {
        match &self.kind {
            PlanNodeKind::Function { function, .. } => Some(*function),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalPlan {
    nodes: Vec<PlanNode>,
    root: PlanNodeId,
}

impl LogicalPlan {
    /// A plan whose root is `node` and whose root children are `children`, in
    /// order. Each child plan is appended to the new arena as-is.
    pub fn new(mut node: PlanNode, children: impl IntoIterator<Item = LogicalPlan>) -> Self {
        node.children.clear();
        node.parent = None;
        let mut nodes = vec![node];
        let root = PlanNodeId::new(0);
        for child in children {
            let child_root = append(&mut nodes, child, root);
            nodes[0].children.push(child_root);
        }
        Self { nodes, root }
    }

    pub fn leaf(node: PlanNode) -> Self {
        Self::new(node, std::iter::empty())
    }

    pub fn root(&self) -> PlanNodeId {
        self.root
    }

    pub fn root_node(&self) -> &PlanNode {
        &self.nodes[self.root.as_index()]
    }

    pub fn root_node_mut(&mut self) -> &mut PlanNode {
        &mut self.nodes[self.root.as_index()]
    }

    pub fn node(&self, id: PlanNodeId) -> Option<&PlanNode> {
        self.nodes.get(id.as_index())
    }

    pub fn node_mut(&mut self, id: PlanNodeId) -> Option<&mut PlanNode> {
        self.nodes.get_mut(id.as_index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The subtree rooted at `id` as a plan of its own, with a fresh arena.
    /// `None` if `id` is not in this plan.
    pub fn subtree(&self, id: PlanNodeId) -> Option<LogicalPlan> {
        self.node(id)?;
        let mut remap: FxHashMap<PlanNodeId, PlanNodeId> = FxHashMap::default();
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let node = self.node(cur)?;
            remap.insert(cur, PlanNodeId::new(order.len()));
            order.push(cur);
            stack.extend(node.children.iter().rev().copied());
        }

        let mut nodes = Vec::with_capacity(order.len());
        for old in order {
            let mut node = self.nodes[old.as_index()].clone();
            node.parent = if old == id {
                None
            } else {
                node.parent.and_then(|p| remap.get(&p).copied())
            };
            for child in node.children.iter_mut() {
                *child = remap[&*child];
            }
            nodes.push(node);
        }
        Some(LogicalPlan {
            nodes,
            root: PlanNodeId::new(0),
        })
    }

    /// One plan per immediate child of the root, in order.
    pub fn child_plans(&self) -> Vec<LogicalPlan> {
        self.root_node()
            .children
            .iter()
            .filter_map(|&c| self.subtree(c))
            .collect()
    }

    /// This plan's root node with `children` grafted in place of its current
    /// children. Parent back-references of the grafted roots point at the new
    /// root.
    pub fn with_children(&self, children: Vec<LogicalPlan>) -> LogicalPlan {
        LogicalPlan::new(self.root_node().clone(), children)
    }

    /// Nodes reachable from the root, depth first, left to right.
    pub fn iter_preorder(&self) -> impl Iterator<Item = (PlanNodeId, &PlanNode)> + '_ {
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let node = self.node(id)?;
            stack.extend(node.children.iter().rev().copied());
            Some((id, node))
        })
    }
}

/// Move `plan`'s arena onto the end of `nodes`, attaching its root under
/// `parent`. Returns the new id of the plan's root.
fn append(nodes: &mut Vec<PlanNode>, plan: LogicalPlan, parent: PlanNodeId) -> PlanNodeId {
    let offset = nodes.len();
    let root = plan.root;
    for (idx, mut node) in plan.nodes.into_iter().enumerate() {
        node.parent = if idx == root.as_index() {
            Some(parent)
        } else {
            node.parent.map(|p| p.shifted(offset))
        };
        for child in node.children.iter_mut() {
            *child = child.shifted(offset);
        }
        nodes.push(node);
    }
    root.shifted(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_plan() -> LogicalPlan {
        let out = Reference::new(0, 3, 9, 3, RefType::RR).unwrap();
        let keys = Reference::new(0, 0, 9, 0, RefType::FF).unwrap();
        let result = Reference::new(0, 1, 9, 1, RefType::FF).unwrap();
        LogicalPlan::new(
            PlanNode::call(Function::Lookup, out),
            [
                LogicalPlan::leaf(PlanNode::range(Reference::cell(0, 2, RefType::RR))),
                LogicalPlan::leaf(PlanNode::range(keys)),
                LogicalPlan::leaf(PlanNode::range(result)),
            ],
        )
    }

    #[test]
    fn children_point_back_at_their_parent() {
        let plan = lookup_plan();
        let root = plan.root();
        assert_eq!(plan.root_node().children().len(), 3);
        for &child in plan.root_node().children() {
            assert_eq!(plan.node(child).unwrap().parent(), Some(root));
        }
        assert_eq!(plan.root_node().parent(), None);
    }

    #[test]
    fn subtree_and_graft_preserve_shape() {
        let inner = lookup_plan();
        let outer = LogicalPlan::new(
            PlanNode::call(Function::Sum, Reference::cell(0, 5, RefType::RR)),
            [inner.clone(), LogicalPlan::leaf(PlanNode::literal(1i64))],
        );
        assert_eq!(outer.len(), 6);

        let first = outer.root_node().children()[0];
        let extracted = outer.subtree(first).unwrap();
        assert_eq!(extracted, inner);

        let regrafted = outer.with_children(outer.child_plans());
        assert_eq!(regrafted, outer);
    }

    #[test]
    fn preorder_is_left_to_right() {
        let plan = lookup_plan();
        let cols: Vec<usize> = plan
            .iter_preorder()
            .filter_map(|(_, n)| n.reference().map(|r| r.col()))
            .collect();
        assert_eq!(cols, vec![3, 2, 0, 1]);
    }

    #[test]
    fn unknown_ids_yield_nothing() {
        let plan = lookup_plan();
        assert!(plan.node(PlanNodeId::new(42)).is_none());
        assert!(plan.subtree(PlanNodeId::new(42)).is_none());
    }
}

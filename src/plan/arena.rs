//! Arena view of a physical plan.
//!
//! Every node of the input tree receives a stable [`NodeId`] (its pre-order
//! position) when the plan is loaded. Decision tags are keyed by these ids, so
//! two structurally identical subtrees at different positions are always
//! decided independently, and rebuilt trees can be correlated back to the
//! original positions.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::plan::physical::{OpKind, PhysicalNode, PhysicalOp, PhysicalPlan};

/// Stable identifier of a node inside a [`PlanArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Index into arena-sized tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
struct ArenaNode {
    op: PhysicalOp,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 2]>,
}

/// Flattened, read-only copy of a plan tree.
#[derive(Clone, Debug)]
pub struct PlanArena {
    nodes: Vec<ArenaNode>,
}

impl PlanArena {
    /// Loads `plan` into a new arena. The root is always `NodeId(0)`.
    pub fn from_plan(plan: &PhysicalPlan) -> Self {
        Self::from_root(&plan.root)
    }

    /// Loads the tree rooted at `root` into a new arena.
    pub fn from_root(root: &PhysicalNode) -> Self {
        let mut nodes: Vec<ArenaNode> = Vec::with_capacity(root.node_count());
        let mut stack: Vec<(&PhysicalNode, Option<NodeId>)> = vec![(root, None)];
        while let Some((node, parent)) = stack.pop() {
            let id = NodeId(nodes.len() as u32);
            nodes.push(ArenaNode {
                op: node.op.clone(),
                parent,
                children: SmallVec::new(),
            });
            if let Some(parent) = parent {
                nodes[parent.index()].children.push(id);
            }
            // Reverse push so the leftmost input is loaded (and numbered) first.
            for input in node.inputs.iter().rev() {
                stack.push((input, Some(id)));
            }
        }
        Self { nodes }
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a plan has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Operator at `id`.
    pub fn op(&self, id: NodeId) -> &PhysicalOp {
        &self.nodes[id.index()].op
    }

    /// Operator kind at `id`.
    pub fn kind(&self, id: NodeId) -> OpKind {
        self.nodes[id.index()].op.kind()
    }

    /// Inputs of `id`, left to right.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// Consumer of `id`'s output, `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// All node ids in ascending order (which is also pre-order).
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Parents before children, inputs left to right.
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// Children before parents, inputs left to right.
    pub fn post_order(&self) -> Vec<NodeId> {
        self.post_order_from(self.root())
    }

    /// Rebuilds the owned tree rooted at `id`.
    pub fn subtree(&self, id: NodeId) -> PhysicalNode {
        let mut built: Vec<PhysicalNode> = Vec::new();
        for node in self.post_order_from(id) {
            let arity = self.children(node).len();
            let inputs = built.split_off(built.len() - arity);
            built.push(PhysicalNode::with_inputs(self.op(node).clone(), inputs));
        }
        built.pop().unwrap_or_else(|| PhysicalNode::new(self.op(id).clone()))
    }

    fn post_order_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().copied());
        }
        order.reverse();
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::physical::{AggregateMode, PhysicalNode, PhysicalOp};

    fn scan(table: &str) -> PhysicalNode {
        PhysicalNode::new(PhysicalOp::DataSourceScan {
            source: table.to_string(),
        })
    }

    fn join_plan() -> PhysicalPlan {
        let left = PhysicalNode::unary(
            PhysicalOp::Filter {
                predicate: "a > 1".into(),
            },
            scan("l"),
        );
        let right = PhysicalNode::unary(
            PhysicalOp::HashAggregate {
                mode: AggregateMode::Final,
                grouping: vec!["k".into()],
            },
            scan("r"),
        );
        PhysicalPlan::new(PhysicalNode::with_inputs(PhysicalOp::Union, vec![left, right]))
    }

    #[test]
    fn ids_are_assigned_in_pre_order() {
        let arena = PlanArena::from_plan(&join_plan());
        assert_eq!(arena.len(), 5);
        assert_eq!(arena.kind(NodeId(0)), OpKind::Union);
        assert_eq!(arena.kind(NodeId(1)), OpKind::Filter);
        assert_eq!(arena.kind(NodeId(2)), OpKind::DataSourceScan);
        assert_eq!(arena.kind(NodeId(3)), OpKind::HashAggregate);
        assert_eq!(arena.children(NodeId(0)), &[NodeId(1), NodeId(3)]);
        assert_eq!(arena.parent(NodeId(4)), Some(NodeId(3)));
        assert_eq!(arena.parent(arena.root()), None);
        assert_eq!(arena.pre_order(), arena.ids().collect::<Vec<_>>());
    }

    #[test]
    fn post_order_visits_children_left_to_right_before_parent() {
        let arena = PlanArena::from_plan(&join_plan());
        let order: Vec<u32> = arena.post_order().into_iter().map(|id| id.0).collect();
        assert_eq!(order, vec![2, 1, 4, 3, 0]);
    }

    #[test]
    fn subtree_round_trips_structure() {
        let plan = join_plan();
        let arena = PlanArena::from_plan(&plan);
        let rebuilt = arena.subtree(arena.root());
        assert_eq!(rebuilt.node_count(), plan.root.node_count());
        assert_eq!(rebuilt.inputs.len(), 2);
        assert_eq!(rebuilt.inputs[1].op.kind(), OpKind::HashAggregate);
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let mut node = scan("t");
        for _ in 0..50_000 {
            node = PhysicalNode::unary(PhysicalOp::LocalLimit { limit: 10 }, node);
        }
        let arena = PlanArena::from_root(&node);
        assert_eq!(arena.len(), 50_001);
        assert_eq!(arena.post_order().len(), 50_001);
        assert_eq!(arena.subtree(arena.root()).node_count(), 50_001);
    }
}

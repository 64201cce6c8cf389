//! Human- and machine-readable views of an analysis result.

use std::fmt;
use std::hash::Hasher;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::plan::arena::{NodeId, PlanArena};
use crate::plan::physical::{OpKind, Partitioning, PhysicalOp, SortKey};
use crate::strategy::tags::{ConvertStrategyTag, NeverConvertReason, TagTable};

/// Explain node representing an operator annotated with its decision.
#[derive(Clone, Debug)]
pub struct ExplainNode {
    /// Operator name.
    pub op: String,
    /// Operator parameters followed by the decision tags.
    pub props: Vec<ExplainProp>,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a new explain node with the given operator name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Value of the first property named `key`.
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|prop| prop.key == key)
            .map(|prop| prop.value.as_str())
    }
}

impl Drop for ExplainNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.inputs);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.inputs);
        }
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
    /// Whether this property contains user expressions that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

impl fmt::Display for ExplainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            write!(f, "{:indent$}{}", "", node.op, indent = depth * 2)?;
            if !node.props.is_empty() {
                f.write_str(" [")?;
                for (i, prop) in node.props.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", prop.key, prop.value)?;
                }
                f.write_str("]")?;
            }
            writeln!(f)?;
            for input in node.inputs.iter().rev() {
                stack.push((input, depth + 1));
            }
        }
        Ok(())
    }
}

/// Serializable decision for one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeDecision {
    /// Node identifier.
    pub id: NodeId,
    /// Operator kind.
    pub op: OpKind,
    /// Final strategy.
    pub strategy: ConvertStrategyTag,
    /// A native rewrite was obtained.
    pub convertible: bool,
    /// The rewrite is an interpreted wrapper.
    pub forced_non_native: bool,
    /// An ancestor relies on this node's output ordering.
    pub child_ordering_required: bool,
    /// Reason for `NeverConvert`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NeverConvertReason>,
}

/// Collects decisions for every node in pre-order.
pub fn collect_decisions(arena: &PlanArena, tags: &TagTable) -> Vec<NodeDecision> {
    arena
        .pre_order()
        .into_iter()
        .map(|id| {
            let node = tags.get(id);
            NodeDecision {
                id,
                op: arena.kind(id),
                strategy: node.strategy,
                convertible: node.convertible,
                forced_non_native: node.forced_non_native,
                child_ordering_required: node.child_ordering_required,
                reason: node.never_convert_reason,
            }
        })
        .collect()
}

/// Builds the annotated explain tree without recursion.
pub fn build_explain_tree(arena: &PlanArena, tags: &TagTable) -> ExplainNode {
    let mut built: Vec<ExplainNode> = Vec::with_capacity(arena.len());
    for id in arena.post_order() {
        let arity = arena.children(id).len();
        let inputs = built.split_off(built.len() - arity);
        let mut explain = ExplainNode::new(arena.kind(id).name());
        explain.props = op_props(arena.op(id));
        explain.props.extend(decision_props(tags, id));
        explain.inputs = inputs;
        built.push(explain);
    }
    built.pop().unwrap_or_else(|| ExplainNode::new("Empty"))
}

/// Deterministic hash over operator kinds, shape and decisions.
///
/// Two runs over the same plan with the same oracle always hash equal.
pub fn decision_hash(arena: &PlanArena, tags: &TagTable) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write_u64(arena.len() as u64);
    for id in arena.pre_order() {
        let node = tags.get(id);
        hasher.write(arena.kind(id).name().as_bytes());
        hasher.write_u64(arena.children(id).len() as u64);
        hasher.write_u8(match node.strategy {
            ConvertStrategyTag::Default => 0,
            ConvertStrategyTag::AlwaysConvert => 1,
            ConvertStrategyTag::NeverConvert => 2,
        });
        hasher.write_u8(
            node.convertible as u8
                | (node.forced_non_native as u8) << 1
                | (node.child_ordering_required as u8) << 2,
        );
    }
    hasher.finish()
}

fn decision_props(tags: &TagTable, id: NodeId) -> Vec<ExplainProp> {
    let node = tags.get(id);
    let mut props = vec![ExplainProp::plain("strategy", node.strategy.to_string())];
    if !node.convertible {
        props.push(ExplainProp::plain("convertible", "false"));
    }
    if node.forced_non_native {
        props.push(ExplainProp::plain("forced_non_native", "true"));
    }
    if node.child_ordering_required {
        props.push(ExplainProp::plain("ordering_required", "true"));
    }
    if let Some(reason) = node.never_convert_reason {
        props.push(ExplainProp::plain("reason", format!("{reason:?}")));
    }
    props
}

fn op_props(op: &PhysicalOp) -> Vec<ExplainProp> {
    match op {
        PhysicalOp::FileSourceScan { table, format } => vec![
            ExplainProp::plain("table", table.clone()),
            ExplainProp::plain("format", format!("{format:?}")),
        ],
        PhysicalOp::DataSourceScan { source } => vec![ExplainProp::plain("source", source.clone())],
        PhysicalOp::LocalTableScan { rows } => vec![ExplainProp::plain("rows", rows.to_string())],
        PhysicalOp::Range { start, end, step } => vec![ExplainProp::plain(
            "range",
            format!("{start}..{end} step {step}"),
        )],
        PhysicalOp::Project { exprs } => vec![ExplainProp::literal("exprs", exprs.join(", "))],
        PhysicalOp::Filter { predicate } => {
            vec![ExplainProp::literal("predicate", predicate.clone())]
        }
        PhysicalOp::LocalLimit { limit } | PhysicalOp::GlobalLimit { limit } => {
            vec![ExplainProp::plain("limit", limit.to_string())]
        }
        PhysicalOp::TakeOrderedAndProject {
            limit,
            order,
            exprs,
        } => vec![
            ExplainProp::plain("limit", limit.to_string()),
            ExplainProp::plain("order", describe_order(order)),
            ExplainProp::literal("exprs", exprs.join(", ")),
        ],
        PhysicalOp::Expand { projections } => {
            vec![ExplainProp::plain("projections", projections.to_string())]
        }
        PhysicalOp::Window {
            partition_by,
            order_by,
        } => vec![
            ExplainProp::plain("partition_by", partition_by.join(", ")),
            ExplainProp::plain("order_by", describe_order(order_by)),
        ],
        PhysicalOp::WindowGroupLimit {
            partition_by,
            order_by,
            limit,
        } => vec![
            ExplainProp::plain("partition_by", partition_by.join(", ")),
            ExplainProp::plain("order_by", describe_order(order_by)),
            ExplainProp::plain("limit", limit.to_string()),
        ],
        PhysicalOp::Generate { generator } => {
            vec![ExplainProp::literal("generator", generator.clone())]
        }
        PhysicalOp::HashAggregate { mode, grouping }
        | PhysicalOp::ObjectHashAggregate { mode, grouping }
        | PhysicalOp::SortAggregate { mode, grouping } => vec![
            ExplainProp::plain("mode", format!("{mode:?}")),
            ExplainProp::plain("grouping", grouping.join(", ")),
        ],
        PhysicalOp::DataWritingCommand { command } => {
            vec![ExplainProp::plain("command", command.name())]
        }
        PhysicalOp::Sort { order, global } => vec![
            ExplainProp::plain("order", describe_order(order)),
            ExplainProp::plain("global", global.to_string()),
        ],
        PhysicalOp::ShuffleExchange {
            partitioning,
            native_only,
        } => vec![
            ExplainProp::plain("partitioning", describe_partitioning(partitioning)),
            ExplainProp::plain("native_only", native_only.to_string()),
        ],
        PhysicalOp::BroadcastExchange { native_only } => {
            vec![ExplainProp::plain("native_only", native_only.to_string())]
        }
        PhysicalOp::SortMergeJoin {
            join_type,
            left_keys,
            right_keys,
        } => vec![
            ExplainProp::plain("type", format!("{join_type:?}")),
            ExplainProp::plain("left_keys", left_keys.join(", ")),
            ExplainProp::plain("right_keys", right_keys.join(", ")),
        ],
        PhysicalOp::ShuffledHashJoin {
            join_type,
            left_keys,
            right_keys,
            build_side,
        }
        | PhysicalOp::BroadcastHashJoin {
            join_type,
            left_keys,
            right_keys,
            build_side,
        } => vec![
            ExplainProp::plain("type", format!("{join_type:?}")),
            ExplainProp::plain("left_keys", left_keys.join(", ")),
            ExplainProp::plain("right_keys", right_keys.join(", ")),
            ExplainProp::plain("build", format!("{build_side:?}")),
        ],
        PhysicalOp::BroadcastNestedLoopJoin {
            join_type,
            build_side,
        } => vec![
            ExplainProp::plain("type", format!("{join_type:?}")),
            ExplainProp::plain("build", format!("{build_side:?}")),
        ],
        PhysicalOp::Coalesce { partitions } => {
            vec![ExplainProp::plain("partitions", partitions.to_string())]
        }
        PhysicalOp::Opaque { name } => vec![ExplainProp::plain("name", name.clone())],
        PhysicalOp::Union | PhysicalOp::CartesianProduct => Vec::new(),
    }
}

fn describe_order(order: &[SortKey]) -> String {
    order
        .iter()
        .map(SortKey::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_partitioning(partitioning: &Partitioning) -> String {
    match partitioning {
        Partitioning::Hash {
            columns,
            partitions,
        } => format!("hash({}) x{partitions}", columns.join(", ")),
        Partitioning::Range { order, partitions } => {
            format!("range({}) x{partitions}", describe_order(order))
        }
        Partitioning::RoundRobin { partitions } => format!("round_robin x{partitions}"),
        Partitioning::Single => "single".into(),
    }
}

//! Bottom-up search for native rewrites.

use tracing::debug;

use crate::plan::arena::PlanArena;
use crate::strategy::oracle::{ConvertedNode, NativeForm, NativeOracle};
use crate::strategy::tags::{NeverConvertReason, TagTable};

/// Asks `oracle` for a native rewrite of every node, children first, and
/// records the outcome on the original node's tags.
///
/// Each node consumes exactly as many attempts as it has inputs from the top
/// of a positional stack, so attempts are always attached to the parent they
/// were produced for. Returns the attempted form of the whole plan.
pub fn propagate_convertibility(
    arena: &PlanArena,
    oracle: &dyn NativeOracle,
    tags: &mut TagTable,
) -> ConvertedNode {
    let mut attempted: Vec<ConvertedNode> = Vec::with_capacity(arena.len());
    for id in arena.post_order() {
        let arity = arena.children(id).len();
        debug_assert!(attempted.len() >= arity, "attempt stack underflow at {id}");
        let inputs = attempted.split_off(attempted.len() - arity);
        let op = arena.op(id);
        let form = oracle.attempt(op, &inputs);
        let node_tags = tags.get_mut(id);
        match form {
            NativeForm::Native => {
                node_tags.convertible = true;
            }
            NativeForm::ForcedNonNative => {
                node_tags.convertible = false;
                node_tags.forced_non_native = true;
                debug!(node = %id, op = %op.kind(), "strategy.convertible.forced_non_native");
            }
            NativeForm::Unsupported => {
                node_tags.convertible = false;
                if !inputs.iter().any(ConvertedNode::is_native) {
                    tags.set_never(id, NeverConvertReason::NoNativeForm);
                }
                debug!(node = %id, op = %op.kind(), "strategy.convertible.unsupported");
            }
        }
        attempted.push(ConvertedNode {
            op: op.clone(),
            form,
            inputs,
        });
    }
    debug_assert_eq!(attempted.len(), 1, "attempt stack must end with the root");
    attempted.swap_remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::physical::{OpKind, PhysicalNode, PhysicalOp, PhysicalPlan};
    use crate::strategy::tags::ConvertStrategyTag;

    fn scan() -> PhysicalNode {
        PhysicalNode::new(PhysicalOp::LocalTableScan { rows: 1 })
    }

    fn filter(input: PhysicalNode) -> PhysicalNode {
        PhysicalNode::unary(
            PhysicalOp::Filter {
                predicate: "p".into(),
            },
            input,
        )
    }

    #[test]
    fn outcomes_are_tagged_on_original_nodes() {
        // Union(Filter(Scan), Coalesce(Scan), Project(Scan))
        let plan = PhysicalPlan::new(PhysicalNode::with_inputs(
            PhysicalOp::Union,
            vec![
                filter(scan()),
                PhysicalNode::unary(PhysicalOp::Coalesce { partitions: 1 }, scan()),
                PhysicalNode::unary(PhysicalOp::Project { exprs: vec![] }, scan()),
            ],
        ));
        let arena = PlanArena::from_plan(&plan);
        let mut tags = TagTable::new(&arena);
        let oracle = |op: &PhysicalOp, _: &[ConvertedNode]| match op.kind() {
            OpKind::Coalesce => NativeForm::Unsupported,
            OpKind::Project => NativeForm::ForcedNonNative,
            _ => NativeForm::Native,
        };
        let converted = propagate_convertibility(&arena, &oracle, &mut tags);

        assert_eq!(converted.inputs.len(), 3);
        for id in arena.ids() {
            let t = tags.get(id);
            match arena.kind(id) {
                OpKind::Coalesce => {
                    // Its only input converted natively, so no hard decision yet.
                    assert!(!t.convertible);
                    assert_eq!(t.strategy, ConvertStrategyTag::Default);
                }
                OpKind::Project => {
                    assert!(!t.convertible);
                    assert!(t.forced_non_native);
                    assert_eq!(t.strategy, ConvertStrategyTag::Default);
                }
                _ => {
                    assert!(t.convertible);
                    assert_eq!(t.strategy, ConvertStrategyTag::Default);
                }
            }
        }
    }

    #[test]
    fn unsupported_over_interpreted_inputs_is_never_convert() {
        let plan = PhysicalPlan::new(filter(filter(scan())));
        let arena = PlanArena::from_plan(&plan);
        let mut tags = TagTable::new(&arena);
        let oracle = |_: &PhysicalOp, _: &[ConvertedNode]| NativeForm::Unsupported;
        propagate_convertibility(&arena, &oracle, &mut tags);
        for id in arena.ids() {
            assert_eq!(tags.strategy(id), ConvertStrategyTag::NeverConvert);
            assert_eq!(
                tags.get(id).never_convert_reason,
                Some(NeverConvertReason::NoNativeForm)
            );
        }
    }

    #[test]
    fn attempts_stay_attached_to_their_parent() {
        // Siblings of different arity side by side: any positional mix-up
        // would hand the wrong operators to the oracle.
        let left = PhysicalNode::with_inputs(
            PhysicalOp::Union,
            vec![scan(), filter(scan()), scan()],
        );
        let right = filter(PhysicalNode::unary(PhysicalOp::LocalLimit { limit: 1 }, scan()));
        let plan = PhysicalPlan::new(PhysicalNode::with_inputs(
            PhysicalOp::CartesianProduct,
            vec![left, right],
        ));
        let arena = PlanArena::from_plan(&plan);
        let mut tags = TagTable::new(&arena);
        let oracle = |op: &PhysicalOp, inputs: &[ConvertedNode]| {
            let kinds: Vec<OpKind> = inputs.iter().map(|input| input.op.kind()).collect();
            let expected: &[OpKind] = match op.kind() {
                OpKind::Union => &[OpKind::LocalTableScan, OpKind::Filter, OpKind::LocalTableScan],
                OpKind::CartesianProduct => &[OpKind::Union, OpKind::Filter],
                OpKind::LocalLimit => &[OpKind::LocalTableScan],
                OpKind::LocalTableScan => &[],
                _ => return NativeForm::Native,
            };
            assert_eq!(kinds, expected, "inputs of {}", op.kind());
            NativeForm::Native
        };
        let converted = propagate_convertibility(&arena, &oracle, &mut tags);
        assert_eq!(converted.into_physical().node_count(), arena.len());
    }
}

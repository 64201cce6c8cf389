//! Stage exchanges that only exist natively.

use tracing::debug;

use crate::plan::arena::PlanArena;
use crate::strategy::tags::TagTable;

/// Forces `AlwaysConvert` on every shuffle or broadcast exchange that has no
/// interpreted implementation. Returns how many nodes were forced.
pub fn finalize_stage_boundaries(arena: &PlanArena, tags: &mut TagTable) -> usize {
    let mut forced = 0;
    for id in arena.post_order() {
        if arena.op(id).is_native_only_exchange() {
            tags.set_always(id);
            forced += 1;
            debug!(node = %id, op = %arena.kind(id), "strategy.boundary.forced");
        }
    }
    forced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::physical::{Partitioning, PhysicalNode, PhysicalOp, PhysicalPlan};
    use crate::strategy::tags::{ConvertStrategyTag, NeverConvertReason};

    #[test]
    fn only_native_only_exchanges_are_forced() {
        let scan = PhysicalNode::new(PhysicalOp::LocalTableScan { rows: 1 });
        let inner = PhysicalNode::unary(
            PhysicalOp::ShuffleExchange {
                partitioning: Partitioning::RoundRobin { partitions: 4 },
                native_only: false,
            },
            scan,
        );
        let plan = PhysicalPlan::new(PhysicalNode::unary(
            PhysicalOp::BroadcastExchange { native_only: true },
            inner,
        ));
        let arena = PlanArena::from_plan(&plan);
        let mut tags = TagTable::new(&arena);
        tags.set_never(arena.root(), NeverConvertReason::NoNativeForm);

        assert_eq!(finalize_stage_boundaries(&arena, &mut tags), 1);
        assert_eq!(tags.strategy(arena.root()), ConvertStrategyTag::AlwaysConvert);
        assert_eq!(tags.get(arena.root()).never_convert_reason, None);
        let shuffle = arena.children(arena.root())[0];
        assert_eq!(tags.strategy(shuffle), ConvertStrategyTag::Default);
    }
}

//! Initial per-operator convert decisions.
//!
//! Converting between native and interpreted batches is assumed to cost more
//! than running most operators, so an operator is converted only when that
//! saves a conversion on at least one side. Scans and exchanges sit on stage
//! boundaries and are always converted; a native sort is preferred even over
//! an interpreted input.

use tracing::debug;

use crate::plan::arena::{NodeId, PlanArena};
use crate::plan::physical::OpKind;
use crate::strategy::tags::{ConvertStrategyTag, NeverConvertReason, TagTable};

/// Assigns `AlwaysConvert` or `NeverConvert` to every undecided node,
/// children first. Nodes already decided by earlier passes are left alone.
pub fn assign_strategies(arena: &PlanArena, tags: &mut TagTable) {
    for id in arena.post_order() {
        if tags.strategy(id) != ConvertStrategyTag::Default {
            continue;
        }
        let node = *tags.get(id);
        if !node.convertible && !node.forced_non_native {
            tags.set_never(id, NeverConvertReason::NotConvertible);
            debug!(node = %id, op = %arena.kind(id), "strategy.assign.not_convertible");
            continue;
        }
        match kind_rule(arena, tags, id) {
            Some(true) => tags.set_always(id),
            // Interpreted wrappers still take part structurally.
            _ if node.forced_non_native => tags.set_always(id),
            Some(false) => tags.set_never(id, NeverConvertReason::RuleUnsatisfied),
            None => tags.set_never(id, NeverConvertReason::NoRule),
        }
        debug!(
            node = %id,
            op = %arena.kind(id),
            strategy = %tags.strategy(id),
            "strategy.assign.decided"
        );
    }
}

/// Evaluates the rule for `id`'s operator kind; `None` when the kind has no rule.
fn kind_rule(arena: &PlanArena, tags: &TagTable, id: NodeId) -> Option<bool> {
    let children = arena.children(id);
    let native_child = || children.first().is_some_and(|&child| tags.is_native(child));
    let decision = match arena.kind(id) {
        OpKind::FileSourceScan
        | OpKind::DataSourceScan
        | OpKind::LocalTableScan
        | OpKind::Range
        | OpKind::BroadcastExchange
        | OpKind::Sort => true,
        OpKind::ShuffleExchange => {
            native_child()
                || children
                    .first()
                    .map_or(true, |&child| !arena.kind(child).is_aggregate())
        }
        OpKind::Project
        | OpKind::Filter
        | OpKind::LocalLimit
        | OpKind::GlobalLimit
        | OpKind::TakeOrderedAndProject
        | OpKind::Expand
        | OpKind::Window
        | OpKind::WindowGroupLimit
        | OpKind::Generate
        | OpKind::ObjectHashAggregate
        | OpKind::HashAggregate
        | OpKind::SortAggregate
        | OpKind::DataWritingCommand => native_child(),
        OpKind::Union => {
            let native = children.iter().filter(|&&c| tags.is_native(c)).count();
            let never = children.iter().filter(|&&c| tags.is_never(c)).count();
            native >= never
        }
        OpKind::SortMergeJoin | OpKind::ShuffledHashJoin => {
            children.iter().any(|&child| tags.is_native(child))
        }
        OpKind::BroadcastHashJoin | OpKind::BroadcastNestedLoopJoin => {
            children.iter().all(|&child| tags.is_native(child))
        }
        OpKind::CartesianProduct | OpKind::Coalesce | OpKind::Opaque => return None,
    };
    Some(decision)
}

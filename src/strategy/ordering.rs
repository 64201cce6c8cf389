//! Top-down propagation of row-ordering requirements.

use tracing::trace;

use crate::plan::arena::PlanArena;
use crate::plan::physical::OpKind;
use crate::strategy::tags::TagTable;

/// Marks every node whose output ordering some ancestor relies on.
///
/// The first sweep flags inputs that their consumer needs in a specific order.
/// The second pushes the flag down through operators that pass ordering
/// through; a sort produces a fresh ordering, so it clears its own flag and
/// does not forward it.
pub fn propagate_ordering_requirements(arena: &PlanArena, tags: &mut TagTable) {
    let order = arena.pre_order();

    for &id in &order {
        let children = arena.children(id);
        let required = arena.op(id).required_child_ordering(children.len());
        for (&child, ordering) in children.iter().zip(required) {
            if !ordering.is_empty() {
                tags.get_mut(child).child_ordering_required = true;
                trace!(
                    node = %child,
                    consumer = %id,
                    keys = ordering.len(),
                    "strategy.ordering.required"
                );
            }
        }
    }

    for &id in &order {
        if arena.kind(id) == OpKind::Sort {
            tags.get_mut(id).child_ordering_required = false;
        } else if tags.get(id).child_ordering_required {
            for &child in arena.children(id) {
                tags.get_mut(child).child_ordering_required = true;
            }
        }
    }
}

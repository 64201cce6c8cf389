//! Fixed-point removal of conversions that cost more than they save.

use tracing::{debug, warn};

use crate::plan::arena::{NodeId, PlanArena};
use crate::plan::physical::OpKind;
use crate::strategy::tags::{DemotionCause, TagTable};

/// Outcome of [`eliminate_inefficient_converts`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EliminationReport {
    /// Full sweeps performed, including the final sweep that changed nothing.
    pub passes: usize,
    /// Nodes demoted from `AlwaysConvert` to `NeverConvert`.
    pub demotions: usize,
}

/// Demotes locally inefficient `AlwaysConvert` decisions until a full sweep
/// makes no change.
///
/// Every demotion needs an interpreted neighbor and removes one node from the
/// converted set, so the sweep count never exceeds the node count.
pub fn eliminate_inefficient_converts(arena: &PlanArena, tags: &mut TagTable) -> EliminationReport {
    let order = arena.pre_order();
    let max_passes = arena.len() + 1;
    let mut report = EliminationReport::default();
    loop {
        report.passes += 1;
        let mut changed = 0;
        for &id in &order {
            changed += demote_inefficient(arena, tags, id);
        }
        report.demotions += changed;
        debug!(
            pass = report.passes,
            demoted = changed,
            "strategy.eliminate.pass"
        );
        if changed == 0 {
            break;
        }
        if report.passes >= max_passes {
            warn!(
                passes = report.passes,
                nodes = arena.len(),
                "strategy.eliminate.pass_limit"
            );
            break;
        }
    }
    report
}

fn demote_inefficient(arena: &PlanArena, tags: &mut TagTable, id: NodeId) -> usize {
    let mut demoted = 0;
    let kind = arena.kind(id);
    let child = arena.children(id).first().copied();
    let child_never = child.is_some_and(|c| tags.is_never(c));

    if tags.is_always(id) {
        let cause = match kind {
            OpKind::Filter if child_never => Some(DemotionCause::FilterOverInterpreted),
            k if k.is_aggregate() && child_never => Some(DemotionCause::AggregateOverInterpreted),
            OpKind::ShuffleExchange
                if child_never
                    && !arena.op(id).is_native_only_exchange()
                    && child.is_some_and(|c| arena.kind(c).is_aggregate()) =>
            {
                Some(DemotionCause::ShuffleOverInterpretedAggregate)
            }
            OpKind::Sort
                if child_never && arena.parent(id).is_some_and(|p| tags.is_never(p)) =>
            {
                Some(DemotionCause::SortBetweenInterpreted)
            }
            _ => None,
        };
        if let Some(cause) = cause {
            if tags.demote(id, cause) {
                log_demotion(arena, id, cause);
                demoted += 1;
            }
        }
    }

    if tags.is_never(id) {
        for &input in arena.children(id) {
            let cause = DemotionCause::BulkProducerFeedsInterpreted;
            if arena.kind(input).is_bulk_producer() && tags.demote(input, cause) {
                log_demotion(arena, input, cause);
                demoted += 1;
            }
        }
    }
    demoted
}

fn log_demotion(arena: &PlanArena, id: NodeId, cause: DemotionCause) {
    debug!(
        node = %id,
        op = %arena.kind(id),
        cause = ?cause,
        "strategy.eliminate.demote"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::physical::{
        AggregateMode, FileFormat, Partitioning, PhysicalNode, PhysicalOp,
    };
    use crate::strategy::tags::{ConvertStrategyTag, NeverConvertReason};

    fn scan() -> PhysicalNode {
        PhysicalNode::new(PhysicalOp::FileSourceScan {
            table: "t".into(),
            format: FileFormat::Orc,
        })
    }

    fn filter(input: PhysicalNode) -> PhysicalNode {
        PhysicalNode::unary(
            PhysicalOp::Filter {
                predicate: "p".into(),
            },
            input,
        )
    }

    fn project(input: PhysicalNode) -> PhysicalNode {
        PhysicalNode::unary(PhysicalOp::Project { exprs: vec![] }, input)
    }

    fn sort(input: PhysicalNode) -> PhysicalNode {
        PhysicalNode::unary(
            PhysicalOp::Sort {
                order: vec![],
                global: false,
            },
            input,
        )
    }

    /// Tags nodes in pre-order from a compact `A`/`N` pattern.
    fn tagged(plan: &PhysicalNode, pattern: &str) -> (PlanArena, TagTable) {
        let arena = PlanArena::from_root(plan);
        let mut tags = TagTable::new(&arena);
        assert_eq!(pattern.len(), arena.len());
        for (id, flag) in arena.pre_order().into_iter().zip(pattern.chars()) {
            match flag {
                'A' => tags.set_always(id),
                _ => tags.set_never(id, NeverConvertReason::RuleUnsatisfied),
            }
        }
        (arena, tags)
    }

    fn pattern(arena: &PlanArena, tags: &TagTable) -> String {
        arena
            .pre_order()
            .into_iter()
            .map(|id| match tags.strategy(id) {
                ConvertStrategyTag::AlwaysConvert => 'A',
                ConvertStrategyTag::NeverConvert => 'N',
                ConvertStrategyTag::Default => '?',
            })
            .collect()
    }

    #[test]
    fn filter_over_interpreted_input_is_demoted_in_one_pass() {
        // Project <- Filter <- Scan with the scan turned interpreted.
        let plan = project(filter(scan()));
        let (arena, mut tags) = tagged(&plan, "NAN");
        let report = eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "NNN");
        assert_eq!(report.demotions, 1);
        assert_eq!(report.passes, 2);
    }

    #[test]
    fn scan_feeding_interpreted_consumer_is_demoted() {
        let plan = project(filter(scan()));
        let (arena, mut tags) = tagged(&plan, "NNA");
        eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "NNN");
        let scan_id = arena.children(arena.children(arena.root())[0])[0];
        assert_eq!(
            tags.get(scan_id).never_convert_reason,
            Some(NeverConvertReason::Demoted(
                DemotionCause::BulkProducerFeedsInterpreted
            ))
        );
    }

    #[test]
    fn data_source_scan_under_interpreted_consumer_is_kept() {
        let plan = project(PhysicalNode::new(PhysicalOp::DataSourceScan {
            source: "kafka".into(),
        }));
        let (arena, mut tags) = tagged(&plan, "NA");
        let report = eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "NA");
        assert_eq!(report.demotions, 0);
    }

    #[test]
    fn demotions_cascade_up_a_filter_chain() {
        let plan = filter(filter(filter(project(scan()))));
        let (arena, mut tags) = tagged(&plan, "AAANA");
        let report = eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "NNNNN");
        // Scan is demoted in the first pass together with the lowest filter;
        // each further pass demotes the filter above.
        assert_eq!(report.demotions, 4);
        assert_eq!(report.passes, 4);
        assert!(report.passes <= arena.len());
    }

    #[test]
    fn sort_between_interpreted_operators_is_demoted() {
        let plan = project(sort(project(scan())));
        let (arena, mut tags) = tagged(&plan, "NANA");
        eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "NNNN");

        // Root sort has no consumer and is kept.
        let plan = sort(project(scan()));
        let (arena, mut tags) = tagged(&plan, "ANN");
        eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "ANN");

        // Native consumer keeps the sort.
        let plan = project(sort(project(scan())));
        let (arena, mut tags) = tagged(&plan, "AANN");
        eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "AANN");
    }

    #[test]
    fn shuffle_demotion_spares_native_only_exchanges() {
        let agg = |input| {
            PhysicalNode::unary(
                PhysicalOp::HashAggregate {
                    mode: AggregateMode::Partial,
                    grouping: vec![],
                },
                input,
            )
        };
        let shuffle = |native_only, input| {
            PhysicalNode::unary(
                PhysicalOp::ShuffleExchange {
                    partitioning: Partitioning::Single,
                    native_only,
                },
                input,
            )
        };

        let plan = shuffle(false, agg(project(scan())));
        let (arena, mut tags) = tagged(&plan, "ANNN");
        eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "NNNN");

        let plan = shuffle(true, agg(project(scan())));
        let (arena, mut tags) = tagged(&plan, "ANNN");
        eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "ANNN");
    }

    #[test]
    fn aggregate_over_interpreted_input_is_demoted() {
        let plan = PhysicalNode::unary(
            PhysicalOp::SortAggregate {
                mode: AggregateMode::Complete,
                grouping: vec![],
            },
            project(scan()),
        );
        let (arena, mut tags) = tagged(&plan, "ANN");
        eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(pattern(&arena, &tags), "NNN");
    }

    #[test]
    fn stable_tags_need_a_single_pass() {
        let plan = project(filter(scan()));
        let (arena, mut tags) = tagged(&plan, "AAA");
        let report = eliminate_inefficient_converts(&arena, &mut tags);
        assert_eq!(report, EliminationReport { passes: 1, demotions: 0 });
    }
}

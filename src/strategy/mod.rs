#![forbid(unsafe_code)]

//! Native/interpreted convert-strategy analysis.
//!
//! [`ConvertStrategy::analyze`] runs the passes in a fixed order over a
//! [`PlanArena`]:
//!
//! 1. [`convertible::propagate_convertibility`] asks the oracle for native
//!    rewrites bottom-up.
//! 2. [`boundary::finalize_stage_boundaries`] pins native-only exchanges.
//! 3. [`ordering::propagate_ordering_requirements`] marks ordering-sensitive
//!    subtrees.
//! 4. [`assign::assign_strategies`] decides every remaining node.
//! 5. [`eliminate::eliminate_inefficient_converts`] demotes wasteful
//!    conversions until nothing changes.
//!
//! The input plan is never mutated; all decisions live in a [`TagTable`].

use tracing::debug;

use crate::config::ConvertConfig;
use crate::error::Result;
use crate::plan::arena::{NodeId, PlanArena};
use crate::plan::physical::PhysicalPlan;

/// Initial per-operator decisions.
pub mod assign;
/// Native-only stage exchanges.
pub mod boundary;
/// Bottom-up convertibility propagation.
pub mod convertible;
/// Fixed-point inefficiency elimination.
pub mod eliminate;
/// Explain tree, decision list and decision hash.
pub mod explain;
/// Native-capability oracle.
pub mod oracle;
/// Ordering-requirement propagation.
pub mod ordering;
/// Opt-in per-pass timing counters.
pub mod profile;
/// Per-node decision tags.
pub mod tags;

pub use eliminate::EliminationReport;
pub use explain::{ExplainNode, ExplainProp, NodeDecision};
pub use oracle::{CatalogOracle, ConvertedNode, NativeForm, NativeOracle};
pub use profile::{profile_snapshot, PassKind, PassTiming, StrategyProfileSnapshot};
pub use tags::{ConvertStrategyTag, DemotionCause, NeverConvertReason, NodeTags, TagTable};

use profile::timed;

/// Entry point of the analysis.
#[derive(Clone, Debug, Default)]
pub struct ConvertStrategy {
    config: ConvertConfig,
}

impl ConvertStrategy {
    /// Creates an analyzer; `config` drives [`Self::analyze_with_catalog`].
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Runs every pass over `plan` using the built-in operator catalogue.
    pub fn analyze_with_catalog(&self, plan: &PhysicalPlan) -> StrategyOutput {
        let oracle = CatalogOracle::new(self.config.clone());
        self.analyze(plan, &oracle)
    }

    /// Runs every pass over `plan`, asking `oracle` for native rewrites.
    pub fn analyze(&self, plan: &PhysicalPlan, oracle: &dyn NativeOracle) -> StrategyOutput {
        let (arena, mut tags) = timed(PassKind::Load, || {
            let arena = PlanArena::from_plan(plan);
            let tags = TagTable::new(&arena);
            (arena, tags)
        });
        let converted = timed(PassKind::Convertible, || {
            convertible::propagate_convertibility(&arena, oracle, &mut tags)
        });
        let forced_boundaries = timed(PassKind::Boundary, || {
            boundary::finalize_stage_boundaries(&arena, &mut tags)
        });
        timed(PassKind::Ordering, || {
            ordering::propagate_ordering_requirements(&arena, &mut tags)
        });
        timed(PassKind::Assign, || assign::assign_strategies(&arena, &mut tags));
        let always_after_assign = tags.always_convert_ids().len();
        let elimination = timed(PassKind::Eliminate, || {
            eliminate::eliminate_inefficient_converts(&arena, &mut tags)
        });

        let report = AnalysisReport {
            nodes: arena.len(),
            forced_boundaries,
            always_after_assign,
            always_final: tags.always_convert_ids().len(),
            elimination,
        };
        debug!(
            nodes = report.nodes,
            forced = report.forced_boundaries,
            assigned_always = report.always_after_assign,
            final_always = report.always_final,
            passes = report.elimination.passes,
            demotions = report.elimination.demotions,
            "strategy.analyze.completed"
        );

        StrategyOutput {
            arena,
            tags,
            converted,
            report,
        }
    }
}

/// Summary counters of one analysis run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    /// Nodes in the plan.
    pub nodes: usize,
    /// Native-only exchanges pinned to `AlwaysConvert`.
    pub forced_boundaries: usize,
    /// `AlwaysConvert` nodes after initial assignment.
    pub always_after_assign: usize,
    /// `AlwaysConvert` nodes after elimination.
    pub always_final: usize,
    /// Elimination loop statistics.
    pub elimination: EliminationReport,
}

/// Result of [`ConvertStrategy::analyze`].
///
/// Node ids follow pre-order over the analyzed plan with the root at `#0`.
#[derive(Debug)]
pub struct StrategyOutput {
    arena: PlanArena,
    tags: TagTable,
    converted: ConvertedNode,
    report: AnalysisReport,
}

impl StrategyOutput {
    /// Arena over the analyzed plan.
    pub fn arena(&self) -> &PlanArena {
        &self.arena
    }

    /// Final strategy of `id`.
    pub fn strategy(&self, id: NodeId) -> ConvertStrategyTag {
        self.tags.strategy(id)
    }

    /// Whether an ancestor relies on `id`'s output ordering.
    pub fn child_ordering_required(&self, id: NodeId) -> bool {
        self.tags.get(id).child_ordering_required
    }

    /// All tags of `id`.
    pub fn tags(&self, id: NodeId) -> &NodeTags {
        self.tags.get(id)
    }

    /// The full tag table.
    pub fn tag_table(&self) -> &TagTable {
        &self.tags
    }

    /// Attempted native form of the whole plan.
    pub fn converted(&self) -> &ConvertedNode {
        &self.converted
    }

    /// Summary counters.
    pub fn report(&self) -> AnalysisReport {
        self.report
    }

    /// Decisions for every node in pre-order.
    pub fn decisions(&self) -> Vec<NodeDecision> {
        explain::collect_decisions(&self.arena, &self.tags)
    }

    /// Decisions encoded as a JSON array.
    pub fn decisions_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.decisions())?)
    }

    /// Explain tree annotated with decisions.
    pub fn explain(&self) -> ExplainNode {
        explain::build_explain_tree(&self.arena, &self.tags)
    }

    /// Deterministic hash of the decisions.
    pub fn decision_hash(&self) -> u64 {
        explain::decision_hash(&self.arena, &self.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::physical::{OpKind, PhysicalNode, PhysicalOp};

    fn plan() -> PhysicalPlan {
        PhysicalPlan::new(PhysicalNode::unary(
            PhysicalOp::Project {
                exprs: vec!["a".into()],
            },
            PhysicalNode::unary(
                PhysicalOp::Coalesce { partitions: 1 },
                PhysicalNode::new(PhysicalOp::LocalTableScan { rows: 8 }),
            ),
        ))
    }

    #[test]
    fn catalogue_analysis_reports_counts() {
        let output = ConvertStrategy::default().analyze_with_catalog(&plan());
        let report = output.report();
        assert_eq!(report.nodes, 3);
        assert_eq!(report.forced_boundaries, 0);
        // Coalesce has no native form, so the scan feeding it is kept and
        // the project above it cannot follow a native input.
        assert_eq!(output.strategy(NodeId(2)), ConvertStrategyTag::AlwaysConvert);
        assert_eq!(output.strategy(NodeId(1)), ConvertStrategyTag::NeverConvert);
        assert_eq!(output.strategy(NodeId(0)), ConvertStrategyTag::NeverConvert);
        assert_eq!(report.always_final, 1);
        assert!(report.always_final <= report.always_after_assign);
    }

    #[test]
    fn closure_oracle_is_accepted() {
        let all_native = |_: &PhysicalOp, _: &[ConvertedNode]| NativeForm::Native;
        let output = ConvertStrategy::default().analyze(&plan(), &all_native);
        assert!(output.converted().is_native());
        assert_eq!(output.converted().op.kind(), OpKind::Project);
        assert_eq!(output.report().always_final, 3);
        assert_eq!(output.decisions().len(), 3);
    }

    #[test]
    fn deep_chain_analyzes_and_drops() {
        let mut node = PhysicalNode::new(PhysicalOp::LocalTableScan { rows: 1 });
        for _ in 0..100_000 {
            node = PhysicalNode::unary(PhysicalOp::LocalLimit { limit: 10 }, node);
        }
        let plan = PhysicalPlan::new(node);
        let output = ConvertStrategy::default().analyze_with_catalog(&plan);
        assert_eq!(output.report().nodes, 100_001);
        assert_eq!(output.report().always_final, 100_001);
        let explain = output.explain();
        let mut depth = 0;
        let mut node = &explain;
        while let Some(input) = node.inputs.first() {
            node = input;
            depth += 1;
        }
        assert_eq!(depth, 100_000);
        drop(explain);
        drop(output);
        drop(plan);
    }
}

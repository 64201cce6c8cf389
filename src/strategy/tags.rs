//! Per-node decision tags written by the analysis passes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::arena::{NodeId, PlanArena};

/// Execution decision for one operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvertStrategyTag {
    /// Not decided yet.
    #[default]
    Default,
    /// Run the native implementation.
    AlwaysConvert,
    /// Run the interpreted implementation.
    NeverConvert,
}

impl fmt::Display for ConvertStrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvertStrategyTag::Default => "Default",
            ConvertStrategyTag::AlwaysConvert => "AlwaysConvert",
            ConvertStrategyTag::NeverConvert => "NeverConvert",
        };
        f.write_str(name)
    }
}

/// Why a node ended up interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeverConvertReason {
    /// The oracle had no native form and no input converted either.
    NoNativeForm,
    /// The oracle had no native form for this operator.
    NotConvertible,
    /// The operator's rule did not hold for its inputs.
    RuleUnsatisfied,
    /// The operator kind has no native rule.
    NoRule,
    /// Demoted by the inefficiency elimination pass.
    Demoted(DemotionCause),
}

/// Pattern that triggered an `AlwaysConvert → NeverConvert` demotion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DemotionCause {
    /// Native filter over an interpreted input.
    FilterOverInterpreted,
    /// Native aggregate over an interpreted input.
    AggregateOverInterpreted,
    /// Native shuffle over an interpreted aggregate.
    ShuffleOverInterpretedAggregate,
    /// Native scan or expand feeding an interpreted consumer.
    BulkProducerFeedsInterpreted,
    /// Native sort with interpreted operators on both sides.
    SortBetweenInterpreted,
}

/// Decision tags of a single node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTags {
    /// Some native rewrite was obtained for this node.
    pub convertible: bool,
    /// The rewrite is an explicit interpreted wrapper.
    pub forced_non_native: bool,
    /// Current decision.
    pub strategy: ConvertStrategyTag,
    /// Output must preserve an ordering an ancestor relies on.
    pub child_ordering_required: bool,
    /// Set whenever `strategy` is `NeverConvert`.
    pub never_convert_reason: Option<NeverConvertReason>,
}

impl Default for NodeTags {
    fn default() -> Self {
        Self {
            convertible: true,
            forced_non_native: false,
            strategy: ConvertStrategyTag::Default,
            child_ordering_required: false,
            never_convert_reason: None,
        }
    }
}

/// Side table of [`NodeTags`] indexed by [`NodeId`].
#[derive(Clone, Debug)]
pub struct TagTable {
    tags: Vec<NodeTags>,
}

impl TagTable {
    /// Fresh tags for every node of `arena`.
    pub fn new(arena: &PlanArena) -> Self {
        Self::with_len(arena.len())
    }

    /// Fresh tags for `len` nodes.
    pub fn with_len(len: usize) -> Self {
        Self {
            tags: vec![NodeTags::default(); len],
        }
    }

    /// Number of tagged nodes.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags of `id`.
    pub fn get(&self, id: NodeId) -> &NodeTags {
        &self.tags[id.index()]
    }

    /// Mutable tags of `id`.
    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeTags {
        &mut self.tags[id.index()]
    }

    /// Current strategy of `id`.
    pub fn strategy(&self, id: NodeId) -> ConvertStrategyTag {
        self.get(id).strategy
    }

    /// Decided to run natively.
    pub fn is_always(&self, id: NodeId) -> bool {
        self.strategy(id) == ConvertStrategyTag::AlwaysConvert
    }

    /// Decided to run interpreted.
    pub fn is_never(&self, id: NodeId) -> bool {
        self.strategy(id) == ConvertStrategyTag::NeverConvert
    }

    /// Runs natively and produces native output (not an interpreted wrapper).
    pub fn is_native(&self, id: NodeId) -> bool {
        let tags = self.get(id);
        tags.strategy == ConvertStrategyTag::AlwaysConvert && !tags.forced_non_native
    }

    /// Marks `id` as converted.
    pub fn set_always(&mut self, id: NodeId) {
        let tags = self.get_mut(id);
        tags.strategy = ConvertStrategyTag::AlwaysConvert;
        tags.never_convert_reason = None;
    }

    /// Marks `id` as interpreted.
    pub fn set_never(&mut self, id: NodeId, reason: NeverConvertReason) {
        let tags = self.get_mut(id);
        tags.strategy = ConvertStrategyTag::NeverConvert;
        tags.never_convert_reason = Some(reason);
    }

    /// Applies the only transition allowed once strategies are assigned.
    ///
    /// Returns `false` (and changes nothing) unless `id` is `AlwaysConvert`.
    pub fn demote(&mut self, id: NodeId, cause: DemotionCause) -> bool {
        if !self.is_always(id) {
            return false;
        }
        self.set_never(id, NeverConvertReason::Demoted(cause));
        true
    }

    /// Ids whose strategy is `AlwaysConvert`, ascending.
    pub fn always_convert_ids(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, tags)| tags.strategy == ConvertStrategyTag::AlwaysConvert)
            .map(|(id, _)| id)
            .collect()
    }

    /// Iterates `(id, tags)` in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeTags)> + '_ {
        self.tags
            .iter()
            .enumerate()
            .map(|(idx, tags)| (NodeId(idx as u32), tags))
    }
}

//! Physical operator tree handed to the convert-strategy analyzer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Physical plan produced by the upstream compiler.
#[derive(Clone, Debug)]
pub struct PhysicalPlan {
    /// The root node of the physical plan tree.
    pub root: PhysicalNode,
}

impl PhysicalPlan {
    /// Creates a new physical plan with the given root node.
    pub fn new(root: PhysicalNode) -> Self {
        Self { root }
    }
}

/// Node within the physical plan tree.
#[derive(Clone, Debug)]
pub struct PhysicalNode {
    /// The physical operator at this node.
    pub op: PhysicalOp,
    /// Child nodes that provide input to this operator.
    pub inputs: Vec<PhysicalNode>,
}

impl PhysicalNode {
    /// Creates a new physical node with no inputs.
    pub fn new(op: PhysicalOp) -> Self {
        Self {
            op,
            inputs: Vec::new(),
        }
    }

    /// Creates a new physical node with a single input.
    pub fn unary(op: PhysicalOp, input: PhysicalNode) -> Self {
        Self {
            op,
            inputs: vec![input],
        }
    }

    /// Creates a new physical node with the given inputs.
    pub fn with_inputs(op: PhysicalOp, inputs: Vec<PhysicalNode>) -> Self {
        Self { op, inputs }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.inputs.iter());
        }
        count
    }
}

impl Drop for PhysicalNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.inputs);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.inputs);
        }
    }
}

/// Physical operators the analyzer knows how to classify.
#[derive(Clone, Debug)]
pub enum PhysicalOp {
    /// Columnar scan over files of a table.
    FileSourceScan {
        /// Table being scanned.
        table: String,
        /// On-disk format of the files.
        format: FileFormat,
    },
    /// Scan through a data-source connector with a native reader.
    DataSourceScan {
        /// Connector-specific source name.
        source: String,
    },
    /// Scan over rows already materialized in the plan.
    LocalTableScan {
        /// Number of literal rows.
        rows: usize,
    },
    /// Generates a numeric sequence without any input.
    Range {
        /// First value (inclusive).
        start: i64,
        /// Last value (exclusive).
        end: i64,
        /// Step between values.
        step: i64,
    },
    /// Projects expressions into the output.
    Project {
        /// Output expressions.
        exprs: Vec<String>,
    },
    /// Filters rows using a predicate.
    Filter {
        /// Predicate expression.
        predicate: String,
    },
    /// Per-partition row limit.
    LocalLimit {
        /// Maximum rows per partition.
        limit: usize,
    },
    /// Global row limit.
    GlobalLimit {
        /// Maximum rows overall.
        limit: usize,
    },
    /// Top-k by ordering followed by a projection.
    TakeOrderedAndProject {
        /// Number of rows kept.
        limit: usize,
        /// Ordering that defines the top rows.
        order: Vec<SortKey>,
        /// Output expressions.
        exprs: Vec<String>,
    },
    /// Emits each input row once per projection set (grouping sets).
    Expand {
        /// Number of projection sets.
        projections: usize,
    },
    /// Evaluates window functions.
    Window {
        /// Partitioning columns.
        partition_by: Vec<String>,
        /// Ordering within each partition.
        order_by: Vec<SortKey>,
    },
    /// Keeps the first rows of each window partition.
    WindowGroupLimit {
        /// Partitioning columns.
        partition_by: Vec<String>,
        /// Ordering within each partition.
        order_by: Vec<SortKey>,
        /// Rows kept per partition.
        limit: usize,
    },
    /// Applies a row generator (explode, inline, ...).
    Generate {
        /// Generator function name.
        generator: String,
    },
    /// Hash aggregation.
    HashAggregate {
        /// Aggregation phase.
        mode: AggregateMode,
        /// Grouping columns.
        grouping: Vec<String>,
    },
    /// Hash aggregation over object-typed buffers.
    ObjectHashAggregate {
        /// Aggregation phase.
        mode: AggregateMode,
        /// Grouping columns.
        grouping: Vec<String>,
    },
    /// Aggregation over input sorted by the grouping columns.
    SortAggregate {
        /// Aggregation phase.
        mode: AggregateMode,
        /// Grouping columns.
        grouping: Vec<String>,
    },
    /// Writes its input through an external command.
    DataWritingCommand {
        /// Command performing the write.
        command: Arc<dyn WriteCommand>,
    },
    /// Sorts its input.
    Sort {
        /// Sort keys.
        order: Vec<SortKey>,
        /// Whether the sort is global (range partitioned) or per partition.
        global: bool,
    },
    /// Repartitions rows between stages.
    ShuffleExchange {
        /// Target partitioning.
        partitioning: Partitioning,
        /// Exchange exists only in native form.
        native_only: bool,
    },
    /// Broadcasts its input to every task of the next stage.
    BroadcastExchange {
        /// Exchange exists only in native form.
        native_only: bool,
    },
    /// Concatenates its inputs.
    Union,
    /// Join over inputs sorted by the join keys.
    SortMergeJoin {
        /// Join type.
        join_type: JoinType,
        /// Keys on the left input.
        left_keys: Vec<String>,
        /// Keys on the right input.
        right_keys: Vec<String>,
    },
    /// Hash join over co-partitioned inputs.
    ShuffledHashJoin {
        /// Join type.
        join_type: JoinType,
        /// Keys on the left input.
        left_keys: Vec<String>,
        /// Keys on the right input.
        right_keys: Vec<String>,
        /// Side materialized into the hash table.
        build_side: BuildSide,
    },
    /// Hash join against a broadcast input.
    BroadcastHashJoin {
        /// Join type.
        join_type: JoinType,
        /// Keys on the left input.
        left_keys: Vec<String>,
        /// Keys on the right input.
        right_keys: Vec<String>,
        /// Side that is broadcast.
        build_side: BuildSide,
    },
    /// Nested-loop join against a broadcast input.
    BroadcastNestedLoopJoin {
        /// Join type.
        join_type: JoinType,
        /// Side that is broadcast.
        build_side: BuildSide,
    },
    /// Cartesian product of two inputs.
    CartesianProduct,
    /// Reduces the number of partitions without a shuffle.
    Coalesce {
        /// Target partition count.
        partitions: usize,
    },
    /// Operator the analyzer has no dedicated rule for.
    Opaque {
        /// Operator name reported by the compiler.
        name: String,
    },
}

impl PhysicalOp {
    /// Returns the fieldless kind of this operator.
    pub fn kind(&self) -> OpKind {
        match self {
            PhysicalOp::FileSourceScan { .. } => OpKind::FileSourceScan,
            PhysicalOp::DataSourceScan { .. } => OpKind::DataSourceScan,
            PhysicalOp::LocalTableScan { .. } => OpKind::LocalTableScan,
            PhysicalOp::Range { .. } => OpKind::Range,
            PhysicalOp::Project { .. } => OpKind::Project,
            PhysicalOp::Filter { .. } => OpKind::Filter,
            PhysicalOp::LocalLimit { .. } => OpKind::LocalLimit,
            PhysicalOp::GlobalLimit { .. } => OpKind::GlobalLimit,
            PhysicalOp::TakeOrderedAndProject { .. } => OpKind::TakeOrderedAndProject,
            PhysicalOp::Expand { .. } => OpKind::Expand,
            PhysicalOp::Window { .. } => OpKind::Window,
            PhysicalOp::WindowGroupLimit { .. } => OpKind::WindowGroupLimit,
            PhysicalOp::Generate { .. } => OpKind::Generate,
            PhysicalOp::HashAggregate { .. } => OpKind::HashAggregate,
            PhysicalOp::ObjectHashAggregate { .. } => OpKind::ObjectHashAggregate,
            PhysicalOp::SortAggregate { .. } => OpKind::SortAggregate,
            PhysicalOp::DataWritingCommand { .. } => OpKind::DataWritingCommand,
            PhysicalOp::Sort { .. } => OpKind::Sort,
            PhysicalOp::ShuffleExchange { .. } => OpKind::ShuffleExchange,
            PhysicalOp::BroadcastExchange { .. } => OpKind::BroadcastExchange,
            PhysicalOp::Union => OpKind::Union,
            PhysicalOp::SortMergeJoin { .. } => OpKind::SortMergeJoin,
            PhysicalOp::ShuffledHashJoin { .. } => OpKind::ShuffledHashJoin,
            PhysicalOp::BroadcastHashJoin { .. } => OpKind::BroadcastHashJoin,
            PhysicalOp::BroadcastNestedLoopJoin { .. } => OpKind::BroadcastNestedLoopJoin,
            PhysicalOp::CartesianProduct => OpKind::CartesianProduct,
            PhysicalOp::Coalesce { .. } => OpKind::Coalesce,
            PhysicalOp::Opaque { .. } => OpKind::Opaque,
        }
    }

    /// Whether this operator is a stage exchange with no interpreted implementation.
    pub fn is_native_only_exchange(&self) -> bool {
        matches!(
            self,
            PhysicalOp::ShuffleExchange {
                native_only: true,
                ..
            } | PhysicalOp::BroadcastExchange { native_only: true }
        )
    }

    /// Ordering each of `child_count` inputs must arrive in.
    ///
    /// An empty entry means the input may arrive in any order. The returned
    /// vector always has exactly `child_count` entries.
    pub fn required_child_ordering(&self, child_count: usize) -> Vec<Vec<SortKey>> {
        let mut required = vec![Vec::new(); child_count];
        match self {
            PhysicalOp::SortMergeJoin {
                left_keys,
                right_keys,
                ..
            } => {
                for (slot, keys) in required.iter_mut().zip([left_keys, right_keys]) {
                    *slot = keys.iter().map(SortKey::asc).collect();
                }
            }
            PhysicalOp::SortAggregate { grouping, .. } => {
                if let Some(slot) = required.first_mut() {
                    *slot = grouping.iter().map(SortKey::asc).collect();
                }
            }
            PhysicalOp::Window {
                partition_by,
                order_by,
            }
            | PhysicalOp::WindowGroupLimit {
                partition_by,
                order_by,
                ..
            } => {
                if let Some(slot) = required.first_mut() {
                    *slot = partition_by
                        .iter()
                        .map(SortKey::asc)
                        .chain(order_by.iter().cloned())
                        .collect();
                }
            }
            PhysicalOp::DataWritingCommand { command } => {
                if let Some(slot) = required.first_mut() {
                    match command.ordering_capability() {
                        Some(capability) => *slot = capability.required_ordering(),
                        None => tracing::trace!(
                            command = command.name(),
                            "strategy.ordering.capability_missing"
                        ),
                    }
                }
            }
            _ => {}
        }
        required
    }
}

/// Fieldless mirror of [`PhysicalOp`] used for rule matching and configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    /// See [`PhysicalOp::FileSourceScan`].
    FileSourceScan,
    /// See [`PhysicalOp::DataSourceScan`].
    DataSourceScan,
    /// See [`PhysicalOp::LocalTableScan`].
    LocalTableScan,
    /// See [`PhysicalOp::Range`].
    Range,
    /// See [`PhysicalOp::Project`].
    Project,
    /// See [`PhysicalOp::Filter`].
    Filter,
    /// See [`PhysicalOp::LocalLimit`].
    LocalLimit,
    /// See [`PhysicalOp::GlobalLimit`].
    GlobalLimit,
    /// See [`PhysicalOp::TakeOrderedAndProject`].
    TakeOrderedAndProject,
    /// See [`PhysicalOp::Expand`].
    Expand,
    /// See [`PhysicalOp::Window`].
    Window,
    /// See [`PhysicalOp::WindowGroupLimit`].
    WindowGroupLimit,
    /// See [`PhysicalOp::Generate`].
    Generate,
    /// See [`PhysicalOp::HashAggregate`].
    HashAggregate,
    /// See [`PhysicalOp::ObjectHashAggregate`].
    ObjectHashAggregate,
    /// See [`PhysicalOp::SortAggregate`].
    SortAggregate,
    /// See [`PhysicalOp::DataWritingCommand`].
    DataWritingCommand,
    /// See [`PhysicalOp::Sort`].
    Sort,
    /// See [`PhysicalOp::ShuffleExchange`].
    ShuffleExchange,
    /// See [`PhysicalOp::BroadcastExchange`].
    BroadcastExchange,
    /// See [`PhysicalOp::Union`].
    Union,
    /// See [`PhysicalOp::SortMergeJoin`].
    SortMergeJoin,
    /// See [`PhysicalOp::ShuffledHashJoin`].
    ShuffledHashJoin,
    /// See [`PhysicalOp::BroadcastHashJoin`].
    BroadcastHashJoin,
    /// See [`PhysicalOp::BroadcastNestedLoopJoin`].
    BroadcastNestedLoopJoin,
    /// See [`PhysicalOp::CartesianProduct`].
    CartesianProduct,
    /// See [`PhysicalOp::Coalesce`].
    Coalesce,
    /// See [`PhysicalOp::Opaque`].
    Opaque,
}

impl OpKind {
    /// Every operator kind, in declaration order.
    pub const ALL: [OpKind; 28] = [
        OpKind::FileSourceScan,
        OpKind::DataSourceScan,
        OpKind::LocalTableScan,
        OpKind::Range,
        OpKind::Project,
        OpKind::Filter,
        OpKind::LocalLimit,
        OpKind::GlobalLimit,
        OpKind::TakeOrderedAndProject,
        OpKind::Expand,
        OpKind::Window,
        OpKind::WindowGroupLimit,
        OpKind::Generate,
        OpKind::HashAggregate,
        OpKind::ObjectHashAggregate,
        OpKind::SortAggregate,
        OpKind::DataWritingCommand,
        OpKind::Sort,
        OpKind::ShuffleExchange,
        OpKind::BroadcastExchange,
        OpKind::Union,
        OpKind::SortMergeJoin,
        OpKind::ShuffledHashJoin,
        OpKind::BroadcastHashJoin,
        OpKind::BroadcastNestedLoopJoin,
        OpKind::CartesianProduct,
        OpKind::Coalesce,
        OpKind::Opaque,
    ];

    /// Stable operator name used in explain output and configuration.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::FileSourceScan => "FileSourceScan",
            OpKind::DataSourceScan => "DataSourceScan",
            OpKind::LocalTableScan => "LocalTableScan",
            OpKind::Range => "Range",
            OpKind::Project => "Project",
            OpKind::Filter => "Filter",
            OpKind::LocalLimit => "LocalLimit",
            OpKind::GlobalLimit => "GlobalLimit",
            OpKind::TakeOrderedAndProject => "TakeOrderedAndProject",
            OpKind::Expand => "Expand",
            OpKind::Window => "Window",
            OpKind::WindowGroupLimit => "WindowGroupLimit",
            OpKind::Generate => "Generate",
            OpKind::HashAggregate => "HashAggregate",
            OpKind::ObjectHashAggregate => "ObjectHashAggregate",
            OpKind::SortAggregate => "SortAggregate",
            OpKind::DataWritingCommand => "DataWritingCommand",
            OpKind::Sort => "Sort",
            OpKind::ShuffleExchange => "ShuffleExchange",
            OpKind::BroadcastExchange => "BroadcastExchange",
            OpKind::Union => "Union",
            OpKind::SortMergeJoin => "SortMergeJoin",
            OpKind::ShuffledHashJoin => "ShuffledHashJoin",
            OpKind::BroadcastHashJoin => "BroadcastHashJoin",
            OpKind::BroadcastNestedLoopJoin => "BroadcastNestedLoopJoin",
            OpKind::CartesianProduct => "CartesianProduct",
            OpKind::Coalesce => "Coalesce",
            OpKind::Opaque => "Opaque",
        }
    }

    /// Aggregation operators.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            OpKind::HashAggregate | OpKind::ObjectHashAggregate | OpKind::SortAggregate
        )
    }

    /// Scans and expansions whose native output is too wide to feed an
    /// interpreted consumer.
    pub fn is_bulk_producer(self) -> bool {
        matches!(self, OpKind::FileSourceScan | OpKind::Expand)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

/// Single sort key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SortKey {
    /// Column the key sorts on.
    pub column: String,
    /// Descending instead of ascending.
    pub descending: bool,
    /// Nulls sort before non-null values.
    pub nulls_first: bool,
}

impl SortKey {
    /// Ascending, nulls-first key on `column`.
    pub fn asc(column: impl AsRef<str>) -> Self {
        Self {
            column: column.as_ref().to_string(),
            descending: false,
            nulls_first: true,
        }
    }

    /// Descending, nulls-last key on `column`.
    pub fn desc(column: impl AsRef<str>) -> Self {
        Self {
            column: column.as_ref().to_string(),
            descending: true,
            nulls_first: false,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.descending { "DESC" } else { "ASC" };
        let nulls = if self.nulls_first {
            "NULLS FIRST"
        } else {
            "NULLS LAST"
        };
        write!(f, "{} {dir} {nulls}", self.column)
    }
}

/// File formats readable by a [`PhysicalOp::FileSourceScan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    /// Apache Parquet.
    Parquet,
    /// Apache ORC.
    Orc,
    /// Delimited text.
    Csv,
}

/// Phase of a (possibly two-phase) aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateMode {
    /// Produces partial buffers.
    Partial,
    /// Merges partial buffers into final values.
    Final,
    /// Single-phase aggregation.
    Complete,
}

/// Join type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    /// Inner join.
    Inner,
    /// Left outer join.
    LeftOuter,
    /// Right outer join.
    RightOuter,
    /// Full outer join.
    FullOuter,
    /// Left semi join.
    LeftSemi,
    /// Left anti join.
    LeftAnti,
}

/// Which join input is materialized for lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildSide {
    /// Left input is the build side.
    Left,
    /// Right input is the build side.
    Right,
}

/// Output partitioning of a shuffle exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Partitioning {
    /// Hash partitioning on columns.
    Hash {
        /// Partitioning columns.
        columns: Vec<String>,
        /// Number of partitions.
        partitions: usize,
    },
    /// Range partitioning on sort keys.
    Range {
        /// Keys defining the ranges.
        order: Vec<SortKey>,
        /// Number of partitions.
        partitions: usize,
    },
    /// Round-robin partitioning.
    RoundRobin {
        /// Number of partitions.
        partitions: usize,
    },
    /// Everything in one partition.
    Single,
}

impl Partitioning {
    /// Number of output partitions.
    pub fn partition_count(&self) -> usize {
        match self {
            Partitioning::Hash { partitions, .. }
            | Partitioning::Range { partitions, .. }
            | Partitioning::RoundRobin { partitions } => *partitions,
            Partitioning::Single => 1,
        }
    }
}

/// External command executed by a [`PhysicalOp::DataWritingCommand`].
pub trait WriteCommand: fmt::Debug + Send + Sync {
    /// Command name, for explain output and logging.
    fn name(&self) -> &str;

    /// Optional capability reporting the row ordering the command needs.
    ///
    /// Commands that do not care about ordering keep the default.
    fn ordering_capability(&self) -> Option<&dyn OrderingCapability> {
        None
    }
}

/// Capability of a write command that needs its input in a specific order.
pub trait OrderingCapability {
    /// Ordering the command's input must arrive in.
    fn required_ordering(&self) -> Vec<SortKey>;
}

#![forbid(unsafe_code)]

//! Physical plan representation consumed by the convert-strategy analyzer.

/// Arena with stable node identifiers and iterative traversals.
pub mod arena;

/// Operator catalogue and plan tree.
///
/// Defines the closed set of physical operators, their parameters, and the
/// optional ordering capability of write commands.
pub mod physical;

pub use arena::{NodeId, PlanArena};
pub use physical::{
    AggregateMode, BuildSide, FileFormat, JoinType, OpKind, OrderingCapability, Partitioning,
    PhysicalNode, PhysicalOp, PhysicalPlan, SortKey, WriteCommand,
};

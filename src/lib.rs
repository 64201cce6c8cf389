//! Decides, per physical operator, whether a query plan runs on the native
//! columnar engine or stays on the interpreted row engine.
//!
//! ```
//! use plan_convert::plan::{PhysicalNode, PhysicalOp, PhysicalPlan};
//! use plan_convert::strategy::{ConvertStrategy, ConvertStrategyTag};
//!
//! let plan = PhysicalPlan::new(PhysicalNode::unary(
//!     PhysicalOp::Filter { predicate: "a > 1".into() },
//!     PhysicalNode::new(PhysicalOp::LocalTableScan { rows: 4 }),
//! ));
//! let output = ConvertStrategy::default().analyze_with_catalog(&plan);
//! assert_eq!(output.strategy(output.arena().root()), ConvertStrategyTag::AlwaysConvert);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod plan;
pub mod strategy;

pub use config::ConvertConfig;
pub use error::{ConvertError, Result};
pub use strategy::{ConvertStrategy, StrategyOutput};

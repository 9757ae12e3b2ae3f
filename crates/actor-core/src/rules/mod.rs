//! Rules: configuration, loading and evaluation

pub mod engine;
pub mod log;
pub mod rule;

pub use engine::RuleEngine;
pub use log::{CycleLog, ExecutionStatus, UnitResult};
pub use rule::{FixerGroupConfig, FixerUnit, Rule, RuleConfig, Unit, UnitOptions};

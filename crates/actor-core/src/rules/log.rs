//! Rule cycle logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin::Capability;

/// Result of evaluating a single reporter, checker or fixer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    /// Name of the rule the unit belongs to
    pub rule_name: String,
    /// Reporter, checker or fixer
    pub capability: Capability,
    /// Export name of the unit within its rule
    pub unit: String,
    /// Value returned by the plugin, when it ran successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Execution status
    pub status: ExecutionStatus,
}

/// Status of unit execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Unit ran successfully
    Success,
    /// Unit raised an error; the cycle went on without it
    Failed {
        /// Human-readable reason for failure
        reason: String,
    },
    /// Fixer was not triggered
    Skipped {
        /// Human-readable reason for skip
        reason: String,
    },
}

/// Log of one rule engine cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleLog {
    /// When this evaluation occurred
    pub executed_at: DateTime<Utc>,
    /// Results of all evaluated units, in evaluation order
    pub results: Vec<UnitResult>,
}

impl CycleLog {
    /// Create a new cycle log
    pub fn new(results: Vec<UnitResult>) -> Self {
        Self {
            executed_at: Utc::now(),
            results,
        }
    }

    /// Get the number of successful units
    pub fn success_count(&self) -> usize {
        self.results.iter()
            .filter(|r| matches!(r.status, ExecutionStatus::Success))
            .count()
    }

    /// Get the number of failed units
    pub fn failure_count(&self) -> usize {
        self.results.iter()
            .filter(|r| matches!(r.status, ExecutionStatus::Failed { .. }))
            .count()
    }

    /// Get the number of fixers that were not triggered
    pub fn skipped_count(&self) -> usize {
        self.results.iter()
            .filter(|r| matches!(r.status, ExecutionStatus::Skipped { .. }))
            .count()
    }

    /// `(rule, fixer)` pairs that ran successfully this cycle
    pub fn fired_fixers(&self) -> Vec<(&str, &str)> {
        self.results.iter()
            .filter(|r| r.capability == Capability::Fixer && r.status == ExecutionStatus::Success)
            .map(|r| (r.rule_name.as_str(), r.unit.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(capability: Capability, status: ExecutionStatus) -> UnitResult {
        UnitResult {
            rule_name: "test".to_string(),
            capability,
            unit: "notify".to_string(),
            value: None,
            status,
        }
    }

    #[test]
    fn test_cycle_log_counts() {
        let log = CycleLog::new(vec![
            result(Capability::Fixer, ExecutionStatus::Success),
            result(
                Capability::Checker,
                ExecutionStatus::Failed {
                    reason: "error".to_string(),
                },
            ),
            result(
                Capability::Fixer,
                ExecutionStatus::Skipped {
                    reason: "not triggered".to_string(),
                },
            ),
        ]);

        assert_eq!(log.success_count(), 1);
        assert_eq!(log.failure_count(), 1);
        assert_eq!(log.skipped_count(), 1);
        assert_eq!(log.fired_fixers(), vec![("test", "notify")]);
    }
}

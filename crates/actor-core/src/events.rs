use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every activity, flow and pause transition produces an Event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ActivityStarted {
        identifier: String,
        planned_minutes: f64,
        at: DateTime<Utc>,
    },
    ActivityFinished {
        identifier: String,
        at: DateTime<Utc>,
    },
    FlowStarted {
        identifier: String,
        activities: Vec<String>,
        at: DateTime<Utc>,
    },
    /// The flow ran out of activities or was unset.
    FlowFinished {
        identifier: String,
        at: DateTime<Utc>,
    },
    Paused {
        until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Resumed {
        at: DateTime<Utc>,
    },
}

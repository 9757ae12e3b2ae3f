//! Flow state machine.
//!
//! A flow walks its plan one activity at a time. Like the rest of the core
//! it has no thread of its own: the orchestrator calls `tick()` every cycle.
//!
//! ## State Transitions
//!
//! ```text
//! NotStarted -> ActivityActive -> ActivityActive (next) -> ... -> Completed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::{generate_plan, total_minutes, ActivitySpec};
use crate::error::ScheduleError;
use crate::events::Event;
use crate::expiration::{duration_to_minutes, minutes_to_duration};

/// Whoever owns the "current activity" slot.
pub trait ActivationHost {
    /// Make `identifier` the current activity for `planned_minutes`.
    fn activate(&mut self, identifier: &str, planned_minutes: f64);

    /// Clear the current activity.
    fn deactivate(&mut self);

    /// The flow has run out of activities.
    fn flow_finished(&mut self);

    /// Whether a current activity is set.
    fn has_activity(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    NotStarted,
    ActivityActive,
    Completed,
}

/// A planned sequence of activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    identifier: String,
    time_limit: Option<f64>,
    plan: Vec<ActivitySpec>,
    current_index: Option<usize>,
    started_at: Option<DateTime<Utc>>,
    status: FlowStatus,
}

impl Flow {
    /// Plan `activities` into `time_limit` minutes.
    ///
    /// # Errors
    ///
    /// Any planning error from [`generate_plan`].
    pub fn new(
        identifier: impl Into<String>,
        activities: Vec<ActivitySpec>,
        time_limit: Option<f64>,
    ) -> Result<Self, ScheduleError> {
        let identifier = identifier.into();
        let plan = generate_plan(&identifier, activities, time_limit)?;

        tracing::info!(flow = %identifier, total_minutes = total_minutes(&plan), "generated plan");
        for spec in &plan {
            tracing::info!(flow = %identifier, "  {spec}");
        }

        Ok(Self {
            identifier,
            time_limit,
            plan,
            current_index: None,
            started_at: None,
            status: FlowStatus::NotStarted,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn time_limit(&self) -> Option<f64> {
        self.time_limit
    }

    pub fn plan(&self) -> &[ActivitySpec] {
        &self.plan
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// The active spec, if an activity of this flow is running.
    pub fn current_activity(&self) -> Option<&ActivitySpec> {
        if self.status != FlowStatus::ActivityActive {
            return None;
        }
        self.current_index.and_then(|i| self.plan.get(i))
    }

    /// True when the host dropped the activity or its planned time is over.
    pub fn current_activity_expired(&self, host: &dyn ActivationHost, now: DateTime<Utc>) -> bool {
        let (Some(spec), Some(started_at)) = (self.current_activity(), self.started_at) else {
            return false;
        };
        if !host.has_activity() {
            return true;
        }
        now - started_at > minutes_to_duration(spec.planned_duration())
    }

    /// Minutes left for the current activity.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        let spec = self.current_activity()?;
        let started_at = self.started_at?;
        let left = minutes_to_duration(spec.planned_duration()) - (now - started_at);
        Some(duration_to_minutes(left).max(0.0))
    }

    /// Minutes left for the current activity and every later one.
    pub fn remaining_total(&self, now: DateTime<Utc>) -> f64 {
        match (self.status, self.current_index) {
            (FlowStatus::NotStarted, _) => total_minutes(&self.plan),
            (FlowStatus::ActivityActive, Some(i)) => {
                let later = self.plan.get(i + 1..).map(total_minutes).unwrap_or(0.0);
                self.remaining(now).unwrap_or(0.0) + later
            }
            _ => 0.0,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Activate the next planned activity, or finish the flow when the plan
    /// is exhausted. The host hears `flow_finished` exactly once.
    pub fn start_next_activity(&mut self, host: &mut dyn ActivationHost, now: DateTime<Utc>) -> Option<Event> {
        if self.status == FlowStatus::Completed {
            return None;
        }

        let next = self.current_index.map_or(0, |i| i + 1);
        match self.plan.get(next) {
            Some(spec) => {
                self.current_index = Some(next);
                self.started_at = Some(now);
                self.status = FlowStatus::ActivityActive;

                let planned_minutes = spec.planned_duration();
                tracing::info!(
                    flow = %self.identifier,
                    activity = %spec.identifier,
                    planned_minutes,
                    "starting activity"
                );
                host.activate(&spec.identifier, planned_minutes);
                Some(Event::ActivityStarted {
                    identifier: spec.identifier.clone(),
                    planned_minutes,
                    at: now,
                })
            }
            None => {
                self.status = FlowStatus::Completed;
                self.started_at = None;
                tracing::info!(flow = %self.identifier, "flow finished");
                host.flow_finished();
                Some(Event::FlowFinished {
                    identifier: self.identifier.clone(),
                    at: now,
                })
            }
        }
    }

    /// Call periodically.
    pub fn tick(&mut self, host: &mut dyn ActivationHost, now: DateTime<Utc>) -> Option<Event> {
        match self.status {
            FlowStatus::NotStarted => self.start_next_activity(host, now),
            FlowStatus::ActivityActive => {
                if !self.current_activity_expired(host, now) {
                    return None;
                }
                host.deactivate();
                self.start_next_activity(host, now)
            }
            FlowStatus::Completed => None,
        }
    }
}

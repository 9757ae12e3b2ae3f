//! Tick loop tying rules, the current activity and the current flow together.
//!
//! Each tick, unless paused:
//!
//! ```text
//! clear caches -> run rule cycle -> run current activity -> tick flow
//! ```
//!
//! The orchestrator owns every piece of runtime state; there is no global
//! context. It is also the flow's [`ActivationHost`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityConfig, ActivityState};
use crate::config::{Config, FlowConfig};
use crate::error::{ConfigError, ScheduleError};
use crate::events::Event;
use crate::expiration::{minutes_in_range, time_limit, Expiration};
use crate::flow::{ActivationHost, Flow, FlowStatus};
use crate::plugin::{Caches, PluginRegistry};
use crate::rules::{CycleLog, RuleEngine};

/// What happened during one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    /// The tick was skipped because of a pause.
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<CycleLog>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

/// Snapshot of the running flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub identifier: String,
    pub status: FlowStatus,
    pub current_index: Option<usize>,
    pub activities: Vec<String>,
    pub remaining_minutes: f64,
}

/// Serialisable runtime status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub activity: Option<String>,
    /// `None` for an unlimited activity.
    pub activity_remaining_minutes: Option<f64>,
    pub flow: Option<FlowSnapshot>,
    pub paused_until: Option<DateTime<Utc>>,
    pub rules: usize,
}

pub struct Orchestrator {
    caches: Caches,
    engine: RuleEngine,
    activities: IndexMap<String, ActivityConfig>,
    flows: IndexMap<String, FlowConfig>,
    activity: Option<Activity>,
    flow: Option<Flow>,
    pause: Option<Expiration>,
    tick_interval: StdDuration,
    /// Clock of the command or tick in progress, for host callbacks.
    clock: DateTime<Utc>,
    /// Events raised by host callbacks, drained into the next report.
    pending: Vec<Event>,
}

impl Orchestrator {
    pub fn new(registry: Arc<PluginRegistry>, engine: RuleEngine) -> Self {
        Self {
            caches: Caches::new(registry),
            engine,
            activities: IndexMap::new(),
            flows: IndexMap::new(),
            activity: None,
            flow: None,
            pause: None,
            tick_interval: StdDuration::from_secs(2),
            clock: Utc::now(),
            pending: Vec::new(),
        }
    }

    /// Build from configuration. Rules that fail to load are skipped and
    /// returned alongside the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn from_config(
        config: &Config,
        registry: Arc<PluginRegistry>,
    ) -> Result<(Self, Vec<(String, ConfigError)>), ConfigError> {
        config.validate()?;
        let (engine, failures) = RuleEngine::from_configs(&config.all_rules(), &registry);

        let mut orchestrator = Self::new(registry, engine)
            .with_tick_interval(StdDuration::from_secs(config.tick_interval_secs));
        for activity in &config.activities {
            orchestrator.add_activity(activity.clone());
        }
        for flow in &config.flows {
            orchestrator.add_flow(flow.clone());
        }
        Ok((orchestrator, failures))
    }

    pub fn with_tick_interval(mut self, interval: StdDuration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn add_activity(&mut self, config: ActivityConfig) {
        self.activities.insert(config.identifier.clone(), config);
    }

    pub fn add_flow(&mut self, config: FlowConfig) {
        self.flows.insert(config.identifier.clone(), config);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn current_activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    pub fn current_flow(&self) -> Option<&Flow> {
        self.flow.as_ref()
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.pause.as_ref().is_some_and(|p| !p.is_expired(now))
    }

    pub fn status(&self, now: DateTime<Utc>) -> Status {
        Status {
            activity: self.activity.as_ref().map(|a| a.identifier().to_string()),
            activity_remaining_minutes: self.activity.as_ref().and_then(|a| a.remaining(now)),
            flow: self.flow.as_ref().map(|flow| FlowSnapshot {
                identifier: flow.identifier().to_string(),
                status: flow.status(),
                current_index: flow.current_index(),
                activities: flow.plan().iter().map(|s| s.identifier.clone()).collect(),
                remaining_minutes: flow.remaining_total(now),
            }),
            paused_until: self
                .pause
                .as_ref()
                .filter(|p| !p.is_expired(now))
                .map(Expiration::expires_at),
            rules: self.engine.rules().len(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Make `identifier` the current activity, replacing any other.
    /// A non-positive limit means unlimited.
    ///
    /// # Errors
    ///
    /// `Refused` while a flow runs, `UnknownActivity` for unknown identifiers,
    /// `InvalidDuration` for a limit that is not a usable number of minutes.
    pub fn set_activity(
        &mut self,
        identifier: &str,
        minutes: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, ScheduleError> {
        if self.flow.is_some() {
            tracing::warn!(activity = identifier, "activity cannot be set, flow in progress");
            return Err(ScheduleError::Refused(format!(
                "Activity {identifier} cannot be set, flow in progress"
            )));
        }
        let minutes = time_limit(minutes)?;
        self.clock = now;
        self.start_activity(identifier, minutes, now)?;
        self.pending.push(Event::ActivityStarted {
            identifier: identifier.to_string(),
            planned_minutes: minutes.unwrap_or(0.0),
            at: now,
        });
        Ok(self.drain_events())
    }

    /// # Errors
    ///
    /// `Refused` while a flow runs.
    pub fn unset_activity(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>, ScheduleError> {
        if self.flow.is_some() {
            tracing::warn!("activity cannot be unset, flow in progress");
            return Err(ScheduleError::Refused(
                "Activity cannot be unset, flow in progress".to_string(),
            ));
        }
        self.clock = now;
        self.deactivate();
        Ok(self.drain_events())
    }

    /// Plan flow `identifier` into `minutes`; it starts on the next tick.
    /// A non-positive limit means unlimited.
    ///
    /// # Errors
    ///
    /// `Refused` while another flow runs, `UnknownFlow`/`UnknownActivity`
    /// for unknown identifiers, `InvalidDuration`, and any planning error.
    pub fn set_flow(
        &mut self,
        identifier: &str,
        minutes: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, ScheduleError> {
        if let Some(running) = &self.flow {
            tracing::warn!(flow = identifier, running = running.identifier(), "flow already in progress");
            return Err(ScheduleError::Refused(format!(
                "Cannot set flow {identifier}, flow already in progress"
            )));
        }
        let config = self
            .flows
            .get(identifier)
            .ok_or_else(|| ScheduleError::UnknownFlow(identifier.to_string()))?;
        if let Some(missing) = config
            .activities
            .iter()
            .find(|a| !self.activities.contains_key(&a.activity))
        {
            return Err(ScheduleError::UnknownActivity(missing.activity.clone()));
        }

        let minutes = time_limit(minutes)?;
        tracing::info!(flow = identifier, minutes = ?minutes, "setting flow");
        let flow = Flow::new(identifier, config.specs(), minutes)?;
        let event = Event::FlowStarted {
            identifier: identifier.to_string(),
            activities: flow.plan().iter().map(|s| s.identifier.clone()).collect(),
            at: now,
        };
        self.flow = Some(flow);
        self.clock = now;
        self.pending.push(event);
        Ok(self.drain_events())
    }

    /// Drop the running flow and its activity.
    ///
    /// # Errors
    ///
    /// `Refused` when no flow is running.
    pub fn unset_flow(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>, ScheduleError> {
        let flow = self
            .flow
            .take()
            .ok_or_else(|| ScheduleError::Refused("No flow in progress".to_string()))?;
        tracing::info!(flow = flow.identifier(), "unsetting flow");
        self.clock = now;
        self.deactivate();
        self.pending.push(Event::FlowFinished {
            identifier: flow.identifier().to_string(),
            at: now,
        });
        Ok(self.drain_events())
    }

    /// Force the running flow to its next activity.
    ///
    /// # Errors
    ///
    /// `Refused` when no flow is running.
    pub fn next_activity(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>, ScheduleError> {
        let Some(mut flow) = self.flow.take() else {
            tracing::error!("next activity cannot be started, no flow in progress");
            return Err(ScheduleError::Refused(
                "Next activity cannot be started, no flow in progress".to_string(),
            ));
        };
        tracing::info!(flow = flow.identifier(), "force forwarding to next activity");
        self.clock = now;
        self.deactivate();
        let event = flow.start_next_activity(self, now);
        self.restore_flow(flow, event);
        Ok(self.drain_events())
    }

    /// Suspend ticking for `minutes`.
    ///
    /// # Errors
    ///
    /// `InvalidDuration` unless `minutes` is positive and in range.
    pub fn pause(&mut self, minutes: f64, now: DateTime<Utc>) -> Result<Event, ScheduleError> {
        if !minutes_in_range(minutes) || minutes <= 0.0 {
            return Err(ScheduleError::InvalidDuration(minutes));
        }
        let pause = Expiration::from_minutes(now, minutes);
        tracing::info!(minutes, "pausing for {minutes} minutes");
        let event = Event::Paused {
            until: pause.expires_at(),
            at: now,
        };
        self.pause = Some(pause);
        Ok(event)
    }

    /// Run one tick at `now`.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        self.clock = now;

        if let Some(pause) = self.pause.as_mut() {
            if !pause.is_expired(now) {
                tracing::trace!("paused, skipping tick");
                return TickReport {
                    at: now,
                    paused: true,
                    cycle: None,
                    events: Vec::new(),
                };
            }
            if pause.just_expired(now) {
                tracing::info!("resumed");
                self.pending.push(Event::Resumed { at: now });
            }
            self.pause = None;
        }

        self.caches.clear();
        let cycle = self.engine.run_cycle(&mut self.caches);

        if let Some(activity) = self.activity.as_mut() {
            if activity.run(now, &mut self.caches.fixers) == ActivityState::Expired {
                tracing::info!(activity = activity.identifier(), "activity expired");
                self.deactivate();
            }
        }

        if let Some(mut flow) = self.flow.take() {
            let event = flow.tick(self, now);
            self.restore_flow(flow, event);
        }

        TickReport {
            at: now,
            paused: false,
            cycle: Some(cycle),
            events: self.drain_events(),
        }
    }

    /// Tick on the configured interval, `ticks` times or forever.
    /// Returns the number of ticks run.
    pub fn run(&mut self, ticks: Option<u64>) -> u64 {
        tracing::info!(interval = ?self.tick_interval, "started");
        let mut count = 0;
        loop {
            let report = self.tick_at(Utc::now());
            for event in &report.events {
                tracing::debug!(event = ?event, "event");
            }
            count += 1;
            if ticks.is_some_and(|limit| count >= limit) {
                return count;
            }
            std::thread::sleep(self.tick_interval);
        }
    }

    fn start_activity(&mut self, identifier: &str, minutes: Option<f64>, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let config = self
            .activities
            .get(identifier)
            .cloned()
            .ok_or_else(|| ScheduleError::UnknownActivity(identifier.to_string()))?;
        tracing::info!(activity = identifier, minutes = ?minutes, "setting activity");
        self.deactivate();
        self.activity = Some(Activity::start(&config, minutes, now, &mut self.caches.fixers));
        Ok(())
    }

    fn restore_flow(&mut self, flow: Flow, event: Option<Event>) {
        self.pending.extend(event);
        if flow.status() != FlowStatus::Completed {
            self.flow = Some(flow);
        }
    }

    fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending)
    }
}

impl ActivationHost for Orchestrator {
    fn activate(&mut self, identifier: &str, planned_minutes: f64) {
        if let Err(e) = self.start_activity(identifier, Some(planned_minutes), self.clock) {
            tracing::error!(activity = identifier, error = %e, "flow activity cannot be started");
        }
    }

    fn deactivate(&mut self) {
        if let Some(activity) = self.activity.take() {
            tracing::info!(activity = activity.identifier(), "unsetting activity");
            self.pending.push(Event::ActivityFinished {
                identifier: activity.identifier().to_string(),
                at: self.clock,
            });
        }
    }

    fn flow_finished(&mut self) {
        tracing::info!("flow has no activities left");
    }

    fn has_activity(&self) -> bool {
        self.activity.is_some()
    }
}

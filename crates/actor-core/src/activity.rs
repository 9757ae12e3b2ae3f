//! Activities: a named, time-boxed behaviour holder.
//!
//! An activity is assembled from a fixed list of behaviours. Each behaviour
//! decides from the configuration whether it takes part; the active ones are
//! set up once when the activity starts and run on every tick after that.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PluginError;
use crate::expiration::{duration_to_minutes, Expiration};
use crate::plugin::{CallArgs, InvocationCache};

/// An activity as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    pub identifier: String,

    /// Message shown when the activity starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,

    #[serde(default = "default_notification_timeout_ms")]
    pub notification_timeout_ms: u64,

    #[serde(default = "default_notification_headline")]
    pub notification_headline: String,

    /// Warn as the remaining time crosses each checkpoint.
    #[serde(default)]
    pub progress_notifications: bool,

    /// Remaining-time fractions, largest first.
    #[serde(default = "default_progress_checkpoints")]
    pub progress_checkpoints: Vec<f64>,

    /// Time tracker activity to start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timetracking_id: Option<String>,

    /// Fixers run once when the activity starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub startup_fixers: Vec<StartupFixer>,
}

fn default_notification_timeout_ms() -> u64 {
    30_000
}

fn default_notification_headline() -> String {
    "Actor".to_string()
}

fn default_progress_checkpoints() -> Vec<f64> {
    vec![0.5, 0.25, 0.1]
}

impl ActivityConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            notification: None,
            notification_timeout_ms: default_notification_timeout_ms(),
            notification_headline: default_notification_headline(),
            progress_notifications: false,
            progress_checkpoints: default_progress_checkpoints(),
            timetracking_id: None,
            startup_fixers: Vec::new(),
        }
    }
}

/// A fixer call made when an activity starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupFixer {
    pub fixer: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

/// What a behaviour can reach while it runs.
pub struct ActivityContext<'a> {
    pub identifier: &'a str,
    pub expiration: Option<&'a Expiration>,
    pub now: DateTime<Utc>,
    fixers: &'a mut InvocationCache,
}

impl ActivityContext<'_> {
    /// Run a fixer on behalf of the activity. Stateful fixers get one
    /// instance per activity.
    pub fn fix(&mut self, fixer: &str, call: CallArgs) -> Result<Value, PluginError> {
        let context = format!("activity:{}", self.identifier);
        self.fixers.get(fixer, &call, Some(&context))
    }
}

/// One facet of an activity.
pub trait Behavior: Send {
    /// Whether `config` asks for this behaviour.
    fn is_active(config: &ActivityConfig) -> bool
    where
        Self: Sized;

    fn from_config(config: &ActivityConfig) -> Self
    where
        Self: Sized;

    fn name(&self) -> &'static str;

    fn setup(&mut self, _ctx: &mut ActivityContext<'_>) -> Result<(), PluginError> {
        Ok(())
    }

    fn run(&mut self, _ctx: &mut ActivityContext<'_>) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Starts time tracking through the `track` fixer.
pub struct TimetrackingBehavior {
    timetracking_id: String,
}

impl Behavior for TimetrackingBehavior {
    fn is_active(config: &ActivityConfig) -> bool {
        config.timetracking_id.is_some()
    }

    fn from_config(config: &ActivityConfig) -> Self {
        Self {
            timetracking_id: config.timetracking_id.clone().unwrap_or_default(),
        }
    }

    fn name(&self) -> &'static str {
        "timetracking"
    }

    fn setup(&mut self, ctx: &mut ActivityContext<'_>) -> Result<(), PluginError> {
        tracing::info!(activity = ctx.identifier, tracking = %self.timetracking_id, "starting time tracking");
        ctx.fix("track", CallArgs::new().kwarg("activity", self.timetracking_id.as_str()))?;
        Ok(())
    }
}

/// Issues a notification when the activity starts.
pub struct NotificationBehavior {
    message: String,
    timeout_ms: u64,
    headline: String,
}

impl Behavior for NotificationBehavior {
    fn is_active(config: &ActivityConfig) -> bool {
        config.notification.is_some()
    }

    fn from_config(config: &ActivityConfig) -> Self {
        Self {
            message: config.notification.clone().unwrap_or_default(),
            timeout_ms: config.notification_timeout_ms,
            headline: config.notification_headline.clone(),
        }
    }

    fn name(&self) -> &'static str {
        "notification"
    }

    fn setup(&mut self, ctx: &mut ActivityContext<'_>) -> Result<(), PluginError> {
        ctx.fix("notify", notification(&self.message, self.timeout_ms, &self.headline))?;
        Ok(())
    }
}

/// Runs the configured startup fixers in order.
pub struct StartupFixersBehavior {
    fixers: Vec<StartupFixer>,
}

impl Behavior for StartupFixersBehavior {
    fn is_active(config: &ActivityConfig) -> bool {
        !config.startup_fixers.is_empty()
    }

    fn from_config(config: &ActivityConfig) -> Self {
        Self {
            fixers: config.startup_fixers.clone(),
        }
    }

    fn name(&self) -> &'static str {
        "startup_fixers"
    }

    fn setup(&mut self, ctx: &mut ActivityContext<'_>) -> Result<(), PluginError> {
        // A failing fixer does not stop the ones after it.
        let mut first_error = None;
        for startup in &self.fixers {
            if let Err(e) = ctx.fix(&startup.fixer, CallArgs::from_kwargs(startup.params.clone())) {
                tracing::error!(activity = ctx.identifier, fixer = %startup.fixer, error = %e, "startup fixer failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Warns when the remaining time drops below each checkpoint.
pub struct ProgressNotificationBehavior {
    checkpoints: Vec<f64>,
    remaining: VecDeque<f64>,
}

impl Behavior for ProgressNotificationBehavior {
    fn is_active(config: &ActivityConfig) -> bool {
        config.progress_notifications
    }

    fn from_config(config: &ActivityConfig) -> Self {
        Self {
            checkpoints: config.progress_checkpoints.clone(),
            remaining: VecDeque::new(),
        }
    }

    fn name(&self) -> &'static str {
        "progress_notifications"
    }

    fn setup(&mut self, _ctx: &mut ActivityContext<'_>) -> Result<(), PluginError> {
        self.remaining = self.checkpoints.iter().copied().collect();
        Ok(())
    }

    fn run(&mut self, ctx: &mut ActivityContext<'_>) -> Result<(), PluginError> {
        let Some(expiration) = ctx.expiration else {
            return Ok(());
        };
        let Some(&closest) = self.remaining.front() else {
            return Ok(());
        };

        if expiration.remaining_fraction(ctx.now) < closest {
            self.remaining.pop_front();
            let message = format!(
                "Less than {}% time for current activity remaining.",
                closest * 100.0
            );
            ctx.fix("notify", notification(&message, 10_000, "Actor"))?;
        }
        Ok(())
    }
}

fn notification(message: &str, timeout_ms: u64, headline: &str) -> CallArgs {
    CallArgs::new()
        .kwarg("message", message)
        .kwarg("timeout", json!(timeout_ms))
        .kwarg("headline", headline)
}

fn select<B: Behavior + 'static>(config: &ActivityConfig, behaviors: &mut Vec<Box<dyn Behavior>>) {
    if B::is_active(config) {
        behaviors.push(Box::new(B::from_config(config)));
    }
}

/// The active behaviours for `config`, in setup order.
pub fn behaviors_for(config: &ActivityConfig) -> Vec<Box<dyn Behavior>> {
    let mut behaviors = Vec::new();
    select::<TimetrackingBehavior>(config, &mut behaviors);
    select::<NotificationBehavior>(config, &mut behaviors);
    select::<StartupFixersBehavior>(config, &mut behaviors);
    select::<ProgressNotificationBehavior>(config, &mut behaviors);
    behaviors
}

/// Outcome of one activity tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Running,
    Expired,
}

/// The current activity.
pub struct Activity {
    identifier: String,
    expiration: Option<Expiration>,
    behaviors: Vec<Box<dyn Behavior>>,
}

impl Activity {
    /// Start an activity for `minutes`, or without limit, and run the setup
    /// of every active behaviour. Setup failures are logged.
    pub fn start(
        config: &ActivityConfig,
        minutes: Option<f64>,
        now: DateTime<Utc>,
        fixers: &mut InvocationCache,
    ) -> Self {
        let mut activity = Self {
            identifier: config.identifier.clone(),
            expiration: minutes.map(|m| Expiration::from_minutes(now, m)),
            behaviors: behaviors_for(config),
        };

        let names: Vec<&str> = activity.behaviors.iter().map(|b| b.name()).collect();
        tracing::info!(activity = %activity.identifier, minutes = ?minutes, behaviors = ?names, "activity started");

        let mut ctx = ActivityContext {
            identifier: &activity.identifier,
            expiration: activity.expiration.as_ref(),
            now,
            fixers,
        };
        for behavior in activity.behaviors.iter_mut() {
            if let Err(e) = behavior.setup(&mut ctx) {
                tracing::error!(activity = ctx.identifier, behavior = behavior.name(), error = %e, "setup failed");
            }
        }
        activity
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn expiration(&self) -> Option<&Expiration> {
        self.expiration.as_ref()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.as_ref().is_some_and(|e| e.is_expired(now))
    }

    /// Minutes left, `None` when unlimited.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        self.expiration
            .as_ref()
            .map(|e| duration_to_minutes(e.remaining(now)))
    }

    /// Run every behaviour, unless the activity has expired.
    pub fn run(&mut self, now: DateTime<Utc>, fixers: &mut InvocationCache) -> ActivityState {
        if self.is_expired(now) {
            return ActivityState::Expired;
        }

        let mut ctx = ActivityContext {
            identifier: &self.identifier,
            expiration: self.expiration.as_ref(),
            now,
            fixers,
        };
        for behavior in self.behaviors.iter_mut() {
            if let Err(e) = behavior.run(&mut ctx) {
                tracing::error!(activity = ctx.identifier, behavior = behavior.name(), error = %e, "behaviour failed");
            }
        }
        ActivityState::Running
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.behaviors.iter().map(|b| b.name()).collect();
        f.debug_struct("Activity")
            .field("identifier", &self.identifier)
            .field("expiration", &self.expiration)
            .field("behaviors", &names)
            .finish()
    }
}

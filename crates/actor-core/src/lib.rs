//! # Actor Core Library
//!
//! This library provides the core of Actor: a periodic rule evaluator and an
//! activity flow scheduler. Desktop integrations are plugins; the core only
//! decides when and how often they run.
//!
//! ## Architecture
//!
//! - **Plugins**: reporters, checkers and fixers behind a registry, invoked
//!   through a memoizing cache that honours each plugin's statefulness and
//!   side effects
//! - **Rules**: reporters feed checkers, checkers feed trigger formulas, and
//!   triggered fixers act
//! - **Flows**: an ordered list of activities fitted into a time budget by
//!   shrinking or skipping them
//! - **Orchestrator**: the tick loop tying rules, activities and flows together
//!
//! ## Key Components
//!
//! - [`InvocationCache`]: Per-cycle memoizing plugin dispatcher
//! - [`RuleEngine`]: Runs one evaluation cycle over every rule
//! - [`Flow`]: Time-budget plan and activation state machine
//! - [`Orchestrator`]: Owns all runtime state and drives the tick
//! - [`Config`]: Application configuration management

pub mod activity;
pub mod builtin;
pub mod config;
pub mod error;
pub mod events;
pub mod expiration;
pub mod flow;
pub mod orchestrator;
pub mod plugin;
pub mod rules;
pub mod trigger;

pub use activity::{Activity, ActivityConfig, Behavior};
pub use config::{data_dir, Config, FlowActivity, FlowConfig};
pub use error::{ConfigError, CoreError, PluginError, ScheduleError, TriggerError};
pub use events::Event;
pub use expiration::Expiration;
pub use flow::{generate_plan, ActivationHost, ActivitySpec, Flow, FlowStatus};
pub use orchestrator::{Orchestrator, Status, TickReport};
pub use plugin::{Caches, CallArgs, Capability, InvocationCache, Plugin, PluginDescriptor, PluginRegistry};
pub use rules::{CycleLog, Rule, RuleConfig, RuleEngine};
pub use trigger::{Predicate, TriggerCompiler};

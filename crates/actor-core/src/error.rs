//! Core error types for actor-core.
//!
//! This module defines the error hierarchy using thiserror. Configuration
//! and resolution errors surface to the loader; plugin runtime errors are
//! caught per unit by the rule engine and only logged.

use std::path::PathBuf;
use thiserror::Error;

use crate::plugin::Capability;

/// Core error type for actor-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plugin resolution, usage and runtime errors
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Trigger formula errors
    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    /// Flow planning and activation errors
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors. Fatal to the rule or flow being loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Two reporters or two checkers of one rule export the same name
    #[error("Rule '{rule}' has a name clash in {kind} for: {names:?}. Use the export_as option to differentiate")]
    DuplicateExport {
        rule: String,
        kind: &'static str,
        names: Vec<String>,
    },

    /// A fixer group without a `fixers` list
    #[error("Fixer group '{group}' in rule '{rule}' must specify fixers")]
    MissingFixers { rule: String, group: String },

    /// A fixer's trigger formula could not be compiled
    #[error("Invalid trigger for fixer '{fixer}' in rule '{rule}': {source}")]
    InvalidTrigger {
        rule: String,
        fixer: String,
        #[source]
        source: TriggerError,
    },

    /// A rule references a plugin that is not registered
    #[error("Rule '{rule}': {source}")]
    UnresolvedPlugin {
        rule: String,
        #[source]
        source: PluginError,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Plugin resolution, usage and runtime errors.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Identifier is not registered for the capability
    #[error("{capability} with identifier '{identifier}' is not available")]
    NoSuchPlugin {
        capability: Capability,
        identifier: String,
    },

    /// Identifier registered twice within one capability
    #[error("{capability} '{identifier}' is already registered")]
    Duplicate {
        capability: Capability,
        identifier: String,
    },

    /// Stateful plugins need a rule to key their instance on
    #[error("Only stateless plugins can be accessed without a rule context ('{identifier}' is stateful)")]
    MissingRuleContext { identifier: String },

    /// A call argument is missing or has the wrong shape
    #[error("Invalid argument '{name}' for '{identifier}': {message}")]
    InvalidArgument {
        identifier: String,
        name: String,
        message: String,
    },

    /// The plugin's run failed
    #[error("'{identifier}' failed: {message}")]
    Failed { identifier: String, message: String },

    /// A background evaluation was cancelled or its worker went away
    #[error("Background evaluation of '{identifier}' was cancelled")]
    Cancelled { identifier: String },
}

impl PluginError {
    /// Shorthand for a runtime failure.
    pub fn failed(identifier: impl Into<String>, message: impl ToString) -> Self {
        PluginError::Failed {
            identifier: identifier.into(),
            message: message.to_string(),
        }
    }
}

/// Trigger formula errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// Unexpected character or token
    #[error("Syntax error at position {position} in '{formula}': {message}")]
    Syntax {
        formula: String,
        position: usize,
        message: String,
    },

    /// The formula references names that are not checkers of the rule
    #[error("The following references are not checker names: {}", names.join(", "))]
    UnknownCheckers { names: Vec<String> },
}

/// Flow planning and activation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// Every activity was skipped
    #[error("Not enough time to initialize the flow '{flow}'")]
    NotEnoughTime { flow: String },

    /// The shrink/skip loop hit its iteration cap
    #[error("Flow '{flow}' plan did not converge after {iterations} iterations")]
    DidNotConverge { flow: String, iterations: usize },

    /// Unknown activity identifier
    #[error("Activity '{0}' is not defined")]
    UnknownActivity(String),

    /// Unknown flow identifier
    #[error("Flow '{0}' is not defined")]
    UnknownFlow(String),

    /// A time limit or pause length that is not a finite, representable
    /// number of minutes
    #[error("{0} minutes is not a usable duration")]
    InvalidDuration(f64),

    /// Command refused in the current state
    #[error("{0}")]
    Refused(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

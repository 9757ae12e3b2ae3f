//! Plugin contract shared by reporters, checkers and fixers.
//!
//! A plugin is a unit of work behind an identifier. The core never looks
//! inside it: it only reads the [`PluginDescriptor`] flags to decide how
//! often `run` may be invoked and whether an instance can be shared.

pub mod cache;
pub mod registry;
pub mod task;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PluginError;

pub use cache::{Caches, InvocationCache, InvocationKey};
pub use registry::{PluginConstructor, PluginRegistry, RegisteredPlugin};
pub use task::{Deferred, TaskHandle, TaskRunner};

/// What a plugin does for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Returns an observed value.
    Reporter,
    /// Returns a boolean assessment of reports.
    Checker,
    /// Performs a side effect.
    Fixer,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Reporter => "Reporter",
            Capability::Checker => "Checker",
            Capability::Fixer => "Fixer",
        };
        f.write_str(name)
    }
}

/// Static facts about a plugin, fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub identifier: String,
    pub capability: Capability,
    /// `run` keeps no state in the instance, so one instance can serve all rules.
    pub stateless: bool,
    /// `run` must happen every time it is requested.
    pub side_effects: bool,
}

impl PluginDescriptor {
    /// Stateless reporter without side effects.
    pub fn reporter(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            capability: Capability::Reporter,
            stateless: true,
            side_effects: false,
        }
    }

    /// Stateless checker without side effects.
    pub fn checker(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            capability: Capability::Checker,
            stateless: true,
            side_effects: false,
        }
    }

    /// Stateless fixer. Fixers have side effects unless told otherwise.
    pub fn fixer(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            capability: Capability::Fixer,
            stateless: true,
            side_effects: true,
        }
    }

    pub fn stateful(mut self) -> Self {
        self.stateless = false;
        self
    }

    pub fn with_side_effects(mut self, side_effects: bool) -> Self {
        self.side_effects = side_effects;
        self
    }

    /// Results may be reused within one cycle.
    pub fn is_cacheable(&self) -> bool {
        self.stateless && !self.side_effects
    }
}

/// Arguments of one plugin call.
///
/// Keyword arguments live in a sorted map, so two calls built with the same
/// pairs in a different order are the same call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kwargs(kwargs: BTreeMap<String, Value>) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// Keyword argument as a string, or an `InvalidArgument` error.
    pub fn require_str(&self, identifier: &str, key: &str) -> Result<&str, PluginError> {
        match self.kwargs.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(PluginError::InvalidArgument {
                identifier: identifier.to_string(),
                name: key.to_string(),
                message: format!("expected a string, got {other}"),
            }),
            None => Err(PluginError::InvalidArgument {
                identifier: identifier.to_string(),
                name: key.to_string(),
                message: "missing".to_string(),
            }),
        }
    }
}

/// A reporter, checker or fixer.
///
/// Reporters return arbitrary values, checkers return booleans and fixers
/// return `Value::Null` after performing their effect.
pub trait Plugin: Send {
    fn run(&mut self, args: &CallArgs) -> Result<Value, PluginError>;
}

impl<F> Plugin for F
where
    F: FnMut(&CallArgs) -> Result<Value, PluginError> + Send,
{
    fn run(&mut self, args: &CallArgs) -> Result<Value, PluginError> {
        self(args)
    }
}

/// Pin a closure to the plugin signature so its argument and error types
/// are inferred.
pub fn plugin_fn<F>(f: F) -> F
where
    F: FnMut(&CallArgs) -> Result<Value, PluginError> + Send,
{
    f
}

/// Truthiness of a checker result. `null` (pending or absent) is false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

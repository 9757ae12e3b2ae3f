//! Memoizing, policy-aware plugin dispatcher.
//!
//! The cache decides how often a plugin actually runs:
//!
//! ```text
//! stateless, no side effects  -> once per (identifier, args, kwargs) per cycle
//! stateless, side effects     -> every call, one shared instance
//! stateful                    -> every call, one instance per rule
//! ```
//!
//! Results live until [`InvocationCache::clear`], which the orchestrator calls
//! before each cycle. Instances live as long as the cache.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{CallArgs, Capability, Plugin, PluginRegistry};
use crate::error::PluginError;

/// Identity of one pure call within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    identifier: String,
    args: String,
    kwargs: String,
}

impl InvocationKey {
    /// Build a key from canonical JSON of the arguments. Keyword arguments
    /// and nested objects are sorted maps, so insertion order does not matter.
    pub fn new(identifier: &str, call: &CallArgs) -> Self {
        Self {
            identifier: identifier.to_string(),
            args: serde_json::to_string(&call.args).unwrap_or_default(),
            kwargs: serde_json::to_string(&call.kwargs).unwrap_or_default(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Owner of one live plugin instance: the identifier alone for shared
/// instances, identifier and rule for stateful ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    identifier: String,
    rule: Option<String>,
}

impl InstanceKey {
    fn shared(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            rule: None,
        }
    }

    fn per_rule(identifier: &str, rule: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            rule: Some(rule.to_string()),
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "{}@{rule}", self.identifier),
            None => f.write_str(&self.identifier),
        }
    }
}

/// Per-capability dispatcher over a shared registry.
pub struct InvocationCache {
    capability: Capability,
    registry: Arc<PluginRegistry>,
    cache: HashMap<InvocationKey, Value>,
    instances: HashMap<InstanceKey, Box<dyn Plugin>>,
}

impl InvocationCache {
    pub fn new(capability: Capability, registry: Arc<PluginRegistry>) -> Self {
        Self {
            capability,
            registry,
            cache: HashMap::new(),
            instances: HashMap::new(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Obtain a result from the given plugin, running it only as often as
    /// its descriptor requires.
    ///
    /// # Errors
    ///
    /// `NoSuchPlugin` for unknown identifiers, `MissingRuleContext` when a
    /// stateful plugin is requested without `rule_name`, and whatever the
    /// plugin's own `run` returns.
    pub fn get(&mut self, identifier: &str, call: &CallArgs, rule_name: Option<&str>) -> Result<Value, PluginError> {
        let descriptor = self
            .registry
            .resolve(self.capability, identifier)?
            .descriptor
            .clone();

        if descriptor.is_cacheable() {
            let key = InvocationKey::new(identifier, call);
            if let Some(value) = self.cache.get(&key) {
                tracing::trace!(identifier, "cache hit");
                return Ok(value.clone());
            }
            let value = self.run_instance(InstanceKey::shared(identifier), call)?;
            self.cache.insert(key, value.clone());
            Ok(value)
        } else if descriptor.stateless {
            self.run_instance(InstanceKey::shared(identifier), call)
        } else {
            let rule_name = rule_name.ok_or_else(|| PluginError::MissingRuleContext {
                identifier: identifier.to_string(),
            })?;
            self.run_instance(InstanceKey::per_rule(identifier, rule_name), call)
        }
    }

    /// Drop cached results. Instances and their state are kept.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn run_instance(&mut self, key: InstanceKey, call: &CallArgs) -> Result<Value, PluginError> {
        let identifier = key.identifier.clone();
        let instance_name = key.to_string();
        let instance = match self.instances.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let instance = self.registry.resolve(self.capability, &identifier)?.instantiate();
                entry.insert(instance)
            }
        };

        tracing::debug!(
            capability = %self.capability,
            identifier = %identifier,
            instance = %instance_name,
            args = ?call.args,
            kwargs = ?call.kwargs,
            "running"
        );
        let result = instance.run(call);
        tracing::debug!(identifier = %identifier, result = ?result, "result");
        result
    }
}

/// The three capability caches, cleared together.
pub struct Caches {
    pub reporters: InvocationCache,
    pub checkers: InvocationCache,
    pub fixers: InvocationCache,
}

impl Caches {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            reporters: InvocationCache::new(Capability::Reporter, Arc::clone(&registry)),
            checkers: InvocationCache::new(Capability::Checker, Arc::clone(&registry)),
            fixers: InvocationCache::new(Capability::Fixer, registry),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        self.reporters.registry()
    }

    /// Clear every result cache. Called once per cycle, before it starts.
    pub fn clear(&mut self) {
        self.reporters.clear();
        self.checkers.clear();
        self.fixers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{plugin_fn, PluginDescriptor};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry with a counting plugin per policy.
    fn counting_registry(calls: Arc<AtomicUsize>) -> Arc<PluginRegistry> {
        let mut registry = PluginRegistry::new();

        let pure_calls = Arc::clone(&calls);
        registry
            .register(PluginDescriptor::reporter("pure"), move || {
                let calls = Arc::clone(&pure_calls);
                plugin_fn(move |call| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(call.kwargs.len()))
                })
            })
            .unwrap();

        let effect_calls = Arc::clone(&calls);
        registry
            .register(
                PluginDescriptor::reporter("effect").with_side_effects(true),
                move || {
                    let calls = Arc::clone(&effect_calls);
                    plugin_fn(move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    })
                },
            )
            .unwrap();

        registry
            .register(PluginDescriptor::reporter("counter").stateful(), || {
                let mut count = 0u64;
                plugin_fn(move |_| {
                    count += 1;
                    Ok(json!(count))
                })
            })
            .unwrap();

        Arc::new(registry)
    }

    #[test]
    fn pure_plugin_runs_once_per_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = InvocationCache::new(Capability::Reporter, counting_registry(Arc::clone(&calls)));
        let call = CallArgs::new().kwarg("path", "/tmp/x");

        cache.get("pure", &call, None).unwrap();
        cache.get("pure", &call, Some("other_rule")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.clear();
        cache.get("pure", &call, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn kwargs_order_does_not_change_key() {
        let a = CallArgs::new().kwarg("a", 1).kwarg("b", json!({"y": 1, "x": 2}));
        let b = CallArgs::new().kwarg("b", json!({"x": 2, "y": 1})).kwarg("a", 1);
        assert_eq!(InvocationKey::new("p", &a), InvocationKey::new("p", &b));
        assert_ne!(InvocationKey::new("p", &a), InvocationKey::new("q", &a));
    }

    #[test]
    fn distinct_arguments_are_cached_separately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = InvocationCache::new(Capability::Reporter, counting_registry(Arc::clone(&calls)));

        cache.get("pure", &CallArgs::new().kwarg("a", 1), None).unwrap();
        cache.get("pure", &CallArgs::new().kwarg("a", 2), None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached_count(), 2);
        assert_eq!(cache.instance_count(), 1);
    }

    #[test]
    fn side_effect_plugin_always_runs_on_shared_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = InvocationCache::new(Capability::Reporter, counting_registry(Arc::clone(&calls)));

        cache.get("effect", &CallArgs::new(), None).unwrap();
        cache.get("effect", &CallArgs::new(), Some("rule")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.instance_count(), 1);
        assert_eq!(cache.cached_count(), 0);
    }

    #[test]
    fn stateful_plugin_requires_rule_context() {
        let mut cache = InvocationCache::new(Capability::Reporter, counting_registry(Arc::new(AtomicUsize::new(0))));
        let err = cache.get("counter", &CallArgs::new(), None).unwrap_err();
        assert!(matches!(err, PluginError::MissingRuleContext { .. }));
    }

    #[test]
    fn stateful_plugin_gets_one_instance_per_rule() {
        let mut cache = InvocationCache::new(Capability::Reporter, counting_registry(Arc::new(AtomicUsize::new(0))));
        let call = CallArgs::new();

        assert_eq!(cache.get("counter", &call, Some("a")).unwrap(), json!(1));
        assert_eq!(cache.get("counter", &call, Some("a")).unwrap(), json!(2));
        assert_eq!(cache.get("counter", &call, Some("b")).unwrap(), json!(1));

        // State survives a cycle boundary.
        cache.clear();
        assert_eq!(cache.get("counter", &call, Some("a")).unwrap(), json!(3));
        assert_eq!(cache.instance_count(), 2);
    }

    #[test]
    fn stateful_instances_do_not_collide_across_names() {
        let mut registry = PluginRegistry::new();
        for name in ["a", "a_b"] {
            registry
                .register(PluginDescriptor::checker(name).stateful(), move || {
                    plugin_fn(move |_| Ok(json!(format!("plugin {name}"))))
                })
                .unwrap();
        }
        let mut cache = InvocationCache::new(Capability::Checker, Arc::new(registry));
        let call = CallArgs::new();

        assert_eq!(cache.get("a", &call, Some("b_c")).unwrap(), json!("plugin a"));
        assert_eq!(cache.get("a_b", &call, Some("c")).unwrap(), json!("plugin a_b"));
        assert_eq!(cache.instance_count(), 2);
    }

    #[test]
    fn unknown_identifier_is_no_such_plugin() {
        let mut cache = InvocationCache::new(Capability::Fixer, counting_registry(Arc::new(AtomicUsize::new(0))));
        // "pure" is a reporter, not a fixer.
        assert!(matches!(
            cache.get("pure", &CallArgs::new(), None),
            Err(PluginError::NoSuchPlugin { .. })
        ));
    }

    #[test]
    fn failed_runs_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        let counter = Arc::clone(&calls);
        registry
            .register(PluginDescriptor::reporter("flaky"), move || {
                let calls = Arc::clone(&counter);
                plugin_fn(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PluginError::failed("flaky", "no data"))
                })
            })
            .unwrap();
        let mut cache = InvocationCache::new(Capability::Reporter, Arc::new(registry));

        assert!(cache.get("flaky", &CallArgs::new(), None).is_err());
        assert!(cache.get("flaky", &CallArgs::new(), None).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

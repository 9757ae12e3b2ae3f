//! Explicit plugin registry.
//!
//! Plugins are registered by calling [`PluginRegistry::register`] with a
//! descriptor and a constructor. There is no self-registration: the set of
//! available plugins is whatever the caller put in, in the order it did so.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::{Capability, Plugin, PluginDescriptor};
use crate::error::PluginError;

/// Builds a fresh plugin instance.
pub type PluginConstructor = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// A descriptor together with the constructor for its instances.
pub struct RegisteredPlugin {
    pub descriptor: PluginDescriptor,
    constructor: PluginConstructor,
}

impl RegisteredPlugin {
    pub fn instantiate(&self) -> Box<dyn Plugin> {
        (self.constructor)()
    }
}

impl fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Plugins indexed by capability, then identifier.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: HashMap<Capability, BTreeMap<String, RegisteredPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Fails if the identifier is taken within its capability.
    pub fn register<F, P>(&mut self, descriptor: PluginDescriptor, constructor: F) -> Result<(), PluginError>
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Plugin + 'static,
    {
        let slot = self.plugins.entry(descriptor.capability).or_default();
        if slot.contains_key(&descriptor.identifier) {
            return Err(PluginError::Duplicate {
                capability: descriptor.capability,
                identifier: descriptor.identifier,
            });
        }

        tracing::debug!(
            capability = %descriptor.capability,
            identifier = %descriptor.identifier,
            stateless = descriptor.stateless,
            side_effects = descriptor.side_effects,
            "plugin registered"
        );

        let constructor: PluginConstructor = Box::new(move || -> Box<dyn Plugin> { Box::new(constructor()) });
        slot.insert(
            descriptor.identifier.clone(),
            RegisteredPlugin {
                descriptor,
                constructor,
            },
        );
        Ok(())
    }

    /// Look up a plugin, or `NoSuchPlugin`.
    pub fn resolve(&self, capability: Capability, identifier: &str) -> Result<&RegisteredPlugin, PluginError> {
        self.plugins
            .get(&capability)
            .and_then(|slot| slot.get(identifier))
            .ok_or_else(|| PluginError::NoSuchPlugin {
                capability,
                identifier: identifier.to_string(),
            })
    }

    pub fn contains(&self, capability: Capability, identifier: &str) -> bool {
        self.resolve(capability, identifier).is_ok()
    }

    /// Sorted identifiers registered for a capability.
    pub fn identifiers(&self, capability: Capability) -> Vec<&str> {
        self.plugins
            .get(&capability)
            .map(|slot| slot.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.plugins.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

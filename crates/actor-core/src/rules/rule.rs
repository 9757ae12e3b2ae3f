//! Rule definition.
//!
//! A rule groups reporters, checkers and fixers that are evaluated together
//! each cycle. [`RuleConfig`] is the TOML shape; [`Rule`] is the loaded,
//! validated form with compiled trigger predicates.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, PluginError};
use crate::plugin::{CallArgs, Capability, PluginRegistry};
use crate::trigger::{Predicate, TriggerCompiler};

/// Options accepted by every reporter, checker and fixer entry.
///
/// Anything that is not a framework option is passed to the plugin as a
/// keyword argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitOptions {
    /// Name under which the result is exported within the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_as: Option<String>,

    /// `expected keyword -> report name` redirection.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: IndexMap<String, String>,

    /// Checkers only: invert the result.
    #[serde(default, skip_serializing_if = "is_false")]
    pub negate: bool,

    /// Fixers only: trigger formula over checker names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,

    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl UnitOptions {
    /// Overlay `other` on top of these options. Set fields in `other` win.
    pub fn merged_with(&self, other: &UnitOptions) -> UnitOptions {
        let mut merged = self.clone();
        if other.export_as.is_some() {
            merged.export_as = other.export_as.clone();
        }
        for (k, v) in &other.inputs {
            merged.inputs.insert(k.clone(), v.clone());
        }
        merged.negate |= other.negate;
        if other.triggered_by.is_some() {
            merged.triggered_by = other.triggered_by.clone();
        }
        for (k, v) in &other.params {
            merged.params.insert(k.clone(), v.clone());
        }
        merged
    }
}

/// Several fixers sharing one set of options, typically `triggered_by`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixerGroupConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixers: Option<Vec<IndexMap<String, UnitOptions>>>,

    #[serde(flatten)]
    pub options: UnitOptions,
}

/// A rule as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule name, also the key for stateful plugin instances
    pub name: String,

    /// Whether this rule is loaded
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub reporters: IndexMap<String, UnitOptions>,

    #[serde(default)]
    pub checkers: IndexMap<String, UnitOptions>,

    #[serde(default)]
    pub fixers: IndexMap<String, UnitOptions>,

    #[serde(default)]
    pub fixergroups: IndexMap<String, FixerGroupConfig>,
}

fn default_enabled() -> bool {
    true
}

/// One reporter, checker or fixer within a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub identifier: String,
    pub export_as: String,
    pub inputs: IndexMap<String, String>,
    pub negate: bool,
    pub params: BTreeMap<String, Value>,
}

impl Unit {
    fn from_options(identifier: &str, options: &UnitOptions) -> Self {
        Self {
            identifier: identifier.to_string(),
            export_as: options
                .export_as
                .clone()
                .unwrap_or_else(|| identifier.to_string()),
            inputs: options.inputs.clone(),
            negate: options.negate,
            params: options.params.clone(),
        }
    }

    /// Keyword arguments for a reporter: just the plugin parameters.
    pub fn report_args(&self) -> CallArgs {
        CallArgs::from_kwargs(self.params.clone())
    }

    /// Keyword arguments for a checker or fixer: every report, with the
    /// `inputs` redirection applied, then the plugin parameters.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when a redirection names a report that is absent.
    pub fn redirected_args(&self, reports: &BTreeMap<String, Value>) -> Result<CallArgs, PluginError> {
        let mut kwargs = reports.clone();
        for (expected, actual) in &self.inputs {
            let value = reports.get(actual).ok_or_else(|| PluginError::InvalidArgument {
                identifier: self.identifier.clone(),
                name: expected.clone(),
                message: format!("report '{actual}' is not available"),
            })?;
            kwargs.insert(expected.clone(), value.clone());
        }
        for (k, v) in &self.params {
            kwargs.insert(k.clone(), v.clone());
        }
        Ok(CallArgs::from_kwargs(kwargs))
    }
}

/// A fixer with its compiled trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct FixerUnit {
    pub unit: Unit,
    pub trigger: Predicate,
    /// Fixer group this fixer came from, if any.
    pub group: Option<String>,
}

/// A loaded rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub reporters: Vec<Unit>,
    pub checkers: Vec<Unit>,
    pub fixers: Vec<FixerUnit>,
}

impl Rule {
    /// Validate a rule configuration against the registry and compile its
    /// triggers.
    ///
    /// # Errors
    ///
    /// Duplicate export names, fixer groups without fixers, unknown plugin
    /// identifiers and trigger formulas that do not compile.
    pub fn from_config(config: &RuleConfig, registry: &PluginRegistry) -> Result<Self, ConfigError> {
        let resolve = |capability: Capability, identifier: &str| {
            registry
                .resolve(capability, identifier)
                .map(|_| ())
                .map_err(|source| ConfigError::UnresolvedPlugin {
                    rule: config.name.clone(),
                    source,
                })
        };

        let mut reporters = Vec::with_capacity(config.reporters.len());
        for (identifier, options) in &config.reporters {
            resolve(Capability::Reporter, identifier)?;
            reporters.push(Unit::from_options(identifier, options));
        }

        let mut checkers = Vec::with_capacity(config.checkers.len());
        for (identifier, options) in &config.checkers {
            resolve(Capability::Checker, identifier)?;
            checkers.push(Unit::from_options(identifier, options));
        }

        check_unique_exports(&config.name, "reporters", &reporters)?;
        check_unique_exports(&config.name, "checkers", &checkers)?;

        // Group options override the member fixer's own options.
        let mut fixer_entries: Vec<(String, UnitOptions, Option<String>)> = config
            .fixers
            .iter()
            .map(|(identifier, options)| (identifier.clone(), options.clone(), None))
            .collect();

        for (group_name, group) in &config.fixergroups {
            let members = group.fixers.as_ref().ok_or_else(|| ConfigError::MissingFixers {
                rule: config.name.clone(),
                group: group_name.clone(),
            })?;
            for member in members {
                for (identifier, options) in member {
                    fixer_entries.push((
                        identifier.clone(),
                        options.merged_with(&group.options),
                        Some(group_name.clone()),
                    ));
                }
            }
        }

        let compiler = TriggerCompiler::new(checkers.iter().map(|c| c.export_as.clone()));
        let mut fixers = Vec::with_capacity(fixer_entries.len());
        for (identifier, options, group) in fixer_entries {
            resolve(Capability::Fixer, &identifier)?;
            let trigger = compiler
                .compile(options.triggered_by.as_deref())
                .map_err(|source| ConfigError::InvalidTrigger {
                    rule: config.name.clone(),
                    fixer: identifier.clone(),
                    source,
                })?;
            fixers.push(FixerUnit {
                unit: Unit::from_options(&identifier, &options),
                trigger,
                group,
            });
        }

        Ok(Rule {
            name: config.name.clone(),
            reporters,
            checkers,
            fixers,
        })
    }
}

fn check_unique_exports(rule: &str, kind: &'static str, units: &[Unit]) -> Result<(), ConfigError> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for unit in units {
        *counts.entry(unit.export_as.as_str()).or_default() += 1;
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(name, _)| name.to_string())
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::DuplicateExport {
            rule: rule.to_string(),
            kind,
            names: duplicates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{plugin_fn, PluginDescriptor};
    use serde_json::json;

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::reporter("file_content"), || plugin_fn(|_| Ok(json!("text"))))
            .unwrap();
        registry
            .register(PluginDescriptor::checker("regular_expression"), || plugin_fn(|_| Ok(json!(true))))
            .unwrap();
        registry
            .register(PluginDescriptor::checker("tautology"), || plugin_fn(|_| Ok(json!(true))))
            .unwrap();
        registry
            .register(PluginDescriptor::fixer("notify"), || plugin_fn(|_| Ok(Value::Null)))
            .unwrap();
        registry
            .register(PluginDescriptor::fixer("lock_screen"), || plugin_fn(|_| Ok(Value::Null)))
            .unwrap();
        registry
    }

    fn parse(toml_str: &str) -> RuleConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn loads_units_in_declaration_order() {
        let config = parse(
            r#"
            name = "journal"

            [reporters]
            file_content = { path = "~/journal.txt" }

            [checkers]
            tautology = {}
            regular_expression = { regex = "done", inputs = { string = "file_content" }, negate = true }

            [fixers]
            notify = { message = "Write your journal" }
            "#,
        );
        let rule = Rule::from_config(&config, &registry()).unwrap();

        assert_eq!(rule.reporters[0].params["path"], json!("~/journal.txt"));
        let names: Vec<&str> = rule.checkers.iter().map(|c| c.export_as.as_str()).collect();
        assert_eq!(names, vec!["tautology", "regular_expression"]);
        assert!(rule.checkers[1].negate);
        assert_eq!(rule.checkers[1].inputs["string"], "file_content");
        assert!(!rule.checkers[1].params.contains_key("negate"));
        assert_eq!(rule.fixers[0].trigger.to_string(), "tautology and regular_expression");
    }

    #[test]
    fn duplicate_export_is_rejected() {
        let config = parse(
            r#"
            name = "clash"
            [checkers]
            tautology = { export_as = "same" }
            regular_expression = { export_as = "same" }
            "#,
        );
        let err = Rule::from_config(&config, &registry()).unwrap_err();
        match err {
            ConfigError::DuplicateExport { kind, names, .. } => {
                assert_eq!(kind, "checkers");
                assert_eq!(names, vec!["same".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fixer_group_requires_fixers() {
        let config = parse(
            r#"
            name = "grouped"
            [checkers]
            tautology = {}
            [fixergroups.evening]
            triggered_by = "tautology"
            "#,
        );
        assert!(matches!(
            Rule::from_config(&config, &registry()),
            Err(ConfigError::MissingFixers { .. })
        ));
    }

    #[test]
    fn fixer_group_options_override_member_options() {
        let config = parse(
            r#"
            name = "grouped"
            [checkers]
            tautology = {}
            regular_expression = {}
            [fixergroups.evening]
            triggered_by = "not tautology"
            message = "from group"
            fixers = [ { notify = { message = "own", triggered_by = "tautology" } }, { lock_screen = {} } ]
            "#,
        );
        let rule = Rule::from_config(&config, &registry()).unwrap();

        assert_eq!(rule.fixers.len(), 2);
        assert_eq!(rule.fixers[0].unit.params["message"], json!("from group"));
        assert_eq!(rule.fixers[0].trigger.to_string(), "not tautology");
        assert_eq!(rule.fixers[1].group.as_deref(), Some("evening"));
        assert!(!rule.fixers[1].unit.params.contains_key("fixers"));
    }

    #[test]
    fn trigger_with_unknown_checker_is_rejected() {
        let config = parse(
            r#"
            name = "typo"
            [checkers]
            tautology = {}
            [fixers]
            notify = { triggered_by = "tautolgy" }
            "#,
        );
        let err = Rule::from_config(&config, &registry()).unwrap_err();
        assert!(err.to_string().contains("tautolgy"));
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let config = parse(
            r#"
            name = "missing"
            [reporters]
            weather = {}
            "#,
        );
        assert!(matches!(
            Rule::from_config(&config, &registry()),
            Err(ConfigError::UnresolvedPlugin {
                source: PluginError::NoSuchPlugin { .. },
                ..
            })
        ));
    }

    #[test]
    fn redirection_maps_expected_key_to_report() {
        let unit = Unit::from_options(
            "regular_expression",
            &UnitOptions {
                inputs: IndexMap::from([("string".to_string(), "file_content".to_string())]),
                params: BTreeMap::from([("regex".to_string(), json!("x"))]),
                ..UnitOptions::default()
            },
        );
        let reports = BTreeMap::from([("file_content".to_string(), json!("body"))]);

        let call = unit.redirected_args(&reports).unwrap();
        assert_eq!(call.kwargs["string"], json!("body"));
        assert_eq!(call.kwargs["file_content"], json!("body"));
        assert_eq!(call.kwargs["regex"], json!("x"));

        assert!(unit.redirected_args(&BTreeMap::new()).is_err());
    }
}

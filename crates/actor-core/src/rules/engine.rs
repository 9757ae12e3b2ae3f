//! Rule evaluation engine.
//!
//! Runs one cycle per rule: reporters, then checkers, then the fixers whose
//! trigger holds. A failing unit is logged and skipped; it never aborts the
//! rest of the rule or the cycle.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::ConfigError;
use crate::plugin::{truthy, Caches, Capability, PluginRegistry};
use crate::rules::log::{CycleLog, ExecutionStatus, UnitResult};
use crate::rules::{Rule, RuleConfig};

/// Evaluates loaded rules against the plugin caches
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Load every enabled rule. A rule that fails to load is left out and
    /// reported; the others still load.
    pub fn from_configs(configs: &[RuleConfig], registry: &PluginRegistry) -> (Self, Vec<(String, ConfigError)>) {
        let mut rules = Vec::new();
        let mut failures = Vec::new();

        for config in configs.iter().filter(|c| c.enabled) {
            match Rule::from_config(config, registry) {
                Ok(rule) => {
                    tracing::debug!(rule = %rule.name, "rule loaded");
                    rules.push(rule);
                }
                Err(e) => {
                    tracing::warn!(rule = %config.name, error = %e, "rule cannot be loaded");
                    failures.push((config.name.clone(), e));
                }
            }
        }

        if rules.is_empty() {
            tracing::warn!("no rules available");
        }

        (Self { rules }, failures)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Evaluate every rule once, in declaration order.
    ///
    /// Callers clear the caches before the cycle; this method never does.
    pub fn run_cycle(&self, caches: &mut Caches) -> CycleLog {
        let mut results = Vec::new();
        for rule in &self.rules {
            results.extend(self.run_rule(rule, caches));
        }
        CycleLog::new(results)
    }

    /// Evaluate a single rule.
    pub fn run_rule(&self, rule: &Rule, caches: &mut Caches) -> Vec<UnitResult> {
        let mut results = Vec::new();
        let rule_name = rule.name.as_str();
        tracing::debug!(rule = rule_name, "checking rule");

        // Reports
        let mut reports: BTreeMap<String, Value> = BTreeMap::new();
        for reporter in &rule.reporters {
            let outcome = caches
                .reporters
                .get(&reporter.identifier, &reporter.report_args(), Some(rule_name));
            match outcome {
                Ok(value) => {
                    reports.insert(reporter.export_as.clone(), value.clone());
                    results.push(success(rule_name, Capability::Reporter, &reporter.export_as, value));
                }
                Err(e) => {
                    tracing::error!(rule = rule_name, reporter = %reporter.export_as, error = %e, "reporter failed");
                    results.push(failure(rule_name, Capability::Reporter, &reporter.export_as, e.to_string()));
                }
            }
        }
        tracing::debug!(rule = rule_name, reports = ?reports, "reports");

        // Checker state
        let mut checker_state: HashMap<String, bool> = HashMap::new();
        for checker in &rule.checkers {
            let outcome = checker
                .redirected_args(&reports)
                .and_then(|call| caches.checkers.get(&checker.identifier, &call, Some(rule_name)));
            match outcome {
                Ok(value) => {
                    let passed = truthy(&value) != checker.negate;
                    checker_state.insert(checker.export_as.clone(), passed);
                    results.push(success(rule_name, Capability::Checker, &checker.export_as, Value::Bool(passed)));
                }
                Err(e) => {
                    tracing::error!(rule = rule_name, checker = %checker.export_as, error = %e, "checker failed");
                    checker_state.insert(checker.export_as.clone(), false);
                    results.push(failure(rule_name, Capability::Checker, &checker.export_as, e.to_string()));
                }
            }
        }

        let active: Vec<&str> = rule
            .checkers
            .iter()
            .filter(|c| checker_state.get(&c.export_as).copied().unwrap_or(false))
            .map(|c| c.export_as.as_str())
            .collect();
        tracing::debug!(rule = rule_name, active = ?active, "active checkers");

        // Fixers
        for fixer in &rule.fixers {
            let name = fixer.unit.export_as.as_str();
            if !fixer.trigger.evaluate(&checker_state) {
                results.push(UnitResult {
                    rule_name: rule_name.to_string(),
                    capability: Capability::Fixer,
                    unit: name.to_string(),
                    value: None,
                    status: ExecutionStatus::Skipped {
                        reason: format!("trigger '{}' is false", fixer.trigger),
                    },
                });
                continue;
            }

            let outcome = fixer
                .unit
                .redirected_args(&reports)
                .and_then(|call| caches.fixers.get(&fixer.unit.identifier, &call, Some(rule_name)));
            match outcome {
                Ok(value) => {
                    tracing::info!(rule = rule_name, fixer = name, "fixer triggered");
                    results.push(success(rule_name, Capability::Fixer, name, value));
                }
                Err(e) => {
                    tracing::error!(rule = rule_name, fixer = name, error = %e, "fixer failed");
                    results.push(failure(rule_name, Capability::Fixer, name, e.to_string()));
                }
            }
        }

        results
    }
}

fn success(rule: &str, capability: Capability, unit: &str, value: Value) -> UnitResult {
    UnitResult {
        rule_name: rule.to_string(),
        capability,
        unit: unit.to_string(),
        value: Some(value),
        status: ExecutionStatus::Success,
    }
}

fn failure(rule: &str, capability: Capability, unit: &str, reason: String) -> UnitResult {
    UnitResult {
        rule_name: rule.to_string(),
        capability,
        unit: unit.to_string(),
        value: None,
        status: ExecutionStatus::Failed { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::plugin::{plugin_fn, PluginDescriptor};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Registry whose plugins record what they were called with.
    struct Harness {
        registry: Arc<PluginRegistry>,
        seen_by_checker: Arc<Mutex<Vec<Value>>>,
        fixed: Arc<Mutex<Vec<String>>>,
        source: Arc<Mutex<i64>>,
    }

    fn harness() -> Harness {
        let seen_by_checker = Arc::new(Mutex::new(Vec::new()));
        let fixed = Arc::new(Mutex::new(Vec::new()));
        let source = Arc::new(Mutex::new(0i64));
        let mut registry = PluginRegistry::new();

        let src = Arc::clone(&source);
        registry
            .register(PluginDescriptor::reporter("counter"), move || {
                let src = Arc::clone(&src);
                plugin_fn(move |_| Ok(json!(*src.lock().unwrap())))
            })
            .unwrap();

        registry
            .register(PluginDescriptor::reporter("broken"), || {
                plugin_fn(|_| Err(PluginError::failed("broken", "device unplugged")))
            })
            .unwrap();

        let seen = Arc::clone(&seen_by_checker);
        registry
            .register(PluginDescriptor::checker("positive"), move || {
                let seen = Arc::clone(&seen);
                plugin_fn(move |call| {
                    let value = call.get("value").cloned().unwrap_or(Value::Null);
                    seen.lock().unwrap().push(value.clone());
                    Ok(json!(value.as_i64().unwrap_or(0) > 0))
                })
            })
            .unwrap();

        registry
            .register(PluginDescriptor::checker("tautology"), || plugin_fn(|_| Ok(json!(true))))
            .unwrap();

        let log = Arc::clone(&fixed);
        registry
            .register(PluginDescriptor::fixer("notify"), move || {
                let log = Arc::clone(&log);
                plugin_fn(move |call| {
                    let message = call.require_str("notify", "message")?.to_string();
                    log.lock().unwrap().push(message);
                    Ok(Value::Null)
                })
            })
            .unwrap();

        Harness {
            registry: Arc::new(registry),
            seen_by_checker,
            fixed,
            source,
        }
    }

    fn load(h: &Harness, toml_str: &str) -> RuleEngine {
        let config: RuleConfig = toml::from_str(toml_str).unwrap();
        RuleEngine::new(vec![Rule::from_config(&config, &h.registry).unwrap()])
    }

    const POSITIVE_RULE: &str = r#"
        name = "positive"
        [reporters]
        counter = {}
        [checkers]
        positive = { inputs = { value = "counter" } }
        [fixers]
        notify = { message = "positive!" }
    "#;

    #[test]
    fn checker_never_sees_a_stale_report() {
        let h = harness();
        let engine = load(&h, POSITIVE_RULE);
        let mut caches = Caches::new(Arc::clone(&h.registry));

        for value in [1, -1, 5] {
            *h.source.lock().unwrap() = value;
            caches.clear();
            engine.run_cycle(&mut caches);
        }

        assert_eq!(*h.seen_by_checker.lock().unwrap(), vec![json!(1), json!(-1), json!(5)]);
        assert_eq!(*h.fixed.lock().unwrap(), vec!["positive!".to_string(), "positive!".to_string()]);
    }

    #[test]
    fn untriggered_fixer_is_skipped() {
        let h = harness();
        let engine = load(&h, POSITIVE_RULE);
        let mut caches = Caches::new(Arc::clone(&h.registry));

        *h.source.lock().unwrap() = 0;
        let log = engine.run_cycle(&mut caches);

        assert_eq!(log.skipped_count(), 1);
        assert!(h.fixed.lock().unwrap().is_empty());
    }

    #[test]
    fn negated_checker_inverts_result() {
        let h = harness();
        let engine = load(
            &h,
            r#"
            name = "non_positive"
            [reporters]
            counter = {}
            [checkers]
            positive = { inputs = { value = "counter" }, negate = true }
            [fixers]
            notify = { message = "not positive" }
            "#,
        );
        let mut caches = Caches::new(Arc::clone(&h.registry));

        let log = engine.run_cycle(&mut caches);
        assert_eq!(log.fired_fixers(), vec![("non_positive", "notify")]);
    }

    #[test]
    fn failing_units_do_not_abort_the_cycle() {
        let h = harness();
        let engine = load(
            &h,
            r#"
            name = "resilient"
            [reporters]
            broken = {}
            counter = {}
            [checkers]
            positive = { inputs = { value = "broken" } }
            tautology = {}
            [fixers]
            notify = { message = "still here", triggered_by = "tautology" }
            "#,
        );
        let mut caches = Caches::new(Arc::clone(&h.registry));

        let log = engine.run_cycle(&mut caches);

        // broken reporter and the checker redirected to it
        assert_eq!(log.failure_count(), 2);
        assert_eq!(*h.fixed.lock().unwrap(), vec!["still here".to_string()]);
    }

    #[test]
    fn failing_fixer_is_recorded() {
        let h = harness();
        let engine = load(
            &h,
            r#"
            name = "no_message"
            [checkers]
            tautology = {}
            [fixers]
            notify = {}
            "#,
        );
        let mut caches = Caches::new(Arc::clone(&h.registry));

        let log = engine.run_cycle(&mut caches);
        assert_eq!(log.failure_count(), 1);
        assert!(log.fired_fixers().is_empty());
    }

    #[test]
    fn bad_rules_are_reported_and_good_ones_load() {
        let h = harness();
        let configs: Vec<RuleConfig> = vec![
            toml::from_str(POSITIVE_RULE).unwrap(),
            toml::from_str(
                r#"
                name = "broken_trigger"
                [checkers]
                tautology = {}
                [fixers]
                notify = { triggered_by = "missing" }
                "#,
            )
            .unwrap(),
            toml::from_str(
                r#"
                name = "disabled"
                enabled = false
                [reporters]
                nonexistent = {}
                "#,
            )
            .unwrap(),
        ];

        let (engine, failures) = RuleEngine::from_configs(&configs, &h.registry);
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken_trigger");
    }

    #[test]
    fn shared_pure_reporter_runs_once_across_rules() {
        let h = harness();
        let configs: Vec<RuleConfig> = ["a", "b"]
            .iter()
            .map(|name| {
                toml::from_str(&POSITIVE_RULE.replace("name = \"positive\"", &format!("name = \"{name}\"")))
                    .unwrap()
            })
            .collect();
        let (engine, failures) = RuleEngine::from_configs(&configs, &h.registry);
        assert!(failures.is_empty());

        let mut caches = Caches::new(Arc::clone(&h.registry));
        *h.source.lock().unwrap() = 3;
        engine.run_cycle(&mut caches);

        // One cached reporter result and one cached checker result, shared by both rules.
        assert_eq!(caches.reporters.cached_count(), 1);
        assert_eq!(h.seen_by_checker.lock().unwrap().len(), 1);
        assert_eq!(h.fixed.lock().unwrap().len(), 2);
    }
}

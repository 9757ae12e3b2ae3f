//! Rule validation CLI commands.

use std::path::Path;

use actor_core::{builtin, Capability, RuleEngine};
use clap::Subcommand;

use super::load_config;

#[derive(Subcommand)]
pub enum RulesAction {
    /// Load every rule against the built-in plugins and report failures
    Check,
    /// List loaded rules with their units
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the built-in plugins
    Plugins,
}

pub fn run(dir: Option<&Path>, action: RulesAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        RulesAction::Check => check(dir),
        RulesAction::List { json } => list(dir, json),
        RulesAction::Plugins => plugins(),
    }
}

fn check(dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(dir)?;
    config.validate()?;
    let registry = builtin::registry()?;
    let (engine, failures) = RuleEngine::from_configs(&config.all_rules(), &registry);

    for (rule, error) in &failures {
        println!("FAIL {rule}: {error}");
    }
    println!("{} rules loaded, {} failed", engine.rules().len(), failures.len());

    if failures.is_empty() {
        Ok(())
    } else {
        Err(format!("{} rules failed to load", failures.len()).into())
    }
}

fn list(dir: Option<&Path>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(dir)?;
    let registry = builtin::registry()?;
    let (engine, _) = RuleEngine::from_configs(&config.all_rules(), &registry);

    if json {
        let rules: Vec<serde_json::Value> = engine
            .rules()
            .iter()
            .map(|rule| {
                serde_json::json!({
                    "name": rule.name,
                    "reporters": rule.reporters.iter().map(|u| &u.export_as).collect::<Vec<_>>(),
                    "checkers": rule.checkers.iter().map(|u| &u.export_as).collect::<Vec<_>>(),
                    "fixers": rule.fixers.iter().map(|f| serde_json::json!({
                        "fixer": f.unit.export_as,
                        "triggered_by": f.trigger.to_string(),
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    for rule in engine.rules() {
        println!("{}", rule.name);
        for reporter in &rule.reporters {
            println!("  reporter {}", reporter.export_as);
        }
        for checker in &rule.checkers {
            let negated = if checker.negate { " (negated)" } else { "" };
            println!("  checker  {}{negated}", checker.export_as);
        }
        for fixer in &rule.fixers {
            println!("  fixer    {} when {}", fixer.unit.export_as, fixer.trigger);
        }
    }
    Ok(())
}

fn plugins() -> Result<(), Box<dyn std::error::Error>> {
    let registry = builtin::registry()?;
    for capability in [Capability::Reporter, Capability::Checker, Capability::Fixer] {
        println!("{capability}s:");
        for identifier in registry.identifiers(capability) {
            println!("  {identifier}");
        }
    }
    Ok(())
}

//! TOML-based configuration.
//!
//! Holds the tick interval, rules, activities and flows. The main file lives
//! at `~/.config/actor/config.toml`; additional rule files in `rules.d/` next
//! to it are merged after the main file's rules, in file-name order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::activity::ActivityConfig;
use crate::error::{ConfigError, CoreError};
use crate::expiration::minutes_in_range;
use crate::flow::ActivitySpec;
use crate::rules::RuleConfig;

const CONFIG_FILE: &str = "config.toml";
const RULES_DIR: &str = "rules.d";

/// Returns `~/.config/actor[-dev]/` based on ACTOR_ENV.
///
/// Set ACTOR_ENV=dev to use the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, CoreError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("ACTOR_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("actor-dev")
    } else {
        base_dir.join("actor")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// One entry of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowActivity {
    /// Identifier of a configured activity.
    pub activity: String,
    /// Nominal duration in minutes.
    pub duration: f64,
    /// Smallest shrink multiplier; 1.0 means the duration is fixed.
    #[serde(default = "default_max_shrink")]
    pub max_shrink: f64,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_max_shrink() -> f64 {
    1.0
}

fn default_priority() -> u32 {
    1
}

/// A flow as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub identifier: String,
    #[serde(default)]
    pub activities: Vec<FlowActivity>,
}

impl FlowConfig {
    /// Unplanned specs, in declaration order.
    pub fn specs(&self) -> Vec<ActivitySpec> {
        self.activities
            .iter()
            .map(|a| ActivitySpec::new(&a.activity, a.duration, a.max_shrink).with_priority(a.priority))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleConfig>,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between two ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub activities: Vec<ActivityConfig>,
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
    /// Rules loaded from `rules.d/`. Never written back.
    #[serde(skip)]
    pub drop_in_rules: Vec<RuleConfig>,
}

fn default_tick_interval_secs() -> u64 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            rules: Vec::new(),
            activities: Vec::new(),
            flows: Vec::new(),
            drop_in_rules: Vec::new(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(root: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = match current {
                serde_json::Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ParseFailed` for invalid TOML or an unexpected shape.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from the default data directory.
    ///
    /// # Errors
    ///
    /// See [`Config::load_from`].
    pub fn load() -> Result<Self, CoreError> {
        Ok(Self::load_from(&data_dir()?)?)
    }

    /// Load `config.toml` and `rules.d/*.toml` from `dir`. A missing
    /// `config.toml` is created with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be read or parsed, or
    /// if the default config cannot be written.
    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(dir)?;
                tracing::info!(path = %path.display(), "wrote default configuration");
                cfg
            }
            Err(e) => {
                return Err(ConfigError::LoadFailed {
                    path,
                    message: e.to_string(),
                })
            }
        };

        cfg.drop_in_rules = load_rules_dir(&dir.join(RULES_DIR))?;
        Ok(cfg)
    }

    /// Persist `config.toml` to the default data directory.
    ///
    /// # Errors
    ///
    /// See [`Config::save_to`].
    pub fn save(&self) -> Result<(), CoreError> {
        Ok(self.save_to(&data_dir()?)?)
    }

    /// Persist `config.toml` to `dir`. Drop-in rules are not written.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save_to(&self, dir: &Path) -> Result<(), ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.clone(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::create_dir_all(dir).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key. Array entries
    /// are addressed by index, e.g. `flows.0.identifier`.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Rules of the main file followed by the drop-in rules.
    pub fn all_rules(&self) -> Vec<RuleConfig> {
        self.rules.iter().chain(&self.drop_in_rules).cloned().collect()
    }

    pub fn activity(&self, identifier: &str) -> Option<&ActivityConfig> {
        self.activities.iter().find(|a| a.identifier == identifier)
    }

    pub fn flow(&self, identifier: &str) -> Option<&FlowConfig> {
        self.flows.iter().find(|f| f.identifier == identifier)
    }

    /// Check values the type system cannot.
    ///
    /// # Errors
    ///
    /// `InvalidValue` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: String, message: &str| ConfigError::InvalidValue {
            key,
            message: message.to_string(),
        };

        if self.tick_interval_secs == 0 {
            return Err(invalid("tick_interval_secs".into(), "must be at least 1"));
        }

        let mut seen = HashSet::new();
        for activity in &self.activities {
            if !seen.insert(activity.identifier.as_str()) {
                return Err(invalid(
                    format!("activities.{}", activity.identifier),
                    "defined more than once",
                ));
            }
            if activity.progress_checkpoints.iter().any(|c| !(0.0..=1.0).contains(c)) {
                return Err(invalid(
                    format!("activities.{}.progress_checkpoints", activity.identifier),
                    "checkpoints must lie between 0 and 1",
                ));
            }
        }

        let mut flow_ids = HashSet::new();
        for flow in &self.flows {
            if !flow_ids.insert(flow.identifier.as_str()) {
                return Err(invalid(format!("flows.{}", flow.identifier), "defined more than once"));
            }
            for entry in &flow.activities {
                let key = format!("flows.{}.{}", flow.identifier, entry.activity);
                if !seen.contains(entry.activity.as_str()) {
                    return Err(invalid(key, "unknown activity"));
                }
                if !(entry.duration > 0.0) {
                    return Err(invalid(key, "duration must be positive"));
                }
                if !minutes_in_range(entry.duration) {
                    return Err(invalid(key, "duration is too long"));
                }
                if !(entry.max_shrink > 0.0 && entry.max_shrink <= 1.0) {
                    return Err(invalid(key, "max_shrink must lie in (0, 1]"));
                }
            }
        }

        Ok(())
    }
}

/// Rules from every `*.toml` file in `dir`, in file-name order. A missing
/// directory yields no rules.
fn load_rules_dir(dir: &Path) -> Result<Vec<RuleConfig>, ConfigError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ConfigError::LoadFailed {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut rules = Vec::new();
    for path in paths {
        let load_failed = |message: String| ConfigError::LoadFailed {
            path: path.clone(),
            message,
        };
        let content = std::fs::read_to_string(&path).map_err(|e| load_failed(e.to_string()))?;
        let file: RulesFile = toml::from_str(&content).map_err(|e| load_failed(e.to_string()))?;
        tracing::debug!(path = %path.display(), rules = file.rules.len(), "loaded rule file");
        rules.extend(file.rules);
    }
    Ok(rules)
}

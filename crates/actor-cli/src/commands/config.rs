use std::path::Path;

use actor_core::config::data_dir;
use clap::Subcommand;

use super::load_config;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Dot-separated key (e.g. "tick_interval_secs", "flows.0.identifier")
        key: String,
    },
    /// Print the whole configuration as JSON, drop-in rules included
    List,
    /// Print the configuration directory
    Path,
}

pub fn run(dir: Option<&Path>, action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = load_config(dir)?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::List => {
            let mut config = load_config(dir)?;
            config.rules = config.all_rules();
            config.drop_in_rules.clear();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = match dir {
                Some(dir) => dir.to_path_buf(),
                None => data_dir()?,
            };
            println!("{}", path.display());
        }
    }
    Ok(())
}

pub mod config;
pub mod flow;
pub mod rules;
pub mod run;

use std::path::Path;

use actor_core::Config;

/// Load the configuration from `dir`, or from the default data directory.
pub fn load_config(dir: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match dir {
        Some(dir) => Config::load_from(dir)?,
        None => Config::load()?,
    };
    Ok(config)
}

use std::path::Path;
use std::sync::Arc;

use actor_core::{builtin, Orchestrator};
use chrono::Utc;
use clap::Args;

use super::load_config;

#[derive(Args)]
pub struct RunArgs {
    /// Number of ticks to run (forever if omitted)
    #[arg(long)]
    ticks: Option<u64>,
    /// Start with this activity
    #[arg(long, conflicts_with = "flow")]
    activity: Option<String>,
    /// Start with this flow
    #[arg(long)]
    flow: Option<String>,
    /// Time limit in minutes for the activity or flow
    #[arg(long)]
    minutes: Option<f64>,
    /// Print the final status as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(dir: Option<&Path>, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(dir)?;
    let registry = Arc::new(builtin::registry()?);
    let (mut orchestrator, failures) = Orchestrator::from_config(&config, registry)?;
    for (rule, error) in &failures {
        tracing::warn!(rule = %rule, error = %error, "rule skipped");
    }

    if let Some(activity) = &args.activity {
        orchestrator.set_activity(activity, args.minutes, Utc::now())?;
    }
    if let Some(flow) = &args.flow {
        orchestrator.set_flow(flow, args.minutes, Utc::now())?;
    }

    let ticks = orchestrator.run(args.ticks);
    let status = orchestrator.status(Utc::now());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("ticks: {ticks}");
        println!("rules: {}", status.rules);
        match (&status.activity, status.activity_remaining_minutes) {
            (Some(activity), Some(remaining)) => println!("activity: {activity} ({remaining:.1} min left)"),
            (Some(activity), None) => println!("activity: {activity}"),
            (None, _) => println!("activity: none"),
        }
        if let Some(flow) = &status.flow {
            println!("flow: {} ({:.1} min left)", flow.identifier, flow.remaining_minutes);
        }
    }
    Ok(())
}

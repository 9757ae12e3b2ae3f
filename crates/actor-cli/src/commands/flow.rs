use std::path::Path;

use actor_core::expiration::time_limit;
use actor_core::flow::total_minutes;
use actor_core::{generate_plan, ScheduleError};
use clap::Subcommand;

use super::load_config;

#[derive(Subcommand)]
pub enum FlowAction {
    /// List configured flows
    List,
    /// Print the plan of a flow for a time budget
    Plan {
        /// Flow identifier
        identifier: String,
        /// Time budget in minutes (unlimited if omitted or not positive)
        #[arg(long)]
        minutes: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(dir: Option<&Path>, action: FlowAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(dir)?;
    match action {
        FlowAction::List => {
            for flow in &config.flows {
                let total: f64 = flow.activities.iter().map(|a| a.duration).sum();
                println!("{} ({} activities, {total} min)", flow.identifier, flow.activities.len());
            }
        }
        FlowAction::Plan { identifier, minutes, json } => {
            let flow = config
                .flow(&identifier)
                .ok_or_else(|| ScheduleError::UnknownFlow(identifier.clone()))?;
            let plan = generate_plan(&identifier, flow.specs(), time_limit(minutes)?)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                for spec in &plan {
                    println!("{:<20} {:>7.2} min  (shrinking {:.3})", spec.identifier, spec.planned_duration(), spec.shrinking);
                }
                println!("{:<20} {:>7.2} min", "total", total_minutes(&plan));
            }
        }
    }
    Ok(())
}

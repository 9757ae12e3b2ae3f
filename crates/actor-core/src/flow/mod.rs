//! Activity flows: time-budget planning and the activation state machine.

mod engine;
mod plan;

pub use engine::{ActivationHost, Flow, FlowStatus};
pub use plan::{generate_plan, total_minutes, ActivitySpec, MAX_PLAN_ITERATIONS, PLAN_TOLERANCE_MIN};

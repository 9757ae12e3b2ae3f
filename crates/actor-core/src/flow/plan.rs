use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Largest accepted gap between the plan total and the time limit, in minutes.
pub const PLAN_TOLERANCE_MIN: f64 = 0.005;

/// Upper bound on shrink/skip iterations before giving up.
pub const MAX_PLAN_ITERATIONS: usize = 10_000;

/// One activity of a flow, with its share of the time budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySpec {
    pub identifier: String,
    /// Nominal duration in minutes.
    pub duration: f64,
    /// Smallest multiplier the duration may be shrunk to.
    pub max_shrink: f64,
    /// Lower priorities are skipped first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_shrinking")]
    pub shrinking: f64,
    #[serde(default)]
    pub skipped: bool,
}

fn default_priority() -> u32 {
    1
}

fn default_shrinking() -> f64 {
    1.0
}

impl ActivitySpec {
    pub fn new(identifier: impl Into<String>, duration: f64, max_shrink: f64) -> Self {
        Self {
            identifier: identifier.into(),
            duration,
            max_shrink,
            priority: default_priority(),
            shrinking: default_shrinking(),
            skipped: false,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Duration after shrinking, in minutes.
    pub fn planned_duration(&self) -> f64 {
        self.duration * self.shrinking
    }
}

impl fmt::Display for ActivitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, duration {}, shrinking {:.3} (max {}), priority {}, skipped: {}",
            self.identifier, self.duration, self.shrinking, self.max_shrink, self.priority, self.skipped
        )
    }
}

/// Fit `activities` into `time_limit` minutes.
///
/// Without a limit the activities are returned unshrunk. Otherwise every
/// iteration either accepts the plan, shrinks all activities that can still
/// take a uniform shrink, or skips the activity with the lowest
/// `(priority, max_shrink)`. A negative deficit stretches activities instead.
///
/// # Errors
///
/// `NotEnoughTime` when nothing is left to plan, `DidNotConverge` when the
/// iteration cap is reached.
pub fn generate_plan(
    flow: &str,
    activities: Vec<ActivitySpec>,
    time_limit: Option<f64>,
) -> Result<Vec<ActivitySpec>, ScheduleError> {
    let mut plan: Vec<ActivitySpec> = activities.into_iter().filter(|a| !a.skipped).collect();

    let Some(time_limit) = time_limit else {
        return Ok(plan);
    };

    for _ in 0..MAX_PLAN_ITERATIONS {
        plan.retain(|a| !a.skipped);
        let required: f64 = plan.iter().map(ActivitySpec::planned_duration).sum();

        if required <= 0.0 {
            return Err(ScheduleError::NotEnoughTime {
                flow: flow.to_string(),
            });
        }

        let deficit = required - time_limit;
        if deficit.abs() <= PLAN_TOLERANCE_MIN {
            return Ok(plan);
        }

        // Shrink uniformly where the floor allows it
        let multiplier = 1.0 - deficit / required;
        let mut shrunk = false;
        for activity in plan.iter_mut() {
            let proposed = activity.shrinking * multiplier;
            if proposed >= activity.max_shrink {
                activity.shrinking = proposed;
                shrunk = true;
            }
        }

        if !shrunk {
            // Ties go to the first declared activity.
            let victim = plan.iter_mut().min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.max_shrink.total_cmp(&b.max_shrink))
            });
            if let Some(victim) = victim {
                tracing::debug!(flow, activity = %victim.identifier, "skipping activity");
                victim.skipped = true;
            }
        }
    }

    Err(ScheduleError::DidNotConverge {
        flow: flow.to_string(),
        iterations: MAX_PLAN_ITERATIONS,
    })
}

/// Total planned minutes.
pub fn total_minutes(plan: &[ActivitySpec]) -> f64 {
    plan.iter().map(ActivitySpec::planned_duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= PLAN_TOLERANCE_MIN
    }

    #[test]
    fn no_limit_keeps_durations() {
        let plan = generate_plan(
            "f",
            vec![ActivitySpec::new("a", 10.0, 0.5), ActivitySpec::new("b", 5.0, 0.5)],
            None,
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|a| a.shrinking == 1.0));
    }

    #[test]
    fn uniform_shrink() {
        let activities = (0..3)
            .map(|i| ActivitySpec::new(format!("a{i}"), 10.0, 0.5))
            .collect();
        let plan = generate_plan("f", activities, Some(20.0)).unwrap();

        assert_eq!(plan.len(), 3);
        for activity in &plan {
            assert!((activity.shrinking - 2.0 / 3.0).abs() < 0.001, "{activity}");
        }
        assert!(close(total_minutes(&plan), 20.0));
    }

    #[test]
    fn lowest_priority_is_skipped_when_floors_block_shrinking() {
        let activities = vec![
            ActivitySpec::new("A", 10.0, 0.9).with_priority(2),
            ActivitySpec::new("B", 10.0, 0.9).with_priority(1),
        ];
        let plan = generate_plan("f", activities, Some(10.0)).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].identifier, "A");
        assert!(close(plan[0].planned_duration(), 10.0));
    }

    #[test]
    fn priority_tie_skips_least_flexible() {
        let activities = vec![
            ActivitySpec::new("rigid", 10.0, 0.95),
            ActivitySpec::new("loose", 10.0, 0.9),
        ];
        let plan = generate_plan("f", activities, Some(10.0)).unwrap();

        // Lower max_shrink sorts first, so the looser one goes.
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].identifier, "rigid");
    }

    #[test]
    fn stretches_after_a_skip() {
        let activities = vec![
            ActivitySpec::new("A", 10.0, 0.9).with_priority(2),
            ActivitySpec::new("B", 10.0, 0.9).with_priority(1),
        ];
        let plan = generate_plan("f", activities, Some(15.0)).unwrap();

        assert_eq!(plan.len(), 1);
        assert!((plan[0].shrinking - 1.5).abs() < 0.001);
    }

    #[test]
    fn nothing_fits() {
        let err = generate_plan("evening", vec![ActivitySpec::new("A", 10.0, 0.9)], Some(1.0)).unwrap_err();
        assert_eq!(err, ScheduleError::NotEnoughTime { flow: "evening".into() });

        let err = generate_plan("empty", Vec::new(), Some(10.0)).unwrap_err();
        assert!(matches!(err, ScheduleError::NotEnoughTime { .. }));
    }

    #[test]
    fn pre_skipped_activities_are_dropped() {
        let mut skipped = ActivitySpec::new("gone", 10.0, 0.5);
        skipped.skipped = true;
        let plan = generate_plan("f", vec![skipped, ActivitySpec::new("kept", 5.0, 0.5)], None).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].identifier, "kept");
    }

    proptest! {
        #[test]
        fn accepted_plans_match_the_limit(
            specs in prop::collection::vec((1.0f64..60.0, 0.1f64..1.0, 1u32..4), 1..6),
            limit in 1.0f64..240.0,
        ) {
            let activities = specs
                .iter()
                .enumerate()
                .map(|(i, (d, s, p))| ActivitySpec::new(format!("a{i}"), *d, *s).with_priority(*p))
                .collect();

            match generate_plan("f", activities, Some(limit)) {
                Ok(plan) => {
                    prop_assert!(close(total_minutes(&plan), limit));
                    prop_assert!(plan.iter().all(|a| a.shrinking >= a.max_shrink));
                    prop_assert!(plan.iter().all(|a| !a.skipped));
                }
                // Pathological floors can converge too slowly for the cap.
                Err(ScheduleError::NotEnoughTime { .. } | ScheduleError::DidNotConverge { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }
}

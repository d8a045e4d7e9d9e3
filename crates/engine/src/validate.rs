//! Definition validation: run this before storing or updating a workflow.
//!
//! Rules enforced:
//! 1. The workflow name is not blank.
//! 2. The step list is non-empty.
//! 3. Step names are unique within the workflow.
//! 4. Every `step_type` resolves in the step registry.
//! 5. The trigger is well-formed: intervals are positive and representable
//!    as a date offset, cron expressions parse and match at least once in
//!    the search horizon.

use std::collections::HashSet;

use chrono::{TimeDelta, Utc};
use steps::StepRegistry;
use thiserror::Error;

use crate::cron::{CronError, CronSchedule};
use crate::models::{StepDefinition, Trigger};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must have at least one step")]
    NoSteps,

    #[error("step name must not be empty (position {0})")]
    EmptyStepName(usize),

    #[error("duplicate step name: '{0}'")]
    DuplicateStepName(String),

    #[error("step '{step}' references unknown step type '{step_type}'")]
    UnknownStepType { step: String, step_type: String },

    #[error("interval must be at least one second")]
    ZeroInterval,

    #[error("interval of {0} seconds is too large")]
    IntervalTooLarge(u64),

    #[error("invalid cron expression '{expression}': {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: CronError,
    },

    #[error("cron expression '{0}' never fires")]
    CronNeverFires(String),
}

/// Validate the trigger alone.
pub fn validate_trigger(trigger: &Trigger) -> Result<(), ValidationError> {
    match trigger {
        Trigger::Manual => Ok(()),
        Trigger::Interval { seconds } if *seconds == 0 => Err(ValidationError::ZeroInterval),
        Trigger::Interval { seconds } => {
            let fits = interval_delta(*seconds).is_some_and(|d| Utc::now().checked_add_signed(d).is_some());
            if fits {
                Ok(())
            } else {
                Err(ValidationError::IntervalTooLarge(*seconds))
            }
        }
        Trigger::Cron { expression } => {
            let schedule =
                CronSchedule::parse(expression).map_err(|source| ValidationError::InvalidCron {
                    expression: expression.clone(),
                    source,
                })?;
            if schedule.next_after(Utc::now()).is_none() {
                return Err(ValidationError::CronNeverFires(expression.clone()));
            }
            Ok(())
        }
    }
}

/// An interval trigger's period, if it fits in a `TimeDelta`.
pub(crate) fn interval_delta(seconds: u64) -> Option<TimeDelta> {
    i64::try_from(seconds).ok().and_then(TimeDelta::try_seconds)
}

/// Validate the ordered step list against the step registry.
pub fn validate_steps(
    steps: &[StepDefinition],
    registry: &StepRegistry,
) -> Result<(), ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::NoSteps);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for (position, step) in steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(ValidationError::EmptyStepName(position));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(ValidationError::DuplicateStepName(step.name.clone()));
        }
        if !registry.contains(&step.step_type) {
            return Err(ValidationError::UnknownStepType {
                step: step.name.clone(),
                step_type: step.step_type.clone(),
            });
        }
    }
    Ok(())
}

/// Validate a complete definition.
pub fn validate_definition(
    name: &str,
    trigger: &Trigger,
    steps: &[StepDefinition],
    registry: &StepRegistry,
) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    validate_steps(steps, registry)?;
    validate_trigger(trigger)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use steps::builtin::NoopStep;

    fn registry() -> StepRegistry {
        StepRegistry::new().with("noop", Arc::new(NoopStep))
    }

    fn step(name: &str) -> StepDefinition {
        StepDefinition::new(name, "noop")
    }

    #[test]
    fn valid_definition_passes() {
        let result = validate_definition(
            "ok",
            &Trigger::Interval { seconds: 5 },
            &[step("a"), step("b")],
            &registry(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn empty_steps_are_rejected() {
        assert_eq!(
            validate_definition("wf", &Trigger::Manual, &[], &registry()),
            Err(ValidationError::NoSteps)
        );
    }

    #[test]
    fn blank_name_is_rejected() {
        assert_eq!(
            validate_definition("  ", &Trigger::Manual, &[step("a")], &registry()),
            Err(ValidationError::EmptyName)
        );
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        assert!(matches!(
            validate_steps(&[step("a"), step("a")], &registry()),
            Err(ValidationError::DuplicateStepName(name)) if name == "a"
        ));
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let steps = [StepDefinition::new("a", "ghost")];
        assert!(matches!(
            validate_steps(&steps, &registry()),
            Err(ValidationError::UnknownStepType { step_type, .. }) if step_type == "ghost"
        ));
    }

    #[test]
    fn trigger_rules() {
        assert_eq!(validate_trigger(&Trigger::Manual), Ok(()));
        assert_eq!(
            validate_trigger(&Trigger::Interval { seconds: 0 }),
            Err(ValidationError::ZeroInterval)
        );
        assert!(matches!(
            validate_trigger(&Trigger::Cron { expression: "not cron".into() }),
            Err(ValidationError::InvalidCron { .. })
        ));
        assert!(matches!(
            validate_trigger(&Trigger::Cron { expression: "0 0 31 4 *".into() }),
            Err(ValidationError::CronNeverFires(_))
        ));
        assert_eq!(validate_trigger(&Trigger::Cron { expression: "*/5 * * * *".into() }), Ok(()));
    }

    #[test]
    fn oversized_interval_is_rejected() {
        assert_eq!(
            validate_trigger(&Trigger::Interval { seconds: u64::MAX }),
            Err(ValidationError::IntervalTooLarge(u64::MAX))
        );
        let beyond_i64 = i64::MAX as u64 + 1;
        assert_eq!(
            validate_trigger(&Trigger::Interval { seconds: beyond_i64 }),
            Err(ValidationError::IntervalTooLarge(beyond_i64))
        );
        assert_eq!(validate_trigger(&Trigger::Interval { seconds: 86_400 * 365 }), Ok(()));
    }
}

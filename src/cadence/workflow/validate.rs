// SPDX-License-Identifier: MIT

//! Registration-time checks on workflow definitions
//!
//! Everything a run could trip over structurally is rejected here, so the
//! executor never meets a dangling step, a decision without a default or an
//! expression that does not parse.

use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use super::expression;
use super::template;
use super::types::{StepKind, TriggerBinding, WorkflowDefinition};
use crate::cadence::triggers::ScheduleSpec;
use crate::kit::error::{DefinitionError, ExpressionError};

/// Validate a (normalized) definition against the set of known action names
pub fn validate(def: &WorkflowDefinition, actions: &HashSet<String>) -> Result<(), DefinitionError> {
    if def.id.trim().is_empty() {
        return Err(DefinitionError::EmptyId);
    }
    if def.steps.is_empty() {
        return Err(DefinitionError::NoSteps);
    }

    let mut ids = HashSet::new();
    for step in &def.steps {
        if step.id.trim().is_empty() {
            return Err(DefinitionError::EmptyStepId);
        }
        if !ids.insert(step.id.as_str()) {
            return Err(DefinitionError::DuplicateStep(step.id.clone()));
        }
    }
    if !ids.contains(def.entry.as_str()) {
        return Err(DefinitionError::MissingEntry(def.entry.clone()));
    }

    for step in &def.steps {
        check_step_kind(&step.id, &step.kind, actions)?;
        for target in step.successors() {
            if !ids.contains(target) {
                return Err(DefinitionError::DanglingTransition {
                    from: step.id.clone(),
                    to: target.to_string(),
                });
            }
        }
    }

    check_reachability(def)?;

    if !def.steps.iter().any(|s| s.kind == StepKind::Terminal) {
        return Err(DefinitionError::NoTerminal);
    }

    for (name, var) in &def.variables.fields {
        if let Some(default) = &var.default {
            if !var.field_type.admits(default) {
                return Err(DefinitionError::BadDefault(name.clone()));
            }
        }
    }

    for binding in &def.triggers {
        check_trigger(binding)?;
    }

    Ok(())
}

fn check_step_kind(
    step: &str,
    kind: &StepKind,
    actions: &HashSet<String>,
) -> Result<(), DefinitionError> {
    match kind {
        StepKind::Action(action) => {
            if !actions.contains(&action.action) {
                return Err(DefinitionError::UnknownAction {
                    step: step.to_string(),
                    action: action.action.clone(),
                });
            }
            let location = format!("parameters of step '{}'", step);
            let params = Value::Object(action.with.clone());
            let exprs = template::expressions(&params).map_err(|source| {
                DefinitionError::InvalidExpression {
                    location: location.clone(),
                    source,
                }
            })?;
            for expr in exprs {
                check_expression(expr, &location)?;
            }
        }
        StepKind::Decision(decision) => {
            if decision.transitions.is_empty() {
                return Err(DefinitionError::NoTransitions(step.to_string()));
            }
            let defaults = decision
                .transitions
                .iter()
                .filter(|t| t.when.is_none())
                .count();
            match defaults {
                0 => return Err(DefinitionError::MissingDefault(step.to_string())),
                1 => {}
                _ => return Err(DefinitionError::MultipleDefaults(step.to_string())),
            }
            for (idx, transition) in decision.transitions.iter().enumerate() {
                if let Some(when) = &transition.when {
                    check_expression(
                        when,
                        &format!("transition {} of step '{}'", idx + 1, step),
                    )?;
                }
            }
        }
        StepKind::Wait(wait) => {
            let has_event = wait.event.as_deref().is_some_and(|e| !e.trim().is_empty());
            if !has_event && wait.timeout_secs.is_none() {
                return Err(DefinitionError::EmptyWait(step.to_string()));
            }
            if wait.on_timeout.is_some() && wait.timeout_secs.is_none() {
                return Err(DefinitionError::TimeoutTransitionWithoutTimeout(
                    step.to_string(),
                ));
            }
            if let Some(matches) = &wait.matches {
                check_expression(matches, &format!("match of step '{}'", step))?;
            }
        }
        StepKind::Terminal => {}
    }
    Ok(())
}

/// Every step must be reachable from the entry
fn check_reachability(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    let by_id: HashMap<&str, _> = def.steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut seen = HashSet::from([def.entry.as_str()]);
    let mut queue = VecDeque::from([def.entry.as_str()]);

    while let Some(id) = queue.pop_front() {
        let Some(step) = by_id.get(id) else { continue };
        for next in step.successors() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    match def.steps.iter().find(|s| !seen.contains(s.id.as_str())) {
        Some(orphan) => Err(DefinitionError::Unreachable(orphan.id.clone())),
        None => Ok(()),
    }
}

fn check_trigger(binding: &TriggerBinding) -> Result<(), DefinitionError> {
    match binding {
        TriggerBinding::Event { event, filter } => {
            if event.trim().is_empty() {
                return Err(DefinitionError::InvalidTrigger(
                    "event binding needs an event name".to_string(),
                ));
            }
            if let Some(filter) = filter {
                check_expression(filter, &format!("filter of '{}' trigger", event))?;
            }
        }
        TriggerBinding::Schedule {
            every_secs,
            cron,
            context,
            ..
        } => {
            ScheduleSpec::parse(*every_secs, cron.as_deref())
                .map_err(|e| DefinitionError::InvalidTrigger(e.to_string()))?;
            let location = "schedule context".to_string();
            let params = Value::Object(context.clone());
            let exprs = template::expressions(&params).map_err(|source| {
                DefinitionError::InvalidExpression {
                    location: location.clone(),
                    source,
                }
            })?;
            for expr in exprs {
                check_expression(expr, &location)?;
            }
        }
        TriggerBinding::Manual => {}
    }
    Ok(())
}

/// Parses, and rejects calls to functions that do not exist
fn check_expression(source: &str, location: &str) -> Result<(), DefinitionError> {
    let invalid = |source| DefinitionError::InvalidExpression {
        location: location.to_string(),
        source,
    };
    let parsed = expression::parse(source).map_err(invalid)?;
    if let Some(unknown) = parsed
        .function_names()
        .into_iter()
        .find(|name| !expression::is_builtin(name))
    {
        return Err(invalid(ExpressionError::UnknownFunction(unknown.to_string())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::workflow::loader::WorkflowLoader;

    fn actions() -> HashSet<String> {
        ["set", "notify"].iter().map(|s| s.to_string()).collect()
    }

    fn check(yaml: &str) -> Result<(), DefinitionError> {
        let mut def = WorkflowLoader::parse_yaml(yaml).unwrap();
        def.normalize();
        validate(&def, &actions())
    }

    const VALID: &str = r#"
id: approval
triggers:
  - kind: manual
steps:
  - id: start
    kind: action
    action: set
    with: { seen: true }
    next: decide
  - id: decide
    kind: decision
    transitions:
      - when: "amount > 1000"
        to: approve
      - to: done
  - id: approve
    kind: wait
    event: approval.decided
    timeout_secs: 60
    next: done
    on_timeout: done
  - id: done
    kind: terminal
"#;

    #[test]
    fn test_valid_definition() {
        assert_eq!(check(VALID), Ok(()));
    }

    #[test]
    fn test_missing_default() {
        let yaml = VALID.replace("      - to: done\n", "");
        assert_eq!(
            check(&yaml),
            Err(DefinitionError::MissingDefault("decide".into()))
        );
    }

    #[test]
    fn test_multiple_defaults() {
        let yaml = VALID.replace("      - to: done\n", "      - to: done\n      - to: approve\n");
        assert_eq!(
            check(&yaml),
            Err(DefinitionError::MultipleDefaults("decide".into()))
        );
    }

    #[test]
    fn test_dangling_transition() {
        let yaml = VALID.replace("    next: decide", "    next: nowhere");
        assert_eq!(
            check(&yaml),
            Err(DefinitionError::DanglingTransition {
                from: "start".into(),
                to: "nowhere".into()
            })
        );
    }

    #[test]
    fn test_unreachable_step() {
        let yaml = format!("{}  - id: orphan\n    kind: terminal\n", VALID);
        assert_eq!(check(&yaml), Err(DefinitionError::Unreachable("orphan".into())));
    }

    #[test]
    fn test_unknown_action() {
        let yaml = VALID.replace("action: set", "action: launch_rockets");
        assert!(matches!(check(&yaml), Err(DefinitionError::UnknownAction { .. })));
    }

    #[test]
    fn test_bad_guard_expression() {
        let yaml = VALID.replace("amount > 1000", "amount >");
        assert!(matches!(
            check(&yaml),
            Err(DefinitionError::InvalidExpression { .. })
        ));

        let yaml = VALID.replace("amount > 1000", "frobnicate(amount)");
        assert!(matches!(
            check(&yaml),
            Err(DefinitionError::InvalidExpression {
                source: ExpressionError::UnknownFunction(_),
                ..
            })
        ));
    }

    #[test]
    fn test_wait_rules() {
        let yaml = VALID
            .replace("    event: approval.decided\n", "")
            .replace("    timeout_secs: 60\n", "")
            .replace("    on_timeout: done\n", "");
        assert_eq!(check(&yaml), Err(DefinitionError::EmptyWait("approve".into())));

        let yaml = VALID.replace("    timeout_secs: 60\n", "");
        assert_eq!(
            check(&yaml),
            Err(DefinitionError::TimeoutTransitionWithoutTimeout("approve".into()))
        );
    }

    #[test]
    fn test_duplicate_and_missing_entry() {
        let yaml = VALID.replace("id: approve", "id: start");
        assert_eq!(check(&yaml), Err(DefinitionError::DuplicateStep("start".into())));

        let yaml = VALID.replace("id: approval\n", "id: approval\nentry: ghost\n");
        assert_eq!(check(&yaml), Err(DefinitionError::MissingEntry("ghost".into())));
    }

    #[test]
    fn test_invalid_schedule_binding() {
        let yaml = VALID.replace(
            "  - kind: manual",
            "  - kind: schedule\n    every_secs: 60\n    cron: \"* * * * *\"",
        );
        assert!(matches!(check(&yaml), Err(DefinitionError::InvalidTrigger(_))));

        let yaml = VALID.replace("  - kind: manual", "  - kind: schedule\n    cron: \"61 * * * *\"");
        assert!(matches!(check(&yaml), Err(DefinitionError::InvalidTrigger(_))));
    }

    #[test]
    fn test_schedule_context_expressions() {
        let yaml = VALID.replace(
            "  - kind: manual",
            "  - kind: schedule\n    every_secs: 60\n    context:\n      amount: \"${1 + 2}\"",
        );
        assert_eq!(check(&yaml), Ok(()));

        let yaml = VALID.replace(
            "  - kind: manual",
            "  - kind: schedule\n    every_secs: 60\n    context:\n      amount: \"${1 +}\"",
        );
        assert!(matches!(
            check(&yaml),
            Err(DefinitionError::InvalidExpression { .. })
        ));

        let yaml = VALID.replace(
            "  - kind: manual",
            "  - kind: schedule\n    cron: \"59/4294967295 * * * *\"",
        );
        assert!(matches!(check(&yaml), Err(DefinitionError::InvalidTrigger(_))));
    }

    #[test]
    fn test_bad_default_type() {
        let yaml = VALID.replace(
            "triggers:",
            "variables:\n  amount: { type: number, default: \"lots\" }\ntriggers:",
        );
        assert_eq!(check(&yaml), Err(DefinitionError::BadDefault("amount".into())));
    }

    #[test]
    fn test_no_terminal() {
        let yaml = r#"
id: spin
steps:
  - id: a
    kind: action
    action: set
    next: a
"#;
        assert_eq!(check(yaml), Err(DefinitionError::NoTerminal));
    }
}

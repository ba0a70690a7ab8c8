// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::parse_args;
use crate::cadence::workflow::rules::{Rule, RuleMode, RuleSet};
use crate::kit::action::{Action, ActionContext};
use crate::kit::error::ActionError;

/// Returns its (already rendered) parameters, so they merge into the context
pub struct SetAction;

#[async_trait]
impl Action for SetAction {
    fn name(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Assigns its parameters to run variables."
    }

    async fn execute(&self, input: Value, _ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        Ok(input)
    }
}

#[derive(Debug, Deserialize)]
struct RulesArgs {
    #[serde(default)]
    mode: RuleMode,
    rules: Vec<Rule<Map<String, Value>>>,
}

/// Evaluates a rule set against the run variables and returns the merged
/// `then` maps of the rules that matched, in declared order
pub struct RulesAction;

#[async_trait]
impl Action for RulesAction {
    fn name(&self) -> &str {
        "rules"
    }

    fn description(&self) -> &str {
        "Evaluates ordered condition rules; matching rules' outputs merge into the run context."
    }

    async fn execute(&self, input: Value, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let args: RulesArgs = parse_args(self.name(), input)?;
        let set = RuleSet::compile(args.mode, args.rules)
            .map_err(|e| ActionError::invalid_input(e.to_string()))?;
        let matched = set
            .apply(ctx.variables)
            .map_err(|e| ActionError::invalid_input(e.to_string()))?;

        let mut merged = Map::new();
        for then in matched {
            merged.extend(then.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::workflow::state::Context;
    use serde_json::json;

    fn ctx(vars: &Context) -> ActionContext<'_> {
        ActionContext {
            run_id: "r1",
            workflow_id: "wf",
            step_id: "classify",
            attempt: 1,
            variables: vars,
        }
    }

    fn vars() -> Context {
        Context::from_value(json!({"amount": 2500, "vendor": "acme"})).unwrap()
    }

    #[tokio::test]
    async fn test_first_mode_stops_at_first_match() {
        let vars = vars();
        let input = json!({
            "rules": [
                {"when": "amount > 1000", "then": {"tier": "high"}},
                {"when": "vendor == 'acme'", "then": {"tier": "partner", "fast": true}}
            ]
        });
        let out = RulesAction.execute(input, ctx(&vars)).await.unwrap();
        assert_eq!(out, json!({"tier": "high"}));
    }

    #[tokio::test]
    async fn test_all_mode_merges_in_order() {
        let vars = vars();
        let input = json!({
            "mode": "all",
            "rules": [
                {"when": "amount > 1000", "then": {"tier": "high"}},
                {"when": "amount > 10", "then": {"tier": "any", "audit": true}},
                {"when": "amount < 0", "then": {"refund": true}}
            ]
        });
        let out = RulesAction.execute(input, ctx(&vars)).await.unwrap();
        assert_eq!(out, json!({"tier": "any", "audit": true}));
    }

    #[tokio::test]
    async fn test_non_boolean_condition_is_invalid_input() {
        let vars = vars();
        let input = json!({"rules": [{"when": "amount + 1", "then": {}}]});
        let err = RulesAction.execute(input, ctx(&vars)).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_set_echoes_params() {
        let vars = Context::new();
        let out = SetAction
            .execute(json!({"status": "approved"}), ctx(&vars))
            .await
            .unwrap();
        assert_eq!(out, json!({"status": "approved"}));
    }
}

// SPDX-License-Identifier: MIT

//! Ordered condition -> action rule sets

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::expression::{self, Expression};
use super::state::Context;
use crate::kit::error::RuleError;

/// How many matching rules a set yields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    /// Stop at the first rule whose condition is true
    #[default]
    First,
    /// Every matching rule, in declared order
    All,
}

/// A condition paired with the action it yields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule<A> {
    #[serde(default)]
    pub name: String,
    pub when: String,
    pub then: A,
}

impl<A> Rule<A> {
    pub fn new(name: impl Into<String>, when: impl Into<String>, then: A) -> Self {
        Self {
            name: name.into(),
            when: when.into(),
            then,
        }
    }
}

struct CompiledRule<A> {
    label: String,
    condition: Expression,
    then: A,
}

/// Rules with their conditions parsed, ready to apply against a context
pub struct RuleSet<A> {
    mode: RuleMode,
    rules: Vec<CompiledRule<A>>,
}

impl<A> RuleSet<A> {
    /// Parse every condition up front so a bad rule fails before any runs
    pub fn compile(mode: RuleMode, rules: Vec<Rule<A>>) -> Result<Self, RuleError> {
        let rules = rules
            .into_iter()
            .enumerate()
            .map(|(idx, rule)| {
                let label = if rule.name.is_empty() {
                    format!("#{}", idx + 1)
                } else {
                    rule.name
                };
                let condition = expression::parse(&rule.when).map_err(|source| {
                    RuleError::Expression {
                        rule: label.clone(),
                        source,
                    }
                })?;
                Ok(CompiledRule {
                    label,
                    condition,
                    then: rule.then,
                })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        Ok(Self { mode, rules })
    }

    pub fn mode(&self) -> RuleMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Matching actions under the set's mode: at most one for `First`
    pub fn apply(&self, ctx: &Context) -> Result<Vec<&A>, RuleError> {
        match self.mode {
            RuleMode::First => Ok(self.first(ctx)?.into_iter().collect()),
            RuleMode::All => self.all(ctx),
        }
    }

    /// First matching action; later rules are not evaluated
    pub fn first(&self, ctx: &Context) -> Result<Option<&A>, RuleError> {
        for rule in &self.rules {
            if Self::holds(rule, ctx)? {
                return Ok(Some(&rule.then));
            }
        }
        Ok(None)
    }

    /// Every matching action, in declared order
    pub fn all(&self, ctx: &Context) -> Result<Vec<&A>, RuleError> {
        let mut matched = Vec::new();
        for rule in &self.rules {
            if Self::holds(rule, ctx)? {
                matched.push(&rule.then);
            }
        }
        Ok(matched)
    }

    fn holds(rule: &CompiledRule<A>, ctx: &Context) -> Result<bool, RuleError> {
        let value =
            expression::evaluate(&rule.condition, ctx).map_err(|source| RuleError::Expression {
                rule: rule.label.clone(),
                source,
            })?;
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(RuleError::NonBoolean {
                rule: rule.label.clone(),
                found: expression::type_name(&other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit::error::ExpressionError;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        Context::from_value(value).unwrap()
    }

    fn tiers() -> Vec<Rule<&'static str>> {
        vec![
            Rule::new("large", "amount > 10000", "cfo"),
            Rule::new("medium", "amount > 1000", "manager"),
            Rule::new("any", "amount >= 0", "auto"),
        ]
    }

    #[test]
    fn test_first_match_wins() {
        let set = RuleSet::compile(RuleMode::First, tiers()).unwrap();

        assert_eq!(set.first(&ctx(json!({"amount": 50000}))).unwrap(), Some(&"cfo"));
        assert_eq!(set.first(&ctx(json!({"amount": 1500}))).unwrap(), Some(&"manager"));
        assert_eq!(set.apply(&ctx(json!({"amount": 5}))).unwrap(), vec![&"auto"]);
    }

    #[test]
    fn test_all_mode_keeps_declared_order() {
        let set = RuleSet::compile(RuleMode::All, tiers()).unwrap();
        assert_eq!(
            set.apply(&ctx(json!({"amount": 1500}))).unwrap(),
            vec![&"manager", &"auto"]
        );
    }

    #[test]
    fn test_no_match_and_empty_set() {
        let set = RuleSet::compile(RuleMode::First, tiers()).unwrap();
        assert_eq!(set.first(&ctx(json!({"amount": -1}))).unwrap(), None);

        let empty: RuleSet<&str> = RuleSet::compile(RuleMode::All, vec![]).unwrap();
        assert!(empty.is_empty());
        assert!(empty.apply(&Context::new()).unwrap().is_empty());
    }

    #[test]
    fn test_non_boolean_condition_is_rule_type_error() {
        let set = RuleSet::compile(RuleMode::First, vec![Rule::new("", "amount + 1", "x")]).unwrap();
        assert_eq!(
            set.first(&ctx(json!({"amount": 1}))),
            Err(RuleError::NonBoolean {
                rule: "#1".into(),
                found: "number"
            })
        );
    }

    #[test]
    fn test_first_mode_short_circuits() {
        // the second rule would fail on an unknown identifier
        let rules = vec![
            Rule::new("hit", "true", 1),
            Rule::new("broken", "missing > 1", 2),
        ];
        let set = RuleSet::compile(RuleMode::First, rules).unwrap();
        assert_eq!(set.first(&Context::new()).unwrap(), Some(&1));

        let set = RuleSet::compile(
            RuleMode::All,
            vec![Rule::new("hit", "true", 1), Rule::new("broken", "missing > 1", 2)],
        )
        .unwrap();
        assert!(matches!(
            set.all(&Context::new()),
            Err(RuleError::Expression {
                source: ExpressionError::UnknownIdentifier(_),
                ..
            })
        ));
    }

    #[test]
    fn test_compile_rejects_bad_syntax() {
        let result = RuleSet::compile(RuleMode::First, vec![Rule::new("bad", "amount >", 0)]);
        assert!(matches!(result, Err(RuleError::Expression { .. })));
    }

    #[test]
    fn test_rules_deserialize() {
        let yaml = r#"
            - name: vip
              when: "customer.tier == 'gold'"
              then: { discount: 0.2 }
            - when: "true"
              then: { discount: 0 }
        "#;
        let rules: Vec<Rule<Value>> = serde_yaml::from_str(yaml).unwrap();
        let set = RuleSet::compile(RuleMode::First, rules).unwrap();
        let hit = set.first(&ctx(json!({"customer": {"tier": "gold"}}))).unwrap();
        assert_eq!(hit, Some(&json!({"discount": 0.2})));
    }
}

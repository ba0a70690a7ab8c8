// SPDX-License-Identifier: MIT

//! Schema types for workflow definitions
//!
//! Definitions are authored as YAML (or posted as JSON) and are immutable
//! once registered; runs pin the version they started on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::state::VariableSchema;
use crate::cadence::triggers::MissedTicks;

/// Top-level workflow definition
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub id: String,
    /// 0 lets the engine assign the next version on registration
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entry step id; defaults to the first declared step
    #[serde(default)]
    pub entry: String,
    #[serde(default, skip_serializing_if = "VariableSchema::is_empty")]
    pub variables: VariableSchema,
    #[serde(default)]
    pub triggers: Vec<TriggerBinding>,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Fill in the entry step when it was left out
    pub fn normalize(&mut self) {
        if self.entry.is_empty() {
            if let Some(first) = self.steps.first() {
                self.entry = first.id.clone();
            }
        }
    }

    /// Whether any binding allows manual activation
    pub fn has_manual_binding(&self) -> bool {
        self.triggers
            .iter()
            .any(|t| matches!(t, TriggerBinding::Manual))
    }
}

/// A node in the workflow graph
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StepDefinition {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepDefinition {
    /// Ids of every step this one can transition to
    pub fn successors(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::Action(a) => vec![a.next.as_str()],
            StepKind::Decision(d) => d.transitions.iter().map(|t| t.to.as_str()).collect(),
            StepKind::Wait(w) => std::iter::once(w.next.as_str())
                .chain(w.on_timeout.as_deref())
                .collect(),
            StepKind::Terminal => vec![],
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepKind {
    Action(ActionStep),
    Decision(DecisionStep),
    Wait(WaitStep),
    Terminal,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Action(_) => "action",
            StepKind::Decision(_) => "decision",
            StepKind::Wait(_) => "wait",
            StepKind::Terminal => "terminal",
        }
    }
}

/// Invokes a registered action, merges its result, moves to `next`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ActionStep {
    pub action: String,
    /// Parameters; strings of the form `${expr}` are evaluated against the context
    #[serde(default)]
    pub with: Map<String, Value>,
    /// Variable that receives a non-object result (defaults to the step id)
    #[serde(default)]
    pub output: Option<String>,
    pub next: String,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DecisionStep {
    /// Evaluated in order; the transition without `when` is the default
    pub transitions: Vec<Transition>,
}

impl DecisionStep {
    pub fn default_target(&self) -> Option<&str> {
        self.transitions
            .iter()
            .find(|t| t.when.is_none())
            .map(|t| t.to.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Transition {
    #[serde(default)]
    pub when: Option<String>,
    pub to: String,
}

/// Suspends the run until a matching signal arrives or the deadline passes
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WaitStep {
    #[serde(default)]
    pub event: Option<String>,
    /// Predicate over `signal` (the payload) and the run's variables
    #[serde(default, rename = "match")]
    pub matches: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Variable that receives the signal payload
    #[serde(default = "default_signal_output")]
    pub output: String,
    pub next: String,
    #[serde(default)]
    pub on_timeout: Option<String>,
}

fn default_signal_output() -> String {
    "signal".to_string()
}

/// Retry policy for an action step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_coefficient: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 100,
            max_interval_ms: 10000,
            backoff_coefficient: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`, given `attempt` (1-based) just failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_interval_ms as f64 * self.backoff_coefficient.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_interval_ms as f64) as u64)
    }
}

/// Links a definition to one activation source
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerBinding {
    Event {
        event: String,
        /// Evaluated against `payload` and `event`
        #[serde(default)]
        filter: Option<String>,
    },
    Schedule {
        #[serde(default)]
        every_secs: Option<u64>,
        #[serde(default)]
        cron: Option<String>,
        /// Initial context; `${expr}` strings see `scheduled_for`
        #[serde(default)]
        context: Map<String, Value>,
        #[serde(default)]
        missed: MissedTicks,
    },
    Manual,
}

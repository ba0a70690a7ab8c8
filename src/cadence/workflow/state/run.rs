// SPDX-License-Identifier: MIT

//! Run records: status, wait conditions and step history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::context::Context;
use crate::kit::error::{ActionError, ExpressionError, RuleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Waiting => "waiting",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-matchable failure category recorded on failed runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Expression,
    Evaluation,
    UnknownFunction,
    RuleType,
    NoMatchingTransition,
    ActionExecution,
    ActionTimeout,
    WaitTimeout,
    StepLimit,
    UnknownStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<ExpressionError> for RunError {
    fn from(err: ExpressionError) -> Self {
        let kind = match &err {
            ExpressionError::Evaluation(_) => ErrorKind::Evaluation,
            ExpressionError::UnknownFunction(_) => ErrorKind::UnknownFunction,
            _ => ErrorKind::Expression,
        };
        RunError::new(kind, err.to_string())
    }
}

impl From<RuleError> for RunError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NonBoolean { .. } => RunError::new(ErrorKind::RuleType, err.to_string()),
            RuleError::Expression { rule, source } => {
                let mut mapped = RunError::from(source);
                mapped.message = format!("rule '{}': {}", rule, mapped.message);
                mapped
            }
        }
    }
}

impl From<ActionError> for RunError {
    fn from(err: ActionError) -> Self {
        let kind = match err {
            ActionError::Timeout(_) => ErrorKind::ActionTimeout,
            _ => ErrorKind::ActionExecution,
        };
        RunError::new(kind, err.to_string())
    }
}

/// What activated a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Event { event: String, event_id: String },
    Schedule { scheduled_for: DateTime<Utc> },
}

/// Attached to a waiting run; describes what resumes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitCondition {
    /// Fresh per suspension, so a stale resume or timer cannot consume a
    /// later wait on the same step
    pub token: String,
    pub step_id: String,
    pub event: Option<String>,
    /// Predicate over `signal` and the run context
    #[serde(default)]
    pub matches: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WaitCondition {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// External input offered to a waiting run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Event name; `None` is an administrative resume that skips the name check
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// When set, only the wait carrying this token accepts the signal
    #[serde(default)]
    pub token: Option<String>,
}

impl Signal {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: Some(event.into()),
            payload,
            token: None,
        }
    }

    pub fn anonymous(payload: Value) -> Self {
        Self {
            event: None,
            payload,
            token: None,
        }
    }

    pub fn for_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Transitioned,
    Suspended,
    Resumed,
    TimedOut,
    Completed,
    Failed,
    Cancelled,
}

/// One visit to a step. History is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_id: String,
    pub kind: String,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

/// A live or finished instance of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub definition_id: String,
    pub definition_version: u32,
    pub status: RunStatus,
    pub current_step: String,
    pub context: Context,
    #[serde(default)]
    pub wait: Option<WaitCondition>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub trigger: TriggerSource,
    #[serde(default)]
    pub error: Option<RunError>,
    #[serde(default)]
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(
        definition_id: &str,
        definition_version: u32,
        entry: &str,
        context: Context,
        trigger: TriggerSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            definition_id: definition_id.to_string(),
            definition_version,
            status: RunStatus::Running,
            current_step: entry.to_string(),
            context,
            wait: None,
            history: Vec::new(),
            trigger,
            error: None,
            output: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    /// Move to a finished status, clearing any wait
    pub fn finish(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.wait = None;
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.updated_at = entry.exited_at.unwrap_or(entry.entered_at);
        self.history.push(entry);
    }
}

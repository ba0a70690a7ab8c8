// SPDX-License-Identifier: MIT

//! Typed error handling for cadence-rs
//!
//! Every layer of the engine has its own error enum. `CadenceError` is the
//! top-level type returned by the engine surface; the narrower enums are
//! wrapped into it with `#[from]`.

use thiserror::Error;

/// Top-level error type for cadence-rs
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Structural problem found while registering a definition
    #[error("Invalid workflow definition '{workflow}': {source}")]
    InvalidDefinition {
        workflow: String,
        #[source]
        source: DefinitionError,
    },

    /// No definition registered under this id
    #[error("Workflow '{0}' not found")]
    WorkflowNotFound(String),

    /// Definition exists but not with the pinned version
    #[error("Workflow '{id}' has no version {version}")]
    VersionNotFound { id: String, version: u32 },

    /// No run stored under this id
    #[error("Run '{0}' not found")]
    RunNotFound(String),

    /// Start input rejected (not an object, or schema type mismatch)
    #[error("Invalid run input: {0}")]
    InvalidInput(String),

    /// Manual invocation of a workflow that has no manual binding
    #[error("Workflow '{0}' has no manual trigger binding")]
    ManualTriggerNotBound(String),

    /// Configuration errors (malformed env vars, missing files)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl CadenceError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_definition(workflow: impl Into<String>, source: DefinitionError) -> Self {
        Self::InvalidDefinition {
            workflow: workflow.into(),
            source,
        }
    }
}

/// Registration-time structural errors
#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    #[error("definition id must not be empty")]
    EmptyId,

    #[error("definition has no steps")]
    NoSteps,

    #[error("step id must not be empty")]
    EmptyStepId,

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("entry step '{0}' does not exist")]
    MissingEntry(String),

    #[error("step '{from}' references unknown step '{to}'")]
    DanglingTransition { from: String, to: String },

    #[error("step '{0}' is not reachable from the entry step")]
    Unreachable(String),

    #[error("decision step '{0}' has no transitions")]
    NoTransitions(String),

    #[error("decision step '{0}' has no default transition")]
    MissingDefault(String),

    #[error("decision step '{0}' has more than one default transition")]
    MultipleDefaults(String),

    #[error("wait step '{0}' needs an event, a timeout or both")]
    EmptyWait(String),

    #[error("wait step '{0}' declares on_timeout without timeout_secs")]
    TimeoutTransitionWithoutTimeout(String),

    #[error("step '{step}' uses unknown action '{action}'")]
    UnknownAction { step: String, action: String },

    #[error("invalid expression in {location}: {source}")]
    InvalidExpression {
        location: String,
        #[source]
        source: ExpressionError,
    },

    #[error("invalid trigger binding: {0}")]
    InvalidTrigger(String),

    #[error("default for variable '{0}' does not match its declared type")]
    BadDefault(String),

    #[error("definition has no terminal step")]
    NoTerminal,

    #[error("version {0} is already registered")]
    DuplicateVersion(u32),
}

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Runtime failures such as division by zero
    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("invalid arguments to {function}(): {message}")]
    InvalidArguments { function: String, message: String },
}

impl ExpressionError {
    pub(crate) fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            position,
        }
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch(message.into())
    }

    pub(crate) fn invalid_args(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised by the rule evaluator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleError {
    /// Condition evaluated to something other than a boolean
    #[error("rule '{rule}' condition produced {found}, expected boolean")]
    NonBoolean { rule: String, found: &'static str },

    #[error("rule '{rule}': {source}")]
    Expression {
        rule: String,
        #[source]
        source: ExpressionError,
    },
}

/// Errors raised by actions bound to workflow steps
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),

    /// Bad parameters; never retried
    #[error("invalid action input: {0}")]
    InvalidInput(String),

    #[error("action timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether a retry policy may attempt the action again
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ActionError::InvalidInput(_) | ActionError::Port(PortError::NotFound(_))
        )
    }
}

/// Errors surfaced by external collaborators (entity store, notifier)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortError {
    #[error("entity '{0}' not found")]
    NotFound(String),

    #[error("port unavailable: {0}")]
    Unavailable(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Run persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt run record '{id}': {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Schedule specification errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("schedule needs exactly one of every_secs or cron")]
    Ambiguous,

    #[error("interval must be greater than zero")]
    ZeroInterval,

    #[error("invalid cron expression '{expr}': {message}")]
    Cron { expr: String, message: String },
}

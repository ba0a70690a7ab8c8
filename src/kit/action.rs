// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;

use super::error::ActionError;
use crate::cadence::workflow::state::Context;

/// What an action sees of the run that invoked it
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub run_id: &'a str,
    pub workflow_id: &'a str,
    pub step_id: &'a str,
    /// 1-based attempt number under the step's retry policy
    pub attempt: u32,
    /// Read-only view of the run's variables
    pub variables: &'a Context,
}

/// Trait for the side-effecting work bound to `action` steps.
///
/// # Notes
/// - `name()` and `description()` return `&str`; store them in struct fields
/// - `execute` receives parameters already resolved against the run context
/// - returned objects merge into the run context field by field
#[async_trait]
pub trait Action: Send + Sync {
    /// Returns the action name (unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the action does
    fn description(&self) -> &str;

    /// Execute the action with the given input and return the result
    async fn execute(&self, input: Value, ctx: ActionContext<'_>) -> Result<Value, ActionError>;
}

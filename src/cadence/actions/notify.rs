// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::parse_args;
use crate::kit::action::{Action, ActionContext};
use crate::kit::error::ActionError;
use crate::kit::port::Notifier;

#[derive(Debug, Deserialize)]
struct NotifyArgs {
    channel: String,
    #[serde(default)]
    payload: Value,
    /// Fail the step when delivery fails
    #[serde(default)]
    required: bool,
}

/// Sends a notification through the notifier port
pub struct NotifyAction {
    notifier: Arc<dyn Notifier>,
}

impl NotifyAction {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Action for NotifyAction {
    fn name(&self) -> &str {
        "notify"
    }

    fn description(&self) -> &str {
        "Sends a payload to a notification channel. Delivery failures are only fatal when required is true."
    }

    async fn execute(&self, input: Value, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let args: NotifyArgs = parse_args(self.name(), input)?;
        match self.notifier.notify(&args.channel, args.payload).await {
            Ok(()) => Ok(json!({ "delivered": true })),
            Err(e) if args.required => Err(e.into()),
            Err(e) => {
                log::warn!(
                    "Notification to '{}' from run {} step '{}' failed: {}",
                    args.channel,
                    ctx.run_id,
                    ctx.step_id,
                    e
                );
                Ok(json!({ "delivered": false }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::workflow::state::Context;
    use crate::kit::error::PortError;

    struct DownNotifier;

    #[async_trait]
    impl Notifier for DownNotifier {
        async fn notify(&self, _channel: &str, _payload: Value) -> Result<(), PortError> {
            Err(PortError::Unavailable("smtp down".into()))
        }
    }

    fn ctx(vars: &Context) -> ActionContext<'_> {
        ActionContext {
            run_id: "r1",
            workflow_id: "wf",
            step_id: "tell",
            attempt: 1,
            variables: vars,
        }
    }

    #[tokio::test]
    async fn test_optional_delivery_failure_is_swallowed() {
        let action = NotifyAction::new(Arc::new(DownNotifier));
        let vars = Context::new();
        let out = action
            .execute(json!({"channel": "finance", "payload": {"id": 1}}), ctx(&vars))
            .await
            .unwrap();
        assert_eq!(out, json!({"delivered": false}));
    }

    #[tokio::test]
    async fn test_required_delivery_failure_fails() {
        let action = NotifyAction::new(Arc::new(DownNotifier));
        let vars = Context::new();
        let err = action
            .execute(json!({"channel": "finance", "required": true}), ctx(&vars))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::Port(PortError::Unavailable("smtp down".into()))
        );
    }
}

// SPDX-License-Identifier: MIT

//! Built-in actions
//!
//! `entity.read` / `entity.write` go through the entity store port,
//! `notify` through the notifier port; `set` and `rules` only compute
//! values for the run context.

mod data;
mod entity;
mod notify;

pub use data::{RulesAction, SetAction};
pub use entity::{EntityReadAction, EntityWriteAction};
pub use notify::NotifyAction;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::cadence::workflow::registry::ActionRegistry;
use crate::kit::error::ActionError;
use crate::kit::port::{EntityStore, Notifier};

/// Register every built-in action bound to the given ports
pub async fn register_builtin(
    registry: &ActionRegistry,
    entities: Arc<dyn EntityStore>,
    notifier: Arc<dyn Notifier>,
) {
    registry
        .register(Arc::new(EntityReadAction::new(entities.clone())))
        .await;
    registry
        .register(Arc::new(EntityWriteAction::new(entities)))
        .await;
    registry.register(Arc::new(NotifyAction::new(notifier))).await;
    registry.register(Arc::new(SetAction)).await;
    registry.register(Arc::new(RulesAction)).await;
}

/// Decode action parameters, reporting bad input as non-retryable
fn parse_args<T: DeserializeOwned>(action: &str, input: Value) -> Result<T, ActionError> {
    serde_json::from_value(input)
        .map_err(|e| ActionError::invalid_input(format!("{}: {}", action, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit::port::{LogNotifier, MemoryEntityStore};

    #[tokio::test]
    async fn test_register_builtin() {
        let registry = ActionRegistry::new();
        register_builtin(
            &registry,
            Arc::new(MemoryEntityStore::new()),
            Arc::new(LogNotifier),
        )
        .await;
        let mut names: Vec<_> = registry.names().await.into_iter().collect();
        names.sort();
        assert_eq!(
            names,
            vec!["entity.read", "entity.write", "notify", "rules", "set"]
        );
    }
}

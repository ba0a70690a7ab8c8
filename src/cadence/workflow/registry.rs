// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::kit::action::Action;

/// Actions available to `action` steps, keyed by name
#[derive(Clone)]
pub struct ActionRegistry {
    actions: Arc<RwLock<HashMap<String, Arc<dyn Action>>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an action; a later registration under the same name replaces it
    pub async fn register(&self, action: Arc<dyn Action>) {
        let mut actions = self.actions.write().await;
        if actions
            .insert(action.name().to_string(), action.clone())
            .is_some()
        {
            log::warn!("Action '{}' re-registered, replacing previous", action.name());
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        let actions = self.actions.read().await;
        actions.get(name).cloned()
    }

    pub async fn names(&self) -> HashSet<String> {
        self.actions.read().await.keys().cloned().collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

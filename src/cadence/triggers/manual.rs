// SPDX-License-Identifier: MIT

use super::StartRequest;
use crate::cadence::workflow::state::{Context, TriggerSource};

/// Starts a run whenever an external caller asks. Holds no state.
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    workflow_id: String,
}

impl ManualTrigger {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn invoke(&self, context: Context) -> StartRequest {
        StartRequest {
            workflow_id: self.workflow_id.clone(),
            version: None,
            context,
            source: TriggerSource::Manual,
        }
    }
}

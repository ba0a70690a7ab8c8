// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::parse_args;
use crate::kit::action::{Action, ActionContext};
use crate::kit::error::ActionError;
use crate::kit::port::EntityStore;

#[derive(Debug, Deserialize)]
struct ReadArgs {
    entity: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    entity: String,
    value: Value,
}

/// Reads an entity through the entity store port
pub struct EntityReadAction {
    store: Arc<dyn EntityStore>,
}

impl EntityReadAction {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Action for EntityReadAction {
    fn name(&self) -> &str {
        "entity.read"
    }

    fn description(&self) -> &str {
        "Reads a business entity by reference (e.g. invoice/42) and returns its value."
    }

    async fn execute(&self, input: Value, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let args: ReadArgs = parse_args(self.name(), input)?;
        log::debug!("Run {} reading entity '{}'", ctx.run_id, args.entity);
        Ok(self.store.read(&args.entity).await?)
    }
}

/// Writes an entity through the entity store port
pub struct EntityWriteAction {
    store: Arc<dyn EntityStore>,
}

impl EntityWriteAction {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Action for EntityWriteAction {
    fn name(&self) -> &str {
        "entity.write"
    }

    fn description(&self) -> &str {
        "Writes a value to a business entity. Returns {written: <entity>}."
    }

    async fn execute(&self, input: Value, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let args: WriteArgs = parse_args(self.name(), input)?;
        log::debug!("Run {} writing entity '{}'", ctx.run_id, args.entity);
        self.store.write(&args.entity, args.value).await?;
        Ok(json!({ "written": args.entity }))
    }
}

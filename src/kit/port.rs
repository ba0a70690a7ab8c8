// SPDX-License-Identifier: MIT

//! External collaborator ports
//!
//! The engine never touches business entities, notification channels or
//! wall-clock time directly. Hosts plug real implementations in behind these
//! traits; the in-memory ones here back the CLI and the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use super::error::PortError;

/// Read/write access to the business entities a workflow acts upon
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn read(&self, entity: &str) -> Result<Value, PortError>;

    async fn write(&self, entity: &str, value: Value) -> Result<(), PortError>;
}

/// Fire-and-forget notification dispatch
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, payload: Value) -> Result<(), PortError>;
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Entity store backed by a map, keyed by entity reference (e.g. `invoice/42`)
#[derive(Clone, Default)]
pub struct MemoryEntityStore {
    entities: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, entity: &str, value: Value) {
        self.entities.write().await.insert(entity.to_string(), value);
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn read(&self, entity: &str) -> Result<Value, PortError> {
        self.entities
            .read()
            .await
            .get(entity)
            .cloned()
            .ok_or_else(|| PortError::NotFound(entity.to_string()))
    }

    async fn write(&self, entity: &str, value: Value) -> Result<(), PortError> {
        self.entities.write().await.insert(entity.to_string(), value);
        Ok(())
    }
}

/// Notifier that writes every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &str, payload: Value) -> Result<(), PortError> {
        log::info!("Notification on '{}': {}", channel, payload);
        Ok(())
    }
}

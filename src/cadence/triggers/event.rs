// SPDX-License-Identifier: MIT

//! Event-driven activation with per-event-id deduplication

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};

use super::StartRequest;
use crate::cadence::workflow::expression::{self, Expression};
use crate::cadence::workflow::state::{Context, TriggerSource};
use crate::kit::bus::Event;
use crate::kit::error::ExpressionError;

/// Remembers recently seen event ids, bounded by age and count
#[derive(Debug)]
pub struct DedupeWindow {
    ttl: Duration,
    capacity: usize,
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<(DateTime<Utc>, String)>,
}

impl DedupeWindow {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `id`; false if it was already seen inside the window
    pub fn first_sighting(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);
        if self.seen.contains_key(id) {
            return false;
        }
        while self.seen.len() >= self.capacity {
            match self.order.pop_front() {
                Some((_, oldest)) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
        self.seen.insert(id.to_string(), now);
        self.order.push_back((now, id.to_string()));
        true
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some((at, _)) = self.order.front() {
            if now - *at < self.ttl {
                break;
            }
            if let Some((_, id)) = self.order.pop_front() {
                self.seen.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[derive(Debug)]
pub struct EventTrigger {
    workflow_id: String,
    event: String,
    filter: Option<Expression>,
    dedupe: DedupeWindow,
}

impl EventTrigger {
    pub fn new(
        workflow_id: impl Into<String>,
        event: impl Into<String>,
        filter: Option<&str>,
        dedupe: DedupeWindow,
    ) -> Result<Self, ExpressionError> {
        Ok(Self {
            workflow_id: workflow_id.into(),
            event: event.into(),
            filter: filter.map(expression::parse).transpose()?,
            dedupe,
        })
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn event_name(&self) -> &str {
        &self.event
    }

    /// Take over the dedupe history of the trigger this one replaces
    pub(super) fn inherit_window(&mut self, previous: &mut EventTrigger) {
        std::mem::swap(&mut self.dedupe, &mut previous.dedupe);
    }

    /// A start request if the event is ours, passes the filter and has not
    /// been seen before
    pub fn offer(&mut self, event: &Event, now: DateTime<Utc>) -> Option<StartRequest> {
        if event.name != self.event {
            return None;
        }

        if let Some(filter) = &self.filter {
            let mut scope = Context::new();
            scope.insert("payload", event.payload.clone());
            scope.insert("event", json!({"id": event.id, "name": event.name}));
            match expression::evaluate(filter, &scope) {
                Ok(Value::Bool(true)) => {}
                Ok(Value::Bool(false)) => return None,
                Ok(other) => {
                    log::warn!(
                        "Filter for '{}' on '{}' produced {}, treating as no match",
                        self.workflow_id,
                        self.event,
                        other
                    );
                    return None;
                }
                Err(e) => {
                    log::warn!(
                        "Filter for '{}' on '{}' failed: {}",
                        self.workflow_id,
                        self.event,
                        e
                    );
                    return None;
                }
            }
        }

        if !self.dedupe.first_sighting(&event.id, now) {
            log::debug!(
                "Event {} already started '{}', dropping redelivery",
                event.id,
                self.workflow_id
            );
            return None;
        }

        let context = match &event.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        Some(StartRequest {
            workflow_id: self.workflow_id.clone(),
            version: None,
            context: Context::from(context),
            source: TriggerSource::Event {
                event: event.name.clone(),
                event_id: event.id.clone(),
            },
        })
    }
}

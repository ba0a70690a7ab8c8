// SPDX-License-Identifier: MIT

//! Activation sources
//!
//! Event, schedule and manual triggers share one capability: when activated
//! they produce start requests. The hub owns every bound trigger plus the
//! wait deadlines and feeds all of them into the funnel.

mod cron;
mod event;
mod funnel;
mod manual;
mod schedule;

pub use cron::CronExpr;
pub use event::{DedupeWindow, EventTrigger};
pub use funnel::{Dispatch, Funnel};
pub use manual::ManualTrigger;
pub use schedule::{DeadlineTimers, MisfirePolicy, MissedTicks, ScheduleSpec, ScheduleTrigger};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::cadence::config::EngineConfig;
use crate::cadence::workflow::state::{Context, TriggerSource};
use crate::cadence::workflow::types::{TriggerBinding, WorkflowDefinition};
use crate::kit::bus::Event;
use crate::kit::error::{CadenceError, DefinitionError};

/// A normalized request to start a run, whatever produced it
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub workflow_id: String,
    /// `None` starts the latest registered version
    pub version: Option<u32>,
    pub context: Context,
    pub source: TriggerSource,
}

/// What a trigger is being activated with
#[derive(Debug)]
pub enum Activation<'a> {
    Event(&'a Event),
    Tick,
    Invoke(Context),
}

#[derive(Debug)]
pub enum Trigger {
    Event(EventTrigger),
    Schedule(ScheduleTrigger),
    Manual(ManualTrigger),
}

impl Trigger {
    pub fn from_binding(
        workflow_id: &str,
        binding: &TriggerBinding,
        settings: &TriggerSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, DefinitionError> {
        match binding {
            TriggerBinding::Event { event, filter } => {
                let window = DedupeWindow::new(settings.dedupe_ttl, settings.dedupe_capacity);
                EventTrigger::new(workflow_id, event.as_str(), filter.as_deref(), window)
                    .map(Trigger::Event)
                    .map_err(|source| DefinitionError::InvalidExpression {
                        location: format!("filter of '{}' trigger", event),
                        source,
                    })
            }
            TriggerBinding::Schedule {
                every_secs,
                cron,
                context,
                missed,
            } => {
                let spec = ScheduleSpec::parse(*every_secs, cron.as_deref())
                    .map_err(|e| DefinitionError::InvalidTrigger(e.to_string()))?;
                let policy = MisfirePolicy {
                    missed: *missed,
                    grace: settings.misfire_grace,
                    max_backfill: settings.max_backfill,
                };
                Ok(Trigger::Schedule(ScheduleTrigger::new(
                    workflow_id,
                    spec,
                    context.clone(),
                    policy,
                    now,
                )))
            }
            TriggerBinding::Manual => Ok(Trigger::Manual(ManualTrigger::new(workflow_id))),
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Trigger::Event(t) => t.workflow_id(),
            Trigger::Schedule(t) => t.workflow_id(),
            Trigger::Manual(t) => t.workflow_id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Event(_) => "event",
            Trigger::Schedule(_) => "schedule",
            Trigger::Manual(_) => "manual",
        }
    }

    /// Produce the start requests this activation warrants; activations of
    /// another kind produce nothing
    pub fn activate(&mut self, activation: &Activation<'_>, now: DateTime<Utc>) -> Vec<StartRequest> {
        match (self, activation) {
            (Trigger::Event(t), Activation::Event(event)) => t.offer(event, now).into_iter().collect(),
            (Trigger::Schedule(t), Activation::Tick) => {
                let due = t.due(now);
                due.into_iter().map(|at| t.request(at)).collect()
            }
            (Trigger::Manual(t), Activation::Invoke(context)) => vec![t.invoke(context.clone())],
            _ => Vec::new(),
        }
    }
}

/// Trigger knobs taken from the engine configuration
#[derive(Debug, Clone, Copy)]
pub struct TriggerSettings {
    pub dedupe_ttl: Duration,
    pub dedupe_capacity: usize,
    pub misfire_grace: Duration,
    pub max_backfill: usize,
}

impl From<&EngineConfig> for TriggerSettings {
    fn from(config: &EngineConfig) -> Self {
        let secs = |s: u64| {
            i64::try_from(s)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX)
        };
        Self {
            dedupe_ttl: secs(config.dedupe_ttl_secs),
            dedupe_capacity: config.dedupe_capacity,
            misfire_grace: secs(config.misfire_grace_secs),
            max_backfill: config.max_backfill,
        }
    }
}

/// Owns bound triggers and wait deadlines; everything it produces goes to
/// the funnel
pub struct TriggerHub {
    settings: TriggerSettings,
    funnel: Funnel,
    bound: HashMap<String, Vec<Trigger>>,
    deadlines: DeadlineTimers,
}

impl TriggerHub {
    pub fn new(funnel: Funnel, settings: TriggerSettings) -> Self {
        Self {
            settings,
            funnel,
            bound: HashMap::new(),
            deadlines: DeadlineTimers::new(),
        }
    }

    /// Replace the triggers bound for a definition with its current
    /// bindings. Dedupe history carries over for events bound before.
    pub fn bind(&mut self, def: &WorkflowDefinition, now: DateTime<Utc>) -> Result<(), DefinitionError> {
        let mut triggers = def
            .triggers
            .iter()
            .map(|b| Trigger::from_binding(&def.id, b, &self.settings, now))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(previous) = self.bound.remove(&def.id) {
            for old in previous {
                let Trigger::Event(mut old) = old else { continue };
                let replacement = triggers.iter_mut().find_map(|t| match t {
                    Trigger::Event(new) if new.event_name() == old.event_name() => Some(new),
                    _ => None,
                });
                if let Some(new) = replacement {
                    new.inherit_window(&mut old);
                }
            }
        }

        log::info!(
            "Bound {} trigger(s) for workflow '{}'",
            triggers.len(),
            def.id
        );
        self.bound.insert(def.id.clone(), triggers);
        Ok(())
    }

    pub fn unbind(&mut self, workflow_id: &str) {
        self.bound.remove(workflow_id);
    }

    fn activate_all(&mut self, activation: &Activation<'_>, now: DateTime<Utc>) -> usize {
        let mut produced = 0;
        for triggers in self.bound.values_mut() {
            for trigger in triggers.iter_mut() {
                for request in trigger.activate(activation, now) {
                    log::info!(
                        "{} trigger activated workflow '{}'",
                        trigger.kind(),
                        request.workflow_id
                    );
                    self.funnel.send(Dispatch::Start(request));
                    produced += 1;
                }
            }
        }
        produced
    }

    /// Offer an event to every event trigger; returns start requests queued
    pub fn on_event(&mut self, event: &Event, now: DateTime<Utc>) -> usize {
        self.activate_all(&Activation::Event(event), now)
    }

    /// Fire due schedules and expired deadlines
    pub fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let mut produced = self.activate_all(&Activation::Tick, now);
        for (run_id, token) in self.deadlines.due(now) {
            log::debug!("Deadline reached for run {}", run_id);
            self.funnel.send(Dispatch::Expire { run_id, token });
            produced += 1;
        }
        produced
    }

    /// Manual activation; the workflow must carry a manual binding
    pub fn invoke_manual(&mut self, workflow_id: &str, context: Context) -> Result<(), CadenceError> {
        let manual = self
            .bound
            .get_mut(workflow_id)
            .and_then(|ts| ts.iter_mut().find(|t| matches!(t, Trigger::Manual(_))))
            .ok_or_else(|| CadenceError::ManualTriggerNotBound(workflow_id.to_string()))?;
        for request in manual.activate(&Activation::Invoke(context), Utc::now()) {
            self.funnel.send(Dispatch::Start(request));
        }
        Ok(())
    }

    /// Continue a workflow's schedules from the last tick that started a run
    pub fn restore_schedule(&mut self, workflow_id: &str, last_fired: DateTime<Utc>) {
        if let Some(triggers) = self.bound.get_mut(workflow_id) {
            for trigger in triggers.iter_mut() {
                if let Trigger::Schedule(t) = trigger {
                    t.resume_after(last_fired);
                }
            }
        }
    }

    pub fn arm_deadline(&mut self, run_id: &str, token: &str, at: DateTime<Utc>) {
        self.deadlines.arm(run_id, token, at);
    }

    pub fn disarm_deadline(&mut self, run_id: &str) {
        self.deadlines.disarm(run_id);
    }

    pub fn pending_deadlines(&self) -> usize {
        self.deadlines.len()
    }

    /// Triggers bound for a workflow, by kind
    pub fn bound_kinds(&self, workflow_id: &str) -> Vec<&'static str> {
        self.bound
            .get(workflow_id)
            .map(|ts| ts.iter().map(Trigger::kind).collect())
            .unwrap_or_default()
    }
}

// SPDX-License-Identifier: MIT

//! Workflow engine - catalog, run lifecycle and the funnel consumer
//!
//! The engine owns the definition catalog and is the only component that
//! starts, resumes, expires or cancels runs. Every cycle for a run happens
//! under that run's slot lock, so at most one executor touches a run id at
//! a time. Triggers never call into the engine directly; they queue
//! dispatches on the funnel, which `pump` (tests, CLI) or the task started
//! by `spawn` (server) consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;

use super::executor::{CycleOutcome, Executor};
use super::registry::ActionRegistry;
use super::state::{
    Context, FileRunStore, HistoryEntry, MemoryRunStore, RunStatus, RunStore, Signal,
    TriggerSource, WaitCondition, WorkflowRun,
};
use super::types::WorkflowDefinition;
use super::validate::validate;
use crate::cadence::actions;
use crate::cadence::config::EngineConfig;
use crate::cadence::triggers::{Dispatch, Funnel, StartRequest, TriggerHub, TriggerSettings};
use crate::kit::action::Action;
use crate::kit::bus::{Event, EventBus};
use crate::kit::error::{CadenceError, DefinitionError};
use crate::kit::port::{Clock, EntityStore, LogNotifier, MemoryEntityStore, Notifier, SystemClock};

/// What happened to a resume or expiry request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// The wait was consumed; `status` is where the run ended up
    Resumed { status: RunStatus },
    Ignored { reason: IgnoreReason },
}

/// Why a resume or expiry was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NotWaiting,
    SignalMismatch,
    /// Deadline already passed; the timeout transition takes the run
    DeadlinePassed,
    /// Expiry for a wait the run has since left
    StaleWait,
    /// Expiry delivered before the deadline
    NotDue,
}

/// Filter for `Engine::runs`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunQuery {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

/// Counts from `Engine::recover`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    pub waiting: usize,
    pub redriven: usize,
}

/// Per-run mutual exclusion plus the cooperative cancel flag
#[derive(Default)]
struct RunSlot {
    lock: AsyncMutex<()>,
    cancel: AtomicBool,
}

type Catalog = HashMap<String, BTreeMap<u32, Arc<WorkflowDefinition>>>;

#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    catalog: Arc<RwLock<Catalog>>,
    actions: ActionRegistry,
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    funnel: Funnel,
    hub: Arc<AsyncMutex<TriggerHub>>,
    executor: Executor,
    slots: Arc<Mutex<HashMap<String, Arc<RunSlot>>>>,
    /// event name -> runs waiting on it
    waiting: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Validate and add a definition to the catalog; returns the version it
    /// was stored under. Only the latest version of a definition has its
    /// triggers bound.
    pub async fn register(&self, mut def: WorkflowDefinition) -> Result<u32, CadenceError> {
        def.normalize();
        let names = self.actions.names().await;
        validate(&def, &names).map_err(|e| CadenceError::invalid_definition(&def.id, e))?;

        let mut catalog = self.catalog.write().await;
        let latest = catalog
            .get(&def.id)
            .and_then(|versions| versions.keys().next_back().copied())
            .unwrap_or(0);
        if def.version == 0 {
            def.version = latest + 1;
        } else if catalog
            .get(&def.id)
            .is_some_and(|versions| versions.contains_key(&def.version))
        {
            return Err(CadenceError::invalid_definition(
                &def.id,
                DefinitionError::DuplicateVersion(def.version),
            ));
        }

        if def.version > latest {
            self.hub
                .lock()
                .await
                .bind(&def, self.clock.now())
                .map_err(|e| CadenceError::invalid_definition(&def.id, e))?;
        }

        let version = def.version;
        log::info!(
            "Registered workflow '{}' version {} ({} steps, {} triggers)",
            def.id,
            version,
            def.steps.len(),
            def.triggers.len()
        );
        catalog
            .entry(def.id.clone())
            .or_default()
            .insert(version, Arc::new(def));
        Ok(version)
    }

    /// A registered definition; `None` picks the latest version
    pub async fn definition(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> Result<Arc<WorkflowDefinition>, CadenceError> {
        let catalog = self.catalog.read().await;
        let versions = catalog
            .get(id)
            .ok_or_else(|| CadenceError::WorkflowNotFound(id.to_string()))?;
        let found = match version {
            Some(v) => versions.get(&v),
            None => versions.values().next_back(),
        };
        match (found, version) {
            (Some(def), _) => Ok(def.clone()),
            (None, Some(v)) => Err(CadenceError::VersionNotFound {
                id: id.to_string(),
                version: v,
            }),
            (None, None) => Err(CadenceError::WorkflowNotFound(id.to_string())),
        }
    }

    /// Latest version of every registered definition, by id
    pub async fn definitions(&self) -> Vec<Arc<WorkflowDefinition>> {
        let catalog = self.catalog.read().await;
        let mut defs: Vec<_> = catalog
            .values()
            .filter_map(|versions| versions.values().next_back().cloned())
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Start a run of the latest version and execute it until it first
    /// suspends or finishes
    pub async fn start(&self, workflow_id: &str, input: Value) -> Result<String, CadenceError> {
        let context = Context::from_value(input)?;
        self.start_request(StartRequest {
            workflow_id: workflow_id.to_string(),
            version: None,
            context,
            source: TriggerSource::Manual,
        })
        .await
    }

    /// Queue a manual activation through the workflow's manual binding
    pub async fn submit(&self, workflow_id: &str, input: Value) -> Result<(), CadenceError> {
        self.definition(workflow_id, None).await?;
        let context = Context::from_value(input)?;
        self.hub.lock().await.invoke_manual(workflow_id, context)
    }

    async fn start_request(&self, request: StartRequest) -> Result<String, CadenceError> {
        let def = self.definition(&request.workflow_id, request.version).await?;
        for (name, declared) in &def.variables.fields {
            if let Some(value) = request.context.get(name) {
                if !declared.field_type.admits(value) {
                    return Err(CadenceError::InvalidInput(format!(
                        "variable '{}' expects {:?}, got {}",
                        name, declared.field_type, value
                    )));
                }
            }
        }

        let context = Context::seeded(&def.variables, request.context);
        let mut run = WorkflowRun::new(
            &def.id,
            def.version,
            &def.entry,
            context,
            request.source,
            self.clock.now(),
        );
        let slot = self.slot(&run.id);
        let _guard = slot.lock.lock().await;
        if let Err(e) = self.store.save(&run).await {
            self.drop_slot(&run.id);
            return Err(e.into());
        }
        log::info!(
            "Started run {} of '{}' v{} ({:?})",
            run.id,
            def.id,
            def.version,
            run.trigger
        );
        self.lifecycle("run.started", &run, json!({ "trigger": run.trigger }));

        let outcome = self.executor.run_cycle(&def, &mut run, &slot.cancel).await?;
        self.after_cycle(&run, outcome).await;
        Ok(run.id)
    }

    /// Deliver a signal to a waiting run. Signals that do not match the
    /// wait are dropped and reported as ignored.
    pub async fn resume(&self, run_id: &str, signal: Signal) -> Result<ResumeOutcome, CadenceError> {
        if self.load(run_id).await?.is_finished() {
            log::warn!("Ignoring signal for finished run {}", run_id);
            return Ok(ignored(IgnoreReason::NotWaiting));
        }
        let slot = self.slot(run_id);
        let _guard = slot.lock.lock().await;
        let mut run = self.reload(run_id).await?;

        let Some(wait) = run.wait.clone().filter(|_| run.status == RunStatus::Waiting) else {
            log::warn!("Ignoring signal for run {} in status {}", run_id, run.status);
            return Ok(ignored(IgnoreReason::NotWaiting));
        };
        if wait.is_expired(self.clock.now()) {
            log::warn!("Ignoring signal for run {}: wait deadline has passed", run_id);
            return Ok(ignored(IgnoreReason::DeadlinePassed));
        }
        if !Executor::signal_matches(&wait, &signal, &run.context) {
            log::warn!(
                "Ignoring signal {:?} for run {}: does not match wait at '{}'",
                signal.event,
                run_id,
                wait.step_id
            );
            return Ok(ignored(IgnoreReason::SignalMismatch));
        }

        let def = self.pinned(&run).await?;
        self.release_wait(run_id, &wait).await;
        let outcome = self
            .executor
            .resume(&def, &mut run, signal, &slot.cancel)
            .await?;
        self.after_cycle(&run, outcome).await;
        Ok(ResumeOutcome::Resumed { status: run.status })
    }

    /// Fire the timeout transition of a wait whose deadline has passed
    pub async fn expire(&self, run_id: &str, token: &str) -> Result<ResumeOutcome, CadenceError> {
        if self.load(run_id).await?.is_finished() {
            return Ok(ignored(IgnoreReason::NotWaiting));
        }
        let slot = self.slot(run_id);
        let _guard = slot.lock.lock().await;
        let mut run = self.reload(run_id).await?;

        let Some(wait) = run.wait.clone().filter(|_| run.status == RunStatus::Waiting) else {
            return Ok(ignored(IgnoreReason::NotWaiting));
        };
        if wait.token != token {
            log::debug!("Dropping stale deadline for run {}", run_id);
            return Ok(ignored(IgnoreReason::StaleWait));
        }
        if !wait.is_expired(self.clock.now()) {
            if let Some(at) = wait.deadline {
                self.hub.lock().await.arm_deadline(run_id, token, at);
            }
            return Ok(ignored(IgnoreReason::NotDue));
        }

        let def = self.pinned(&run).await?;
        self.release_wait(run_id, &wait).await;
        let outcome = self.executor.expire(&def, &mut run, &slot.cancel).await?;
        self.after_cycle(&run, outcome).await;
        Ok(ResumeOutcome::Resumed { status: run.status })
    }

    /// Request cancellation. A run that is not mid-cycle is cancelled
    /// immediately; otherwise the in-flight step finishes and the run is
    /// cancelled before its next transition. Returns false for runs that
    /// already finished.
    pub async fn cancel(&self, run_id: &str) -> Result<bool, CadenceError> {
        let run = self.load(run_id).await?;
        if run.is_finished() {
            return Ok(false);
        }

        let slot = self.slot(run_id);
        slot.cancel.store(true, Ordering::SeqCst);
        if let Ok(_guard) = slot.lock.try_lock() {
            self.apply_cancel(run_id).await?;
            return Ok(true);
        }

        log::info!("Run {} is mid-cycle; cancellation deferred", run_id);
        let engine = self.clone();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let _guard = slot.lock.lock().await;
            if let Err(e) = engine.apply_cancel(&run_id).await {
                log::error!("Deferred cancel of run {} failed: {}", run_id, e);
            }
        });
        Ok(true)
    }

    /// Caller must hold the run's slot lock
    async fn apply_cancel(&self, run_id: &str) -> Result<(), CadenceError> {
        let mut run = self.reload(run_id).await?;
        if run.is_finished() {
            return Ok(());
        }
        if let Some(wait) = run.wait.clone() {
            self.release_wait(run_id, &wait).await;
        }
        let kind = match self.pinned(&run).await {
            Ok(def) => def
                .step(&run.current_step)
                .map_or("unknown", |s| s.kind_name()),
            Err(_) => "unknown",
        };
        let outcome = self.executor.cancel(&mut run, kind).await?;
        self.after_cycle(&run, outcome).await;
        Ok(())
    }

    pub async fn run(&self, run_id: &str) -> Result<WorkflowRun, CadenceError> {
        self.load(run_id).await
    }

    /// Stored runs matching `query`, newest first
    pub async fn runs(&self, query: &RunQuery) -> Result<Vec<WorkflowRun>, CadenceError> {
        let mut runs: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|r| query.workflow_id.as_ref().map_or(true, |id| &r.definition_id == id))
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    pub async fn history(&self, run_id: &str) -> Result<Vec<HistoryEntry>, CadenceError> {
        Ok(self.load(run_id).await?.history)
    }

    /// Route a bus event to event triggers and to runs waiting on its name.
    /// Returns the number of dispatches queued.
    pub async fn handle_event(&self, event: &Event) -> usize {
        let mut queued = self.hub.lock().await.on_event(event, self.clock.now());
        let waiting = self
            .waiting
            .read()
            .await
            .get(&event.name)
            .cloned()
            .unwrap_or_default();
        for run_id in waiting {
            log::debug!("Event '{}' routed to waiting run {}", event.name, run_id);
            self.funnel.send(Dispatch::Resume {
                run_id,
                signal: Signal::new(&event.name, event.payload.clone()),
            });
            queued += 1;
        }
        queued
    }

    /// Publish onto the bus; a spawned engine picks it up in its listener
    pub fn publish(&self, event: Event) -> usize {
        self.bus.publish(event)
    }

    /// Fire due schedules and wait deadlines
    pub async fn tick(&self) -> usize {
        self.hub.lock().await.tick(self.clock.now())
    }

    /// Drain the funnel, handling each dispatch in order. Returns the
    /// number handled. Yields nothing while a spawned consumer owns the
    /// funnel.
    pub async fn pump(&self) -> usize {
        let mut handled = 0;
        loop {
            let batch = self.funnel.try_drain();
            if batch.is_empty() {
                return handled;
            }
            for dispatch in batch {
                self.dispatch(dispatch).await;
                handled += 1;
            }
        }
    }

    async fn dispatch(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Start(request) => {
                let workflow = request.workflow_id.clone();
                if let Err(e) = self.start_request(request).await {
                    log::error!("Could not start workflow '{}': {}", workflow, e);
                }
            }
            Dispatch::Resume { run_id, signal } => {
                if let Err(e) = self.resume(&run_id, signal).await {
                    log::error!("Resume of run {} failed: {}", run_id, e);
                }
            }
            Dispatch::Expire { run_id, token } => {
                if let Err(e) = self.expire(&run_id, &token).await {
                    log::error!("Expiry of run {} failed: {}", run_id, e);
                }
            }
        }
    }

    /// Rebuild in-memory indexes from the store after a restart. Waiting
    /// runs get their event index and deadlines back; runs left `running`
    /// re-execute their current step. Register definitions first.
    pub async fn recover(&self) -> Result<Recovery, CadenceError> {
        let mut recovery = Recovery::default();
        let mut last_fired: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut redrive = Vec::new();

        for run in self.store.list().await? {
            if let TriggerSource::Schedule { scheduled_for } = &run.trigger {
                let latest = last_fired
                    .entry(run.definition_id.clone())
                    .or_insert(*scheduled_for);
                *latest = (*latest).max(*scheduled_for);
            }
            match (run.status, &run.wait) {
                (RunStatus::Waiting, Some(wait)) => {
                    self.hold_wait(&run.id, wait).await;
                    recovery.waiting += 1;
                }
                (RunStatus::Running, _) => redrive.push(run.id),
                _ => {}
            }
        }

        {
            let mut hub = self.hub.lock().await;
            for (workflow_id, at) in &last_fired {
                hub.restore_schedule(workflow_id, *at);
            }
        }

        for run_id in redrive {
            let slot = self.slot(&run_id);
            let _guard = slot.lock.lock().await;
            let mut run = self.reload(&run_id).await?;
            if run.status != RunStatus::Running {
                continue;
            }
            let def = match self.pinned(&run).await {
                Ok(def) => def,
                Err(e) => {
                    log::warn!("Cannot recover run {}: {}", run_id, e);
                    continue;
                }
            };
            log::info!("Re-entering run {} at '{}'", run_id, run.current_step);
            let outcome = self.executor.run_cycle(&def, &mut run, &slot.cancel).await?;
            self.after_cycle(&run, outcome).await;
            recovery.redriven += 1;
        }

        log::info!(
            "Recovered {} waiting run(s), re-entered {} running run(s)",
            recovery.waiting,
            recovery.redriven
        );
        Ok(recovery)
    }

    /// Delete finished runs that finished before `cutoff`
    pub async fn purge(&self, cutoff: DateTime<Utc>) -> Result<usize, CadenceError> {
        let mut purged = 0;
        for run in self.store.list().await? {
            if run.finished_at.is_some_and(|at| at < cutoff) && self.store.delete(&run.id).await? {
                purged += 1;
            }
        }
        if purged > 0 {
            log::info!("Purged {} finished run(s) older than {}", purged, cutoff);
        }
        Ok(purged)
    }

    /// Start the funnel consumer, the ticker and the bus listener
    pub fn spawn(&self) -> EngineHandle {
        let (shutdown, stop) = watch::channel(false);
        let mut tasks = Vec::new();

        let engine = self.clone();
        let mut rx = stop.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    next = engine.funnel.recv() => match next {
                        Some(dispatch) => {
                            let worker = engine.clone();
                            tokio::spawn(async move { worker.dispatch(dispatch).await });
                        }
                        None => break,
                    },
                }
            }
            log::debug!("Funnel consumer stopped");
        }));

        let engine = self.clone();
        let mut rx = stop.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.tick_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = interval.tick() => {
                        engine.tick().await;
                    }
                }
            }
            log::debug!("Ticker stopped");
        }));

        let engine = self.clone();
        let mut rx = stop;
        let mut events = self.bus.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            engine.handle_event(&event).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Bus listener lagged, {} event(s) skipped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            log::debug!("Bus listener stopped");
        }));

        log::info!("Engine started ({} ms tick)", self.config.tick_interval_ms);
        EngineHandle { shutdown, tasks }
    }

    async fn after_cycle(&self, run: &WorkflowRun, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Waiting(wait) => {
                self.hold_wait(&run.id, &wait).await;
                self.lifecycle(
                    "run.waiting",
                    run,
                    json!({
                        "step": wait.step_id,
                        "event": wait.event,
                        "deadline": wait.deadline,
                    }),
                );
            }
            CycleOutcome::Completed => {
                self.lifecycle("run.completed", run, json!({ "output": run.output }));
                self.drop_slot(&run.id);
            }
            CycleOutcome::Failed(error) => {
                self.lifecycle("run.failed", run, json!({ "error": error }));
                self.drop_slot(&run.id);
            }
            CycleOutcome::Cancelled => {
                self.lifecycle("run.cancelled", run, json!({}));
                self.drop_slot(&run.id);
            }
        }
    }

    fn lifecycle(&self, name: &str, run: &WorkflowRun, extra: Value) {
        let mut payload = json!({
            "run_id": run.id,
            "workflow_id": run.definition_id,
            "version": run.definition_version,
            "status": run.status,
        });
        if let (Some(base), Value::Object(extra)) = (payload.as_object_mut(), extra) {
            base.extend(extra);
        }
        self.bus.publish(Event::new(name, payload));
    }

    /// Index a wait by event name and arm its deadline
    async fn hold_wait(&self, run_id: &str, wait: &WaitCondition) {
        if let Some(event) = &wait.event {
            self.waiting
                .write()
                .await
                .entry(event.clone())
                .or_default()
                .insert(run_id.to_string());
        }
        if let Some(at) = wait.deadline {
            self.hub.lock().await.arm_deadline(run_id, &wait.token, at);
        }
    }

    async fn release_wait(&self, run_id: &str, wait: &WaitCondition) {
        if let Some(event) = &wait.event {
            let mut waiting = self.waiting.write().await;
            if let Some(runs) = waiting.get_mut(event) {
                runs.remove(run_id);
                if runs.is_empty() {
                    waiting.remove(event);
                }
            }
        }
        self.hub.lock().await.disarm_deadline(run_id);
    }

    async fn load(&self, run_id: &str) -> Result<WorkflowRun, CadenceError> {
        self.store
            .load(run_id)
            .await?
            .ok_or_else(|| CadenceError::RunNotFound(run_id.to_string()))
    }

    /// Load a run under its slot lock. The slot is released once the run
    /// has finished or is gone.
    async fn reload(&self, run_id: &str) -> Result<WorkflowRun, CadenceError> {
        let run = self.load(run_id).await;
        if run.as_ref().map_or(true, |r| r.is_finished()) {
            self.drop_slot(run_id);
        }
        run
    }

    /// The definition version a run was started with
    async fn pinned(&self, run: &WorkflowRun) -> Result<Arc<WorkflowDefinition>, CadenceError> {
        self.definition(&run.definition_id, Some(run.definition_version))
            .await
    }

    fn slot(&self, run_id: &str) -> Arc<RunSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(run_id.to_string()).or_default().clone()
    }

    fn drop_slot(&self, run_id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(run_id);
    }
}

fn ignored(reason: IgnoreReason) -> ResumeOutcome {
    ResumeOutcome::Ignored { reason }
}

/// Running background tasks of a spawned engine
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stop the background tasks and wait for them to exit. Cycles already
    /// dispatched run to their next checkpoint on their own tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::warn!("Engine task ended abnormally: {}", e);
            }
        }
        log::info!("Engine stopped");
    }
}

/// Wires an engine's collaborators. Anything not supplied gets the
/// in-process default.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn RunStore>>,
    clock: Option<Arc<dyn Clock>>,
    bus: Option<EventBus>,
    entities: Option<Arc<dyn EntityStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    actions: Vec<Arc<dyn Action>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn entities(mut self, entities: Arc<dyn EntityStore>) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register an extra action; replaces a built-in of the same name
    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    pub async fn build(self) -> Result<Engine, CadenceError> {
        let store: Arc<dyn RunStore> = match (self.store, &self.config.state_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileRunStore::open(dir).await?),
            (None, None) => Arc::new(MemoryRunStore::new()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let entities = self
            .entities
            .unwrap_or_else(|| Arc::new(MemoryEntityStore::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));

        let registry = ActionRegistry::new();
        actions::register_builtin(&registry, entities, notifier).await;
        for action in self.actions {
            registry.register(action).await;
        }

        let funnel = Funnel::new();
        let hub = TriggerHub::new(funnel.clone(), TriggerSettings::from(&self.config));
        let executor = Executor::new(
            registry.clone(),
            store.clone(),
            clock.clone(),
            self.config.max_steps_per_cycle,
        );

        Ok(Engine {
            config: Arc::new(self.config),
            catalog: Arc::new(RwLock::new(HashMap::new())),
            actions: registry,
            store,
            clock,
            bus: self.bus.unwrap_or_default(),
            funnel,
            hub: Arc::new(AsyncMutex::new(hub)),
            executor,
            slots: Arc::new(Mutex::new(HashMap::new())),
            waiting: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

// SPDX-License-Identifier: MIT

//! Workflow executor - the per-run state machine
//!
//! A cycle steps one run through its graph until it completes, fails, is
//! cancelled or reaches a `wait` step. Suspension is an ordinary return
//! value; re-entry goes through `resume` or `expire`, which pick up at the
//! wait step the run was parked on.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::expression;
use super::registry::ActionRegistry;
use super::rules::{Rule, RuleMode, RuleSet};
use super::state::{
    Context, ErrorKind, HistoryEntry, RunError, RunStatus, RunStore, Signal, StepOutcome,
    WaitCondition, WorkflowRun,
};
use super::template;
use super::types::{
    ActionStep, DecisionStep, RetryConfig, StepDefinition, StepKind, WaitStep, WorkflowDefinition,
};
use crate::kit::action::ActionContext;
use crate::kit::error::{ActionError, StoreError};
use crate::kit::port::Clock;

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed,
    Failed(RunError),
    Cancelled,
    Waiting(WaitCondition),
}

#[derive(Clone)]
pub struct Executor {
    actions: ActionRegistry,
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    max_steps: usize,
}

impl Executor {
    pub fn new(
        actions: ActionRegistry,
        store: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
        max_steps: usize,
    ) -> Self {
        Self {
            actions,
            store,
            clock,
            max_steps: max_steps.max(1),
        }
    }

    /// Whether `signal` satisfies `wait` for a run with context `ctx`.
    /// A predicate that fails to evaluate counts as no match.
    pub fn signal_matches(wait: &WaitCondition, signal: &Signal, ctx: &Context) -> bool {
        if signal.token.as_deref().is_some_and(|t| t != wait.token) {
            return false;
        }
        match (&wait.event, &signal.event) {
            (Some(expected), Some(got)) if expected != got => return false,
            (None, Some(_)) => return false,
            _ => {}
        }
        let Some(predicate) = &wait.matches else {
            return true;
        };

        let mut scope = ctx.clone();
        scope.insert("signal", signal.payload.clone());
        match expression::evaluate_str(predicate, &scope) {
            Ok(Value::Bool(b)) => b,
            Ok(other) => {
                log::warn!("Wait predicate '{}' produced {}, not a boolean", predicate, other);
                false
            }
            Err(e) => {
                log::warn!("Wait predicate '{}' failed: {}", predicate, e);
                false
            }
        }
    }

    /// Execute from the run's current step until it suspends or finishes
    pub async fn run_cycle(
        &self,
        def: &WorkflowDefinition,
        run: &mut WorkflowRun,
        cancel: &AtomicBool,
    ) -> Result<CycleOutcome, StoreError> {
        run.status = RunStatus::Running;

        for _ in 0..self.max_steps {
            let Some(step) = def.step(&run.current_step) else {
                let err = RunError::new(
                    ErrorKind::UnknownStep,
                    format!("step '{}' does not exist in version {}", run.current_step, def.version),
                );
                return self.fail(run, None, self.clock.now(), 0, err).await;
            };

            if cancel.load(Ordering::SeqCst) {
                return self.cancel(run, step.kind_name()).await;
            }

            let entered = self.clock.now();
            log::debug!("Run {} entering step '{}'", run.id, step.id);

            match &step.kind {
                StepKind::Action(action) => {
                    let attempts = match self.perform(def, run, step, action).await {
                        Ok(attempts) => attempts,
                        Err((err, attempts)) => {
                            return self.fail(run, Some(step), entered, attempts, err).await
                        }
                    };
                    // the action has finished; a cancel now only suppresses the transition
                    if cancel.load(Ordering::SeqCst) {
                        return self.cancel(run, step.kind_name()).await;
                    }
                    self.transition(run, step, entered, attempts, &action.next).await?;
                }
                StepKind::Decision(decision) => match Self::decide(decision, &run.context) {
                    Ok(target) => {
                        self.transition(run, step, entered, 0, &target).await?;
                    }
                    Err(err) => {
                        if err.kind == ErrorKind::NoMatchingTransition {
                            log::error!(
                                "Invariant violated in '{}' step '{}': {}",
                                def.id,
                                step.id,
                                err.message
                            );
                        }
                        return self.fail(run, Some(step), entered, 0, err).await;
                    }
                },
                StepKind::Wait(wait) => {
                    let condition = self.suspend(run, step, wait, entered).await?;
                    return Ok(CycleOutcome::Waiting(condition));
                }
                StepKind::Terminal => {
                    run.record(HistoryEntry {
                        step_id: step.id.clone(),
                        kind: step.kind_name().to_string(),
                        entered_at: entered,
                        exited_at: Some(entered),
                        attempts: 0,
                        outcome: StepOutcome::Completed,
                        next: None,
                        error: None,
                    });
                    run.output = Some(run.context.to_json());
                    run.finish(RunStatus::Completed, entered);
                    self.store.save(run).await?;
                    log::info!("Run {} of '{}' completed", run.id, def.id);
                    return Ok(CycleOutcome::Completed);
                }
            }
        }

        let err = RunError::new(
            ErrorKind::StepLimit,
            format!("exceeded {} steps in one cycle", self.max_steps),
        );
        let step = def.step(&run.current_step);
        self.fail(run, step, self.clock.now(), 0, err).await
    }

    /// Re-enter a waiting run with a signal that matched its wait condition
    pub async fn resume(
        &self,
        def: &WorkflowDefinition,
        run: &mut WorkflowRun,
        signal: Signal,
        cancel: &AtomicBool,
    ) -> Result<CycleOutcome, StoreError> {
        let Some((step, wait)) = self.parked_step(def, run) else {
            return self.orphaned_wait(def, run).await;
        };
        let now = self.clock.now();
        let entered = run.wait.as_ref().map_or(now, |w| w.created_at);

        let reducer = def.variables.reducer(&wait.output);
        run.context.merge(&wait.output, signal.payload, reducer);
        run.wait = None;
        run.record(HistoryEntry {
            step_id: step.id.clone(),
            kind: step.kind_name().to_string(),
            entered_at: entered,
            exited_at: Some(now),
            attempts: 0,
            outcome: StepOutcome::Resumed,
            next: Some(wait.next.clone()),
            error: None,
        });
        run.current_step = wait.next.clone();
        run.status = RunStatus::Running;
        self.store.save(run).await?;
        log::info!("Run {} resumed at '{}'", run.id, step.id);

        self.run_cycle(def, run, cancel).await
    }

    /// Re-enter a waiting run whose deadline passed
    pub async fn expire(
        &self,
        def: &WorkflowDefinition,
        run: &mut WorkflowRun,
        cancel: &AtomicBool,
    ) -> Result<CycleOutcome, StoreError> {
        let Some((step, wait)) = self.parked_step(def, run) else {
            return self.orphaned_wait(def, run).await;
        };
        let now = self.clock.now();
        let entered = run.wait.as_ref().map_or(now, |w| w.created_at);
        run.wait = None;

        match &wait.on_timeout {
            Some(target) => {
                run.record(HistoryEntry {
                    step_id: step.id.clone(),
                    kind: step.kind_name().to_string(),
                    entered_at: entered,
                    exited_at: Some(now),
                    attempts: 0,
                    outcome: StepOutcome::TimedOut,
                    next: Some(target.clone()),
                    error: None,
                });
                run.current_step = target.clone();
                run.status = RunStatus::Running;
                self.store.save(run).await?;
                log::info!("Run {} timed out at '{}', moving to '{}'", run.id, step.id, target);
                self.run_cycle(def, run, cancel).await
            }
            None => {
                let err = RunError::new(
                    ErrorKind::WaitTimeout,
                    format!("wait at '{}' timed out with no timeout transition", step.id),
                );
                self.fail(run, Some(step), entered, 0, err).await
            }
        }
    }

    /// Mark a run cancelled at its current step
    pub async fn cancel(&self, run: &mut WorkflowRun, kind: &str) -> Result<CycleOutcome, StoreError> {
        let now = self.clock.now();
        run.record(HistoryEntry {
            step_id: run.current_step.clone(),
            kind: kind.to_string(),
            entered_at: now,
            exited_at: Some(now),
            attempts: 0,
            outcome: StepOutcome::Cancelled,
            next: None,
            error: None,
        });
        run.finish(RunStatus::Cancelled, now);
        self.store.save(run).await?;
        log::info!("Run {} cancelled at '{}'", run.id, run.current_step);
        Ok(CycleOutcome::Cancelled)
    }

    fn parked_step<'d>(
        &self,
        def: &'d WorkflowDefinition,
        run: &WorkflowRun,
    ) -> Option<(&'d StepDefinition, &'d WaitStep)> {
        let step = def.step(&run.current_step)?;
        match &step.kind {
            StepKind::Wait(wait) => Some((step, wait)),
            _ => None,
        }
    }

    async fn orphaned_wait(
        &self,
        def: &WorkflowDefinition,
        run: &mut WorkflowRun,
    ) -> Result<CycleOutcome, StoreError> {
        let err = RunError::new(
            ErrorKind::UnknownStep,
            format!("run is not parked on a wait step ('{}')", run.current_step),
        );
        let step = def.step(&run.current_step);
        self.fail(run, step, self.clock.now(), 0, err).await
    }

    /// First guard that holds, else the default
    fn decide(decision: &DecisionStep, ctx: &Context) -> Result<String, RunError> {
        let guarded = decision
            .transitions
            .iter()
            .filter_map(|t| t.when.as_ref().map(|when| Rule::new("", when.as_str(), t.to.clone())))
            .collect();
        let rules = RuleSet::compile(RuleMode::First, guarded)?;
        if let Some(target) = rules.first(ctx)? {
            return Ok(target.clone());
        }
        decision
            .default_target()
            .map(str::to_string)
            .ok_or_else(|| {
                RunError::new(
                    ErrorKind::NoMatchingTransition,
                    "no guard matched and no default transition exists",
                )
            })
    }

    /// Run the step's action under its retry policy and merge the result.
    /// Returns the number of attempts made.
    async fn perform(
        &self,
        def: &WorkflowDefinition,
        run: &mut WorkflowRun,
        step: &StepDefinition,
        action_step: &ActionStep,
    ) -> Result<u32, (RunError, u32)> {
        let params = template::render_map(&action_step.with, &run.context)
            .map_err(|e| (RunError::from(e), 0))?;
        let action = self.actions.get(&action_step.action).await.ok_or_else(|| {
            let err = ActionError::failed(format!("action '{}' is not registered", action_step.action));
            (RunError::from(err), 0)
        })?;

        let policy = action_step.retry.clone().unwrap_or(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        });
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 1;
        let result = loop {
            let ctx = ActionContext {
                run_id: &run.id,
                workflow_id: &def.id,
                step_id: &step.id,
                attempt,
                variables: &run.context,
            };
            let call = action.execute(Value::Object(params.clone()), ctx);
            let outcome = match action_step.timeout_ms {
                Some(ms) => tokio::time::timeout(std::time::Duration::from_millis(ms), call)
                    .await
                    .unwrap_or(Err(ActionError::Timeout(ms))),
                None => call.await,
            };

            match outcome {
                Ok(value) => break value,
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    log::warn!(
                        "Action '{}' failed on attempt {}/{} in run {}: {}; retrying in {:?}",
                        action_step.action,
                        attempt,
                        max_attempts,
                        run.id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((RunError::from(e), attempt)),
            }
        };

        match (result, &action_step.output) {
            (Value::Object(map), None) => run.context.merge_object(map, &def.variables),
            (Value::Null, None) => {}
            (value, output) => {
                let key = output.as_deref().unwrap_or(step.id.as_str());
                let reducer = def.variables.reducer(key);
                run.context.merge(key, value, reducer);
            }
        }
        Ok(attempt)
    }

    async fn transition(
        &self,
        run: &mut WorkflowRun,
        step: &StepDefinition,
        entered: DateTime<Utc>,
        attempts: u32,
        target: &str,
    ) -> Result<(), StoreError> {
        log::debug!("Run {} step '{}' -> '{}'", run.id, step.id, target);
        run.record(HistoryEntry {
            step_id: step.id.clone(),
            kind: step.kind_name().to_string(),
            entered_at: entered,
            exited_at: Some(self.clock.now()),
            attempts,
            outcome: StepOutcome::Transitioned,
            next: Some(target.to_string()),
            error: None,
        });
        run.current_step = target.to_string();
        self.store.save(run).await
    }

    async fn suspend(
        &self,
        run: &mut WorkflowRun,
        step: &StepDefinition,
        wait: &WaitStep,
        entered: DateTime<Utc>,
    ) -> Result<WaitCondition, StoreError> {
        let deadline = wait
            .timeout_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|timeout| entered.checked_add_signed(timeout));
        let condition = WaitCondition {
            token: Uuid::new_v4().to_string(),
            step_id: step.id.clone(),
            event: wait.event.clone(),
            matches: wait.matches.clone(),
            deadline,
            created_at: entered,
        };

        run.record(HistoryEntry {
            step_id: step.id.clone(),
            kind: step.kind_name().to_string(),
            entered_at: entered,
            exited_at: None,
            attempts: 0,
            outcome: StepOutcome::Suspended,
            next: None,
            error: None,
        });
        run.status = RunStatus::Waiting;
        run.wait = Some(condition.clone());
        self.store.save(run).await?;
        log::info!(
            "Run {} waiting at '{}' (event: {:?}, deadline: {:?})",
            run.id,
            step.id,
            condition.event,
            condition.deadline
        );
        Ok(condition)
    }

    async fn fail(
        &self,
        run: &mut WorkflowRun,
        step: Option<&StepDefinition>,
        entered: DateTime<Utc>,
        attempts: u32,
        err: RunError,
    ) -> Result<CycleOutcome, StoreError> {
        let now = self.clock.now();
        log::error!("Run {} failed at '{}': {}", run.id, run.current_step, err);
        run.record(HistoryEntry {
            step_id: run.current_step.clone(),
            kind: step.map_or("unknown", StepDefinition::kind_name).to_string(),
            entered_at: entered,
            exited_at: Some(now),
            attempts,
            outcome: StepOutcome::Failed,
            next: None,
            error: Some(err.clone()),
        });
        run.error = Some(err.clone());
        run.finish(RunStatus::Failed, now);
        self.store.save(run).await?;
        Ok(CycleOutcome::Failed(err))
    }
}

// SPDX-License-Identifier: MIT

//! Interval and calendar schedules, plus the deadline timers that expire
//! waiting runs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};

use super::cron::CronExpr;
use super::StartRequest;
use crate::cadence::workflow::state::{Context, TriggerSource};
use crate::cadence::workflow::template;
use crate::kit::error::ScheduleError;

/// What to do with ticks that came due while nothing was ticking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissedTicks {
    /// Drop missed ticks and wait for the next future one. A tick that came
    /// due no more than `misfire_grace_secs` ago (60 by default) still
    /// fires, so a short outage does not lose it; set the grace to zero to
    /// fire only future ticks.
    #[default]
    Skip,
    /// Fire a single catch-up run for the latest missed tick
    Once,
    /// Fire every missed tick, oldest first, up to the backfill cap
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleSpec {
    Every(Duration),
    Cron(CronExpr),
}

impl ScheduleSpec {
    /// Exactly one of `every_secs` and `cron` must be given
    pub fn parse(every_secs: Option<u64>, cron: Option<&str>) -> Result<Self, ScheduleError> {
        match (every_secs, cron) {
            (Some(0), None) => Err(ScheduleError::ZeroInterval),
            (Some(secs), None) => {
                let secs = i64::try_from(secs).map_err(|_| ScheduleError::ZeroInterval)?;
                Duration::try_seconds(secs)
                    .map(ScheduleSpec::Every)
                    .ok_or(ScheduleError::ZeroInterval)
            }
            (None, Some(expr)) => CronExpr::parse(expr).map(ScheduleSpec::Cron),
            _ => Err(ScheduleError::Ambiguous),
        }
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleSpec::Every(interval) => after.checked_add_signed(*interval),
            ScheduleSpec::Cron(cron) => cron.next_after(after),
        }
    }
}

/// How a schedule trigger treats lateness
#[derive(Debug, Clone, Copy)]
pub struct MisfirePolicy {
    pub missed: MissedTicks,
    /// A tick this late or less still counts as on time
    pub grace: Duration,
    pub max_backfill: usize,
}

#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    workflow_id: String,
    spec: ScheduleSpec,
    context: Map<String, Value>,
    policy: MisfirePolicy,
    next_fire: Option<DateTime<Utc>>,
}

impl ScheduleTrigger {
    pub fn new(
        workflow_id: impl Into<String>,
        spec: ScheduleSpec,
        context: Map<String, Value>,
        policy: MisfirePolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let next_fire = spec.next_after(now);
        Self {
            workflow_id: workflow_id.into(),
            spec,
            context,
            policy,
            next_fire,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_fire
    }

    /// Continue the schedule from a previously fired tick, so ticks missed
    /// while the process was down are subject to the misfire policy
    pub fn resume_after(&mut self, last_fired: DateTime<Utc>) {
        self.next_fire = self.spec.next_after(last_fired);
    }

    /// Fire times due at `now` after applying the misfire policy
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let Some(first) = self.next_fire else {
            return Vec::new();
        };
        if first > now {
            return Vec::new();
        }

        let keep = match self.policy.missed {
            MissedTicks::Skip | MissedTicks::Once => 1,
            MissedTicks::All => self.policy.max_backfill.max(1),
        };
        let mut window = VecDeque::with_capacity(keep);
        let mut total = 0usize;
        let mut cursor = Some(first);
        while let Some(t) = cursor.filter(|t| *t <= now) {
            total += 1;
            if window.len() == keep {
                window.pop_front();
            }
            window.push_back(t);
            let (next, jumped) = self.fast_forward(t, now);
            total += jumped;
            cursor = next;
        }
        self.next_fire = cursor;

        let fired: Vec<DateTime<Utc>> = match self.policy.missed {
            MissedTicks::Skip => window
                .into_iter()
                .filter(|t| now - *t <= self.policy.grace)
                .collect(),
            MissedTicks::Once | MissedTicks::All => window.into_iter().collect(),
        };

        if fired.len() < total {
            log::warn!(
                "Schedule for '{}' skipped {} missed tick(s)",
                self.workflow_id,
                total - fired.len()
            );
        }
        fired
    }

    /// Next tick after `t`, plus how many ticks were jumped over to get
    /// there. Intervals jump straight to the last tick not after `now` when
    /// the ones in between would be discarded anyway.
    fn fast_forward(&self, t: DateTime<Utc>, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, usize) {
        if let (ScheduleSpec::Every(interval), MissedTicks::Skip | MissedTicks::Once) =
            (&self.spec, self.policy.missed)
        {
            let step = interval.num_milliseconds().max(1);
            let behind = (now - t).num_milliseconds() / step;
            if behind > 1 {
                let next = t.checked_add_signed(Duration::milliseconds(step * behind));
                return (next, (behind - 1) as usize);
            }
        }
        (self.spec.next_after(t), 0)
    }

    /// Build the start request for one fire time
    pub fn request(&self, scheduled_for: DateTime<Utc>) -> StartRequest {
        let mut vars = Context::new();
        vars.insert("scheduled_for", Value::String(scheduled_for.to_rfc3339()));
        let context = match template::render_map(&self.context, &vars) {
            Ok(map) => map,
            Err(e) => {
                log::warn!(
                    "Schedule context for '{}' failed to render: {}",
                    self.workflow_id,
                    e
                );
                self.context.clone()
            }
        };
        StartRequest {
            workflow_id: self.workflow_id.clone(),
            version: None,
            context: Context::from(context),
            source: TriggerSource::Schedule { scheduled_for },
        }
    }
}

/// Pending wait deadlines, ordered by expiry
#[derive(Debug, Default)]
pub struct DeadlineTimers {
    queue: BTreeSet<(DateTime<Utc>, String)>,
    armed: HashMap<String, (DateTime<Utc>, String)>,
}

impl DeadlineTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the deadline for a run's current wait
    pub fn arm(&mut self, run_id: &str, token: &str, at: DateTime<Utc>) {
        self.disarm(run_id);
        self.queue.insert((at, run_id.to_string()));
        self.armed
            .insert(run_id.to_string(), (at, token.to_string()));
    }

    pub fn disarm(&mut self, run_id: &str) {
        if let Some((at, _)) = self.armed.remove(run_id) {
            self.queue.remove(&(at, run_id.to_string()));
        }
    }

    /// Remove and return `(run_id, token)` for every deadline at or before `now`
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut fired = Vec::new();
        while let Some((at, run_id)) = self.queue.first().cloned() {
            if at > now {
                break;
            }
            self.queue.remove(&(at, run_id.clone()));
            if let Some((_, token)) = self.armed.remove(&run_id) {
                fired.push((run_id, token));
            }
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.first().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

// SPDX-License-Identifier: MIT

//! cadence-rs: a workflow orchestration engine.
//!
//! Declarative workflow graphs are started by events, schedules or manual
//! invocation, branch on a small expression language, and can suspend on
//! `wait` steps until an external signal or a deadline resumes them.

pub mod cadence;
pub mod kit;

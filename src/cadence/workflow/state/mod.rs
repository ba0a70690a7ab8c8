// SPDX-License-Identifier: MIT

//! Run state
//!
//! This module provides:
//! - `VariableSchema` - declared variables, their types, defaults and reducers
//! - `Context` - a run's variables with reducer support
//! - `WorkflowRun` - the persisted run record with its wait condition and history
//! - `RunStore` - the persistence port, with memory and file implementations

mod context;
mod run;
mod schema;
mod store;

pub use context::Context;
pub use run::{
    ErrorKind, HistoryEntry, RunError, RunStatus, Signal, StepOutcome, TriggerSource,
    WaitCondition, WorkflowRun,
};
pub use schema::{FieldType, ReducerType, VariableDef, VariableSchema};
pub use store::{FileRunStore, MemoryRunStore, RunStore};

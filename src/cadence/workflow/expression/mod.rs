// SPDX-License-Identifier: MIT

//! Expression language for decision guards, rule conditions, trigger
//! filters and wait predicates.
//!
//! Expressions look like:
//! - `invoice.total > 1000`
//! - `status == 'submitted' and len(approvers) >= 2`
//! - `payload.type == "invoice.created"`
//! - `days_between(invoice.issued, invoice.due) > 30`

mod ast;
mod evaluator;
mod functions;
mod lexer;
mod parser;

pub use ast::{BinaryOp, Expression, LogicalOp, UnaryOp};
pub use evaluator::{evaluate, evaluate_str};
pub(crate) use evaluator::type_name;
pub use functions::{builtin_names, is_builtin};
pub use parser::parse;

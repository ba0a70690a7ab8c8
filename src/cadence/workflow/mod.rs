// SPDX-License-Identifier: MIT

pub mod engine;
pub mod executor;
pub mod expression;
pub mod loader;
pub mod registry;
pub mod rules;
pub mod state;
pub mod template;
pub mod types;
pub mod validate;

// SPDX-License-Identifier: MIT

//! Foundational pieces shared by every engine component: typed errors, the
//! action capability, external ports and the event bus.

pub mod action;
pub mod bus;
pub mod error;
pub mod port;

// SPDX-License-Identifier: MIT

//! The single queue every activation source writes into
//!
//! Triggers, resume calls and deadline timers all produce `Dispatch`es; the
//! engine is the only consumer, which keeps it the sole place executor
//! cycles are started from.

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use super::StartRequest;
use crate::cadence::workflow::state::Signal;

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Start(StartRequest),
    Resume { run_id: String, signal: Signal },
    Expire { run_id: String, token: String },
}

#[derive(Clone)]
pub struct Funnel {
    tx: UnboundedSender<Dispatch>,
    rx: Arc<Mutex<UnboundedReceiver<Dispatch>>>,
}

impl Funnel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn send(&self, dispatch: Dispatch) {
        // the receiver lives as long as any clone of the funnel
        if self.tx.send(dispatch).is_err() {
            log::error!("Funnel receiver dropped, dispatch lost");
        }
    }

    /// Take everything queued right now. Returns nothing while a background
    /// consumer owns the receiver.
    pub fn try_drain(&self) -> Vec<Dispatch> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Ok(dispatch) = rx.try_recv() {
            drained.push(dispatch);
        }
        drained
    }

    /// Wait for the next dispatch
    pub async fn recv(&self) -> Option<Dispatch> {
        self.rx.lock().await.recv().await
    }
}

impl Default for Funnel {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-run confirmation gate between the engine loop and the humans
//! driving it.
//!
//! The engine parks here after each step; a control message (confirm,
//! stop, restart) deposits a signal that releases it. The channel holds
//! at most one pending signal — when two controls race, the first
//! deposited wins and the loser is folded into the flag/pointer checks
//! on wakeup.

use tokio::sync::mpsc;

use crate::workflow::state::{SharedState, lock_state};

/// What a control handler deposited in the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// Human confirmed the step at the gate.
    Confirm,
    /// Stop or restart; the flags and step pointer carry the detail.
    Interrupt,
}

/// Why a gate wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Advance past the executed step.
    Confirmed,
    /// The run was stopped; exit the loop.
    Stopped,
    /// The step pointer was redirected; continue from it without
    /// advancing. The pointer may equal the executed step, in which
    /// case that step runs again.
    Redirected,
}

pub struct ConfirmationGate {
    state: SharedState,
    tx: mpsc::Sender<GateSignal>,
    rx: tokio::sync::Mutex<mpsc::Receiver<GateSignal>>,
}

impl ConfirmationGate {
    pub fn new(state: SharedState) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            state,
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Deposit a signal. Idempotent while one is already pending.
    pub fn signal(&self, signal: GateSignal) {
        let _ = self.tx.try_send(signal);
    }

    /// Drain any stale signal. The engine calls this after a step
    /// completes, before announcing that it is waiting, so a leftover
    /// confirm from the previous gate cannot release this one.
    pub async fn clear(&self) {
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Park until a signal arrives, then classify the wakeup.
    ///
    /// Flags are checked before parking and again after the wakeup, so
    /// a stop or redirect that landed while the step was executing is
    /// honored here instead of parking the loop forever.
    pub async fn wait(&self, executed_step: u32) -> WaitOutcome {
        if let Some(outcome) = self.check_flags(executed_step) {
            return outcome;
        }
        let received = {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        let Some(signal) = received else {
            return WaitOutcome::Stopped;
        };
        if let Some(outcome) = self.check_flags(executed_step) {
            return outcome;
        }
        match signal {
            GateSignal::Confirm => WaitOutcome::Confirmed,
            GateSignal::Interrupt => WaitOutcome::Redirected,
        }
    }

    /// Stop/redirect classification from the shared flags. `None`
    /// means the run is still live at the executed step.
    fn check_flags(&self, executed_step: u32) -> Option<WaitOutcome> {
        let state = lock_state(&self.state);
        if !state.running || state.paused {
            return Some(WaitOutcome::Stopped);
        }
        if state.current_step != executed_step {
            return Some(WaitOutcome::Redirected);
        }
        None
    }
}

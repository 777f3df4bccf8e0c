//! The step trait and the context each step executes against.
//!
//! Steps are opaque to the engine: they read the requirement and prior
//! outputs through [`StepContext`], emit progress through the
//! [`Reporter`], and hand back a [`StepResult`]. They never see the
//! workflow flags or the confirmation gate.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::dashboard::ws::{Broadcaster, DashboardMessage};
use crate::errors::StepError;
use crate::workflow::state::{
    FileChange, FileStatus, LogEntry, LogLevel, SharedState, StepResult, lock_state,
};

/// One stage of the delivery pipeline.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// 1-based position in the pipeline.
    fn id(&self) -> u32;

    /// Name shown in the dashboard step list.
    fn name(&self) -> &'static str;

    /// Run the step against the current context.
    ///
    /// An `Err` ends the run; the engine surfaces it to observers and
    /// leaves the step pointer in place so a restart can re-trigger it.
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError>;
}

/// Read-only view of the run handed to a step for one execution.
pub struct StepContext {
    /// The requirement text submitted for this run.
    pub requirement: String,
    /// Progress/file-event handle.
    pub reporter: Reporter,
    prior: HashMap<u32, StepResult>,
    delay: Duration,
}

impl StepContext {
    pub fn new(
        requirement: String,
        prior: HashMap<u32, StepResult>,
        reporter: Reporter,
        delay: Duration,
    ) -> Self {
        Self {
            requirement,
            reporter,
            prior,
            delay,
        }
    }

    /// Output of an earlier step, if it has run in this session.
    pub fn prior_output(&self, step_id: u32) -> Option<&StepResult> {
        self.prior.get(&step_id)
    }

    /// Payload of an earlier step's output.
    pub fn prior_payload(&self, step_id: u32) -> Option<&Value> {
        self.prior.get(&step_id).map(|r| &r.payload)
    }

    /// Pause for the configured pacing delay so the live view stays
    /// legible. A zero delay (tests) returns immediately.
    pub async fn pace(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Handle through which a step records progress without touching
/// [`crate::workflow::state::WorkflowState`] directly. Every entry is
/// appended to the shared record and broadcast to observers.
#[derive(Clone)]
pub struct Reporter {
    state: SharedState,
    broadcaster: Broadcaster,
}

impl Reporter {
    pub fn new(state: SharedState, broadcaster: Broadcaster) -> Self {
        Self { state, broadcaster }
    }

    /// Append an activity-log line and broadcast it.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);
        let event = DashboardMessage::Log {
            message: entry.message.clone(),
            level: entry.level,
            timestamp: entry.timestamp,
        };
        lock_state(&self.state).push_log(entry);
        self.broadcaster.send(&event);
    }

    /// Record a file touched by the step and broadcast it.
    pub fn file_modified(
        &self,
        path: impl Into<String>,
        status: FileStatus,
        stats: impl Into<String>,
    ) {
        let change = FileChange {
            path: path.into(),
            status,
            stats: stats.into(),
        };
        let event = DashboardMessage::FileModified {
            path: change.path.clone(),
            status: change.status,
            stats: change.stats.clone(),
        };
        lock_state(&self.state).record_file(change);
        self.broadcaster.send(&event);
    }
}

//! Typed error hierarchy for the conveyor orchestrator.
//!
//! Three enums cover the three failure domains:
//! - `WorkflowError` — submission and control-message failures
//! - `StepError` — step collaborator failures (caught at the engine boundary)
//! - `RegistryError` — pipeline construction failures (programmer error)

use thiserror::Error;

/// Errors surfaced synchronously to the caller of a submission or control
/// operation. None of these corrupt workflow state.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("A workflow is already running")]
    AlreadyRunning,

    #[error("Requirement too short: {len} chars (minimum {min})")]
    RequirementTooShort { len: usize, min: usize },

    #[error("Step {step_id} is out of range (pipeline has {count} steps)")]
    InvalidStep { step_id: u32, count: u32 },

    #[error("No requirement on record; nothing to restart")]
    NothingToRestart,

    #[error("No step registered with id {0}")]
    UnknownStep(u32),
}

/// Errors from a single step execution. The engine converts these into a
/// terminal `workflow_error` broadcast and halts the run without advancing
/// the step pointer.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Ticket tracker rejected the request: {0}")]
    TrackerRejected(String),

    #[error("Ticket tracker unreachable: {0}")]
    TrackerUnreachable(#[source] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from pipeline registry construction. These indicate a
/// misassembled step table and are raised before the server starts.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Pipeline has no steps")]
    Empty,

    #[error("Duplicate step id {0}")]
    DuplicateId(u32),

    #[error("Step ids must run contiguously from 1; id {0} is missing")]
    MissingId(u32),
}

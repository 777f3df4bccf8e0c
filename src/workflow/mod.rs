//! Step-sequenced, human-gated workflow orchestration.
//!
//! ## Module Map
//!
//! ```text
//! submit / confirm / stop / restart
//!        │
//!        v
//!  engine.rs   (WorkflowEngine — the control loop)
//!        │ executes            │ parks at
//!        v                     v
//!  registry.rs  ──> step.rs    gate.rs  (ConfirmationGate)
//!  (StepRegistry)   (WorkflowStep, StepContext, Reporter)
//!        │
//!        v
//!  state.rs   (WorkflowState — flags, pointer, outputs, log)
//! ```
//!
//! The engine executes one step at a time, broadcasts progress to all
//! observers, and blocks after each step until a human confirms,
//! stops, or redirects the run. Exactly one run is active at a time;
//! after a stop the run record is kept so a restart can resume it.

pub mod engine;
pub mod gate;
pub mod registry;
pub mod state;
pub mod step;

//! The reference delivery pipeline: ten demo steps and the tracker
//! client they share.
//!
//! ```text
//! tracker    HTTP client for the ticket tracker, canned offline mode
//! planning   steps 1-6: analysis, retrieval, insight, drafting,
//!            ticketing, breakdown
//! delivery   steps 7-10: branch, codegen, review & test, merge
//! ```
//!
//! [`default_pipeline`] assembles the steps in pipeline order.

pub mod delivery;
pub mod planning;
pub mod tracker;

use std::sync::Arc;

use crate::errors::RegistryError;
use crate::workflow::registry::StepRegistry;
use tracker::TrackerClient;

/// Similarity score at which an existing epic is reused instead of
/// creating a new one.
pub const SIMILARITY_THRESHOLD: f64 = 0.7;

/// The ten-step demo pipeline in execution order.
pub fn default_pipeline(tracker: TrackerClient) -> Result<StepRegistry, RegistryError> {
    let tracker = Arc::new(tracker);
    StepRegistry::new(vec![
        Arc::new(planning::RequirementAnalysis),
        Arc::new(planning::ContextRetrieval::new(tracker.clone())),
        Arc::new(planning::DomainInsight::new(tracker.clone())),
        Arc::new(planning::StoryDrafting),
        Arc::new(planning::TicketCreation::new(tracker)),
        Arc::new(planning::TaskBreakdown),
        Arc::new(delivery::BranchNaming),
        Arc::new(delivery::CodeGeneration),
        Arc::new(delivery::ReviewAndTest),
        Arc::new(delivery::MergeDeploy),
    ])
}

//! Ordered table of pipeline steps, validated at construction.

use std::sync::Arc;

use crate::errors::{RegistryError, WorkflowError};
use crate::workflow::step::WorkflowStep;

/// Maps step ids 1..=N to their implementations. Owns no run state.
pub struct StepRegistry {
    steps: Vec<Arc<dyn WorkflowStep>>,
}

impl StepRegistry {
    /// Build a registry from steps carrying contiguous ids 1..=N.
    ///
    /// A gap, duplicate, or out-of-range id is a construction error,
    /// surfaced before the server starts rather than mid-run.
    pub fn new(steps: Vec<Arc<dyn WorkflowStep>>) -> Result<Self, RegistryError> {
        if steps.is_empty() {
            return Err(RegistryError::Empty);
        }
        let count = steps.len() as u32;
        let mut slots: Vec<Option<Arc<dyn WorkflowStep>>> =
            (0..count).map(|_| None).collect();
        for step in steps {
            let id = step.id();
            if id == 0 || id > count {
                // An out-of-range id leaves some in-range slot empty.
                continue;
            }
            let slot = &mut slots[(id - 1) as usize];
            if slot.is_some() {
                return Err(RegistryError::DuplicateId(id));
            }
            *slot = Some(step);
        }
        let mut ordered = Vec::with_capacity(count as usize);
        for (idx, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(step) => ordered.push(step),
                None => return Err(RegistryError::MissingId(idx as u32 + 1)),
            }
        }
        Ok(Self { steps: ordered })
    }

    /// Number of steps in the pipeline.
    pub fn count(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Look up a step by id.
    pub fn get(&self, step_id: u32) -> Result<&dyn WorkflowStep, WorkflowError> {
        step_id
            .checked_sub(1)
            .and_then(|idx| self.steps.get(idx as usize))
            .map(|step| step.as_ref())
            .ok_or(WorkflowError::UnknownStep(step_id))
    }

    /// Steps in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn WorkflowStep> {
        self.steps.iter().map(|step| step.as_ref())
    }
}

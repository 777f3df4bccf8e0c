//! The workflow control loop and the operations that drive it.
//!
//! One engine exists per process. `submit` claims the single-flight
//! slot and spawns the loop as a background task; the loop executes
//! steps in order, broadcasting progress and parking at the
//! confirmation gate after each one. Control operations (confirm,
//! stop, restart) flip the shared flags and release the gate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::config::WorkflowSection;
use crate::dashboard::ws::{Broadcaster, DashboardMessage};
use crate::errors::WorkflowError;
use crate::workflow::gate::{ConfirmationGate, GateSignal, WaitOutcome};
use crate::workflow::registry::StepRegistry;
use crate::workflow::state::{
    LogLevel, SharedState, StepStatus, WorkflowState, lock_state,
};
use crate::workflow::step::{Reporter, StepContext};

pub struct WorkflowEngine {
    state: SharedState,
    registry: Arc<StepRegistry>,
    gate: Arc<ConfirmationGate>,
    broadcaster: Broadcaster,
    reporter: Reporter,
    min_requirement_len: usize,
    step_delay: Duration,
}

impl WorkflowEngine {
    pub fn new(
        registry: StepRegistry,
        broadcaster: Broadcaster,
        workflow: &WorkflowSection,
    ) -> Self {
        let state: SharedState =
            Arc::new(Mutex::new(WorkflowState::new(workflow.log_capacity)));
        let gate = Arc::new(ConfirmationGate::new(state.clone()));
        let reporter = Reporter::new(state.clone(), broadcaster.clone());
        Self {
            state,
            registry: Arc::new(registry),
            gate,
            broadcaster,
            reporter,
            min_requirement_len: workflow.min_requirement_len,
            step_delay: Duration::from_millis(workflow.step_delay_ms),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    // ── Control operations ───────────────────────────────────────────

    /// Accept a requirement and start (or resume) the run.
    ///
    /// The step pointer is reset to 1 only when no run was in flight;
    /// after a stop it stays where the run was interrupted, so
    /// resubmission resumes from that step.
    pub fn submit(self: &Arc<Self>, requirement: &str) -> Result<(), WorkflowError> {
        let trimmed = requirement.trim();
        let len = trimmed.chars().count();
        let spawn = {
            let mut state = lock_state(&self.state);
            if state.running {
                return Err(WorkflowError::AlreadyRunning);
            }
            if len < self.min_requirement_len {
                return Err(WorkflowError::RequirementTooShort {
                    len,
                    min: self.min_requirement_len,
                });
            }
            state.requirement = trimmed.to_string();
            if state.current_step == 0 {
                state.current_step = 1;
                state.clear_run_artifacts();
            }
            state.running = true;
            state.paused = false;
            claim_loop(&mut state)
        };
        tracing::info!(chars = len, "requirement accepted");
        self.reporter
            .log(LogLevel::Info, "Workflow started, analysing requirement");
        if spawn {
            self.spawn_loop();
        }
        Ok(())
    }

    /// Release the gate for the step currently awaiting confirmation.
    /// A no-op when no run is active.
    pub fn confirm(&self) {
        let running = lock_state(&self.state).running;
        if running {
            self.gate.signal(GateSignal::Confirm);
        }
    }

    /// Halt the run at the next gate, keeping the run record so a
    /// restart can resume it.
    pub fn stop(&self) {
        {
            let mut state = lock_state(&self.state);
            state.running = false;
            state.paused = true;
        }
        self.gate.signal(GateSignal::Interrupt);
        tracing::info!("stop requested");
        self.reporter.log(LogLevel::Warning, "Workflow stopped by user");
    }

    /// Point the run at `step_id` and (re)start execution there.
    /// Re-running a step overwrites its previous output.
    pub fn restart(self: &Arc<Self>, step_id: u32) -> Result<(), WorkflowError> {
        let count = self.registry.count();
        if step_id == 0 || step_id > count {
            return Err(WorkflowError::InvalidStep { step_id, count });
        }
        let spawn = {
            let mut state = lock_state(&self.state);
            if state.requirement.is_empty() {
                return Err(WorkflowError::NothingToRestart);
            }
            state.current_step = step_id;
            state.running = true;
            state.paused = false;
            claim_loop(&mut state)
        };
        tracing::info!(step = step_id, "restart requested");
        self.reporter
            .log(LogLevel::Info, format!("Restarting from step {step_id}"));
        if spawn {
            self.spawn_loop();
        } else {
            self.gate.signal(GateSignal::Interrupt);
        }
        Ok(())
    }

    // ── The loop ─────────────────────────────────────────────────────

    fn spawn_loop(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_loop().await });
    }

    async fn run_loop(&self) {
        tracing::debug!("workflow loop started");
        loop {
            let (step_id, requirement, prior, live) = {
                let state = lock_state(&self.state);
                (
                    state.current_step,
                    state.requirement.clone(),
                    state.outputs_snapshot(),
                    state.running && !state.paused,
                )
            };
            if !live {
                if self.finish_loop() {
                    continue;
                }
                return;
            }
            if step_id > self.registry.count() {
                self.complete_run();
                if self.finish_loop() {
                    continue;
                }
                return;
            }
            let step = match self.registry.get(step_id) {
                Ok(step) => step,
                Err(err) => {
                    tracing::error!(step = step_id, error = %err, "registry miss");
                    lock_state(&self.state).running = false;
                    if self.finish_loop() {
                        continue;
                    }
                    return;
                }
            };

            self.reporter.log(
                LogLevel::Info,
                format!(
                    "Step {}/{}: {}",
                    step_id,
                    self.registry.count(),
                    step.name()
                ),
            );
            self.broadcaster.send(&DashboardMessage::StepUpdate {
                step_id,
                status: StepStatus::InProgress,
                details: String::new(),
                message: format!("Running {}", step.name()),
                data: json!({}),
            });

            let ctx = StepContext::new(
                requirement,
                prior,
                self.reporter.clone(),
                self.step_delay,
            );
            match step.execute(&ctx).await {
                Ok(result) => {
                    lock_state(&self.state).record_output(result.clone());
                    self.broadcaster.send(&DashboardMessage::StepUpdate {
                        step_id,
                        status: StepStatus::Complete,
                        details: result.detail.clone(),
                        message: result.summary.clone(),
                        data: result.payload.clone(),
                    });
                    self.gate.clear().await;
                    self.broadcaster
                        .send(&DashboardMessage::AwaitingConfirmation {
                            step_id,
                            message: format!(
                                "{} complete. Confirm to continue.",
                                step.name()
                            ),
                            data: result.payload,
                        });
                    match self.gate.wait(step_id).await {
                        WaitOutcome::Confirmed => {
                            let mut state = lock_state(&self.state);
                            // A restart may have moved the pointer
                            // between the wakeup and this advance.
                            if state.current_step == step_id {
                                state.current_step += 1;
                            }
                        }
                        WaitOutcome::Redirected => {}
                        WaitOutcome::Stopped => {
                            if self.finish_loop() {
                                continue;
                            }
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(step = step_id, error = %err, "step failed");
                    self.reporter.log(
                        LogLevel::Error,
                        format!("{} failed: {err}", step.name()),
                    );
                    self.broadcaster.send(&DashboardMessage::StepUpdate {
                        step_id,
                        status: StepStatus::Error,
                        details: err.to_string(),
                        message: format!("{} failed", step.name()),
                        data: json!({}),
                    });
                    self.broadcaster.send(&DashboardMessage::WorkflowError {
                        title: format!("{} failed", step.name()),
                        message: err.to_string(),
                        details: format!("{err:?}"),
                    });
                    // Pointer stays on the failed step so a restart
                    // can re-trigger it.
                    lock_state(&self.state).running = false;
                    if self.finish_loop() {
                        continue;
                    }
                    return;
                }
            }
        }
    }

    /// Mark the loop inactive, unless a submit or restart raced the
    /// shutdown and flipped the flags back on. Returns true when the
    /// loop must keep running.
    fn finish_loop(&self) -> bool {
        let mut state = lock_state(&self.state);
        if state.running && !state.paused {
            return true;
        }
        state.loop_active = false;
        tracing::debug!("workflow loop exited");
        false
    }

    fn complete_run(&self) {
        let summary = {
            let mut state = lock_state(&self.state);
            let mut steps = serde_json::Map::new();
            for step in self.registry.iter() {
                if let Some(output) = state.step_outputs.get(&step.id()) {
                    steps.insert(
                        step.name().to_string(),
                        Value::String(output.summary.clone()),
                    );
                }
            }
            let summary = json!({
                "steps": steps,
                "files_modified": state.modified_files().len(),
            });
            state.running = false;
            state.current_step = 0;
            summary
        };
        tracing::info!("workflow complete");
        self.reporter
            .log(LogLevel::Success, "Workflow complete, all steps confirmed");
        self.broadcaster.send(&DashboardMessage::WorkflowComplete {
            message: "Workflow complete".to_string(),
            summary,
        });
    }
}

/// Mark the loop as owned by the caller if nothing holds it. Returns
/// true when the caller must spawn it.
fn claim_loop(state: &mut WorkflowState) -> bool {
    if state.loop_active {
        false
    } else {
        state.loop_active = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepError;
    use crate::workflow::state::{FileStatus, StepResult};
    use crate::workflow::step::WorkflowStep;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast::Receiver;
    use tokio::time::timeout;

    const REQ: &str = "Build a customer portal with login, billing and reporting";

    struct CountingStep {
        id: u32,
        name: &'static str,
        runs: Arc<AtomicU32>,
        report_file: bool,
    }

    #[async_trait]
    impl WorkflowStep for CountingStep {
        fn id(&self) -> u32 {
            self.id
        }

        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.report_file {
                ctx.reporter
                    .file_modified("src/generated.rs", FileStatus::Added, "+10 lines");
            }
            Ok(StepResult::complete(
                self.id,
                format!("{} done", self.name),
                "",
                json!({"step": self.id}),
            ))
        }
    }

    /// Fails on its first execution, succeeds afterwards.
    struct FlakyStep {
        id: u32,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl WorkflowStep for FlakyStep {
        fn id(&self) -> u32 {
            self.id
        }

        fn name(&self) -> &'static str {
            "Flaky"
        }

        async fn execute(&self, _ctx: &StepContext) -> Result<StepResult, StepError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run == 0 {
                Err(StepError::Other(anyhow::anyhow!("transient outage")))
            } else {
                Ok(StepResult::complete(self.id, "recovered", "", json!({})))
            }
        }
    }

    struct Harness {
        engine: Arc<WorkflowEngine>,
        runs: Vec<Arc<AtomicU32>>,
    }

    fn harness(step_count: u32) -> Harness {
        let mut steps: Vec<Arc<dyn WorkflowStep>> = Vec::new();
        let mut runs = Vec::new();
        for id in 1..=step_count {
            let counter = Arc::new(AtomicU32::new(0));
            runs.push(counter.clone());
            steps.push(Arc::new(CountingStep {
                id,
                name: step_name(id),
                runs: counter,
                report_file: id == 1,
            }));
        }
        Harness {
            engine: engine_for(steps),
            runs,
        }
    }

    fn engine_for(steps: Vec<Arc<dyn WorkflowStep>>) -> Arc<WorkflowEngine> {
        let registry = StepRegistry::new(steps).unwrap();
        let broadcaster = Broadcaster::new(256);
        let workflow = WorkflowSection {
            min_requirement_len: 10,
            log_capacity: 200,
            step_delay_ms: 0,
        };
        Arc::new(WorkflowEngine::new(registry, broadcaster, &workflow))
    }

    fn step_name(id: u32) -> &'static str {
        match id {
            1 => "First",
            2 => "Second",
            3 => "Third",
            _ => "Later",
        }
    }

    async fn next_frame(rx: &mut Receiver<String>) -> Value {
        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("broadcast closed");
        serde_json::from_str(&frame).unwrap()
    }

    /// Read frames until the gate announcement for `step_id`, returning
    /// everything seen on the way.
    async fn frames_until_gate(rx: &mut Receiver<String>, step_id: u32) -> Vec<Value> {
        let mut seen = Vec::new();
        loop {
            let frame = next_frame(rx).await;
            let done = frame["type"] == "awaiting_confirmation"
                && frame["stepId"] == json!(step_id);
            seen.push(frame);
            if done {
                return seen;
            }
        }
    }

    async fn frame_of_type(rx: &mut Receiver<String>, ty: &str) -> Value {
        loop {
            let frame = next_frame(rx).await;
            if frame["type"] == ty {
                return frame;
            }
        }
    }

    async fn wait_until(engine: &Arc<WorkflowEngine>, cond: impl Fn(&WorkflowState) -> bool) {
        for _ in 0..400 {
            if cond(&lock_state(engine.state())) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("state condition not reached");
    }

    #[tokio::test]
    async fn test_submit_rejects_short_requirement() {
        let h = harness(2);
        let err = h.engine.submit("too short").unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::RequirementTooShort { len: 9, min: 10 }
        ));
        let state = lock_state(h.engine.state());
        assert!(!state.running);
        assert_eq!(state.current_step, 0);
        assert!(state.requirement.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_while_running() {
        let h = harness(2);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;

        let err = h.engine.submit("Another requirement long enough").unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyRunning));
        assert_eq!(lock_state(h.engine.state()).requirement, REQ);
    }

    #[tokio::test]
    async fn test_full_run_to_completion() {
        let h = harness(3);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();

        for step in 1..=3 {
            frames_until_gate(&mut rx, step).await;
            h.engine.confirm();
        }
        let complete = frame_of_type(&mut rx, "workflow_complete").await;
        assert_eq!(complete["summary"]["files_modified"], json!(1));
        assert_eq!(complete["summary"]["steps"]["First"], json!("First done"));
        assert_eq!(complete["summary"]["steps"]["Third"], json!("Third done"));

        wait_until(&h.engine, |s| !s.loop_active).await;
        let state = lock_state(h.engine.state());
        assert!(!state.running);
        assert_eq!(state.current_step, 0);
        assert_eq!(state.step_outputs.len(), 3);
        for counter in &h.runs {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_step_broadcast_order() {
        let h = harness(2);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();

        let seen = frames_until_gate(&mut rx, 1).await;
        let updates: Vec<&Value> = seen
            .iter()
            .filter(|f| f["type"] == "step_update")
            .collect();
        assert_eq!(updates[0]["stepId"], json!(1));
        assert_eq!(updates[0]["status"], json!("in-progress"));
        assert_eq!(updates[1]["stepId"], json!(1));
        assert_eq!(updates[1]["status"], json!("complete"));
        assert!(seen.iter().all(|f| f["stepId"] != json!(2)));

        // Parked at the gate: nothing further may arrive.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        h.engine.confirm();
        let seen = frames_until_gate(&mut rx, 2).await;
        assert!(seen.iter().any(|f| {
            f["type"] == "step_update"
                && f["stepId"] == json!(2)
                && f["status"] == json!("in-progress")
        }));
    }

    #[tokio::test]
    async fn test_stop_at_gate() {
        let h = harness(3);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;

        h.engine.stop();
        wait_until(&h.engine, |s| !s.loop_active).await;

        let state = lock_state(h.engine.state());
        assert!(!state.running);
        assert!(state.paused);
        assert_eq!(state.current_step, 1);
        drop(state);

        // No step 2 activity after the stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(frame) = rx.try_recv() {
            let frame: Value = serde_json::from_str(&frame).unwrap();
            assert_ne!(frame["type"], "step_update");
        }
        assert_eq!(h.runs[1].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confirm_when_idle_is_noop() {
        let h = harness(2);
        h.engine.confirm();
        let state = lock_state(h.engine.state());
        assert!(!state.running);
        assert!(!state.loop_active);
        drop(state);

        // The ignored confirm must not pre-release the first gate.
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lock_state(h.engine.state()).current_step, 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop_reexecutes() {
        let h = harness(2);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;
        h.engine.stop();
        wait_until(&h.engine, |s| !s.loop_active).await;

        h.engine.restart(1).unwrap();
        frames_until_gate(&mut rx, 1).await;
        assert_eq!(h.runs[0].load(Ordering::SeqCst), 2);
        let state = lock_state(h.engine.state());
        assert!(state.running);
        assert!(!state.paused);
    }

    #[tokio::test]
    async fn test_restart_while_waiting_redirects_back() {
        let h = harness(3);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;
        h.engine.confirm();
        frames_until_gate(&mut rx, 2).await;

        h.engine.restart(1).unwrap();
        frames_until_gate(&mut rx, 1).await;
        assert_eq!(h.runs[0].load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_restart_ahead_skips_intermediate_steps() {
        let h = harness(3);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;

        h.engine.restart(3).unwrap();
        frames_until_gate(&mut rx, 3).await;
        assert_eq!(h.runs[1].load(Ordering::SeqCst), 0);
        assert_eq!(h.runs[2].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_rejects_invalid_step() {
        let h = harness(3);
        h.engine.submit(REQ).unwrap();
        assert!(matches!(
            h.engine.restart(0),
            Err(WorkflowError::InvalidStep { step_id: 0, count: 3 })
        ));
        assert!(matches!(
            h.engine.restart(4),
            Err(WorkflowError::InvalidStep { step_id: 4, count: 3 })
        ));
    }

    #[tokio::test]
    async fn test_restart_without_requirement() {
        let h = harness(2);
        assert!(matches!(
            h.engine.restart(1),
            Err(WorkflowError::NothingToRestart)
        ));
    }

    #[tokio::test]
    async fn test_failing_step_surfaces_error_and_restart_recovers() {
        let flaky_runs = Arc::new(AtomicU32::new(0));
        let first_runs = Arc::new(AtomicU32::new(0));
        let steps: Vec<Arc<dyn WorkflowStep>> = vec![
            Arc::new(CountingStep {
                id: 1,
                name: "First",
                runs: first_runs.clone(),
                report_file: false,
            }),
            Arc::new(FlakyStep {
                id: 2,
                runs: flaky_runs.clone(),
            }),
        ];
        let engine = engine_for(steps);
        let mut rx = engine.broadcaster().subscribe();
        engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;
        engine.confirm();

        let error = frame_of_type(&mut rx, "workflow_error").await;
        assert!(error["message"]
            .as_str()
            .unwrap()
            .contains("transient outage"));
        wait_until(&engine, |s| !s.loop_active).await;
        {
            let state = lock_state(engine.state());
            assert!(!state.running);
            assert!(!state.paused);
            assert_eq!(state.current_step, 2);
            assert!(!state.step_outputs.contains_key(&2));
        }

        engine.restart(2).unwrap();
        frames_until_gate(&mut rx, 2).await;
        engine.confirm();
        frame_of_type(&mut rx, "workflow_complete").await;
        assert_eq!(flaky_runs.load(Ordering::SeqCst), 2);
        assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resubmit_after_stop_resumes() {
        let h = harness(3);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;
        h.engine.confirm();
        frames_until_gate(&mut rx, 2).await;
        h.engine.stop();
        wait_until(&h.engine, |s| !s.loop_active).await;

        let revised = "Revised requirement with extra reporting features";
        h.engine.submit(revised).unwrap();
        frames_until_gate(&mut rx, 2).await;
        assert_eq!(h.runs[0].load(Ordering::SeqCst), 1);
        assert_eq!(h.runs[1].load(Ordering::SeqCst), 2);
        assert_eq!(lock_state(h.engine.state()).requirement, revised);
    }

    #[tokio::test]
    async fn test_completion_allows_fresh_run() {
        let h = harness(2);
        let mut rx = h.engine.broadcaster().subscribe();
        h.engine.submit(REQ).unwrap();
        for step in 1..=2 {
            frames_until_gate(&mut rx, step).await;
            h.engine.confirm();
        }
        frame_of_type(&mut rx, "workflow_complete").await;
        wait_until(&h.engine, |s| !s.loop_active).await;

        h.engine.submit(REQ).unwrap();
        frames_until_gate(&mut rx, 1).await;
        // Fresh run: previous artifacts were cleared at submission.
        let state = lock_state(h.engine.state());
        assert_eq!(state.step_outputs.len(), 1);
        assert_eq!(state.modified_files().len(), 1);
        assert_eq!(h.runs[0].load(Ordering::SeqCst), 2);
    }
}

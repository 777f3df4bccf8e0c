//! Integration tests for conveyor
//!
//! These tests verify the CLI surface and the assembled dashboard stack:
//! the real ten-step pipeline, the real router, and the canned tracker
//! working together.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use conveyor::config::DashboardConfig;
use predicates::prelude::*;

/// Helper to create a conveyor Command
fn conveyor() -> Command {
    cargo_bin_cmd!("conveyor")
}

/// Config tuned for tests: no pacing delay, short minimum requirement.
fn test_config() -> DashboardConfig {
    let mut config = DashboardConfig::default();
    config.workflow.step_delay_ms = 0;
    config.workflow.min_requirement_len = 10;
    config
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_conveyor_help() {
        conveyor()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("steps"));
    }

    #[test]
    fn test_conveyor_version() {
        conveyor().arg("--version").assert().success();
    }

    #[test]
    fn test_steps_prints_full_catalog() {
        conveyor()
            .arg("steps")
            .assert()
            .success()
            .stdout(predicate::str::contains("Requirement analysis"))
            .stdout(predicate::str::contains("Ticket creation"))
            .stdout(predicate::str::contains("Merge & deploy"))
            .stdout(predicate::str::contains("10 steps"));
    }

    #[test]
    fn test_serve_rejects_missing_config_file() {
        conveyor()
            .arg("serve")
            .arg("--config")
            .arg("/nonexistent/conveyor.toml")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to load config"));
    }

    #[test]
    fn test_serve_rejects_malformed_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("conveyor.toml");
        std::fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();

        conveyor()
            .arg("serve")
            .arg("--config")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("conveyor.toml"));
    }
}

// =============================================================================
// HTTP API Tests
// =============================================================================

mod http_api {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use conveyor::dashboard::server::{build_router, build_state};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn submit_request(requirement: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/submit-requirement")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({ "requirement": requirement })).unwrap(),
            ))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(build_state(&test_config()).unwrap());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_steps_endpoint_lists_real_pipeline() {
        let app = build_router(build_state(&test_config()).unwrap());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/steps")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let steps = json_body(response).await;
        let steps = steps.as_array().unwrap();
        assert_eq!(steps.len(), 10);
        assert_eq!(steps[0]["id"], 1);
        assert_eq!(steps[0]["name"], "Requirement analysis");
        assert_eq!(steps[9]["name"], "Merge & deploy");
    }

    #[tokio::test]
    async fn test_submit_rejects_short_requirement() {
        let app = build_router(build_state(&test_config()).unwrap());
        let response = app.oneshot(submit_request("too short")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("too short"));
    }

    #[tokio::test]
    async fn test_submit_then_second_submit_conflicts() {
        let state = build_state(&test_config()).unwrap();
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(submit_request("Build the quarterly reporting dashboard"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "success");

        let response = app
            .oneshot(submit_request("Another requirement while running"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        state.engine.stop();
    }

    #[tokio::test]
    async fn test_workflow_status_when_idle() {
        let app = build_router(build_state(&test_config()).unwrap());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/workflow-status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["workflow_running"], false);
        assert_eq!(body["current_step"], 0);
    }
}

// =============================================================================
// Workflow Scenario Tests
// =============================================================================

mod workflow_scenarios {
    use super::*;
    use conveyor::dashboard::server::build_state;
    use conveyor::workflow::engine::WorkflowEngine;
    use conveyor::workflow::state::lock_state;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast::Receiver;
    use tokio::sync::broadcast::error::RecvError;

    async fn next_frame(rx: &mut Receiver<String>) -> Value {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(frame)) => return serde_json::from_str(&frame).unwrap(),
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => panic!("broadcast channel closed"),
                Err(_) => panic!("no broadcast frame within 5s"),
            }
        }
    }

    /// Consume frames until the gate announces itself.
    async fn wait_for_gate(rx: &mut Receiver<String>) -> Value {
        loop {
            let frame = next_frame(rx).await;
            match frame["type"].as_str().unwrap_or_default() {
                "awaiting_confirmation" => return frame,
                "workflow_error" => panic!("unexpected workflow error: {frame}"),
                _ => {}
            }
        }
    }

    async fn wait_until(engine: &Arc<WorkflowEngine>, check: impl Fn(&Arc<WorkflowEngine>) -> bool) {
        for _ in 0..400 {
            if check(engine) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("engine did not reach the expected state in time");
    }

    #[tokio::test]
    async fn test_full_pipeline_runs_to_completion() {
        let state = build_state(&test_config()).unwrap();
        let engine = state.engine.clone();
        let mut rx = engine.broadcaster().subscribe();

        engine
            .submit("Build a small claims intake portal for policyholders")
            .unwrap();

        let mut gates = 0u32;
        let rollup = loop {
            let frame = next_frame(&mut rx).await;
            match frame["type"].as_str().unwrap_or_default() {
                "awaiting_confirmation" => {
                    gates += 1;
                    engine.confirm();
                }
                "workflow_complete" => break frame,
                "workflow_error" => panic!("unexpected workflow error: {frame}"),
                _ => {}
            }
        };

        assert_eq!(gates, 10);
        assert_eq!(rollup["summary"]["files_modified"], 4);
        let steps = rollup["summary"]["steps"].as_object().unwrap();
        assert_eq!(steps.len(), 10);
        assert_eq!(steps["Code generation"], "4 files created");
        assert_eq!(steps["Domain insight"], "insurance profile applied");
        assert_eq!(steps["Ticket creation"], "PROJ-103");

        let st = lock_state(engine.state());
        assert!(!st.running);
        assert_eq!(st.current_step, 0);
        assert_eq!(st.modified_files().len(), 4);
    }

    #[tokio::test]
    async fn test_stop_then_restart_re_runs_current_step() {
        let state = build_state(&test_config()).unwrap();
        let engine = state.engine.clone();
        let mut rx = engine.broadcaster().subscribe();

        engine
            .submit("Reconcile nightly ledger transactions across regions")
            .unwrap();

        // Step 1 completes and parks at the gate; stop while parked.
        wait_for_gate(&mut rx).await;
        engine.stop();
        wait_until(&engine, |e| !lock_state(e.state()).loop_active).await;

        {
            let st = lock_state(engine.state());
            assert!(!st.running);
            assert!(st.paused);
            assert_eq!(st.current_step, 1);
        }

        // Restart re-runs step 1, and a confirm moves on to step 2.
        engine.restart(1).unwrap();
        let gate = wait_for_gate(&mut rx).await;
        assert_eq!(gate["stepId"], 1);
        engine.confirm();

        let gate = wait_for_gate(&mut rx).await;
        assert_eq!(gate["stepId"], 2);
        assert_eq!(lock_state(engine.state()).current_step, 2);

        engine.stop();
    }

    #[tokio::test]
    async fn test_restart_rejects_out_of_range_step() {
        let state = build_state(&test_config()).unwrap();
        let engine = state.engine.clone();

        engine
            .submit("Build the quarterly reporting dashboard")
            .unwrap();
        let err = engine.restart(14).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        engine.stop();
    }
}

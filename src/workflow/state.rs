//! Shared in-memory record of the active workflow run.
//!
//! A single [`WorkflowState`] lives for the whole process behind an
//! `Arc<Mutex<_>>`. The engine is the only writer of `current_step` and
//! `step_outputs`; control handlers flip the flags; reporters append to
//! the bounded activity log and the modified-files list. Lock scopes are
//! short and never span an `.await`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the run record.
pub type SharedState = Arc<Mutex<WorkflowState>>;

/// Acquire the state lock. Lock scopes in this crate are short and never
/// panic while held; if one ever does, the poisoned guard is recovered
/// rather than cascading the panic.
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, WorkflowState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Lifecycle status of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Complete,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }
}

/// Severity of an activity-log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// What happened to a file reported by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("Invalid file status: {}", s)),
        }
    }
}

/// One line in the activity log. Append-only, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }
}

/// A file touched during the run, as reported by a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub status: FileStatus,
    /// Short human string, e.g. "+150 lines"
    pub stats: String,
}

/// Output of one step execution, written into `step_outputs` by the
/// engine immediately after the step runs. Later steps read these as
/// prior context; re-running a step overwrites its entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: u32,
    pub status: StepStatus,
    /// One-line outcome shown in the step list.
    pub summary: String,
    /// Longer detail line for the step card.
    pub detail: String,
    /// Simulated artifact produced by the step (a JSON object).
    pub payload: Value,
}

impl StepResult {
    pub fn complete(
        step_id: u32,
        summary: impl Into<String>,
        detail: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            step_id,
            status: StepStatus::Complete,
            summary: summary.into(),
            detail: detail.into(),
            payload,
        }
    }
}

/// The single in-memory record of the run. See module docs for the
/// write-ownership rules.
#[derive(Debug)]
pub struct WorkflowState {
    /// True while the control loop holds the single-flight slot.
    pub running: bool,
    /// True when a stop was requested but the run record is kept so a
    /// later restart can resume.
    pub paused: bool,
    /// True while the engine loop task is alive. Lets restart decide
    /// between signalling the gate and respawning the loop.
    pub loop_active: bool,
    /// 1-based pointer into the step sequence. 0 means not started,
    /// greater than the step count means complete.
    pub current_step: u32,
    /// Immutable input for the run, set at submission.
    pub requirement: String,
    /// Last successful output of each step, keyed by step id.
    pub step_outputs: HashMap<u32, StepResult>,
    log: VecDeque<LogEntry>,
    modified_files: Vec<FileChange>,
    log_capacity: usize,
}

impl WorkflowState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            running: false,
            paused: false,
            loop_active: false,
            current_step: 0,
            requirement: String::new(),
            step_outputs: HashMap::new(),
            log: VecDeque::new(),
            modified_files: Vec::new(),
            log_capacity,
        }
    }

    /// Append a log entry, evicting the oldest once capacity is reached.
    pub fn push_log(&mut self, entry: LogEntry) {
        if self.log.len() >= self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }

    /// The most recent `limit` log entries, oldest first.
    pub fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.log.len().saturating_sub(limit);
        self.log.iter().skip(skip).cloned().collect()
    }

    pub fn record_file(&mut self, change: FileChange) {
        self.modified_files.push(change);
    }

    pub fn modified_files(&self) -> &[FileChange] {
        &self.modified_files
    }

    /// Store a step's output, replacing any previous run of that step.
    pub fn record_output(&mut self, result: StepResult) {
        self.step_outputs.insert(result.step_id, result);
    }

    /// Clone of the prior outputs, handed to steps as read-only context.
    pub fn outputs_snapshot(&self) -> HashMap<u32, StepResult> {
        self.step_outputs.clone()
    }

    /// Drop artifacts of the previous run before a fresh submission
    /// (one that starts at step 1, not a resume).
    pub fn clear_run_artifacts(&mut self) {
        self.step_outputs.clear();
        self.modified_files.clear();
    }
}

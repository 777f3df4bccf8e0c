//! Delivery-phase steps: branch naming, code generation, review and
//! test, merge and deploy. Everything here is simulated; the payloads
//! are the artifacts a real delivery agent would produce.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::errors::StepError;
use crate::workflow::state::{FileStatus, LogLevel, StepResult};
use crate::workflow::step::{StepContext, WorkflowStep};

/// Ticket id used when the run reached delivery without a tracker epic.
const FALLBACK_TICKET: &str = "SPEC-2024-001";

const GENERATED_FILES: &[(&str, &str, u32)] = &[
    ("src/feature/mod.rs", "+150 lines", 150),
    ("src/feature/handlers.rs", "+75 lines", 75),
    ("src/feature/models.rs", "+10 lines", 10),
    ("tests/feature_test.rs", "+120 lines", 120),
];

// ── 7. Branch naming ─────────────────────────────────────────────────

pub struct BranchNaming;

/// Convert free text to a git-safe slug, limited to `max_len` bytes.
pub(crate) fn slugify(text: &str, max_len: usize) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        let mut end = max_len;
        while !slug.is_char_boundary(end) {
            end -= 1;
        }
        slug[..end].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

#[async_trait]
impl WorkflowStep for BranchNaming {
    fn id(&self) -> u32 {
        7
    }

    fn name(&self) -> &'static str {
        "Branch naming"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        ctx.reporter
            .log(LogLevel::Info, "Choosing a feature branch name");
        ctx.pace().await;

        let ticket = ctx
            .prior_payload(5)
            .and_then(|p| p["epic_key"].as_str())
            .unwrap_or(FALLBACK_TICKET)
            .to_string();
        let slug = slugify(&ctx.requirement, 30);
        let branch = if slug.is_empty() {
            format!("feature/{ticket}")
        } else {
            format!("feature/{ticket}-{slug}")
        };
        let command = format!("git checkout -b {branch}");

        ctx.reporter
            .log(LogLevel::Success, format!("Branch ready: {branch}"));
        Ok(StepResult::complete(
            7,
            branch.clone(),
            command.clone(),
            json!({ "branch": branch, "base_branch": "main", "command": command }),
        ))
    }
}

// ── 8. Code generation ───────────────────────────────────────────────

pub struct CodeGeneration;

#[async_trait]
impl WorkflowStep for CodeGeneration {
    fn id(&self) -> u32 {
        8
    }

    fn name(&self) -> &'static str {
        "Code generation"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        ctx.reporter
            .log(LogLevel::Info, "Generating implementation files");
        ctx.pace().await;

        let mut total_lines = 0u32;
        for (path, stats, lines) in GENERATED_FILES {
            ctx.reporter.file_modified(*path, FileStatus::Added, *stats);
            total_lines += lines;
            // Stagger file events so the live view shows them arriving.
            ctx.pace().await;
        }

        let file_count = GENERATED_FILES.len();
        let paths: Vec<&str> = GENERATED_FILES.iter().map(|(path, _, _)| *path).collect();
        ctx.reporter.log(
            LogLevel::Success,
            format!("Code generation complete, {file_count} files created"),
        );
        Ok(StepResult::complete(
            8,
            format!("{file_count} files created"),
            format!("{total_lines} lines across {file_count} files"),
            json!({
                "files_generated": paths,
                "total_lines": total_lines,
                "generation_time": "3.2s",
            }),
        ))
    }
}

// ── 9. Review & test ─────────────────────────────────────────────────

pub struct ReviewAndTest;

#[async_trait]
impl WorkflowStep for ReviewAndTest {
    fn id(&self) -> u32 {
        9
    }

    fn name(&self) -> &'static str {
        "Review & test"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let files_reviewed = ctx
            .prior_payload(8)
            .and_then(|p| p["files_generated"].as_array())
            .map_or(0, |a| a.len());

        ctx.reporter.log(
            LogLevel::Info,
            format!("Reviewing {files_reviewed} generated files"),
        );
        ctx.pace().await;
        ctx.reporter
            .log(LogLevel::Success, "Code review passed, no issues found");

        ctx.reporter.log(LogLevel::Info, "Running the test suite");
        ctx.pace().await;
        ctx.reporter.log(
            LogLevel::Success,
            "Unit tests passed: 15/15 (100% coverage)",
        );

        let payload = json!({
            "files_reviewed": files_reviewed,
            "review": {
                "status": "Passed",
                "issues_found": 0,
                "suggestions": 2,
                "linter_score": "10/10",
                "security_scan": "Clean",
            },
            "tests": {
                "total_tests": 15,
                "passed": 15,
                "failed": 0,
                "coverage": "100%",
                "duration": "0.45s",
            },
        });
        Ok(StepResult::complete(
            9,
            "15/15 passed (100%)",
            "Review passed, all tests green",
            payload,
        ))
    }
}

// ── 10. Merge & deploy ───────────────────────────────────────────────

pub struct MergeDeploy;

#[async_trait]
impl WorkflowStep for MergeDeploy {
    fn id(&self) -> u32 {
        10
    }

    fn name(&self) -> &'static str {
        "Merge & deploy"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let ticket = ctx
            .prior_payload(5)
            .and_then(|p| p["epic_key"].as_str())
            .unwrap_or(FALLBACK_TICKET)
            .to_string();
        let branch = ctx
            .prior_payload(7)
            .and_then(|p| p["branch"].as_str())
            .unwrap_or("feature/unnamed")
            .to_string();
        let files_changed = ctx
            .prior_payload(8)
            .and_then(|p| p["files_generated"].as_array())
            .map_or(0, |a| a.len());

        ctx.reporter.log(LogLevel::Info, "Creating pull request");
        ctx.pace().await;
        let pr_number = "#42";
        ctx.reporter.log(
            LogLevel::Success,
            format!("Pull request created: {pr_number}"),
        );

        ctx.reporter.log(LogLevel::Info, "Merging pull request");
        ctx.pace().await;
        ctx.reporter
            .log(LogLevel::Success, "Pull request merged successfully");

        let payload = json!({
            "pr_number": pr_number,
            "title": format!("feat({ticket}): New Feature Implementation"),
            "url": "https://github.com/org/repo/pull/42",
            "reviewers": ["Senior Dev", "QA Lead"],
            "branch": branch,
            "files_changed": files_changed,
            "status": "Merged",
            "merged_by": "CI/CD Bot",
            "merged_at": Utc::now().to_rfc3339(),
        });
        Ok(StepResult::complete(
            10,
            format!("PR {pr_number} merged"),
            format!("Merged into main from {branch}"),
            payload,
        ))
    }
}

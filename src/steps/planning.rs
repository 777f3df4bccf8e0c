//! Planning-phase steps: requirement analysis through task breakdown.
//!
//! Steps 2, 3 and 5 consult the tracker when one is configured. Read
//! paths degrade to the canned payloads with a warning; epic creation
//! is the one tracker call whose failure ends the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::SIMILARITY_THRESHOLD;
use super::tracker::{TrackerClient, canned_insights, canned_specification};
use crate::errors::StepError;
use crate::workflow::state::{LogLevel, StepResult};
use crate::workflow::step::{StepContext, WorkflowStep};

const DEFAULT_STORY_POINTS: u32 = 3;

// ── 1. Requirement analysis ──────────────────────────────────────────

pub struct RequirementAnalysis;

#[async_trait]
impl WorkflowStep for RequirementAnalysis {
    fn id(&self) -> u32 {
        1
    }

    fn name(&self) -> &'static str {
        "Requirement analysis"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        ctx.reporter.log(LogLevel::Info, "Analysing requirement text");
        ctx.pace().await;

        let words = ctx.requirement.split_whitespace().count();
        let complexity = if words > 60 {
            "High"
        } else if words > 25 {
            "Medium"
        } else {
            "Low"
        };
        let payload = json!({
            "input_length": ctx.requirement.chars().count(),
            "complexity_score": complexity,
            "key_entities": ["User", "System", "Database"],
            "detected_intent": "Feature Implementation",
        });

        ctx.reporter.log(
            LogLevel::Success,
            format!("Requirement analysed: {words} words, {complexity} complexity"),
        );
        Ok(StepResult::complete(
            1,
            format!("Complexity: {complexity}"),
            format!("{words} words analysed"),
            payload,
        ))
    }
}

// ── 2. Context retrieval ─────────────────────────────────────────────

pub struct ContextRetrieval {
    tracker: Arc<TrackerClient>,
}

impl ContextRetrieval {
    pub fn new(tracker: Arc<TrackerClient>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl WorkflowStep for ContextRetrieval {
    fn id(&self) -> u32 {
        2
    }

    fn name(&self) -> &'static str {
        "Context retrieval"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        ctx.reporter.log(
            LogLevel::Info,
            "Querying retrieval service for a product specification",
        );
        ctx.pace().await;

        let spec = match self.tracker.rag_specification(&ctx.requirement).await {
            Ok(spec) => spec,
            Err(err) => {
                ctx.reporter.log(
                    LogLevel::Warning,
                    format!("Retrieval service unavailable, using built-in specification: {err}"),
                );
                canned_specification(&ctx.requirement)
            }
        };

        let features = spec["features"].as_array().map_or(0, |a| a.len());
        let contexts = spec["context_retrieved"].as_u64().unwrap_or(0);
        ctx.reporter.log(
            LogLevel::Success,
            format!("Specification assembled from {contexts} retrieved contexts"),
        );

        let title = spec["title"]
            .as_str()
            .unwrap_or("Product specification")
            .to_string();
        Ok(StepResult::complete(
            2,
            title,
            format!("{features} candidate features"),
            spec,
        ))
    }
}

// ── 3. Domain insight ────────────────────────────────────────────────

pub struct DomainInsight {
    tracker: Arc<TrackerClient>,
}

impl DomainInsight {
    pub fn new(tracker: Arc<TrackerClient>) -> Self {
        Self { tracker }
    }
}

/// Crude keyword scan over the requirement. Defaults to "general".
pub(crate) fn detect_domain(requirement: &str) -> &'static str {
    const INSURANCE: &[&str] = &["insurance", "claim", "policyholder", "premium", "actuar"];
    const FINANCE: &[&str] = &[
        "payment", "bank", "financ", "ledger", "transaction", "invoice",
    ];

    let text = requirement.to_lowercase();
    if INSURANCE.iter().any(|kw| text.contains(kw)) {
        "insurance"
    } else if FINANCE.iter().any(|kw| text.contains(kw)) {
        "finance"
    } else {
        "general"
    }
}

#[async_trait]
impl WorkflowStep for DomainInsight {
    fn id(&self) -> u32 {
        3
    }

    fn name(&self) -> &'static str {
        "Domain insight"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let domain = detect_domain(&ctx.requirement);
        ctx.reporter.log(
            LogLevel::Info,
            format!("Consulting domain model ({domain} profile)"),
        );
        ctx.pace().await;

        let insights = match self.tracker.domain_insights(&ctx.requirement, domain).await {
            Ok(insights) => insights,
            Err(err) => {
                ctx.reporter.log(
                    LogLevel::Warning,
                    format!("Domain model unavailable, using built-in insights: {err}"),
                );
                canned_insights(domain)
            }
        };

        let recommendations = insights["recommendations"].as_array().map_or(0, |a| a.len());
        ctx.reporter.log(
            LogLevel::Success,
            format!("Domain review complete: {recommendations} recommendations"),
        );

        let payload = json!({
            "domain": domain,
            "insights": insights["insights"],
            "recommendations": insights["recommendations"],
            "confidence_score": insights["confidence_score"],
        });
        Ok(StepResult::complete(
            3,
            format!("{domain} profile applied"),
            format!("{recommendations} recommendations"),
            payload,
        ))
    }
}

// ── 4. Story drafting ────────────────────────────────────────────────

pub struct StoryDrafting;

#[async_trait]
impl WorkflowStep for StoryDrafting {
    fn id(&self) -> u32 {
        4
    }

    fn name(&self) -> &'static str {
        "Story drafting"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        ctx.reporter
            .log(LogLevel::Info, "Drafting user stories from the specification");
        ctx.pace().await;

        let features = feature_list(ctx);
        let stories: Vec<Value> = features
            .iter()
            .map(|feature| {
                json!({
                    "summary": feature,
                    "description": format!(
                        "As a user, I want {}, so that the delivered product meets its requirement.",
                        lowercase_first(feature)
                    ),
                    "story_points": DEFAULT_STORY_POINTS,
                })
            })
            .collect();

        for story in &stories {
            if let Some(summary) = story["summary"].as_str() {
                ctx.reporter
                    .log(LogLevel::Info, format!("Drafted story: {summary}"));
            }
        }

        let count = stories.len();
        ctx.reporter
            .log(LogLevel::Success, format!("{count} stories drafted"));
        Ok(StepResult::complete(
            4,
            format!("{count} stories drafted"),
            format!("{count} draft stories at {DEFAULT_STORY_POINTS} points each"),
            json!({ "stories": stories, "count": count }),
        ))
    }
}

fn feature_list(ctx: &StepContext) -> Vec<String> {
    ctx.prior_payload(2)
        .and_then(|spec| spec["features"].as_array())
        .map(|features| {
            features
                .iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .filter(|features| !features.is_empty())
        .unwrap_or_else(|| vec!["Core functionality implementation".to_string()])
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ── 5. Ticket creation ───────────────────────────────────────────────

pub struct TicketCreation {
    tracker: Arc<TrackerClient>,
}

impl TicketCreation {
    pub fn new(tracker: Arc<TrackerClient>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl WorkflowStep for TicketCreation {
    fn id(&self) -> u32 {
        5
    }

    fn name(&self) -> &'static str {
        "Ticket creation"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let spec = ctx.prior_payload(2).cloned().unwrap_or_else(|| json!({}));
        let title = spec["title"]
            .as_str()
            .unwrap_or("New feature implementation")
            .to_string();

        ctx.reporter.log(
            LogLevel::Info,
            format!("Searching tracker for epics similar to \"{title}\""),
        );
        ctx.pace().await;

        let matches = match self.tracker.search_epics(&title, SIMILARITY_THRESHOLD).await {
            Ok(matches) => matches,
            Err(err) => {
                ctx.reporter.log(
                    LogLevel::Warning,
                    format!("Epic search failed, assuming no match: {err}"),
                );
                Vec::new()
            }
        };

        let epic = match matches.into_iter().next() {
            Some(epic) => {
                let score = (epic.similarity_score.unwrap_or_default() * 100.0).round();
                ctx.reporter.log(
                    LogLevel::Success,
                    format!("Reusing epic {} ({score}% similar)", epic.key),
                );
                epic
            }
            None => {
                ctx.reporter
                    .log(LogLevel::Info, "No similar epic found, creating a new one");
                let description = epic_description(&ctx.requirement, &spec);
                let epic = self.tracker.create_epic(&title, &description).await?;
                ctx.reporter
                    .log(LogLevel::Success, format!("Created epic {}", epic.key));
                epic
            }
        };

        let drafts = ctx
            .prior_payload(4)
            .and_then(|p| p["stories"].as_array())
            .cloned()
            .unwrap_or_default();
        let mut created = Vec::new();
        for draft in &drafts {
            let summary = draft["summary"].as_str().unwrap_or("Untitled story");
            let description = draft["description"].as_str().unwrap_or("");
            let points = draft["story_points"].as_u64().unwrap_or(3) as u32;
            match self
                .tracker
                .create_story(&epic.key, summary, description, points)
                .await
            {
                Ok(story) => {
                    ctx.reporter.log(
                        LogLevel::Success,
                        format!("Created story {}: {}", story.key, story.summary),
                    );
                    created.push(json!({ "key": story.key, "summary": story.summary }));
                }
                Err(err) => {
                    ctx.reporter.log(
                        LogLevel::Warning,
                        format!("Story \"{summary}\" not created: {err}"),
                    );
                }
            }
        }

        let epic_key = epic.key.clone();
        let story_count = created.len();
        let payload = json!({
            "epic_key": epic.key,
            "epic_summary": epic.summary,
            "epic_url": epic.url,
            "stories": created,
            "story_count": story_count,
        });
        Ok(StepResult::complete(
            5,
            epic_key.clone(),
            format!("Epic {epic_key} ready with {story_count} stories"),
            payload,
        ))
    }
}

/// Markdown epic body assembled from the requirement and specification,
/// the shape the tracker renders on the epic page.
fn epic_description(requirement: &str, spec: &Value) -> String {
    let mut body = String::new();
    body.push_str("## Requirement\n");
    body.push_str(requirement);
    body.push_str("\n\n## Product Specification\n");
    body.push_str(
        spec["summary"]
            .as_str()
            .unwrap_or("See attached specification."),
    );
    push_section(&mut body, "Features", &spec["features"]);
    push_section(&mut body, "Technical Requirements", &spec["technical_requirements"]);
    push_section(&mut body, "Acceptance Criteria", &spec["acceptance_criteria"]);
    if let Some(effort) = spec["estimated_effort"].as_str() {
        body.push_str("\n\n## Estimated Effort\n");
        body.push_str(effort);
    }
    body
}

fn push_section(body: &mut String, heading: &str, items: &Value) {
    let Some(items) = items.as_array() else {
        return;
    };
    if items.is_empty() {
        return;
    }
    body.push_str("\n\n## ");
    body.push_str(heading);
    body.push('\n');
    for item in items {
        if let Some(text) = item.as_str() {
            body.push_str("- ");
            body.push_str(text);
            body.push('\n');
        }
    }
}

// ── 6. Task breakdown ────────────────────────────────────────────────

pub struct TaskBreakdown;

const TASK_KINDS: &[(&str, u32)] = &[("Implementation", 6), ("Tests", 3), ("Code review", 1)];

#[async_trait]
impl WorkflowStep for TaskBreakdown {
    fn id(&self) -> u32 {
        6
    }

    fn name(&self) -> &'static str {
        "Task breakdown"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        ctx.reporter
            .log(LogLevel::Info, "Breaking stories down into engineering tasks");
        ctx.pace().await;

        let stories: Vec<String> = ctx
            .prior_payload(4)
            .and_then(|p| p["stories"].as_array())
            .map(|drafts| {
                drafts
                    .iter()
                    .filter_map(|d| d["summary"].as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .filter(|stories| !stories.is_empty())
            .unwrap_or_else(|| vec!["Core functionality implementation".to_string()]);

        let mut tasks = Vec::new();
        let mut total_hours = 0u32;
        for story in &stories {
            for (kind, hours) in TASK_KINDS {
                tasks.push(json!({
                    "story": story,
                    "task": format!("{kind}: {story}"),
                    "estimate_hours": hours,
                }));
                total_hours += hours;
            }
        }

        let total_tasks = tasks.len();
        ctx.reporter.log(
            LogLevel::Success,
            format!("{total_tasks} tasks planned across {} stories", stories.len()),
        );
        Ok(StepResult::complete(
            6,
            format!("{total_tasks} tasks planned"),
            format!("{total_hours}h estimated across {} stories", stories.len()),
            json!({
                "tasks": tasks,
                "total_tasks": total_tasks,
                "total_hours": total_hours,
            }),
        ))
    }
}

use std::fmt::Write;

use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::models::{MaterialLocation, MaterialMap, RetrievedPassage};
use crate::openai::CompletionModel;
use crate::store::Retriever;

/// Handles shared by the three agents.
#[derive(Clone, Copy)]
pub struct AgentContext<'a> {
    pub retriever: &'a dyn Retriever,
    pub model: &'a dyn CompletionModel,
    pub retrieval: &'a RetrievalConfig,
}

impl AgentContext<'_> {
    async fn context_for(&self, query: &str) -> Result<String> {
        let passages = self.retriever.retrieve(query, self.retrieval.top_k).await?;
        debug!(query, passages = passages.len(), "retrieved context");
        Ok(render_passages(&passages))
    }
}

pub async fn detect_weakpoints(ctx: &AgentContext<'_>, feedback: &str) -> Result<String> {
    let context = ctx.context_for(&ctx.retrieval.weakpoint_query).await?;
    let prompt = format!(
        r#"You are Agent Weakpoint Detector.
Your job is to use the instructor feedback and connect it to the course context to create weakpoints that the student will need to study.
GOAL: Generate a list of SPECIFIC, ACTIONABLE weakpoints the student must work on.

Rules:
- Always ground your response in the instructor's feedback, rubric criteria, and assignment prompt.
- Provide detailed explanations for *why* each weakpoint matters for the student.
- If the feedback is vague, rely more heavily on rubric ratings and assignment requirements.
- If the feedback is moderate, combine rubric + assignment prompt + instructor feedback.
- If the feedback is detailed, leverage ALL available context to make weakpoints as specific as possible.
- For each weakpoint, recommend concrete next steps the student can take to improve.

Instructor feedback:
{feedback}

Course context:
{context}
"#
    );

    info!("analyzing weak points");
    let reply = ctx.model.complete(&prompt).await?;
    Ok(clean_response(&reply))
}

pub async fn locate_material(ctx: &AgentContext<'_>, weakpoints: &str) -> Result<MaterialMap> {
    let context = ctx.context_for(&ctx.retrieval.material_query).await?;
    let prompt = format!(
        r#"You are Agent Vector Searcher.
Your job is to use the weakpoints and the course context to tell the student where the information for each weakpoint is located (for example, join information is in Advanced SQL I slides 10-12).

Respond with a JSON array only, one object per weakpoint:
[{{"weak_point": "<weakpoint>", "location": "<document name and pages or slides>"}}]

Weakpoints:
{weakpoints}

Course context:
{context}
"#
    );

    info!("searching for relevant learning materials");
    let reply = ctx.model.complete(&prompt).await?;
    Ok(parse_material_map(&reply))
}

pub async fn create_study_plan(
    ctx: &AgentContext<'_>,
    weakpoints: &str,
    materials: &MaterialMap,
) -> Result<String> {
    let context = ctx.context_for(&ctx.retrieval.syllabus_query).await?;
    let prompt = format!(
        r#"You are Agent Study Planner.
Your job is to create a 7 day study plan based on the student's weakpoints, using the material locations as resources.
A good study plan consists of SMART goals, spaced repetition and retrieval practice. Each day includes a time block dedicated to studying one specific skill.
Break the time blocks into 30 minute sessions with a break in the middle.

Example:
Monday: Work on SQL problems. Resources = Advanced SQL I, slides 10-12
Tuesday: Practice join statements. Resources = Advanced SQL I, slides 5-6 inner joins

Weakpoints:
{weakpoints}

Material locations:
{materials}

Syllabus context:
{context}
"#,
        materials = materials.render(),
    );

    info!("creating study plan");
    let reply = ctx.model.complete(&prompt).await?;
    Ok(clean_response(&reply))
}

pub fn render_passages(passages: &[RetrievedPassage]) -> String {
    let mut output = String::new();
    for passage in passages {
        let _ = writeln!(output, "[{}]", passage.label());
        let _ = writeln!(output, "{}", passage.text.trim());
        let _ = writeln!(output);
    }
    output.trim_end().to_string()
}

/// Turns literal `\n` sequences into newlines and trims the reply.
pub fn clean_response(reply: &str) -> String {
    reply.replace("\\n", "\n").trim().to_string()
}

/// Parses the locator's JSON reply, tolerating a surrounding code fence. Any
/// reply that is not a non-empty array of locations is kept as raw text.
pub fn parse_material_map(reply: &str) -> MaterialMap {
    let raw = clean_response(reply);
    let body = strip_code_fence(&raw);
    let locations = serde_json::from_str::<Vec<MaterialLocation>>(body).unwrap_or_default();
    if locations.is_empty() {
        debug!("material map reply was not structured, keeping raw text");
    }

    MaterialMap { locations, raw }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop the language tag line, e.g. "json".
    match inner.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with(['[', '{']) => rest.trim(),
        _ => inner.trim(),
    }
}

//! Per-step execution.
//!
//! Each step kind produces a [`StepOutcome`]: an optional structured output
//! merged into `step.output`, zero or more artifact mutations, and a
//! human-readable log line. Upstream context (interpret, web_search) is
//! re-queried from completed steps because the worker re-enters per queue
//! message -- there is no in-memory chaining between steps.

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use sqlx::PgPool;

use coursegen_db::models::{ArtifactType, Job, Project, Step, StepKind};
use coursegen_db::queries::{artifacts as artifact_db, projects as project_db, steps as step_db};

use crate::llm::{CompletionRequest, ImageRequest, ProviderRegistry};
use crate::search::SearchClient;

/// How many search hits the web_search step asks for.
const SEARCH_MAX_RESULTS: usize = 5;

/// A mutation to one artifact row, applied by the worker inside its
/// transaction.
#[derive(Debug, Clone)]
pub struct ArtifactUpdate {
    pub artifact_type: ArtifactType,
    pub content_text: Option<String>,
    pub content_json: Option<Value>,
    pub new_assets: Vec<Value>,
    pub mark_completed: bool,
}

impl ArtifactUpdate {
    fn text(artifact_type: ArtifactType, content: String) -> Self {
        Self {
            artifact_type,
            content_text: Some(content),
            content_json: None,
            new_assets: Vec::new(),
            mark_completed: true,
        }
    }

    fn structured(artifact_type: ArtifactType, content: Value) -> Self {
        Self {
            artifact_type,
            content_text: None,
            content_json: Some(content),
            new_assets: Vec::new(),
            mark_completed: true,
        }
    }

    fn assets(artifact_type: ArtifactType, assets: Vec<Value>) -> Self {
        Self {
            artifact_type,
            content_text: None,
            content_json: None,
            new_assets: assets,
            mark_completed: false,
        }
    }
}

/// The result of executing one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub output: Option<Value>,
    pub artifact_updates: Vec<ArtifactUpdate>,
    pub log: String,
}

/// Shared collaborators for step execution.
pub struct ExecutionEnv<'a> {
    pub pool: &'a PgPool,
    pub registry: &'a ProviderRegistry,
    pub search: Option<&'a SearchClient>,
}

/// Upstream context re-read from completed steps of the same job.
struct UpstreamContext {
    interpretation: Option<Value>,
    search: Option<Value>,
}

async fn load_upstream_context(pool: &PgPool, job: &Job) -> Result<UpstreamContext> {
    let interpretation =
        step_db::latest_completed_output(pool, job.id, StepKind::Interpret).await?;
    let search = step_db::latest_completed_output(pool, job.id, StepKind::WebSearch).await?;
    Ok(UpstreamContext {
        interpretation,
        search,
    })
}

/// Execute a single step and return its outcome.
///
/// Errors bubble up to the worker, which marks the step and job failed; no
/// automatic retry.
pub async fn execute_step(env: &ExecutionEnv<'_>, job: &Job, step: &Step) -> Result<StepOutcome> {
    let project = project_db::get_project(env.pool, job.project_id)
        .await?
        .with_context(|| format!("project {} not found for job {}", job.project_id, job.id))?;

    match step.step_type {
        StepKind::Interpret => interpret(env, job, &project).await,
        StepKind::WebSearch => web_search(env, job, &project).await,
        StepKind::GenerateDocument => generate_document(env, job, &project).await,
        StepKind::GenerateInfographic => generate_infographic(env, job, &project).await,
        StepKind::GenerateSlides => generate_slides(env, job, &project).await,
        StepKind::DesignAssets => design_assets(env, job, &project).await,
        StepKind::ReviseDocument | StepKind::ReviseInfographic | StepKind::ReviseSlides => {
            revise(env, job, &project, step).await
        }
    }
}

// ---------------------------------------------------------------------------
// Step handlers
// ---------------------------------------------------------------------------

async fn interpret(env: &ExecutionEnv<'_>, job: &Job, project: &Project) -> Result<StepOutcome> {
    let provider = env.registry.for_model(&job.ai_model)?;

    let system = "You are a curriculum designer. Analyse the project brief and reply with a \
                  single JSON object with keys: summary (string), audience (string), tone \
                  (string), objectives (array of strings), search_query (string suited to a web \
                  search on the topic). Reply with JSON only.";
    let user = format!("Project: {}\n\nBrief:\n{}", project.name, project.brief);

    let completion = provider
        .complete(&CompletionRequest::single_turn(&job.ai_model, system, user))
        .await?;

    // A reply that is not valid JSON is wrapped as a bare summary.
    let output = parse_json_object(&completion.text)
        .unwrap_or_else(|| json!({ "summary": completion.text.trim() }));

    Ok(StepOutcome {
        output: Some(output),
        artifact_updates: Vec::new(),
        log: format!("Interpreted brief for {:?}", project.name),
    })
}

async fn web_search(env: &ExecutionEnv<'_>, job: &Job, project: &Project) -> Result<StepOutcome> {
    let context = load_upstream_context(env.pool, job).await?;

    let query = context
        .interpretation
        .as_ref()
        .and_then(|i| i.get("search_query"))
        .and_then(|q| q.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| project.name.clone());

    let Some(search) = env.search else {
        return Ok(StepOutcome {
            output: Some(json!({ "query": query, "results": [] })),
            artifact_updates: Vec::new(),
            log: "Web search skipped: no search endpoint configured".to_owned(),
        });
    };

    let results = search.search(&query, SEARCH_MAX_RESULTS).await?;
    let count = results.len();

    Ok(StepOutcome {
        output: Some(json!({ "query": query, "results": results })),
        artifact_updates: Vec::new(),
        log: format!("Found {count} sources for {query:?}"),
    })
}

async fn generate_document(
    env: &ExecutionEnv<'_>,
    job: &Job,
    project: &Project,
) -> Result<StepOutcome> {
    let provider = env.registry.for_model(&job.ai_model)?;
    let context = load_upstream_context(env.pool, job).await?;

    let system = "You are an experienced teacher writing course material. Produce a complete \
                  lesson document in Markdown: title, learning objectives, structured sections, \
                  and a closing summary with review questions. Reply with Markdown only.";
    let user = context_block(project, &context);

    let completion = provider
        .complete(&CompletionRequest::single_turn(&job.ai_model, system, user))
        .await?;
    let text = completion.text.trim().to_owned();
    let characters = text.len();

    Ok(StepOutcome {
        output: Some(json!({ "characters": characters })),
        artifact_updates: vec![ArtifactUpdate::text(ArtifactType::Document, text)],
        log: format!("Wrote lesson document ({characters} characters)"),
    })
}

async fn generate_infographic(
    env: &ExecutionEnv<'_>,
    job: &Job,
    project: &Project,
) -> Result<StepOutcome> {
    let provider = env.registry.for_model(&job.ai_model)?;
    let context = load_upstream_context(env.pool, job).await?;

    let system = "You are an information designer. Produce an infographic specification as a \
                  single JSON object with keys: title (string), subtitle (string), sections \
                  (array of objects with heading, body, and optional stat). Reply with JSON \
                  only.";
    let user = context_block(project, &context);

    let completion = provider
        .complete(&CompletionRequest::single_turn(&job.ai_model, system, user))
        .await?;
    let spec = parse_json_object(&completion.text)
        .with_context(|| "infographic response was not valid JSON")?;
    let sections = spec
        .get("sections")
        .and_then(|s| s.as_array())
        .map_or(0, Vec::len);

    Ok(StepOutcome {
        output: Some(json!({ "sections": sections })),
        artifact_updates: vec![ArtifactUpdate::structured(ArtifactType::Infographic, spec)],
        log: format!("Designed infographic with {sections} sections"),
    })
}

async fn generate_slides(
    env: &ExecutionEnv<'_>,
    job: &Job,
    project: &Project,
) -> Result<StepOutcome> {
    let provider = env.registry.for_model(&job.ai_model)?;
    let context = load_upstream_context(env.pool, job).await?;

    let system = "You are preparing a teaching slide deck. Produce a single JSON object with \
                  keys: title (string) and slides (array of objects with heading, bullets as an \
                  array of strings, and speaker_notes). Aim for 8-12 slides. Reply with JSON \
                  only.";
    let user = context_block(project, &context);

    let completion = provider
        .complete(&CompletionRequest::single_turn(&job.ai_model, system, user))
        .await?;
    let deck = parse_json_object(&completion.text)
        .with_context(|| "slide deck response was not valid JSON")?;
    let slides = deck
        .get("slides")
        .and_then(|s| s.as_array())
        .map_or(0, Vec::len);

    Ok(StepOutcome {
        output: Some(json!({ "slides": slides })),
        artifact_updates: vec![ArtifactUpdate::structured(ArtifactType::Slides, deck)],
        log: format!("Built slide deck with {slides} slides"),
    })
}

async fn design_assets(
    env: &ExecutionEnv<'_>,
    job: &Job,
    project: &Project,
) -> Result<StepOutcome> {
    let context = load_upstream_context(env.pool, job).await?;
    let completed = artifact_db::completed_artifact_types(env.pool, job.id).await?;

    if completed.is_empty() {
        return Ok(StepOutcome {
            output: Some(json!({ "images": 0 })),
            artifact_updates: Vec::new(),
            log: "No completed artifacts to illustrate".to_owned(),
        });
    }

    let provider = env.registry.for_images()?;
    let summary = context
        .interpretation
        .as_ref()
        .and_then(|i| i.get("summary"))
        .and_then(|s| s.as_str())
        .unwrap_or(&project.brief)
        .to_owned();

    let mut updates = Vec::with_capacity(completed.len());
    for artifact_type in &completed {
        let prompt = format!(
            "Educational illustration for a {artifact_type} about: {summary}. Clean, flat \
             style, no text."
        );
        let image = provider.generate_image(&ImageRequest::new(&prompt)).await?;
        updates.push(ArtifactUpdate::assets(
            *artifact_type,
            vec![json!({
                "kind": "image",
                "prompt": prompt,
                "url": image.url,
                "b64_data": image.b64_data,
            })],
        ));
    }

    let images = updates.len();
    Ok(StepOutcome {
        output: Some(json!({ "images": images })),
        artifact_updates: updates,
        log: format!("Generated {images} visual assets"),
    })
}

async fn revise(
    env: &ExecutionEnv<'_>,
    job: &Job,
    project: &Project,
    step: &Step,
) -> Result<StepOutcome> {
    let artifact_type = step
        .step_type
        .artifact_target()
        .with_context(|| format!("step kind {} has no artifact target", step.step_type))?;

    let instruction = step
        .input
        .as_ref()
        .and_then(|i| i.get("instruction"))
        .and_then(|s| s.as_str())
        .with_context(|| format!("revision step {} has no instruction input", step.id))?
        .to_owned();

    let artifact = artifact_db::get_artifact(env.pool, job.id, artifact_type)
        .await?
        .with_context(|| {
            format!(
                "artifact {} missing for job {} -- revision requires an existing row",
                artifact_type, job.id
            )
        })?;

    let provider = env.registry.for_model(&job.ai_model)?;
    let context = load_upstream_context(env.pool, job).await?;

    let update = match artifact_type {
        ArtifactType::Document => {
            let current = artifact.content_text.unwrap_or_default();
            let system = "You revise course material. Apply the instruction to the current \
                          lesson document and return the full revised document in Markdown. \
                          Reply with Markdown only.";
            let user = format!(
                "{}\n\nInstruction: {instruction}\n\nCurrent document:\n{current}",
                context_block(project, &context)
            );
            let completion = provider
                .complete(&CompletionRequest::single_turn(&job.ai_model, system, user))
                .await?;
            ArtifactUpdate::text(artifact_type, completion.text.trim().to_owned())
        }
        ArtifactType::Infographic | ArtifactType::Slides => {
            let current = artifact
                .content_json
                .map(|v| v.to_string())
                .unwrap_or_else(|| "{}".to_owned());
            let system = "You revise structured course material. Apply the instruction to the \
                          current JSON content and return the full revised JSON object with the \
                          same schema. Reply with JSON only.";
            let user = format!(
                "{}\n\nInstruction: {instruction}\n\nCurrent content:\n{current}",
                context_block(project, &context)
            );
            let completion = provider
                .complete(&CompletionRequest::single_turn(&job.ai_model, system, user))
                .await?;
            let revised = parse_json_object(&completion.text)
                .with_context(|| "revision response was not valid JSON")?;
            ArtifactUpdate::structured(artifact_type, revised)
        }
    };

    Ok(StepOutcome {
        output: Some(json!({ "instruction": instruction })),
        artifact_updates: vec![update],
        log: format!("Revised {artifact_type}: {instruction}"),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the shared prompt context from the project and upstream step
/// outputs.
fn context_block(project: &Project, context: &UpstreamContext) -> String {
    let mut block = format!("Project: {}\n\nBrief:\n{}", project.name, project.brief);

    if let Some(ref interpretation) = context.interpretation {
        block.push_str("\n\nInterpretation:\n");
        block.push_str(&interpretation.to_string());
    }

    if let Some(results) = context.search.as_ref().and_then(|s| s.get("results")) {
        if results.as_array().is_some_and(|r| !r.is_empty()) {
            block.push_str("\n\nResearch sources:\n");
            block.push_str(&results.to_string());
        }
    }

    block
}

/// Parse a model reply as a JSON object, tolerating Markdown code fences.
fn parse_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    let inner = if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the info string ("json") up to the first newline, and the
        // closing fence.
        let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
        rest.trim_end().trim_end_matches("```").trim()
    } else {
        trimmed
    };

    let value: Value = serde_json::from_str(inner).ok()?;
    value.is_object().then_some(value)
}

/// Validate that a step kind is executable; used by the worker before
/// spending an LLM call.
pub fn validate_step(step: &Step) -> Result<()> {
    if step.step_type.is_revision() && step.input.is_none() {
        bail!(
            "revision step {} ({}) has no input payload",
            step.id,
            step.step_type
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_json_object() {
        let parsed = parse_json_object(r#"{"summary": "plants"}"#).unwrap();
        assert_eq!(parsed["summary"], "plants");
    }

    #[test]
    fn parse_fenced_json_object() {
        let text = "```json\n{\"title\": \"Deck\", \"slides\": []}\n```";
        let parsed = parse_json_object(text).unwrap();
        assert_eq!(parsed["title"], "Deck");
    }

    #[test]
    fn parse_fence_without_info_string() {
        let text = "```\n{\"a\": 1}\n```";
        let parsed = parse_json_object(text).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(parse_json_object("[1, 2, 3]").is_none());
        assert!(parse_json_object("not json at all").is_none());
    }

    #[test]
    fn artifact_update_constructors() {
        let text = ArtifactUpdate::text(ArtifactType::Document, "# Lesson".to_owned());
        assert!(text.mark_completed);
        assert!(text.content_json.is_none());

        let assets = ArtifactUpdate::assets(ArtifactType::Slides, vec![json!({"kind": "image"})]);
        assert!(!assets.mark_completed);
        assert_eq!(assets.new_assets.len(), 1);
    }
}

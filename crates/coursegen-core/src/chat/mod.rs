//! Chat adapter: translates free-text user intent into either a
//! cancellation or a set of dynamically appended revision steps, then
//! resumes the worker loop.

use anyhow::{Context, Result, bail};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use coursegen_db::models::{ArtifactType, JobStatus, Step, StepKind};
use coursegen_db::queries::{jobs as job_db, queue, steps as step_db};

use crate::llm::{CompletionRequest, ProviderRegistry};
use crate::service;

/// Hard cap on the compressed instruction when the LLM call fails and the
/// raw message is used instead.
const FALLBACK_INSTRUCTION_CHARS: usize = 200;

/// Classified user intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatIntent {
    Cancel,
    Revise,
    Question,
}

impl ChatIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Revise => "revise",
            Self::Question => "question",
        }
    }
}

/// A chat request against a job.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    /// Explicit target artifact types from the caller; when empty, targets
    /// are inferred from the message text.
    pub targets: Vec<ArtifactType>,
}

/// What the chat adapter did.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub intent: ChatIntent,
    pub reply: String,
    /// Revision steps appended to the job (empty for cancel/question).
    pub appended_steps: Vec<Step>,
}

/// Classify free-text intent via keyword matching.
pub fn classify_intent(message: &str) -> ChatIntent {
    let lower = message.to_lowercase();

    const CANCEL_KEYWORDS: &[&str] = &["cancel", "abort", "stop generating", "never mind"];
    if CANCEL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return ChatIntent::Cancel;
    }

    const REVISE_KEYWORDS: &[&str] = &[
        "change", "revise", "update", "edit", "redo", "rewrite", "improve", "add ", "remove",
        "shorter", "longer", "simplify", "instead", "make it", "make the", "fix",
    ];
    if REVISE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return ChatIntent::Revise;
    }

    ChatIntent::Question
}

/// Infer the artifact types a revision targets.
///
/// Explicit targets from the request win; otherwise keywords in the message
/// decide, falling back to the document.
pub fn infer_targets(message: &str, explicit: &[ArtifactType]) -> Vec<ArtifactType> {
    if !explicit.is_empty() {
        let mut targets = explicit.to_vec();
        targets.sort_by_key(|t| ArtifactType::ALL.iter().position(|a| a == t));
        targets.dedup();
        return targets;
    }

    let lower = message.to_lowercase();
    let mut targets = Vec::new();

    if ["document", "lesson", "article", "text", "handout"]
        .iter()
        .any(|k| lower.contains(k))
    {
        targets.push(ArtifactType::Document);
    }
    if ["infographic", "poster", "graphic", "visual"]
        .iter()
        .any(|k| lower.contains(k))
    {
        targets.push(ArtifactType::Infographic);
    }
    if ["slide", "deck", "presentation"].iter().any(|k| lower.contains(k)) {
        targets.push(ArtifactType::Slides);
    }

    if targets.is_empty() {
        targets.push(ArtifactType::Document);
    }
    targets
}

/// Handle a chat message against a job.
pub async fn handle_chat(
    pool: &PgPool,
    registry: &ProviderRegistry,
    job_id: Uuid,
    request: &ChatRequest,
) -> Result<ChatOutcome> {
    let job = job_db::get_job(pool, job_id)
        .await?
        .with_context(|| format!("job {} not found", job_id))?;

    match classify_intent(&request.message) {
        ChatIntent::Cancel => {
            service::cancel_generation(pool, job_id).await?;
            Ok(ChatOutcome {
                intent: ChatIntent::Cancel,
                reply: "Generation cancelled. Pending steps will not run.".to_owned(),
                appended_steps: Vec::new(),
            })
        }
        ChatIntent::Revise => {
            if matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
                bail!(
                    "cannot revise job {}: status is {}; start a new generation instead",
                    job_id,
                    job.status
                );
            }

            let targets = infer_targets(&request.message, &request.targets);
            let instruction =
                compress_instruction(registry, &job.ai_model, &request.message).await;

            let appended =
                append_revision_steps(pool, job.project_id, job_id, &targets, &instruction)
                    .await?;

            let names: Vec<String> = targets.iter().map(ToString::to_string).collect();
            Ok(ChatOutcome {
                intent: ChatIntent::Revise,
                reply: format!("Revising {}: {}", names.join(", "), instruction),
                appended_steps: appended,
            })
        }
        ChatIntent::Question => {
            let reply = answer_question(pool, registry, &job, &request.message).await?;
            Ok(ChatOutcome {
                intent: ChatIntent::Question,
                reply,
                appended_steps: Vec::new(),
            })
        }
    }
}

/// Ask the LLM to compress the revision request to one line.
///
/// Falls back to the trimmed raw text on any provider error.
async fn compress_instruction(registry: &ProviderRegistry, model: &str, message: &str) -> String {
    let request = CompletionRequest::single_turn(
        model,
        "Compress the user's revision request into one short imperative sentence. Reply with \
         the sentence only.",
        message,
    );

    let completion = match registry.for_model(model) {
        Ok(provider) => provider.complete(&request).await,
        Err(e) => {
            tracing::warn!(error = %e, "no provider for instruction compression");
            return truncate_instruction(message);
        }
    };

    match completion {
        Ok(c) => {
            let line = c.text.lines().next().unwrap_or_default().trim().to_owned();
            if line.is_empty() {
                truncate_instruction(message)
            } else {
                line
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "instruction compression failed, using raw text");
            truncate_instruction(message)
        }
    }
}

fn truncate_instruction(message: &str) -> String {
    let trimmed = message.trim();
    match trimmed.char_indices().nth(FALLBACK_INSTRUCTION_CHARS) {
        Some((idx, _)) => trimmed[..idx].to_owned(),
        None => trimmed.to_owned(),
    }
}

/// Append one `revise_*` step per target inside a single transaction,
/// ensure the target artifact rows exist, flip the job and project back to
/// processing, and re-enqueue the worker.
async fn append_revision_steps(
    pool: &PgPool,
    project_id: Uuid,
    job_id: Uuid,
    targets: &[ArtifactType],
    instruction: &str,
) -> Result<Vec<Step>> {
    let mut next_index = step_db::next_order_index(pool, job_id).await?;
    let input = json!({ "instruction": instruction });

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let mut appended = Vec::with_capacity(targets.len());

    for target in targets {
        let kind = StepKind::revise_for(*target);
        let step = sqlx::query_as::<_, Step>(
            "INSERT INTO steps (job_id, step_type, title, order_index, input) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING *",
        )
        .bind(job_id)
        .bind(kind)
        .bind(format!("Revise {target}"))
        .bind(next_index)
        .bind(&input)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to append revision step for {target}"))?;
        appended.push(step);
        next_index += 1;

        // The revision may target an artifact the original run never
        // produced; the row must exist before the step writes to it.
        sqlx::query(
            "INSERT INTO artifacts (job_id, artifact_type) VALUES ($1, $2) \
             ON CONFLICT (job_id, artifact_type) DO NOTHING",
        )
        .bind(job_id)
        .bind(target)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to ensure artifact {target}"))?;
    }

    // Completed jobs resume; queued/processing jobs just gain steps.
    sqlx::query(
        "UPDATE jobs \
         SET status = 'processing', error = NULL, completed_at = NULL \
         WHERE id = $1 AND status IN ('queued', 'processing', 'completed')",
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await
    .context("failed to resume job")?;

    sqlx::query("UPDATE projects SET status = 'generating', updated_at = NOW() WHERE id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .context("failed to update project status")?;

    queue::enqueue_job(&mut *tx, job_id).await?;

    tx.commit().await.context("failed to commit transaction")?;

    tracing::info!(
        job_id = %job_id,
        steps = appended.len(),
        "revision steps appended"
    );

    Ok(appended)
}

/// Answer a question about the job from the interpret-step context; mutates
/// nothing.
async fn answer_question(
    pool: &PgPool,
    registry: &ProviderRegistry,
    job: &coursegen_db::models::Job,
    message: &str,
) -> Result<String> {
    let interpretation = step_db::latest_completed_output(pool, job.id, StepKind::Interpret)
        .await?
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(not interpreted yet)".to_owned());

    let provider = registry.for_model(&job.ai_model)?;
    let system = "You are assisting with a course-generation project. Answer the user's \
                  question briefly using the provided context.";
    let user = format!("Context:\n{interpretation}\n\nQuestion: {message}");

    let completion = provider
        .complete(&CompletionRequest::single_turn(&job.ai_model, system, user))
        .await?;

    Ok(completion.text.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_keywords_classify_as_cancel() {
        assert_eq!(classify_intent("Please cancel this run"), ChatIntent::Cancel);
        assert_eq!(classify_intent("ABORT!"), ChatIntent::Cancel);
        assert_eq!(classify_intent("never mind, stop generating"), ChatIntent::Cancel);
    }

    #[test]
    fn revise_keywords_classify_as_revise() {
        assert_eq!(
            classify_intent("Make the slides shorter"),
            ChatIntent::Revise
        );
        assert_eq!(classify_intent("add a section on ferns"), ChatIntent::Revise);
        assert_eq!(
            classify_intent("Rewrite the intro for teens"),
            ChatIntent::Revise
        );
    }

    #[test]
    fn everything_else_is_a_question() {
        assert_eq!(
            classify_intent("How many slides will there be?"),
            ChatIntent::Question
        );
        assert_eq!(classify_intent("what is this about"), ChatIntent::Question);
    }

    #[test]
    fn explicit_targets_win_over_keywords() {
        let targets = infer_targets("make the slides shorter", &[ArtifactType::Document]);
        assert_eq!(targets, vec![ArtifactType::Document]);
    }

    #[test]
    fn explicit_targets_are_deduped_and_ordered() {
        let targets = infer_targets(
            "whatever",
            &[
                ArtifactType::Slides,
                ArtifactType::Document,
                ArtifactType::Slides,
            ],
        );
        assert_eq!(targets, vec![ArtifactType::Document, ArtifactType::Slides]);
    }

    #[test]
    fn keyword_target_detection() {
        assert_eq!(
            infer_targets("make the deck punchier", &[]),
            vec![ArtifactType::Slides]
        );
        assert_eq!(
            infer_targets("update the poster colours", &[]),
            vec![ArtifactType::Infographic]
        );
        assert_eq!(
            infer_targets("revise the lesson and the slides", &[]),
            vec![ArtifactType::Document, ArtifactType::Slides]
        );
    }

    #[test]
    fn target_inference_falls_back_to_document() {
        assert_eq!(
            infer_targets("make it more fun", &[]),
            vec![ArtifactType::Document]
        );
    }

    #[test]
    fn truncate_instruction_caps_length() {
        let long = "x".repeat(500);
        let truncated = truncate_instruction(&long);
        assert_eq!(truncated.chars().count(), FALLBACK_INSTRUCTION_CHARS);

        assert_eq!(truncate_instruction("  short  "), "short");
    }

    #[test]
    fn intent_as_str() {
        assert_eq!(ChatIntent::Cancel.as_str(), "cancel");
        assert_eq!(ChatIntent::Revise.as_str(), "revise");
        assert_eq!(ChatIntent::Question.as_str(), "question");
    }
}

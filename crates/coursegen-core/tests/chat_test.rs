//! Integration tests for the chat adapter: cancellation, revision resume,
//! and question answering against a real database.

use async_trait::async_trait;
use uuid::Uuid;

use coursegen_core::chat::{self, ChatIntent, ChatRequest};
use coursegen_core::llm::{
    Completion, CompletionRequest, GeneratedImage, ImageRequest, LlmError, LlmProvider,
    ProviderRegistry,
};
use coursegen_core::service::{self, StartGenerationRequest};
use coursegen_core::worker::{self, TickOutcome, WorkerEnv};
use coursegen_db::models::{
    ArtifactType, GenerationOptions, JobStatus, ProjectStatus, RequestedOutputs, StepKind,
    StepStatus,
};
use coursegen_db::queries::{artifacts, jobs, projects, queue, steps};
use coursegen_test_utils::{create_test_db, drop_test_db};

/// Provider returning canned content keyed off the system prompt.
struct ScriptedProvider;

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let text = if request.system.contains("curriculum designer") {
            r#"{"summary": "a beginner botany course", "audience": "adults", "tone": "friendly",
                "objectives": ["identify common plants"], "search_query": "botany basics"}"#
                .to_owned()
        } else if request.system.contains("Compress") {
            "Shorten the lesson document".to_owned()
        } else if request.system.contains("Answer the user's question") {
            "The course covers beginner botany.".to_owned()
        } else if request.system.contains("You revise course material") {
            "# Botany 101 (revised)\n\nShorter now.".to_owned()
        } else if request.system.contains("slide deck") {
            r#"{"title": "Botany 101", "slides": [{"heading": "Roots", "bullets": [], "speaker_notes": ""}]}"#
                .to_owned()
        } else {
            "# Botany 101\n\nA lesson about plants.".to_owned()
        };
        Ok(Completion { text })
    }

    async fn generate_image(&self, _request: &ImageRequest) -> Result<GeneratedImage, LlmError> {
        Ok(GeneratedImage {
            url: Some("https://images.test/asset.png".to_owned()),
            b64_data: None,
        })
    }
}

/// Provider whose completions always fail; used to exercise the
/// compression fallback.
struct FailingProvider;

#[async_trait]
impl LlmProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
        Err(LlmError::Network("connection refused".to_owned()))
    }
}

fn scripted_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(ScriptedProvider);
    registry
}

fn scripted_env() -> WorkerEnv {
    WorkerEnv {
        registry: std::sync::Arc::new(scripted_registry()),
        search: None,
    }
}

async fn seed_completed_job(pool: &sqlx::PgPool) -> (Uuid, Uuid) {
    let project = projects::insert_project(pool, "Botany 101", "Plants for beginners")
        .await
        .unwrap();
    let job = service::start_generation(
        pool,
        &StartGenerationRequest {
            project_id: project.id,
            user_id: Uuid::new_v4(),
            ai_model: "scripted-model".to_owned(),
            outputs: RequestedOutputs {
                document: true,
                ..Default::default()
            },
            options: GenerationOptions::default(),
        },
    )
    .await
    .unwrap();

    let env = scripted_env();
    for _ in 0..8 {
        if worker::run_worker_tick(pool, &env).await.unwrap() == TickOutcome::Idle {
            break;
        }
    }

    let finished = jobs::get_job(pool, job.id).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    (project.id, job.id)
}

#[tokio::test]
async fn revise_appends_steps_and_resumes_the_job() {
    let (pool, db_name) = create_test_db().await;
    let registry = scripted_registry();

    let (project_id, job_id) = seed_completed_job(&pool).await;

    let outcome = chat::handle_chat(
        &pool,
        &registry,
        job_id,
        &ChatRequest {
            message: "Please make the lesson document shorter".to_owned(),
            targets: Vec::new(),
        },
    )
    .await
    .expect("chat should succeed");

    assert_eq!(outcome.intent, ChatIntent::Revise);
    assert_eq!(outcome.appended_steps.len(), 1);
    let appended = &outcome.appended_steps[0];
    assert_eq!(appended.step_type, StepKind::ReviseDocument);
    assert_eq!(
        appended.input.as_ref().unwrap()["instruction"],
        "Shorten the lesson document"
    );
    // Appended after the original two steps (interpret, generate_document).
    assert_eq!(appended.order_index, 2);

    // Job and project flipped back, worker re-enqueued.
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.completed_at.is_none());
    let project = projects::get_project(&pool, project_id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Generating);
    assert_eq!(queue::queue_depth(&pool).await.unwrap(), 1);

    // Drive the revision to completion.
    let env = scripted_env();
    loop {
        if worker::run_worker_tick(&pool, &env).await.unwrap() == TickOutcome::Idle {
            break;
        }
    }

    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let document = artifacts::get_artifact(&pool, job_id, ArtifactType::Document)
        .await
        .unwrap()
        .unwrap();
    assert!(document.content_text.as_deref().unwrap().contains("revised"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn revise_targets_new_artifact_creates_draft_row() {
    let (pool, db_name) = create_test_db().await;
    let registry = scripted_registry();

    // Job only produced a document; the revision targets slides.
    let (_, job_id) = seed_completed_job(&pool).await;
    assert!(
        artifacts::get_artifact(&pool, job_id, ArtifactType::Slides)
            .await
            .unwrap()
            .is_none()
    );

    let outcome = chat::handle_chat(
        &pool,
        &registry,
        job_id,
        &ChatRequest {
            message: "whatever you think".to_owned(),
            targets: vec![ArtifactType::Slides],
        },
    )
    .await
    .unwrap();

    // "whatever you think" has no revise keyword, but explicit targets only
    // matter for revise -- the message classifies as a question, so force
    // the revise path with a revision phrase.
    assert_eq!(outcome.intent, ChatIntent::Question);

    let outcome = chat::handle_chat(
        &pool,
        &registry,
        job_id,
        &ChatRequest {
            message: "redo this as a deck".to_owned(),
            targets: vec![ArtifactType::Slides],
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.intent, ChatIntent::Revise);
    assert_eq!(outcome.appended_steps[0].step_type, StepKind::ReviseSlides);

    // The draft row now exists ahead of the revise step running.
    let slides = artifacts::get_artifact(&pool, job_id, ArtifactType::Slides)
        .await
        .unwrap()
        .expect("draft slides artifact should exist");
    assert!(slides.content_json.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_intent_cancels_job_and_pending_steps() {
    let (pool, db_name) = create_test_db().await;
    let registry = scripted_registry();

    let project = projects::insert_project(&pool, "p", "b").await.unwrap();
    let job = service::start_generation(
        &pool,
        &StartGenerationRequest {
            project_id: project.id,
            user_id: Uuid::new_v4(),
            ai_model: "scripted-model".to_owned(),
            outputs: RequestedOutputs {
                document: true,
                slides: true,
                ..Default::default()
            },
            options: GenerationOptions::default(),
        },
    )
    .await
    .unwrap();

    let outcome = chat::handle_chat(
        &pool,
        &registry,
        job.id,
        &ChatRequest {
            message: "actually, cancel this".to_owned(),
            targets: Vec::new(),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.intent, ChatIntent::Cancel);
    assert!(outcome.appended_steps.is_empty());

    let cancelled = jobs::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let step_rows = steps::list_steps_for_job(&pool, job.id).await.unwrap();
    assert!(step_rows.iter().all(|s| s.status == StepStatus::Cancelled));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn question_intent_answers_without_mutation() {
    let (pool, db_name) = create_test_db().await;
    let registry = scripted_registry();

    let (_, job_id) = seed_completed_job(&pool).await;
    let steps_before = steps::list_steps_for_job(&pool, job_id).await.unwrap().len();

    let outcome = chat::handle_chat(
        &pool,
        &registry,
        job_id,
        &ChatRequest {
            message: "What does this course cover?".to_owned(),
            targets: Vec::new(),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.intent, ChatIntent::Question);
    assert_eq!(outcome.reply, "The course covers beginner botany.");
    assert!(outcome.appended_steps.is_empty());

    // No steps appended, job untouched, nothing enqueued.
    let steps_after = steps::list_steps_for_job(&pool, job_id).await.unwrap().len();
    assert_eq!(steps_before, steps_after);
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(queue::queue_depth(&pool).await.unwrap(), 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn revise_rejects_cancelled_jobs() {
    let (pool, db_name) = create_test_db().await;
    let registry = scripted_registry();

    let project = projects::insert_project(&pool, "p", "b").await.unwrap();
    let job = service::start_generation(
        &pool,
        &StartGenerationRequest {
            project_id: project.id,
            user_id: Uuid::new_v4(),
            ai_model: "scripted-model".to_owned(),
            outputs: RequestedOutputs {
                document: true,
                ..Default::default()
            },
            options: GenerationOptions::default(),
        },
    )
    .await
    .unwrap();
    service::cancel_generation(&pool, job.id).await.unwrap();

    let result = chat::handle_chat(
        &pool,
        &registry,
        job.id,
        &ChatRequest {
            message: "change the intro".to_owned(),
            targets: Vec::new(),
        },
    )
    .await;

    assert!(result.is_err(), "revising a cancelled job should error");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn compression_failure_falls_back_to_raw_text() {
    let (pool, db_name) = create_test_db().await;

    // Text completions fail, so compression must fall back; the revision is
    // still appended with the raw message as the instruction.
    let mut registry = ProviderRegistry::new();
    registry.register(FailingProvider);

    let (_, job_id) = seed_completed_job(&pool).await;

    let outcome = chat::handle_chat(
        &pool,
        &registry,
        job_id,
        &ChatRequest {
            message: "change the tone of the document".to_owned(),
            targets: Vec::new(),
        },
    )
    .await
    .expect("revision should survive a compression failure");

    assert_eq!(outcome.intent, ChatIntent::Revise);
    assert_eq!(
        outcome.appended_steps[0].input.as_ref().unwrap()["instruction"],
        "change the tone of the document"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

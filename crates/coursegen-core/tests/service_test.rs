//! Integration tests for the generation service layer.

use uuid::Uuid;

use coursegen_core::service::{self, StartGenerationRequest};
use coursegen_db::models::{
    ArtifactStatus, ArtifactType, GenerationOptions, JobStatus, ProjectStatus, RequestedOutputs,
    StepKind, StepStatus,
};
use coursegen_db::queries::{artifacts, jobs, projects, queue, steps};
use coursegen_test_utils::{create_test_db, drop_test_db};

fn request(project_id: Uuid, outputs: RequestedOutputs, options: GenerationOptions) -> StartGenerationRequest {
    StartGenerationRequest {
        project_id,
        user_id: Uuid::new_v4(),
        ai_model: "claude-sonnet-4-5".to_owned(),
        outputs,
        options,
    }
}

#[tokio::test]
async fn start_generation_creates_job_steps_and_artifacts() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "Botany 101", "Plants for beginners")
        .await
        .unwrap();

    let job = service::start_generation(
        &pool,
        &request(
            project.id,
            RequestedOutputs {
                document: true,
                slides: true,
                ..Default::default()
            },
            GenerationOptions {
                enable_web_search: true,
                enable_image_generation: true,
            },
        ),
    )
    .await
    .expect("start_generation should succeed");

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.current_step_index, 0);

    // Steps mirror the planner's ordering exactly.
    let step_rows = steps::list_steps_for_job(&pool, job.id).await.unwrap();
    let kinds: Vec<StepKind> = step_rows.iter().map(|s| s.step_type).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::Interpret,
            StepKind::WebSearch,
            StepKind::GenerateDocument,
            StepKind::GenerateSlides,
            StepKind::DesignAssets,
        ]
    );
    for (index, step) in step_rows.iter().enumerate() {
        assert_eq!(step.order_index, index as i32);
        assert_eq!(step.status, StepStatus::Pending);
    }

    // Draft artifact rows exist before any step runs.
    let artifact_rows = artifacts::list_artifacts_for_job(&pool, job.id).await.unwrap();
    let types: Vec<ArtifactType> = artifact_rows.iter().map(|a| a.artifact_type).collect();
    assert_eq!(types, vec![ArtifactType::Document, ArtifactType::Slides]);
    assert!(artifact_rows.iter().all(|a| a.status == ArtifactStatus::Draft));

    // The project flipped to generating and the worker has a message.
    let updated = projects::get_project(&pool, project.id).await.unwrap().unwrap();
    assert_eq!(updated.status, ProjectStatus::Generating);
    assert_eq!(queue::queue_depth(&pool).await.unwrap(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn start_generation_requires_an_output() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "p", "b").await.unwrap();
    let result = service::start_generation(
        &pool,
        &request(
            project.id,
            RequestedOutputs::default(),
            GenerationOptions::default(),
        ),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(queue::queue_depth(&pool).await.unwrap(), 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn start_generation_unknown_project_fails() {
    let (pool, db_name) = create_test_db().await;

    let result = service::start_generation(
        &pool,
        &request(
            Uuid::new_v4(),
            RequestedOutputs {
                document: true,
                ..Default::default()
            },
            GenerationOptions::default(),
        ),
    )
    .await;

    assert!(result.is_err());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_generation_marks_job_steps_and_project() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "p", "b").await.unwrap();
    let job = service::start_generation(
        &pool,
        &request(
            project.id,
            RequestedOutputs {
                document: true,
                infographic: true,
                ..Default::default()
            },
            GenerationOptions::default(),
        ),
    )
    .await
    .unwrap();

    let cancelled = service::cancel_generation(&pool, job.id)
        .await
        .expect("cancel should succeed");
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    let step_rows = steps::list_steps_for_job(&pool, job.id).await.unwrap();
    assert!(
        step_rows.iter().all(|s| s.status == StepStatus::Cancelled),
        "all pending steps should be cancelled"
    );

    let updated = projects::get_project(&pool, project.id).await.unwrap().unwrap();
    assert_eq!(updated.status, ProjectStatus::Cancelled);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_generation_rejects_terminal_jobs() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "p", "b").await.unwrap();
    let job = service::start_generation(
        &pool,
        &request(
            project.id,
            RequestedOutputs {
                document: true,
                ..Default::default()
            },
            GenerationOptions::default(),
        ),
    )
    .await
    .unwrap();

    jobs::fail_job(&pool, job.id, "boom").await.unwrap();

    let result = service::cancel_generation(&pool, job.id).await;
    assert!(result.is_err(), "cancelling a failed job should error");

    pool.close().await;
    drop_test_db(&db_name).await;
}

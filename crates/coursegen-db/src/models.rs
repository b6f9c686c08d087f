use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Generating,
    Ready,
    Failed,
    Cancelled,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectStatus {
    type Err = ProjectStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "generating" => Ok(Self::Generating),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ProjectStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProjectStatus`] string.
#[derive(Debug, Clone)]
pub struct ProjectStatusParseError(pub String);

impl fmt::Display for ProjectStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid project status: {:?}", self.0)
    }
}

impl std::error::Error for ProjectStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal. Cancellation is reachable from any
    /// non-terminal status; completed/failed/cancelled jobs never move again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = JobStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(JobStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`JobStatus`] string.
#[derive(Debug, Clone)]
pub struct JobStatusParseError(pub String);

impl fmt::Display for JobStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid job status: {:?}", self.0)
    }
}

impl std::error::Error for JobStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for StepStatus {
    type Err = StepStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StepStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StepStatus`] string.
#[derive(Debug, Clone)]
pub struct StepStatusParseError(pub String);

impl fmt::Display for StepStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step status: {:?}", self.0)
    }
}

impl std::error::Error for StepStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of pipeline step.
///
/// The planner emits these in a fixed order; the chat adapter appends the
/// `Revise*` kinds after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Interpret,
    WebSearch,
    GenerateDocument,
    GenerateInfographic,
    GenerateSlides,
    DesignAssets,
    ReviseDocument,
    ReviseInfographic,
    ReviseSlides,
}

impl StepKind {
    /// The artifact this step writes to, if any.
    pub fn artifact_target(self) -> Option<ArtifactType> {
        match self {
            Self::GenerateDocument | Self::ReviseDocument => Some(ArtifactType::Document),
            Self::GenerateInfographic | Self::ReviseInfographic => Some(ArtifactType::Infographic),
            Self::GenerateSlides | Self::ReviseSlides => Some(ArtifactType::Slides),
            Self::Interpret | Self::WebSearch | Self::DesignAssets => None,
        }
    }

    /// The generation step for an artifact type.
    pub fn generate_for(artifact_type: ArtifactType) -> Self {
        match artifact_type {
            ArtifactType::Document => Self::GenerateDocument,
            ArtifactType::Infographic => Self::GenerateInfographic,
            ArtifactType::Slides => Self::GenerateSlides,
        }
    }

    /// The revision step for an artifact type.
    pub fn revise_for(artifact_type: ArtifactType) -> Self {
        match artifact_type {
            ArtifactType::Document => Self::ReviseDocument,
            ArtifactType::Infographic => Self::ReviseInfographic,
            ArtifactType::Slides => Self::ReviseSlides,
        }
    }

    /// Whether this is a chat-appended revision step.
    pub fn is_revision(self) -> bool {
        matches!(
            self,
            Self::ReviseDocument | Self::ReviseInfographic | Self::ReviseSlides
        )
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Interpret => "interpret",
            Self::WebSearch => "web_search",
            Self::GenerateDocument => "generate_document",
            Self::GenerateInfographic => "generate_infographic",
            Self::GenerateSlides => "generate_slides",
            Self::DesignAssets => "design_assets",
            Self::ReviseDocument => "revise_document",
            Self::ReviseInfographic => "revise_infographic",
            Self::ReviseSlides => "revise_slides",
        };
        f.write_str(s)
    }
}

impl FromStr for StepKind {
    type Err = StepKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interpret" => Ok(Self::Interpret),
            "web_search" => Ok(Self::WebSearch),
            "generate_document" => Ok(Self::GenerateDocument),
            "generate_infographic" => Ok(Self::GenerateInfographic),
            "generate_slides" => Ok(Self::GenerateSlides),
            "design_assets" => Ok(Self::DesignAssets),
            "revise_document" => Ok(Self::ReviseDocument),
            "revise_infographic" => Ok(Self::ReviseInfographic),
            "revise_slides" => Ok(Self::ReviseSlides),
            other => Err(StepKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StepKind`] string.
#[derive(Debug, Clone)]
pub struct StepKindParseError(pub String);

impl fmt::Display for StepKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step kind: {:?}", self.0)
    }
}

impl std::error::Error for StepKindParseError {}

// ---------------------------------------------------------------------------

/// Type of generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Document,
    Infographic,
    Slides,
}

impl ArtifactType {
    /// All artifact types in canonical generation order.
    pub const ALL: [ArtifactType; 3] = [Self::Document, Self::Infographic, Self::Slides];
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Document => "document",
            Self::Infographic => "infographic",
            Self::Slides => "slides",
        };
        f.write_str(s)
    }
}

impl FromStr for ArtifactType {
    type Err = ArtifactTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Self::Document),
            "infographic" => Ok(Self::Infographic),
            "slides" => Ok(Self::Slides),
            other => Err(ArtifactTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ArtifactType`] string.
#[derive(Debug, Clone)]
pub struct ArtifactTypeParseError(pub String);

impl fmt::Display for ArtifactTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid artifact type: {:?}", self.0)
    }
}

impl std::error::Error for ArtifactTypeParseError {}

// ---------------------------------------------------------------------------

/// Status of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Draft,
    Completed,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for ArtifactStatus {
    type Err = ArtifactStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "completed" => Ok(Self::Completed),
            other => Err(ArtifactStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ArtifactStatus`] string.
#[derive(Debug, Clone)]
pub struct ArtifactStatusParseError(pub String);

impl fmt::Display for ArtifactStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid artifact status: {:?}", self.0)
    }
}

impl std::error::Error for ArtifactStatusParseError {}

// ---------------------------------------------------------------------------
// JSONB payloads
// ---------------------------------------------------------------------------

/// Which output types a job was asked to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedOutputs {
    #[serde(default)]
    pub document: bool,
    #[serde(default)]
    pub infographic: bool,
    #[serde(default)]
    pub slides: bool,
}

impl RequestedOutputs {
    /// Whether at least one output type was requested.
    pub fn any(&self) -> bool {
        self.document || self.infographic || self.slides
    }

    /// Requested artifact types in canonical generation order.
    pub fn types(&self) -> Vec<ArtifactType> {
        let mut out = Vec::new();
        if self.document {
            out.push(ArtifactType::Document);
        }
        if self.infographic {
            out.push(ArtifactType::Infographic);
        }
        if self.slides {
            out.push(ArtifactType::Slides);
        }
        out
    }
}

/// Per-job generation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default)]
    pub enable_image_generation: bool,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A project -- the container a user generates content into.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub brief: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A generation job -- one run of the pipeline for a project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub ai_model: String,
    pub requested_outputs: Json<RequestedOutputs>,
    pub options: Json<GenerationOptions>,
    pub status: JobStatus,
    pub current_step_index: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single pipeline step within a job, ordered by `order_index`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Step {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_type: StepKind,
    pub title: String,
    pub status: StepStatus,
    pub order_index: i32,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub log: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A generated artifact. At most one row per (job, artifact_type).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub artifact_type: ArtifactType,
    pub status: ArtifactStatus,
    pub content_text: Option<String>,
    pub content_json: Option<serde_json::Value>,
    pub assets: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A queue message carrying a job ID between HTTP triggers and the worker.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueMessage {
    pub id: i64,
    pub job_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

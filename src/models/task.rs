use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::workflow::{Status, StatusCategory};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub creator_id: Uuid,
    pub assignee: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    /// Board column, derived from `status` on the way out.
    pub category: StatusCategory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for Task {
    fn entity_type() -> &'static str { "task" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    pub id: String,
    pub project_id: Option<String>,
    pub creator_id: String,
    pub assignee: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbTask> for Task {
    type Error = AppError;

    fn try_from(value: DbTask) -> Result<Self, Self::Error> {
        let status: Status = value.status.parse().map_err(AppError::internal)?;
        Ok(Task {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid task id: {err}")))?,
            project_id: value
                .project_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|err| AppError::internal(format!("invalid project id: {err}")))?,
            creator_id: Uuid::parse_str(&value.creator_id)
                .map_err(|err| AppError::internal(format!("invalid creator id: {err}")))?,
            assignee: value
                .assignee
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|err| AppError::internal(format!("invalid assignee id: {err}")))?,
            title: value.title,
            description: value.description,
            status,
            category: status.category(),
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

/// Status is absent on purpose: new tasks start in `draft` and move only
/// through the workflow engine.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Define launch checklist")]
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<Uuid>,
}

/// Updates never touch `status`; the transition endpoints are the only
/// writers of that field.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assignee: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionRequest {
    #[schema(example = "in_progress")]
    pub status: Status,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkTransitionRequest {
    pub task_ids: Vec<Uuid>,
    #[schema(example = "review")]
    pub status: Status,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionListResponse {
    pub current: Status,
    pub available: Vec<Status>,
}

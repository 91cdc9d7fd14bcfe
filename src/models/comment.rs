use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for Comment {
    fn entity_type() -> &'static str { "comment" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbComment {
    pub id: String,
    pub task_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbComment> for Comment {
    type Error = AppError;

    fn try_from(value: DbComment) -> Result<Self, Self::Error> {
        Ok(Comment {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid comment id: {err}")))?,
            task_id: Uuid::parse_str(&value.task_id)
                .map_err(|err| AppError::internal(format!("invalid task id: {err}")))?,
            author_id: Uuid::parse_str(&value.author_id)
                .map_err(|err| AppError::internal(format!("invalid author id: {err}")))?,
            body: value.body,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentCreateRequest {
    #[schema(example = "Blocked on the design review.")]
    pub body: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentUpdateRequest {
    pub body: String,
}

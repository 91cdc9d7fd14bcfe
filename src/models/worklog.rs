use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Worklog {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub minutes: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for Worklog {
    fn entity_type() -> &'static str { "worklog" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbWorklog {
    pub id: String,
    pub task_id: String,
    pub author_id: String,
    pub minutes: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbWorklog> for Worklog {
    type Error = AppError;

    fn try_from(value: DbWorklog) -> Result<Self, Self::Error> {
        Ok(Worklog {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid worklog id: {err}")))?,
            task_id: Uuid::parse_str(&value.task_id)
                .map_err(|err| AppError::internal(format!("invalid task id: {err}")))?,
            author_id: Uuid::parse_str(&value.author_id)
                .map_err(|err| AppError::internal(format!("invalid author id: {err}")))?,
            minutes: value.minutes,
            note: value.note,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WorklogCreateRequest {
    #[schema(example = 90)]
    pub minutes: i64,
    #[schema(example = "Paired on the migration script")]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WorklogUpdateRequest {
    pub minutes: Option<i64>,
    pub note: Option<String>,
}

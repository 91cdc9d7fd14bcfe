use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{ProjectRole, Visibility};
use crate::errors::AppError;
use crate::workflow::{TransitionTable, WorkflowKind};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub workflow: WorkflowKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for Project {
    fn entity_type() -> &'static str { "project" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProject {
    pub id: String,
    pub creator_id: String,
    pub name: String,
    pub description: Option<String>,
    pub visibility: String,
    pub workflow: String,
    pub scheme_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbProject> for Project {
    type Error = AppError;

    fn try_from(value: DbProject) -> Result<Self, Self::Error> {
        Ok(Project {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid project id: {err}")))?,
            creator_id: Uuid::parse_str(&value.creator_id)
                .map_err(|err| AppError::internal(format!("invalid creator id: {err}")))?,
            name: value.name,
            description: value.description,
            visibility: value.visibility.parse().map_err(AppError::internal)?,
            workflow: value.workflow.parse().map_err(AppError::internal)?,
            scheme_id: value
                .scheme_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|err| AppError::internal(format!("invalid scheme id: {err}")))?,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Launch Planning")]
    pub name: String,
    #[schema(example = "Prepare milestones for the product launch.")]
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
    pub workflow: Option<WorkflowKind>,
    /// Transition table for `custom` workflows; ignored for built-in kinds.
    #[schema(value_type = Object)]
    pub workflow_transitions: Option<TransitionTable>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
    pub workflow: Option<WorkflowKind>,
    #[schema(value_type = Object)]
    pub workflow_transitions: Option<TransitionTable>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectMember {
    pub user_id: Uuid,
    pub role: ProjectRole,
    pub created_at: DateTime<Utc>,
}

impl crate::events::Loggable for ProjectMember {
    fn entity_type() -> &'static str { "membership" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> crate::events::Severity { crate::events::Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberAddRequest {
    pub user_id: Uuid,
    #[schema(example = "contributor")]
    pub role: ProjectRole,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberRoleRequest {
    #[schema(example = "lead")]
    pub role: ProjectRole,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{GlobalRole, Permission, ProjectRole};
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionScheme {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for PermissionScheme {
    fn entity_type() -> &'static str { "scheme" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> crate::events::Severity { crate::events::Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPermissionScheme {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbPermissionScheme> for PermissionScheme {
    type Error = AppError;

    fn try_from(value: DbPermissionScheme) -> Result<Self, Self::Error> {
        Ok(PermissionScheme {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid scheme id: {err}")))?,
            name: value.name,
            description: value.description,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// One grant: a permission bound to a project role or a global role (exactly
/// one of the two).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchemeGrant {
    pub id: Uuid,
    pub scheme_id: Uuid,
    pub permission: Permission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_role: Option<ProjectRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_role: Option<GlobalRole>,
    pub created_at: DateTime<Utc>,
}

impl crate::events::Loggable for SchemeGrant {
    fn entity_type() -> &'static str { "scheme_grant" }
    fn subject_id(&self) -> Uuid { self.scheme_id }
    fn severity(&self) -> crate::events::Severity { crate::events::Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SchemeCreateRequest {
    #[schema(example = "Locked-down delivery")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantCreateRequest {
    #[schema(example = "transition_issues")]
    pub permission: Permission,
    pub project_role: Option<ProjectRole>,
    pub global_role: Option<GlobalRole>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignSchemeRequest {
    /// `null` detaches the scheme and returns the project to the default
    /// role table.
    pub scheme_id: Option<Uuid>,
}

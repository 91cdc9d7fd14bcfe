use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{Department, GlobalRole};
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub global_role: GlobalRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
    pub protected: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for User {
    fn entity_type() -> &'static str { "user" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity_for_action(&self, action: &str) -> crate::events::Severity {
        match action {
            // role and account-state changes are audit material
            "role_changed" | "deactivated" | "deleted" => crate::events::Severity::Critical,
            _ => crate::events::Severity::Important,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub global_role: String,
    pub department: Option<String>,
    pub protected: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(value: DbUser) -> Result<Self, Self::Error> {
        Ok(User {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid user id: {err}")))?,
            name: value.name,
            email: value.email,
            global_role: value
                .global_role
                .parse()
                .map_err(AppError::internal)?,
            department: value
                .department
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(AppError::internal)?,
            protected: value.protected,
            active: value.active,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleChangeRequest {
    #[schema(example = "operator")]
    pub role: GlobalRole,
}

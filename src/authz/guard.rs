//! Request-scoped authorization adapters.
//!
//! The boundary between the HTTP layer and the decision engines: handlers pass
//! the acting user and the target resource in, and get an `AppError` out when
//! the check fails. Denials become 403 here; protected-account violations are
//! a distinct error so they can be told apart downstream.

use uuid::Uuid;

use crate::errors::{AppError, AppResult};

use super::authority::AuthorityError;
use super::catalog::{Permission, ProjectRole};
use super::directory::Directory;
use super::resolver::PermissionResolver;

/// Require a single project permission.
pub async fn require_permission(
    resolver: &PermissionResolver,
    user_id: Uuid,
    project_id: Uuid,
    permission: Permission,
) -> AppResult<()> {
    if resolver.resolve(user_id, project_id, permission).await {
        return Ok(());
    }

    tracing::debug!(
        target: "worklane::authz",
        user_id = %user_id,
        project_id = %project_id,
        permission = %permission,
        "request denied"
    );
    Err(AppError::forbidden(format!(
        "insufficient permissions: {permission}"
    )))
}

/// Require edit/delete rights on an owned record, trying the "own" variant
/// before the "all" variant.
#[allow(clippy::too_many_arguments)]
pub async fn require_edit_record(
    resolver: &PermissionResolver,
    user_id: Uuid,
    record_owner: Uuid,
    record_assignee: Option<Uuid>,
    project_id: Option<Uuid>,
    own_permission: Permission,
    all_permission: Permission,
) -> AppResult<()> {
    let allowed = resolver
        .can_edit_record(
            user_id,
            record_owner,
            record_assignee,
            project_id,
            own_permission,
            all_permission,
        )
        .await;

    if allowed {
        return Ok(());
    }

    Err(AppError::forbidden(format!(
        "insufficient permissions: {all_permission}"
    )))
}

/// Require a project role at or above the given floor.
pub async fn require_project_role_at_least(
    resolver: &PermissionResolver,
    user_id: Uuid,
    project_id: Uuid,
    minimum: ProjectRole,
) -> AppResult<()> {
    if resolver
        .has_project_role_at_least(user_id, project_id, minimum)
        .await
    {
        return Ok(());
    }

    Err(AppError::forbidden(format!(
        "requires project role {minimum} or above"
    )))
}

/// Require one of the system-administration global roles. Used for permission
/// scheme management, which is never project-scoped.
pub async fn require_system_admin(directory: &dyn Directory, user_id: Uuid) -> AppResult<()> {
    match directory.user(user_id).await {
        Ok(Some(user)) if user.active && user.global_role.is_system_admin() => Ok(()),
        Ok(_) => Err(AppError::forbidden(
            "requires a system administration role",
        )),
        Err(err) => {
            // fail closed on lookup trouble
            tracing::warn!(target: "worklane::authz", user_id = %user_id, error = %err, "system admin lookup failed");
            Err(AppError::forbidden(
                "requires a system administration role",
            ))
        }
    }
}

/// Map a role-authority failure onto the HTTP error space.
pub fn authority_error(err: AuthorityError) -> AppError {
    match err {
        AuthorityError::ProtectedAccount => {
            AppError::protected_account("protected accounts cannot be modified")
        }
        AuthorityError::UnknownUser(id) => AppError::not_found(format!("user {id} not found")),
        AuthorityError::Denied => AppError::forbidden("not authorized to perform this role change"),
        AuthorityError::Storage(message) => AppError::internal(message),
    }
}

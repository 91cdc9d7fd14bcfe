//! System administration: global roles, account lifecycle, and permission
//! schemes. Scheme changes take effect on the very next resolver call for any
//! project the scheme is assigned to.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guard::{authority_error, require_system_admin};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::scheme::{
    AssignSchemeRequest, DbPermissionScheme, GrantCreateRequest, PermissionScheme, SchemeCreateRequest,
    SchemeGrant,
};
use crate::models::user::{RoleChangeRequest, User};
use crate::utils::utc_now;

// =============================================================================
// ACCOUNT ADMINISTRATION
// =============================================================================

#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Target user id")),
    request_body = RoleChangeRequest,
    responses(
        (status = 200, description = "Role changed", body = User),
        (status = 403, description = "Not authorized, or target is protected")
    )
)]
pub async fn change_global_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<RoleChangeRequest>,
) -> AppResult<Json<User>> {
    let before: User = super::auth::fetch_user_by_id(&state.pool, id).await?.try_into()?;

    state
        .authority
        .change_role(auth.user_id, id, payload.role)
        .await
        .map_err(authority_error)?;

    let user: User = super::auth::fetch_user_by_id(&state.pool, id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "role_changed",
        Some(auth.user_id),
        &user,
        Some(&before),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/deactivate",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Target user id")),
    responses(
        (status = 200, description = "User deactivated", body = User),
        (status = 403, description = "Not authorized, or target is protected")
    )
)]
pub async fn deactivate_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<Json<User>> {
    state
        .authority
        .check_deactivate_user(auth.user_id, id)
        .await
        .map_err(authority_error)?;

    sqlx::query("UPDATE users SET active = 0, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let user: User = super::auth::fetch_user_by_id(&state.pool, id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "deactivated",
        Some(auth.user_id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Target user id")),
    responses(
        (status = 204, description = "User removed"),
        (status = 403, description = "Not authorized, or target is protected")
    )
)]
pub async fn remove_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    state
        .authority
        .check_remove_user(auth.user_id, id)
        .await
        .map_err(authority_error)?;

    let user: User = super::auth::fetch_user_by_id(&state.pool, id).await?.try_into()?;

    sqlx::query("UPDATE users SET deleted_at = ?, active = 0, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION SCHEMES
// =============================================================================

#[utoipa::path(
    get,
    path = "/admin/schemes",
    tag = "Admin",
    responses((status = 200, description = "All permission schemes", body = [PermissionScheme]))
)]
pub async fn list_schemes(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<PermissionScheme>>> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;

    let rows = sqlx::query_as::<_, DbPermissionScheme>(
        "SELECT id, name, description, created_at, updated_at FROM permission_schemes ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let schemes: Vec<PermissionScheme> = rows
        .into_iter()
        .map(PermissionScheme::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(schemes))
}

#[utoipa::path(
    post,
    path = "/admin/schemes",
    tag = "Admin",
    request_body = SchemeCreateRequest,
    responses((status = 201, description = "Scheme created", body = PermissionScheme))
)]
pub async fn create_scheme(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<SchemeCreateRequest>,
) -> AppResult<(StatusCode, Json<PermissionScheme>)> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO permission_schemes (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let scheme = PermissionScheme {
        id,
        name: payload.name,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &scheme,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(scheme)))
}

#[utoipa::path(
    get,
    path = "/admin/schemes/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Scheme id")),
    responses((status = 200, description = "Scheme detail", body = PermissionScheme))
)]
pub async fn get_scheme(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<PermissionScheme>> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;
    let scheme: PermissionScheme = fetch_scheme(&state.pool, id).await?.try_into()?;
    Ok(Json(scheme))
}

#[utoipa::path(
    delete,
    path = "/admin/schemes/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Scheme id")),
    responses(
        (status = 204, description = "Scheme deleted"),
        (status = 409, description = "Scheme still assigned to projects")
    )
)]
pub async fn delete_scheme(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;

    let scheme: PermissionScheme = fetch_scheme(&state.pool, id).await?.try_into()?;

    let in_use: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE scheme_id = ? AND deleted_at IS NULL)",
    )
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;

    if in_use {
        return Err(AppError::conflict("scheme is assigned to one or more projects"));
    }

    sqlx::query("DELETE FROM scheme_grants WHERE scheme_id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;
    sqlx::query("DELETE FROM permission_schemes WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &scheme,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/schemes/{id}/grants",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Scheme id")),
    responses((status = 200, description = "Grants in the scheme", body = [SchemeGrant]))
)]
pub async fn list_grants(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<Vec<SchemeGrant>>> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;
    fetch_scheme(&state.pool, id).await?;

    let rows = sqlx::query(
        "SELECT id, scheme_id, permission, project_role, global_role, created_at \
         FROM scheme_grants WHERE scheme_id = ? ORDER BY created_at",
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let mut grants = Vec::with_capacity(rows.len());
    for row in &rows {
        grants.push(grant_from_row(row)?);
    }

    Ok(Json(grants))
}

#[utoipa::path(
    post,
    path = "/admin/schemes/{id}/grants",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Scheme id")),
    request_body = GrantCreateRequest,
    responses(
        (status = 201, description = "Grant added", body = SchemeGrant),
        (status = 400, description = "Grant must bind exactly one role")
    )
)]
pub async fn create_grant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<GrantCreateRequest>,
) -> AppResult<(StatusCode, Json<SchemeGrant>)> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;
    fetch_scheme(&state.pool, id).await?;

    if payload.project_role.is_some() == payload.global_role.is_some() {
        return Err(AppError::bad_request(
            "a grant binds a permission to exactly one of project_role or global_role",
        ));
    }

    let grant_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO scheme_grants (id, scheme_id, permission, project_role, global_role, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(grant_id.to_string())
    .bind(id.to_string())
    .bind(payload.permission.as_str())
    .bind(payload.project_role.map(|r| r.as_str()))
    .bind(payload.global_role.map(|r| r.as_str()))
    .bind(now)
    .execute(&state.pool)
    .await?;

    let grant = SchemeGrant {
        id: grant_id,
        scheme_id: id,
        permission: payload.permission,
        project_role: payload.project_role,
        global_role: payload.global_role,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(grant)))
}

#[utoipa::path(
    delete,
    path = "/admin/schemes/{id}/grants/{grant_id}",
    tag = "Admin",
    params(
        ("id" = Uuid, Path, description = "Scheme id"),
        ("grant_id" = Uuid, Path, description = "Grant id")
    ),
    responses((status = 204, description = "Grant revoked"))
)]
pub async fn delete_grant(
    State(state): State<AppState>,
    Path((id, grant_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;

    let row = sqlx::query(
        "SELECT id, scheme_id, permission, project_role, global_role, created_at \
         FROM scheme_grants WHERE id = ? AND scheme_id = ?",
    )
    .bind(grant_id.to_string())
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("grant not found"))?;

    let grant = grant_from_row(&row)?;

    sqlx::query("DELETE FROM scheme_grants WHERE id = ?")
        .bind(grant_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/admin/projects/{id}/scheme",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = AssignSchemeRequest,
    responses((status = 200, description = "Scheme assignment updated"))
)]
pub async fn assign_scheme(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<AssignSchemeRequest>,
) -> AppResult<StatusCode> {
    require_system_admin(state.directory.as_ref(), auth.user_id).await?;

    // validate both ends before touching the row
    super::projects::fetch_project(&state.pool, id).await?;
    if let Some(scheme_id) = payload.scheme_id {
        fetch_scheme(&state.pool, scheme_id).await?;
    }

    sqlx::query("UPDATE projects SET scheme_id = ?, updated_at = ? WHERE id = ?")
        .bind(payload.scheme_id.map(|s| s.to_string()))
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    if let Some(scheme_id) = payload.scheme_id {
        let scheme: PermissionScheme = fetch_scheme(&state.pool, scheme_id).await?.try_into()?;
        log_activity_with_context(
            &state.event_bus,
            "assigned",
            Some(auth.user_id),
            &scheme,
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::OK)
}

async fn fetch_scheme(pool: &SqlitePool, id: Uuid) -> AppResult<DbPermissionScheme> {
    sqlx::query_as::<_, DbPermissionScheme>(
        "SELECT id, name, description, created_at, updated_at FROM permission_schemes WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("permission scheme not found"))
}

fn grant_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<SchemeGrant> {
    let id: String = row.get("id");
    let scheme_id: String = row.get("scheme_id");
    let permission: String = row.get("permission");
    let project_role: Option<String> = row.get("project_role");
    let global_role: Option<String> = row.get("global_role");

    Ok(SchemeGrant {
        id: Uuid::parse_str(&id).map_err(|err| AppError::internal(format!("invalid grant id: {err}")))?,
        scheme_id: Uuid::parse_str(&scheme_id)
            .map_err(|err| AppError::internal(format!("invalid scheme id: {err}")))?,
        permission: permission.parse().map_err(AppError::internal)?,
        project_role: project_role
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(AppError::internal)?,
        global_role: global_role
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(AppError::internal)?,
        created_at: row.get("created_at"),
    })
}

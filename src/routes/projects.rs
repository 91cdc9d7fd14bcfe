use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guard::require_permission;
use crate::authz::{Directory, Permission, Visibility};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::project::{
    DbProject, MemberAddRequest, MemberRoleRequest, Project, ProjectCreateRequest, ProjectMember,
    ProjectUpdateRequest,
};
use crate::utils::utc_now;
use crate::workflow::WorkflowKind;

const PROJECT_COLUMNS: &str =
    "id, creator_id, name, description, visibility, workflow, scheme_id, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    responses((status = 200, description = "Projects visible to the caller", body = [Project]))
)]
pub async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Project>>> {
    let caller = state
        .directory
        .user(auth.user_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::unauthorized("unknown user"))?;

    let rows = if caller.global_role.is_bypass() {
        sqlx::query_as::<_, DbProject>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE deleted_at IS NULL ORDER BY created_at DESC"
        ))
        .fetch_all(&state.pool)
        .await?
    } else {
        sqlx::query_as::<_, DbProject>(&format!(
            "SELECT DISTINCT p.{} FROM projects p \
             LEFT JOIN project_members m ON m.project_id = p.id AND m.user_id = ?1 \
             WHERE p.deleted_at IS NULL \
               AND (p.creator_id = ?1 OR m.user_id IS NOT NULL OR p.visibility = 'public') \
             ORDER BY p.created_at DESC",
            PROJECT_COLUMNS.replace(", ", ", p.")
        ))
        .bind(auth.user_id.to_string())
        .fetch_all(&state.pool)
        .await?
    };

    let projects: Vec<Project> = rows
        .into_iter()
        .map(Project::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(projects))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses((status = 201, description = "Project created", body = Project))
)]
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let project_id = Uuid::new_v4();
    let now = utc_now();
    let visibility = payload.visibility.unwrap_or(Visibility::Private);
    let workflow = payload.workflow.unwrap_or(WorkflowKind::Basic);

    let transitions_json = match (workflow, &payload.workflow_transitions) {
        (WorkflowKind::Custom, Some(table)) => Some(
            serde_json::to_string(table)
                .map_err(|err| AppError::bad_request(format!("invalid transition table: {err}")))?,
        ),
        (WorkflowKind::Custom, None) => {
            return Err(AppError::bad_request(
                "custom workflows require a transition table",
            ))
        }
        _ => None,
    };

    sqlx::query(
        "INSERT INTO projects (id, creator_id, name, description, visibility, workflow, workflow_transitions, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(project_id.to_string())
    .bind(auth.user_id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(visibility.as_str())
    .bind(workflow.as_str())
    .bind(&transitions_json)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let project: Project = fetch_project(&state.pool, project_id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &project,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project detail", body = Project))
)]
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<Project>> {
    require_permission(&state.resolver, auth.user_id, id, Permission::BrowseProject).await?;
    let project: Project = fetch_project(&state.pool, id).await?.try_into()?;
    Ok(Json(project))
}

#[utoipa::path(
    put,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses((status = 200, description = "Project updated", body = Project))
)]
pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    require_permission(&state.resolver, auth.user_id, id, Permission::EditProject).await?;

    let current = fetch_project(&state.pool, id).await?;
    let old: Project = current.clone().try_into()?;
    let now = utc_now();

    let name = payload.name.unwrap_or(current.name);
    let description = payload.description.or(current.description);
    let visibility = payload
        .visibility
        .map(|v| v.as_str().to_string())
        .unwrap_or(current.visibility);
    let workflow = payload
        .workflow
        .map(|w| w.as_str().to_string())
        .unwrap_or(current.workflow);

    // a new table only makes sense alongside a custom workflow; switching
    // kinds never revalidates task statuses already in flight
    let transitions_json = payload
        .workflow_transitions
        .map(|table| serde_json::to_string(&table))
        .transpose()
        .map_err(|err| AppError::bad_request(format!("invalid transition table: {err}")))?;

    match transitions_json {
        Some(json) => {
            sqlx::query(
                "UPDATE projects SET name = ?, description = ?, visibility = ?, workflow = ?, workflow_transitions = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&name)
            .bind(&description)
            .bind(&visibility)
            .bind(&workflow)
            .bind(&json)
            .bind(now)
            .bind(id.to_string())
            .execute(&state.pool)
            .await?;
        }
        None => {
            sqlx::query(
                "UPDATE projects SET name = ?, description = ?, visibility = ?, workflow = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&name)
            .bind(&description)
            .bind(&visibility)
            .bind(&workflow)
            .bind(now)
            .bind(id.to_string())
            .execute(&state.pool)
            .await?;
        }
    }

    let project: Project = fetch_project(&state.pool, id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &project,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 204, description = "Project soft deleted"))
)]
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_permission(&state.resolver, auth.user_id, id, Permission::AdministerProject).await?;

    let project: Project = fetch_project(&state.pool, id).await?.try_into()?;

    sqlx::query("UPDATE projects SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &project,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

#[utoipa::path(
    get,
    path = "/projects/{id}/members",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project members", body = [ProjectMember]))
)]
pub async fn list_members(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ProjectMember>>> {
    require_permission(&state.resolver, auth.user_id, id, Permission::BrowseProject).await?;

    let rows = sqlx::query_as::<_, (String, String, chrono::DateTime<chrono::Utc>)>(
        "SELECT user_id, role, created_at FROM project_members WHERE project_id = ? ORDER BY created_at",
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let mut members = Vec::with_capacity(rows.len());
    for (user_id, role, created_at) in rows {
        members.push(ProjectMember {
            user_id: Uuid::parse_str(&user_id)
                .map_err(|err| AppError::internal(format!("invalid member id: {err}")))?,
            role: role.parse().map_err(AppError::internal)?,
            created_at,
        });
    }

    Ok(Json(members))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/members",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = MemberAddRequest,
    responses(
        (status = 201, description = "Member added", body = ProjectMember),
        (status = 409, description = "Already a member")
    )
)]
pub async fn add_member(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<MemberAddRequest>,
) -> AppResult<(StatusCode, Json<ProjectMember>)> {
    require_permission(&state.resolver, auth.user_id, id, Permission::ManageMembers).await?;

    // the target must be a live account
    super::auth::fetch_user_by_id(&state.pool, payload.user_id).await?;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM project_members WHERE project_id = ? AND user_id = ?)",
    )
    .bind(id.to_string())
    .bind(payload.user_id.to_string())
    .fetch_one(&state.pool)
    .await?;

    if exists {
        return Err(AppError::conflict("user is already a member"));
    }

    let now = utc_now();
    sqlx::query("INSERT INTO project_members (project_id, user_id, role, created_at) VALUES (?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(payload.user_id.to_string())
        .bind(payload.role.as_str())
        .bind(now)
        .execute(&state.pool)
        .await?;

    let member = ProjectMember {
        user_id: payload.user_id,
        role: payload.role,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "added",
        Some(auth.user_id),
        &member,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(member)))
}

#[utoipa::path(
    put,
    path = "/projects/{id}/members/{user_id}",
    tag = "Projects",
    params(
        ("id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    request_body = MemberRoleRequest,
    responses((status = 200, description = "Member role updated", body = ProjectMember))
)]
pub async fn update_member_role(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<MemberRoleRequest>,
) -> AppResult<Json<ProjectMember>> {
    require_permission(&state.resolver, auth.user_id, id, Permission::ManageMembers).await?;

    let affected = sqlx::query(
        "UPDATE project_members SET role = ? WHERE project_id = ? AND user_id = ?",
    )
    .bind(payload.role.as_str())
    .bind(id.to_string())
    .bind(user_id.to_string())
    .execute(&state.pool)
    .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("membership not found"));
    }

    let member = ProjectMember {
        user_id,
        role: payload.role,
        created_at: utc_now(),
    };

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &member,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(member))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}/members/{user_id}",
    tag = "Projects",
    params(
        ("id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    responses((status = 204, description = "Member removed"))
)]
pub async fn remove_member(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_permission(&state.resolver, auth.user_id, id, Permission::ManageMembers).await?;

    let row = sqlx::query_as::<_, (String, chrono::DateTime<chrono::Utc>)>(
        "SELECT role, created_at FROM project_members WHERE project_id = ? AND user_id = ?",
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("membership not found"))?;

    sqlx::query("DELETE FROM project_members WHERE project_id = ? AND user_id = ?")
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&state.pool)
        .await?;

    let member = ProjectMember {
        user_id,
        role: row.0.parse().map_err(AppError::internal)?,
        created_at: row.1,
    };

    log_activity_with_context(
        &state.event_bus,
        "removed",
        Some(auth.user_id),
        &member,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn fetch_project(pool: &SqlitePool, id: Uuid) -> AppResult<DbProject> {
    sqlx::query_as::<_, DbProject>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("project not found"))
}

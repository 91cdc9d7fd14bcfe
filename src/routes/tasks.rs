use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guard::{require_edit_record, require_permission};
use crate::authz::Permission;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::task::{
    BulkTransitionRequest, DbTask, Task, TaskCreateRequest, TaskUpdateRequest, TransitionListResponse,
    TransitionRequest,
};
use crate::utils::utc_now;
use crate::workflow::{BulkTransitionOutcome, Status};

const TASK_COLUMNS: &str =
    "id, project_id, creator_id, assignee, title, description, status, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/projects/{project_id}/tasks",
    tag = "Tasks",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "List project tasks", body = [Task]))
)]
pub async fn list_project_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Task>>> {
    require_permission(&state.resolver, auth.user_id, project_id, Permission::BrowseProject).await?;

    let rows = sqlx::query_as::<_, DbTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ? AND deleted_at IS NULL ORDER BY created_at DESC"
    ))
    .bind(project_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let tasks: Vec<Task> = rows
        .into_iter()
        .map(Task::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(tasks))
}

#[utoipa::path(
    post,
    path = "/projects/{project_id}/tasks",
    tag = "Tasks",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body = TaskCreateRequest,
    responses((status = 201, description = "Task created", body = Task))
)]
pub async fn create_project_task(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    require_permission(&state.resolver, auth.user_id, project_id, Permission::CreateIssues).await?;

    if payload.assignee.is_some() {
        require_permission(&state.resolver, auth.user_id, project_id, Permission::AssignIssues)
            .await?;
    }

    let task = insert_task(&state.pool, Some(project_id), auth.user_id, &payload).await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &task,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "Tasks",
    responses((status = 200, description = "Tasks created by or assigned to the caller", body = [Task]))
)]
pub async fn list_my_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Task>>> {
    let rows = sqlx::query_as::<_, DbTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks \
         WHERE (creator_id = ?1 OR assignee = ?1) AND deleted_at IS NULL \
         ORDER BY created_at DESC"
    ))
    .bind(auth.user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let tasks: Vec<Task> = rows
        .into_iter()
        .map(Task::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(tasks))
}

#[utoipa::path(
    post,
    path = "/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses((status = 201, description = "Personal task created", body = Task))
)]
pub async fn create_personal_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let task = insert_task(&state.pool, None, auth.user_id, &payload).await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &task,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Task detail", body = Task))
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<Task>> {
    let task: Task = fetch_task(&state.pool, id).await?.try_into()?;
    ensure_task_visible(&state, auth.user_id, &task).await?;
    Ok(Json(task))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskUpdateRequest,
    responses((status = 200, description = "Task updated", body = Task))
)]
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    let current: Task = fetch_task(&state.pool, id).await?.try_into()?;

    require_edit_record(
        &state.resolver,
        auth.user_id,
        current.creator_id,
        current.assignee,
        current.project_id,
        Permission::EditOwnIssues,
        Permission::EditIssues,
    )
    .await?;

    // reassignment is its own permission on project tasks
    if payload.assignee.is_some() && payload.assignee != current.assignee {
        if let Some(project_id) = current.project_id {
            require_permission(&state.resolver, auth.user_id, project_id, Permission::AssignIssues)
                .await?;
        }
    }

    let now = utc_now();
    let title = payload.title.unwrap_or_else(|| current.title.clone());
    let description = payload.description.or_else(|| current.description.clone());
    let assignee = payload.assignee.or(current.assignee);

    sqlx::query("UPDATE tasks SET title = ?, description = ?, assignee = ?, updated_at = ? WHERE id = ?")
        .bind(&title)
        .bind(&description)
        .bind(assignee.map(|a| a.to_string()))
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let task: Task = fetch_task(&state.pool, id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &task,
        Some(&current),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(task))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 204, description = "Task soft deleted"))
)]
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let task: Task = fetch_task(&state.pool, id).await?.try_into()?;

    require_edit_record(
        &state.resolver,
        auth.user_id,
        task.creator_id,
        task.assignee,
        task.project_id,
        Permission::DeleteOwnIssues,
        Permission::DeleteIssues,
    )
    .await?;

    sqlx::query("UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &task,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// TRANSITIONS
// =============================================================================

#[utoipa::path(
    get,
    path = "/tasks/{id}/transitions",
    tag = "Workflow",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Statuses reachable from the current one", body = TransitionListResponse))
)]
pub async fn list_transitions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<TransitionListResponse>> {
    let current: Task = fetch_task(&state.pool, id).await?.try_into()?;
    let available = state.engine.available_transitions(id, auth.user_id).await?;

    Ok(Json(TransitionListResponse {
        current: current.status,
        available,
    }))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/transition",
    tag = "Workflow",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Task transitioned", body = Task),
        (status = 409, description = "Transition not allowed by the workflow")
    )
)]
pub async fn transition_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<TransitionRequest>,
) -> AppResult<Json<Task>> {
    let before: Task = fetch_task(&state.pool, id).await?.try_into()?;

    state.engine.transition(id, payload.status, auth.user_id).await?;

    let task: Task = fetch_task(&state.pool, id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "transitioned",
        Some(auth.user_id),
        &task,
        Some(&before),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(task))
}

#[utoipa::path(
    post,
    path = "/tasks/bulk-transition",
    tag = "Workflow",
    request_body = BulkTransitionRequest,
    responses((status = 200, description = "Per-task partition of successes and failures", body = BulkTransitionOutcome))
)]
pub async fn bulk_transition(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<BulkTransitionRequest>,
) -> AppResult<Json<BulkTransitionOutcome>> {
    let outcome = state
        .engine
        .bulk_transition(&payload.task_ids, payload.status, auth.user_id)
        .await;

    tracing::info!(
        target: "worklane::workflow",
        actor_id = %auth.user_id,
        status = %payload.status,
        successful = outcome.successful.len(),
        failed = outcome.failed.len(),
        "bulk transition finished"
    );

    Ok(Json(outcome))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn insert_task(
    pool: &SqlitePool,
    project_id: Option<Uuid>,
    creator: Uuid,
    payload: &TaskCreateRequest,
) -> AppResult<Task> {
    let task_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO tasks (id, project_id, creator_id, assignee, title, description, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id.to_string())
    .bind(project_id.map(|p| p.to_string()))
    .bind(creator.to_string())
    .bind(payload.assignee.map(|a| a.to_string()))
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(Status::Draft.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    fetch_task(pool, task_id).await?.try_into()
}

/// Read access: project tasks follow browse_project, personal tasks are
/// visible to their creator and assignee only.
pub(crate) async fn ensure_task_visible(state: &AppState, user_id: Uuid, task: &Task) -> AppResult<()> {
    match task.project_id {
        Some(project_id) => {
            require_permission(&state.resolver, user_id, project_id, Permission::BrowseProject).await
        }
        None => {
            if task.creator_id == user_id || task.assignee == Some(user_id) {
                Ok(())
            } else {
                Err(AppError::forbidden("not allowed to view this task"))
            }
        }
    }
}

pub(crate) async fn fetch_task(pool: &SqlitePool, id: Uuid) -> AppResult<DbTask> {
    sqlx::query_as::<_, DbTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("task not found"))
}

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
use crate::models::task::Task;
use crate::models::worklog::{DbWorklog, Worklog, WorklogCreateRequest, WorklogUpdateRequest};
use crate::utils::utc_now;

use super::tasks::{ensure_task_visible, fetch_task};

const WORKLOG_COLUMNS: &str =
    "id, task_id, author_id, minutes, note, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/tasks/{task_id}/worklogs",
    tag = "Worklogs",
    params(("task_id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Work logged against the task", body = [Worklog]))
)]
pub async fn list_worklogs(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Worklog>>> {
    let task: Task = fetch_task(&state.pool, task_id).await?.try_into()?;
    ensure_task_visible(&state, auth.user_id, &task).await?;

    let rows = sqlx::query_as::<_, DbWorklog>(&format!(
        "SELECT {WORKLOG_COLUMNS} FROM worklogs WHERE task_id = ? AND deleted_at IS NULL ORDER BY created_at"
    ))
    .bind(task_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let worklogs: Vec<Worklog> = rows
        .into_iter()
        .map(Worklog::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(worklogs))
}

#[utoipa::path(
    post,
    path = "/tasks/{task_id}/worklogs",
    tag = "Worklogs",
    params(("task_id" = Uuid, Path, description = "Task id")),
    request_body = WorklogCreateRequest,
    responses((status = 201, description = "Work logged", body = Worklog))
)]
pub async fn create_worklog(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<WorklogCreateRequest>,
) -> AppResult<(StatusCode, Json<Worklog>)> {
    if payload.minutes <= 0 {
        return Err(AppError::bad_request("minutes must be positive"));
    }

    let task: Task = fetch_task(&state.pool, task_id).await?.try_into()?;

    match task.project_id {
        Some(project_id) => {
            require_permission(&state.resolver, auth.user_id, project_id, Permission::LogWork)
                .await?
        }
        None => ensure_task_visible(&state, auth.user_id, &task).await?,
    }

    let worklog_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO worklogs (id, task_id, author_id, minutes, note, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(worklog_id.to_string())
    .bind(task_id.to_string())
    .bind(auth.user_id.to_string())
    .bind(payload.minutes)
    .bind(&payload.note)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let worklog: Worklog = fetch_worklog(&state.pool, worklog_id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &worklog,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(worklog)))
}

#[utoipa::path(
    put,
    path = "/worklogs/{id}",
    tag = "Worklogs",
    params(("id" = Uuid, Path, description = "Worklog id")),
    request_body = WorklogUpdateRequest,
    responses((status = 200, description = "Worklog updated", body = Worklog))
)]
pub async fn update_worklog(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<WorklogUpdateRequest>,
) -> AppResult<Json<Worklog>> {
    let current: Worklog = fetch_worklog(&state.pool, id).await?.try_into()?;
    let task: Task = fetch_task(&state.pool, current.task_id).await?.try_into()?;

    require_edit_record(
        &state.resolver,
        auth.user_id,
        current.author_id,
        None,
        task.project_id,
        Permission::EditOwnWorklogs,
        Permission::EditAllWorklogs,
    )
    .await?;

    if let Some(minutes) = payload.minutes {
        if minutes <= 0 {
            return Err(AppError::bad_request("minutes must be positive"));
        }
    }

    let minutes = payload.minutes.unwrap_or(current.minutes);
    let note = payload.note.or_else(|| current.note.clone());

    sqlx::query("UPDATE worklogs SET minutes = ?, note = ?, updated_at = ? WHERE id = ?")
        .bind(minutes)
        .bind(&note)
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let worklog: Worklog = fetch_worklog(&state.pool, id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &worklog,
        Some(&current),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(worklog))
}

#[utoipa::path(
    delete,
    path = "/worklogs/{id}",
    tag = "Worklogs",
    params(("id" = Uuid, Path, description = "Worklog id")),
    responses((status = 204, description = "Worklog deleted"))
)]
pub async fn delete_worklog(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let worklog: Worklog = fetch_worklog(&state.pool, id).await?.try_into()?;
    let task: Task = fetch_task(&state.pool, worklog.task_id).await?.try_into()?;

    require_edit_record(
        &state.resolver,
        auth.user_id,
        worklog.author_id,
        None,
        task.project_id,
        Permission::DeleteOwnWorklogs,
        Permission::DeleteAllWorklogs,
    )
    .await?;

    sqlx::query("UPDATE worklogs SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &worklog,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_worklog(pool: &SqlitePool, id: Uuid) -> AppResult<DbWorklog> {
    sqlx::query_as::<_, DbWorklog>(&format!(
        "SELECT {WORKLOG_COLUMNS} FROM worklogs WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("worklog not found"))
}

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
use crate::models::comment::{Comment, CommentCreateRequest, CommentUpdateRequest, DbComment};
use crate::models::task::Task;
use crate::utils::utc_now;

use super::tasks::{ensure_task_visible, fetch_task};

const COMMENT_COLUMNS: &str = "id, task_id, author_id, body, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/tasks/{task_id}/comments",
    tag = "Comments",
    params(("task_id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Comments on the task", body = [Comment]))
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Comment>>> {
    let task: Task = fetch_task(&state.pool, task_id).await?.try_into()?;
    ensure_task_visible(&state, auth.user_id, &task).await?;

    let rows = sqlx::query_as::<_, DbComment>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE task_id = ? AND deleted_at IS NULL ORDER BY created_at"
    ))
    .bind(task_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let comments: Vec<Comment> = rows
        .into_iter()
        .map(Comment::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(comments))
}

#[utoipa::path(
    post,
    path = "/tasks/{task_id}/comments",
    tag = "Comments",
    params(("task_id" = Uuid, Path, description = "Task id")),
    request_body = CommentCreateRequest,
    responses((status = 201, description = "Comment added", body = Comment))
)]
pub async fn create_comment(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<CommentCreateRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let task: Task = fetch_task(&state.pool, task_id).await?.try_into()?;

    match task.project_id {
        Some(project_id) => {
            require_permission(&state.resolver, auth.user_id, project_id, Permission::AddComments)
                .await?
        }
        None => ensure_task_visible(&state, auth.user_id, &task).await?,
    }

    let comment_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO comments (id, task_id, author_id, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(comment_id.to_string())
    .bind(task_id.to_string())
    .bind(auth.user_id.to_string())
    .bind(&payload.body)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let comment: Comment = fetch_comment(&state.pool, comment_id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &comment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(comment)))
}

#[utoipa::path(
    put,
    path = "/comments/{id}",
    tag = "Comments",
    params(("id" = Uuid, Path, description = "Comment id")),
    request_body = CommentUpdateRequest,
    responses((status = 200, description = "Comment updated", body = Comment))
)]
pub async fn update_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<CommentUpdateRequest>,
) -> AppResult<Json<Comment>> {
    let current: Comment = fetch_comment(&state.pool, id).await?.try_into()?;
    let task: Task = fetch_task(&state.pool, current.task_id).await?.try_into()?;

    require_edit_record(
        &state.resolver,
        auth.user_id,
        current.author_id,
        None,
        task.project_id,
        Permission::EditOwnComments,
        Permission::EditAllComments,
    )
    .await?;

    sqlx::query("UPDATE comments SET body = ?, updated_at = ? WHERE id = ?")
        .bind(&payload.body)
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let comment: Comment = fetch_comment(&state.pool, id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &comment,
        Some(&current),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(comment))
}

#[utoipa::path(
    delete,
    path = "/comments/{id}",
    tag = "Comments",
    params(("id" = Uuid, Path, description = "Comment id")),
    responses((status = 204, description = "Comment deleted"))
)]
pub async fn delete_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let comment: Comment = fetch_comment(&state.pool, id).await?.try_into()?;
    let task: Task = fetch_task(&state.pool, comment.task_id).await?.try_into()?;

    require_edit_record(
        &state.resolver,
        auth.user_id,
        comment.author_id,
        None,
        task.project_id,
        Permission::DeleteOwnComments,
        Permission::DeleteAllComments,
    )
    .await?;

    sqlx::query("UPDATE comments SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &comment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_comment(pool: &SqlitePool, id: Uuid) -> AppResult<DbComment> {
    sqlx::query_as::<_, DbComment>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("comment not found"))
}

use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

mod common;
use common::*;

#[sqlx::test]
async fn agile_in_progress_offers_review_and_paused_only(pool: SqlitePool) {
    let app = setup(&pool).await;

    let creator = seed_user(&pool, "Creator", "member").await;
    let dev = seed_user(&pool, "Dev", "member").await;
    let project = seed_project(&pool, creator, "private", "agile").await;
    add_member(&pool, project, dev, "contributor").await;
    let task = seed_task(&pool, Some(project), dev, "in_progress").await;

    let (status, body) = request(&app, "GET", &format!("/tasks/{task}/transitions"), dev, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], "in_progress");

    let available: Vec<String> = body["available"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(available.contains(&"review".to_string()));
    assert!(available.contains(&"paused".to_string()));
    assert!(!available.contains(&"completed".to_string()));
}

#[sqlx::test]
async fn illegal_transition_explains_itself(pool: SqlitePool) {
    let app = setup(&pool).await;

    let creator = seed_user(&pool, "Creator", "member").await;
    let dev = seed_user(&pool, "Dev", "member").await;
    let project = seed_project(&pool, creator, "private", "agile").await;
    add_member(&pool, project, dev, "contributor").await;
    let task = seed_task(&pool, Some(project), dev, "in_progress").await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/tasks/{task}/transition"),
        dev,
        Some(json!({"status": "completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let message = body["message"].as_str().unwrap();
    assert!(message.contains("in_progress"), "message: {message}");
    assert!(message.contains("completed"), "message: {message}");
    assert!(message.contains("agile"), "message: {message}");

    // the status is untouched
    let current: String = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
        .bind(task.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(current, "in_progress");
}

#[sqlx::test]
async fn legal_transition_moves_the_task(pool: SqlitePool) {
    let app = setup(&pool).await;

    let creator = seed_user(&pool, "Creator", "member").await;
    let dev = seed_user(&pool, "Dev", "member").await;
    let project = seed_project(&pool, creator, "private", "agile").await;
    add_member(&pool, project, dev, "contributor").await;
    let task = seed_task(&pool, Some(project), dev, "in_progress").await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/tasks/{task}/transition"),
        dev,
        Some(json!({"status": "review"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "review");
    assert_eq!(body["category"], "under_review");
}

#[sqlx::test]
async fn completed_is_a_dead_end(pool: SqlitePool) {
    let app = setup(&pool).await;

    let creator = seed_user(&pool, "Creator", "member").await;
    let project = seed_project(&pool, creator, "private", "kanban").await;
    let task = seed_task(&pool, Some(project), creator, "completed").await;

    let (status, body) = request(&app, "GET", &format!("/tasks/{task}/transitions"), creator, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["available"].as_array().unwrap().is_empty());

    let (status, _) = request(
        &app,
        "POST",
        &format!("/tasks/{task}/transition"),
        creator,
        Some(json!({"status": "in_progress"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[sqlx::test]
async fn bulk_transition_partitions_every_input_id(pool: SqlitePool) {
    let app = setup(&pool).await;

    let creator = seed_user(&pool, "Creator", "member").await;
    let dev = seed_user(&pool, "Dev", "member").await;
    let project = seed_project(&pool, creator, "private", "agile").await;
    add_member(&pool, project, dev, "contributor").await;

    let movable = seed_task(&pool, Some(project), dev, "in_progress").await;
    let stuck = seed_task(&pool, Some(project), dev, "draft").await;
    let missing = Uuid::new_v4();

    let (status, body) = request(
        &app,
        "POST",
        "/tasks/bulk-transition",
        dev,
        Some(json!({
            "task_ids": [movable, stuck, missing],
            "status": "review"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let successful = body["successful"].as_array().unwrap();
    let failed = body["failed"].as_array().unwrap();

    assert_eq!(successful.len(), 1);
    assert_eq!(successful[0], movable.to_string());
    assert_eq!(failed.len(), 2);

    let stuck_entry = failed
        .iter()
        .find(|f| f["task_id"] == stuck.to_string())
        .unwrap();
    let reason = stuck_entry["reason"].as_str().unwrap();
    assert!(reason.contains("draft"), "reason: {reason}");
    assert!(reason.contains("agile"), "reason: {reason}");

    assert!(failed.iter().any(|f| f["task_id"] == missing.to_string()));

    // the valid one actually moved, the stuck one did not
    let moved: String = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
        .bind(movable.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(moved, "review");
    let still: String = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
        .bind(stuck.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(still, "draft");
}

#[sqlx::test]
async fn transition_permission_is_enforced(pool: SqlitePool) {
    let app = setup(&pool).await;

    let creator = seed_user(&pool, "Creator", "member").await;
    let viewer = seed_user(&pool, "Viewer", "member").await;
    let project = seed_project(&pool, creator, "private", "agile").await;
    add_member(&pool, project, viewer, "viewer").await;
    let task = seed_task(&pool, Some(project), creator, "draft").await;

    let (status, _) = request(
        &app,
        "POST",
        &format!("/tasks/{task}/transition"),
        viewer,
        Some(json!({"status": "assigned"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test]
async fn personal_tasks_use_the_basic_workflow(pool: SqlitePool) {
    let app = setup(&pool).await;

    let owner = seed_user(&pool, "Owner", "member").await;
    let stranger = seed_user(&pool, "Stranger", "member").await;

    let (status, created) = request(
        &app,
        "POST",
        "/tasks",
        owner,
        Some(json!({"title": "water the plants"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "draft");
    let task = created["id"].as_str().unwrap().to_string();

    // basic: draft -> assigned only
    let (status, body) = request(&app, "GET", &format!("/tasks/{task}/transitions"), owner, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], json!(["assigned"]));

    // nobody else may touch it
    let (status, _) = request(
        &app,
        "POST",
        &format!("/tasks/{task}/transition"),
        stranger,
        Some(json!({"status": "assigned"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

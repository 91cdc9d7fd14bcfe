//! Shared fixtures for the integration tests: seeded rows plus a router
//! driven through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use worklane::jwt::JwtConfig;

pub const TEST_SECRET: &[u8] = b"test_secret";

pub async fn setup(pool: &SqlitePool) -> Router {
    std::env::set_var("JWT_SECRET", "test_secret");
    worklane::create_app(pool.clone()).await.unwrap()
}

pub fn token_for(user_id: Uuid) -> String {
    let config = JwtConfig {
        secret: Arc::new(TEST_SECRET.to_vec()),
        exp_hours: 1,
    };
    config.encode(user_id).unwrap()
}

pub async fn seed_user(pool: &SqlitePool, name: &str, global_role: &str) -> Uuid {
    seed_user_full(pool, name, global_role, None, false).await
}

pub async fn seed_user_full(
    pool: &SqlitePool,
    name: &str,
    global_role: &str,
    department: Option<&str>,
    protected: bool,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, global_role, department, protected, active, created_at, updated_at) \
         VALUES (?, ?, ?, 'x', ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(format!("{}@example.com", id.simple()))
    .bind(global_role)
    .bind(department)
    .bind(protected)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();

    id
}

pub async fn seed_project(
    pool: &SqlitePool,
    creator: Uuid,
    visibility: &str,
    workflow: &str,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO projects (id, creator_id, name, visibility, workflow, created_at, updated_at) \
         VALUES (?, ?, 'Test Project', ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(creator.to_string())
    .bind(visibility)
    .bind(workflow)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();

    id
}

pub async fn add_member(pool: &SqlitePool, project: Uuid, user: Uuid, role: &str) {
    sqlx::query(
        "INSERT INTO project_members (project_id, user_id, role, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(project.to_string())
    .bind(user.to_string())
    .bind(role)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_task(
    pool: &SqlitePool,
    project: Option<Uuid>,
    creator: Uuid,
    status: &str,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO tasks (id, project_id, creator_id, title, status, created_at, updated_at) \
         VALUES (?, ?, ?, 'Test Task', ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(project.map(|p| p.to_string()))
    .bind(creator.to_string())
    .bind(status)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();

    id
}

/// Fire one request and return (status, parsed body). An empty body parses
/// as `Value::Null`.
pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    actor: Uuid,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token_for(actor)));

    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}

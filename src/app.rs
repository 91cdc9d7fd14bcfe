use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{PermissionResolver, RoleAuthority, SqlDirectory};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{admin, auth, comments, health, projects, tasks, worklogs};
use crate::workflow::WorkflowEngine;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub directory: Arc<SqlDirectory>,
    pub resolver: PermissionResolver,
    pub authority: RoleAuthority,
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        let directory = Arc::new(SqlDirectory::new(pool.clone()));
        let resolver = PermissionResolver::new(directory.clone());
        let authority = RoleAuthority::new(directory.clone());
        let engine = WorkflowEngine::new(directory.clone());

        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
            directory,
            resolver,
            authority,
            engine,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects))
        .route("/", post(projects::create_project))
        .route("/:project_id", get(projects::get_project))
        .route("/:project_id", put(projects::update_project))
        .route("/:project_id", delete(projects::delete_project))
        .route("/:project_id/members", get(projects::list_members))
        .route("/:project_id/members", post(projects::add_member))
        .route("/:project_id/members/:user_id", put(projects::update_member_role))
        .route("/:project_id/members/:user_id", delete(projects::remove_member));

    // Tasks inside a project: /projects/:project_id/tasks
    let project_task_routes = Router::new()
        .route("/", get(tasks::list_project_tasks))
        .route("/", post(tasks::create_project_task));

    // Tasks addressed directly, including personal tasks and transitions
    let task_routes = Router::new()
        .route("/", get(tasks::list_my_tasks))
        .route("/", post(tasks::create_personal_task))
        .route("/bulk-transition", post(tasks::bulk_transition))
        .route("/:task_id", get(tasks::get_task))
        .route("/:task_id", put(tasks::update_task))
        .route("/:task_id", delete(tasks::delete_task))
        .route("/:task_id/transitions", get(tasks::list_transitions))
        .route("/:task_id/transition", post(tasks::transition_task))
        .route("/:task_id/comments", get(comments::list_comments))
        .route("/:task_id/comments", post(comments::create_comment))
        .route("/:task_id/worklogs", get(worklogs::list_worklogs))
        .route("/:task_id/worklogs", post(worklogs::create_worklog));

    let comment_routes = Router::new()
        .route("/:id", put(comments::update_comment))
        .route("/:id", delete(comments::delete_comment));

    let worklog_routes = Router::new()
        .route("/:id", put(worklogs::update_worklog))
        .route("/:id", delete(worklogs::delete_worklog));

    let admin_routes = Router::new()
        .route("/users/:id/role", put(admin::change_global_role))
        .route("/users/:id/deactivate", post(admin::deactivate_user))
        .route("/users/:id", delete(admin::remove_user))
        .route("/schemes", get(admin::list_schemes))
        .route("/schemes", post(admin::create_scheme))
        .route("/schemes/:id", get(admin::get_scheme))
        .route("/schemes/:id", delete(admin::delete_scheme))
        .route("/schemes/:id/grants", get(admin::list_grants))
        .route("/schemes/:id/grants", post(admin::create_grant))
        .route("/schemes/:id/grants/:grant_id", delete(admin::delete_grant))
        .route("/projects/:id/scheme", put(admin::assign_scheme));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .nest("/projects", project_routes)
        .nest("/projects/:project_id/tasks", project_task_routes)
        .nest("/tasks", task_routes)
        .nest("/comments", comment_routes)
        .nest("/worklogs", worklog_routes)
        .nest("/admin", admin_routes)
        .route("/api/health", get(health::health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::{Department, GlobalRole, Permission, ProjectRole, Visibility};
use crate::models;
use crate::routes::health::HealthResponse;
use crate::workflow::{BulkFailure, BulkTransitionOutcome, Status, StatusCategory, WorkflowKind};

#[derive(OpenApi)]
#[openapi(
	components(
		schemas(
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::RoleChangeRequest,
			models::project::Project,
			models::project::ProjectCreateRequest,
			models::project::ProjectUpdateRequest,
			models::project::ProjectMember,
			models::project::MemberAddRequest,
			models::project::MemberRoleRequest,
			models::task::Task,
			models::task::TaskCreateRequest,
			models::task::TaskUpdateRequest,
			models::task::TransitionRequest,
			models::task::TransitionListResponse,
			models::task::BulkTransitionRequest,
			models::comment::Comment,
			models::comment::CommentCreateRequest,
			models::comment::CommentUpdateRequest,
			models::worklog::Worklog,
			models::worklog::WorklogCreateRequest,
			models::worklog::WorklogUpdateRequest,
			models::scheme::PermissionScheme,
			models::scheme::SchemeGrant,
			models::scheme::SchemeCreateRequest,
			models::scheme::GrantCreateRequest,
			models::scheme::AssignSchemeRequest,
			BulkTransitionOutcome,
			BulkFailure,
			HealthResponse,
			Status,
			StatusCategory,
			WorkflowKind,
			Visibility,
			GlobalRole,
			Department,
			ProjectRole,
			Permission
		)
	),
	tags(
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Projects", description = "Project and membership management"),
		(name = "Tasks", description = "Task management"),
		(name = "Workflow", description = "Task status transitions"),
		(name = "Comments", description = "Task comments"),
		(name = "Worklogs", description = "Time tracking"),
		(name = "Admin", description = "Global roles and permission schemes"),
		(name = "Health", description = "Service health")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

	normalize_path_operations(&mut doc);
	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	ensure_openapi_version(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc).expect("OpenAPI serialization must succeed"));

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn normalize_path_operations(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		let snapshot = paths.clone();
		for (path, item) in snapshot {
			if let Some(ops) = item.as_object() {
				let mut normalized = Map::new();
				for (method, val) in ops {
					let key = method.to_lowercase();
					if !normalized.contains_key(&key) {
						normalized.insert(key, val.clone());
					}
				}
				paths.insert(path, Value::Object(normalized));
			}
		}
	}
}

fn ensure_security_components(doc: &mut Value) {
	let components = doc
		.as_object_mut()
		.expect("OpenAPI root must be an object")
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.expect("components must be an object");

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.expect("securitySchemes must be an object");

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn ensure_global_security(doc: &mut Value) {
	doc
		.as_object_mut()
		.expect("OpenAPI root must be an object")
		.entry("security")
		.or_insert_with(|| json!([{ "bearerAuth": [] }]));
}

fn ensure_openapi_version(doc: &mut Value) {
	doc
		.as_object_mut()
		.expect("OpenAPI root must be an object")
		.entry("openapi")
		.or_insert_with(|| Value::String("3.1.0".to_string()));
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

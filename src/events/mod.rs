//! Domain events and the activity/audit log.
//!
//! Handlers publish events onto a broadcast bus; a background listener
//! projects them into `activity_log` (queryable history) and `event_store`
//! (append-only, hash-chained audit trail). Publishing is fire-and-forget:
//! a logging failure never fails the request that caused it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: String, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Request context captured for the audit trail (IP, User-Agent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

/// Structured activity payload stored alongside each event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The current/new state of the entity
    #[serde(rename = "new")]
    pub current: Value,
    /// The previous state (for update/delete operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    /// Request context (IP, User-Agent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Severity level for retention policy
    pub severity: Severity,
}

/// Log an action against any entity implementing [`Loggable`].
pub fn log_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
) {
    log_activity_with_context(event_bus, action, actor_id, entity, None, None);
}

/// Like [`log_activity`], with old-state tracking and request context.
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let event_name = format!("{}.{}", T::entity_type(), action);

    let severity = entity.severity_for_action(action);
    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
        severity,
    };

    let event = DomainEvent::new(
        event_name,
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    // Fire and forget - logging failures should not break the API
    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

fn describe(name: &str) -> &'static str {
    match name {
        "task.created" => "Task created",
        "task.updated" => "Task updated",
        "task.deleted" => "Task deleted",
        "task.transitioned" => "Task status changed",
        "project.created" => "Project created",
        "project.updated" => "Project updated",
        "project.deleted" => "Project deleted",
        "membership.added" => "Project member added",
        "membership.updated" => "Project member role changed",
        "membership.removed" => "Project member removed",
        "user.registered" => "New user registered",
        "user.login" => "User logged in",
        "user.role_changed" => "Global role changed",
        "user.deactivated" => "User deactivated",
        "user.deleted" => "User removed",
        "scheme.created" => "Permission scheme created",
        "scheme.deleted" => "Permission scheme deleted",
        "scheme.assigned" => "Permission scheme assigned to project",
        "scheme_grant.created" => "Permission granted in scheme",
        "scheme_grant.deleted" => "Permission grant revoked",
        "comment.created" => "Comment added",
        "worklog.created" => "Work logged",
        _ => "System event",
    }
}

pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    while let Ok(event) = rx.recv().await {
        let event_json = event.clone();

        // tolerant extraction; a malformed event still gets stored
        let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
        let actor_id = event
            .get("actor_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let subject_id = event
            .get("subject_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let occurred_at = event
            .get("occurred_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let severity = event
            .get("payload")
            .and_then(|p| p.get("severity"))
            .and_then(|s| s.as_str())
            .unwrap_or("important");

        let description = describe(name);
        let properties = serde_json::to_string(&event_json).unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(description)
        .bind(actor_id.map(|u| u.to_string()))
        .bind(subject_id.map(|u| u.to_string()))
        .bind(occurred_at)
        .bind(&properties)
        .bind(severity)
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::error!("failed to save activity log: {}", e);
        }

        // Append to the hash-chained event store: each row commits to the one
        // before it, so tampering with history is detectable.
        let prev_hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM event_store ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&pool)
        .await
        .ok()
        .flatten();

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        if let Some(ref ph) = prev_hash {
            hasher.update(ph.as_bytes());
        }
        hasher.update(properties.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let store_result = sqlx::query(
            "INSERT INTO event_store (id, event_name, occurred_at, actor_id, subject_id, payload, severity, prev_hash, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(occurred_at)
        .bind(actor_id.map(|u| u.to_string()))
        .bind(subject_id.map(|u| u.to_string()))
        .bind(&properties)
        .bind(severity)
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&pool)
        .await;

        if let Err(e) = store_result {
            tracing::error!("failed to save to event store: {}", e);
        }
    }
}

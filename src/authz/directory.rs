//! Lookup seam between the decision engines and storage.
//!
//! The resolver, authority checker, and workflow engine never touch the
//! database directly; they consume the snapshots below through the
//! [`Directory`] trait. Production uses [`SqlDirectory`] over the sqlx pool;
//! unit tests use an in-memory implementation.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::utc_now;
use crate::workflow::{Status, TransitionTable, WorkflowKind};

use super::catalog::{Department, GlobalRole, Permission, ProjectRole};

// =============================================================================
// RECORD SNAPSHOTS
// =============================================================================

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub global_role: GlobalRole,
    pub department: Option<Department>,
    pub protected: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub creator: Uuid,
    pub visibility: Visibility,
    pub scheme: Option<Uuid>,
    pub workflow: WorkflowKind,
    pub custom_transitions: Option<TransitionTable>,
    pub members: HashMap<Uuid, ProjectRole>,
}

impl ProjectRecord {
    pub fn membership(&self, user_id: Uuid) -> Option<ProjectRole> {
        self.members.get(&user_id).copied()
    }
}

/// One grant inside a permission scheme: a permission bound to either a
/// project role or a global role.
#[derive(Debug, Clone)]
pub struct GrantRecord {
    pub permission: Permission,
    pub project_role: Option<ProjectRole>,
    pub global_role: Option<GlobalRole>,
}

#[derive(Debug, Clone)]
pub struct SchemeRecord {
    pub id: Uuid,
    pub grants: Vec<GrantRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: Uuid,
    pub project: Option<Uuid>,
    pub creator: Uuid,
    pub assignee: Option<Uuid>,
    pub status: Status,
}

// =============================================================================
// DIRECTORY TRAIT
// =============================================================================

/// Storage lookups and the two mutations the core owns: task status writes
/// and global-role changes. Everything else stays in the route layer.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>>;
    async fn project(&self, id: Uuid) -> anyhow::Result<Option<ProjectRecord>>;
    async fn scheme(&self, id: Uuid) -> anyhow::Result<Option<SchemeRecord>>;
    async fn task(&self, id: Uuid) -> anyhow::Result<Option<TaskRecord>>;

    /// Persist a new task status. Returns the updated record, or `None` when
    /// the task no longer exists.
    async fn set_task_status(&self, id: Uuid, status: Status) -> anyhow::Result<Option<TaskRecord>>;

    /// Persist a role change. When `department` is given, role and department
    /// must change together in a single write with no intermediate state.
    async fn apply_role_change(
        &self,
        target: Uuid,
        role: GlobalRole,
        department: Option<Department>,
    ) -> anyhow::Result<()>;
}

// =============================================================================
// SQL-BACKED DIRECTORY
// =============================================================================

#[derive(Clone)]
pub struct SqlDirectory {
    pool: SqlitePool,
}

impl SqlDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> anyhow::Result<T> {
    value.parse::<T>().map_err(anyhow::Error::msg)
}

#[async_trait]
impl Directory for SqlDirectory {
    async fn user(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT global_role, department, protected, active FROM users WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let global_role: String = row.get("global_role");
        let department: Option<String> = row.get("department");

        Ok(Some(UserRecord {
            id,
            global_role: parse_enum(&global_role)?,
            department: department.as_deref().map(parse_enum).transpose()?,
            protected: row.get("protected"),
            active: row.get("active"),
        }))
    }

    async fn project(&self, id: Uuid) -> anyhow::Result<Option<ProjectRecord>> {
        let row = sqlx::query(
            "SELECT creator_id, visibility, scheme_id, workflow, workflow_transitions \
             FROM projects WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let creator: String = row.get("creator_id");
        let visibility: String = row.get("visibility");
        let scheme: Option<String> = row.get("scheme_id");
        let workflow: String = row.get("workflow");
        let transitions: Option<String> = row.get("workflow_transitions");

        let member_rows = sqlx::query(
            "SELECT user_id, role FROM project_members WHERE project_id = ?",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut members = HashMap::with_capacity(member_rows.len());
        for member in &member_rows {
            let user_id: String = member.get("user_id");
            let role: String = member.get("role");
            members.insert(Uuid::parse_str(&user_id)?, parse_enum(&role)?);
        }

        Ok(Some(ProjectRecord {
            id,
            creator: Uuid::parse_str(&creator)?,
            visibility: parse_enum(&visibility)?,
            scheme: scheme.as_deref().map(Uuid::parse_str).transpose()?,
            workflow: parse_enum(&workflow)?,
            custom_transitions: transitions
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            members,
        }))
    }

    async fn scheme(&self, id: Uuid) -> anyhow::Result<Option<SchemeRecord>> {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM permission_schemes WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;

        if exists == 0 {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT permission, project_role, global_role FROM scheme_grants WHERE scheme_id = ?",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in &rows {
            let permission: String = row.get("permission");
            let project_role: Option<String> = row.get("project_role");
            let global_role: Option<String> = row.get("global_role");
            grants.push(GrantRecord {
                permission: parse_enum(&permission)?,
                project_role: project_role.as_deref().map(parse_enum).transpose()?,
                global_role: global_role.as_deref().map(parse_enum).transpose()?,
            });
        }

        Ok(Some(SchemeRecord { id, grants }))
    }

    async fn task(&self, id: Uuid) -> anyhow::Result<Option<TaskRecord>> {
        let row = sqlx::query(
            "SELECT project_id, creator_id, assignee, status FROM tasks WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let project: Option<String> = row.get("project_id");
        let creator: String = row.get("creator_id");
        let assignee: Option<String> = row.get("assignee");
        let status: String = row.get("status");

        Ok(Some(TaskRecord {
            id,
            project: project.as_deref().map(Uuid::parse_str).transpose()?,
            creator: Uuid::parse_str(&creator)?,
            assignee: assignee.as_deref().map(Uuid::parse_str).transpose()?,
            status: parse_enum(&status)?,
        }))
    }

    async fn set_task_status(&self, id: Uuid, status: Status) -> anyhow::Result<Option<TaskRecord>> {
        let affected = sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if affected.rows_affected() == 0 {
            return Ok(None);
        }

        self.task(id).await
    }

    async fn apply_role_change(
        &self,
        target: Uuid,
        role: GlobalRole,
        department: Option<Department>,
    ) -> anyhow::Result<()> {
        // One UPDATE per shape so role and department can never be observed
        // half-applied.
        match department {
            Some(department) => {
                sqlx::query(
                    "UPDATE users SET global_role = ?, department = ?, updated_at = ? WHERE id = ?",
                )
                .bind(role.as_str())
                .bind(department.as_str())
                .bind(utc_now())
                .bind(target.to_string())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("UPDATE users SET global_role = ?, updated_at = ? WHERE id = ?")
                    .bind(role.as_str())
                    .bind(utc_now())
                    .bind(target.to_string())
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// IN-MEMORY DIRECTORY (unit tests)
// =============================================================================

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        users: HashMap<Uuid, UserRecord>,
        projects: HashMap<Uuid, ProjectRecord>,
        schemes: HashMap<Uuid, SchemeRecord>,
        tasks: HashMap<Uuid, TaskRecord>,
    }

    #[derive(Default)]
    pub struct MemoryDirectory {
        state: Mutex<State>,
    }

    impl MemoryDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put_user(&self, user: UserRecord) {
            self.state.lock().unwrap().users.insert(user.id, user);
        }

        pub fn put_project(&self, project: ProjectRecord) {
            self.state
                .lock()
                .unwrap()
                .projects
                .insert(project.id, project);
        }

        pub fn put_scheme(&self, scheme: SchemeRecord) {
            self.state.lock().unwrap().schemes.insert(scheme.id, scheme);
        }

        pub fn put_task(&self, task: TaskRecord) {
            self.state.lock().unwrap().tasks.insert(task.id, task);
        }

        pub fn user_snapshot(&self, id: Uuid) -> Option<UserRecord> {
            self.state.lock().unwrap().users.get(&id).cloned()
        }

        pub fn task_snapshot(&self, id: Uuid) -> Option<TaskRecord> {
            self.state.lock().unwrap().tasks.get(&id).cloned()
        }
    }

    #[async_trait]
    impl Directory for MemoryDirectory {
        async fn user(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>> {
            Ok(self.state.lock().unwrap().users.get(&id).cloned())
        }

        async fn project(&self, id: Uuid) -> anyhow::Result<Option<ProjectRecord>> {
            Ok(self.state.lock().unwrap().projects.get(&id).cloned())
        }

        async fn scheme(&self, id: Uuid) -> anyhow::Result<Option<SchemeRecord>> {
            Ok(self.state.lock().unwrap().schemes.get(&id).cloned())
        }

        async fn task(&self, id: Uuid) -> anyhow::Result<Option<TaskRecord>> {
            Ok(self.state.lock().unwrap().tasks.get(&id).cloned())
        }

        async fn set_task_status(
            &self,
            id: Uuid,
            status: Status,
        ) -> anyhow::Result<Option<TaskRecord>> {
            let mut state = self.state.lock().unwrap();
            match state.tasks.get_mut(&id) {
                Some(task) => {
                    task.status = status;
                    Ok(Some(task.clone()))
                }
                None => Ok(None),
            }
        }

        async fn apply_role_change(
            &self,
            target: Uuid,
            role: GlobalRole,
            department: Option<Department>,
        ) -> anyhow::Result<()> {
            // Both fields flip under one lock; there is no observable
            // intermediate state.
            let mut state = self.state.lock().unwrap();
            if let Some(user) = state.users.get_mut(&target) {
                user.global_role = role;
                if let Some(department) = department {
                    user.department = Some(department);
                }
            }
            Ok(())
        }
    }
}

//! Transition execution.
//!
//! The engine is the only legitimate writer of task status. Every transition
//! is authorized through the permission resolver (`transition_issues`), then
//! validated against the project's workflow table, then persisted. Bulk calls
//! validate each task independently and always return a complete partition of
//! the input ids.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{Directory, Permission, PermissionResolver, TaskRecord};

use super::{Status, Workflow, WorkflowError};

#[derive(Clone)]
pub struct WorkflowEngine {
    directory: Arc<dyn Directory>,
    resolver: PermissionResolver,
}

/// Per-item failure inside a bulk transition.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkFailure {
    pub task_id: Uuid,
    pub reason: String,
}

/// Result of a bulk transition: every input id lands in exactly one of the
/// two lists. Callers retry the failed subset.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BulkTransitionOutcome {
    pub successful: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

impl WorkflowEngine {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        let resolver = PermissionResolver::new(directory.clone());
        Self {
            directory,
            resolver,
        }
    }

    /// Statuses the acting user may move this task to right now: exactly the
    /// workflow table's entry for the current status, never closed over
    /// multi-hop paths.
    pub async fn available_transitions(
        &self,
        task_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Vec<Status>, WorkflowError> {
        let task = self.load_task(task_id).await?;
        self.authorize(actor_id, &task).await?;
        let workflow = self.workflow_for(&task).await?;
        Ok(workflow.successors(task.status).to_vec())
    }

    /// Validate and apply a single transition. On an illegal move the error
    /// carries the current status, the workflow kind, and the refused target
    /// so the caller can explain precisely what was wrong.
    pub async fn transition(
        &self,
        task_id: Uuid,
        target: Status,
        actor_id: Uuid,
    ) -> Result<TaskRecord, WorkflowError> {
        let task = self.load_task(task_id).await?;
        self.authorize(actor_id, &task).await?;
        let workflow = self.workflow_for(&task).await?;

        if !workflow.allows(task.status, target) {
            return Err(WorkflowError::InvalidTransition {
                workflow: workflow.kind(),
                from: task.status,
                to: target,
            });
        }

        let updated = self
            .directory
            .set_task_status(task_id, target)
            .await
            .map_err(|err| WorkflowError::Storage(err.to_string()))?
            .ok_or(WorkflowError::UnknownTask(task_id))?;

        tracing::info!(
            target: "worklane::workflow",
            task_id = %task_id,
            actor_id = %actor_id,
            from = %task.status,
            to = %target,
            "task transitioned"
        );

        Ok(updated)
    }

    /// Apply one transition per input id, independently: a failing task never
    /// aborts the rest, and each status write commits on its own. The outcome
    /// enumerates every input id exactly once.
    pub async fn bulk_transition(
        &self,
        task_ids: &[Uuid],
        target: Status,
        actor_id: Uuid,
    ) -> BulkTransitionOutcome {
        let mut outcome = BulkTransitionOutcome::default();

        for &task_id in task_ids {
            match self.transition(task_id, target, actor_id).await {
                Ok(_) => outcome.successful.push(task_id),
                Err(err) => outcome.failed.push(BulkFailure {
                    task_id,
                    reason: err.to_string(),
                }),
            }
        }

        outcome
    }

    async fn load_task(&self, task_id: Uuid) -> Result<TaskRecord, WorkflowError> {
        self.directory
            .task(task_id)
            .await
            .map_err(|err| WorkflowError::Storage(err.to_string()))?
            .ok_or(WorkflowError::UnknownTask(task_id))
    }

    /// Project tasks require `transition_issues` on the project; personal
    /// tasks may only be moved by their creator or assignee.
    async fn authorize(&self, actor_id: Uuid, task: &TaskRecord) -> Result<(), WorkflowError> {
        let allowed = match task.project {
            Some(project_id) => {
                self.resolver
                    .resolve(actor_id, project_id, Permission::TransitionIssues)
                    .await
            }
            None => actor_id == task.creator || task.assignee == Some(actor_id),
        };

        if allowed {
            Ok(())
        } else {
            Err(WorkflowError::PermissionDenied)
        }
    }

    async fn workflow_for(&self, task: &TaskRecord) -> Result<Workflow, WorkflowError> {
        let Some(project_id) = task.project else {
            return Ok(Workflow::basic());
        };

        let project = self
            .directory
            .project(project_id)
            .await
            .map_err(|err| WorkflowError::Storage(err.to_string()))?
            .ok_or(WorkflowError::UnknownTask(task.id))?;

        Ok(Workflow::new(
            project.workflow,
            project.custom_transitions.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::authz::directory::memory::MemoryDirectory;
    use crate::authz::{GlobalRole, ProjectRecord, ProjectRole, UserRecord, Visibility};
    use crate::workflow::{TransitionTable, WorkflowKind};

    struct Fixture {
        directory: Arc<MemoryDirectory>,
        engine: WorkflowEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let directory = Arc::new(MemoryDirectory::new());
            let engine = WorkflowEngine::new(directory.clone());
            Self { directory, engine }
        }

        fn add_user(&self, role: GlobalRole) -> Uuid {
            let id = Uuid::new_v4();
            self.directory.put_user(UserRecord {
                id,
                global_role: role,
                department: None,
                protected: false,
                active: true,
            });
            id
        }

        fn add_project(
            &self,
            workflow: WorkflowKind,
            members: Vec<(Uuid, ProjectRole)>,
        ) -> Uuid {
            let id = Uuid::new_v4();
            self.directory.put_project(ProjectRecord {
                id,
                creator: Uuid::new_v4(),
                visibility: Visibility::Private,
                scheme: None,
                workflow,
                custom_transitions: None,
                members: members.into_iter().collect(),
            });
            id
        }

        fn add_task(&self, project: Option<Uuid>, creator: Uuid, status: Status) -> Uuid {
            let id = Uuid::new_v4();
            self.directory.put_task(TaskRecord {
                id,
                project,
                creator,
                assignee: None,
                status,
            });
            id
        }
    }

    #[tokio::test]
    async fn available_transitions_match_the_table_exactly() {
        let fx = Fixture::new();
        let actor = fx.add_user(GlobalRole::Member);
        let project = fx.add_project(WorkflowKind::Agile, vec![(actor, ProjectRole::Contributor)]);
        let task = fx.add_task(Some(project), actor, Status::InProgress);

        let next = fx.engine.available_transitions(task, actor).await.unwrap();
        assert_eq!(next, vec![Status::Review, Status::Paused]);
    }

    #[tokio::test]
    async fn viewers_cannot_see_or_drive_transitions() {
        let fx = Fixture::new();
        let viewer = fx.add_user(GlobalRole::Member);
        let project = fx.add_project(WorkflowKind::Agile, vec![(viewer, ProjectRole::Viewer)]);
        let task = fx.add_task(Some(project), Uuid::new_v4(), Status::Draft);

        assert_eq!(
            fx.engine.available_transitions(task, viewer).await,
            Err(WorkflowError::PermissionDenied)
        );
        assert_eq!(
            fx.engine.transition(task, Status::Assigned, viewer).await,
            Err(WorkflowError::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn illegal_move_reports_the_full_triple() {
        let fx = Fixture::new();
        let actor = fx.add_user(GlobalRole::Member);
        let project = fx.add_project(WorkflowKind::Agile, vec![(actor, ProjectRole::Contributor)]);
        let task = fx.add_task(Some(project), actor, Status::InProgress);

        let err = fx
            .engine
            .transition(task, Status::Completed, actor)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidTransition {
                workflow: WorkflowKind::Agile,
                from: Status::InProgress,
                to: Status::Completed,
            }
        );

        // and the task did not move
        assert_eq!(
            fx.directory.task_snapshot(task).unwrap().status,
            Status::InProgress
        );
    }

    #[tokio::test]
    async fn valid_move_persists_the_new_status() {
        let fx = Fixture::new();
        let actor = fx.add_user(GlobalRole::Member);
        let project = fx.add_project(WorkflowKind::Agile, vec![(actor, ProjectRole::Contributor)]);
        let task = fx.add_task(Some(project), actor, Status::InProgress);

        let updated = fx
            .engine
            .transition(task, Status::Review, actor)
            .await
            .unwrap();
        assert_eq!(updated.status, Status::Review);
        assert_eq!(
            fx.directory.task_snapshot(task).unwrap().status,
            Status::Review
        );
    }

    #[tokio::test]
    async fn completed_tasks_cannot_move_anywhere() {
        let fx = Fixture::new();
        let actor = fx.add_user(GlobalRole::Member);
        let project = fx.add_project(WorkflowKind::Kanban, vec![(actor, ProjectRole::Lead)]);
        let task = fx.add_task(Some(project), actor, Status::Completed);

        assert!(fx
            .engine
            .available_transitions(task, actor)
            .await
            .unwrap()
            .is_empty());

        for target in Status::ALL {
            let err = fx.engine.transition(task, target, actor).await.unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn bulk_partition_is_complete_and_disjoint() {
        let fx = Fixture::new();
        let actor = fx.add_user(GlobalRole::Member);
        let project = fx.add_project(WorkflowKind::Agile, vec![(actor, ProjectRole::Contributor)]);

        let movable = fx.add_task(Some(project), actor, Status::InProgress);
        let stuck = fx.add_task(Some(project), actor, Status::Draft);
        let missing = Uuid::new_v4();
        let ids = [movable, stuck, missing];

        let outcome = fx.engine.bulk_transition(&ids, Status::Review, actor).await;

        assert_eq!(outcome.successful, vec![movable]);
        let failed_ids: Vec<Uuid> = outcome.failed.iter().map(|f| f.task_id).collect();
        assert_eq!(failed_ids, vec![stuck, missing]);
        assert_eq!(outcome.successful.len() + outcome.failed.len(), ids.len());

        // the stuck task's reason names its status and workflow
        let reason = &outcome.failed[0].reason;
        assert!(reason.contains("draft"));
        assert!(reason.contains("agile"));
    }

    #[tokio::test]
    async fn bulk_failures_do_not_abort_later_items() {
        let fx = Fixture::new();
        let actor = fx.add_user(GlobalRole::Member);
        let project = fx.add_project(WorkflowKind::Agile, vec![(actor, ProjectRole::Contributor)]);

        let stuck = fx.add_task(Some(project), actor, Status::Completed);
        let movable = fx.add_task(Some(project), actor, Status::InProgress);

        let outcome = fx
            .engine
            .bulk_transition(&[stuck, movable], Status::Review, actor)
            .await;

        assert_eq!(outcome.successful, vec![movable]);
        assert_eq!(
            fx.directory.task_snapshot(movable).unwrap().status,
            Status::Review
        );
    }

    #[tokio::test]
    async fn personal_tasks_follow_basic_and_are_creator_only() {
        let fx = Fixture::new();
        let owner = fx.add_user(GlobalRole::Member);
        let stranger = fx.add_user(GlobalRole::Member);
        let task = fx.add_task(None, owner, Status::Draft);

        assert_eq!(
            fx.engine.available_transitions(task, owner).await.unwrap(),
            vec![Status::Assigned]
        );
        assert_eq!(
            fx.engine.available_transitions(task, stranger).await,
            Err(WorkflowError::PermissionDenied)
        );

        fx.engine
            .transition(task, Status::Assigned, owner)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn workflow_change_can_freeze_existing_tasks() {
        let fx = Fixture::new();
        let actor = fx.add_user(GlobalRole::Member);
        // the project switched to a custom workflow whose table has no entry
        // for review; a task parked there stays frozen.
        let project_id = Uuid::new_v4();
        let mut table = TransitionTable::default();
        table.0.insert(Status::Draft, vec![Status::Completed]);
        fx.directory.put_project(ProjectRecord {
            id: project_id,
            creator: Uuid::new_v4(),
            visibility: Visibility::Private,
            scheme: None,
            workflow: WorkflowKind::Custom,
            custom_transitions: Some(table),
            members: HashMap::from([(actor, ProjectRole::Contributor)]),
        });
        let frozen = fx.add_task(Some(project_id), actor, Status::Review);

        assert!(fx
            .engine
            .available_transitions(frozen, actor)
            .await
            .unwrap()
            .is_empty());

        let err = fx
            .engine
            .transition(frozen, Status::Completed, actor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                workflow: WorkflowKind::Custom,
                from: Status::Review,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn bypass_roles_may_transition_any_project_task() {
        let fx = Fixture::new();
        let executive = fx.add_user(GlobalRole::Executive);
        let project = fx.add_project(WorkflowKind::Basic, vec![]);
        let task = fx.add_task(Some(project), Uuid::new_v4(), Status::Draft);

        let updated = fx
            .engine
            .transition(task, Status::Assigned, executive)
            .await
            .unwrap();
        assert_eq!(updated.status, Status::Assigned);
    }
}

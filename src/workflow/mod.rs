//! Task workflow state machine.
//!
//! A task's `status` column is the single source of truth; board columns are a
//! pure function of status (`StatusCategory`) and are never persisted. Which
//! statuses a task may move between is decided by its project's workflow kind:
//! each kind carries a transition table mapping a status to the statuses that
//! are directly reachable from it. `completed` is terminal in every kind simply
//! because its table entry is empty.
//!
//! Switching a project to a different workflow kind does not revalidate tasks
//! already in flight: a task may sit in a status the new table never produces,
//! and stays frozen (empty successor set) until someone reconciles it by hand.

mod engine;

pub use engine::{BulkFailure, BulkTransitionOutcome, WorkflowEngine};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Draft,
    Assigned,
    InProgress,
    Paused,
    Review,
    Completed,
    Rejected,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Draft,
        Status::Assigned,
        Status::InProgress,
        Status::Paused,
        Status::Review,
        Status::Completed,
        Status::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Assigned => "assigned",
            Status::InProgress => "in_progress",
            Status::Paused => "paused",
            Status::Review => "review",
            Status::Completed => "completed",
            Status::Rejected => "rejected",
        }
    }

    /// Board column for this status. Derived on demand, never stored.
    pub fn category(&self) -> StatusCategory {
        match self {
            Status::Draft | Status::Assigned => StatusCategory::NotStarted,
            Status::InProgress | Status::Paused => StatusCategory::Active,
            Status::Review => StatusCategory::UnderReview,
            Status::Completed | Status::Rejected => StatusCategory::Finished,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Status::Draft),
            "assigned" => Ok(Status::Assigned),
            "in_progress" => Ok(Status::InProgress),
            "paused" => Ok(Status::Paused),
            "review" => Ok(Status::Review),
            "completed" => Ok(Status::Completed),
            "rejected" => Ok(Status::Rejected),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Board columns, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    NotStarted,
    Active,
    UnderReview,
    Finished,
}

// =============================================================================
// WORKFLOW KINDS AND TRANSITION TABLES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Basic,
    Agile,
    Kanban,
    Custom,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Basic => "basic",
            WorkflowKind::Agile => "agile",
            WorkflowKind::Kanban => "kanban",
            WorkflowKind::Custom => "custom",
        }
    }

    /// Successor set for the built-in tables. `Custom` always answers empty
    /// here; its table lives on the project record.
    pub fn successors(&self, from: Status) -> &'static [Status] {
        match self {
            WorkflowKind::Basic => match from {
                Status::Draft => &[Status::Assigned],
                Status::Assigned => &[Status::InProgress],
                Status::InProgress => &[Status::Completed],
                _ => &[],
            },
            WorkflowKind::Agile => match from {
                Status::Draft => &[Status::Assigned, Status::Rejected],
                Status::Assigned => &[Status::InProgress, Status::Rejected],
                Status::InProgress => &[Status::Review, Status::Paused],
                Status::Paused => &[Status::InProgress, Status::Rejected],
                Status::Review => &[Status::Completed, Status::InProgress, Status::Rejected],
                Status::Completed => &[],
                Status::Rejected => &[Status::Draft],
            },
            WorkflowKind::Kanban => match from {
                Status::Draft => &[Status::Assigned, Status::InProgress, Status::Rejected],
                Status::Assigned => &[Status::InProgress, Status::Paused, Status::Rejected],
                Status::InProgress => &[Status::Review, Status::Paused, Status::Completed],
                Status::Paused => &[Status::InProgress, Status::Rejected],
                Status::Review => &[Status::Completed, Status::InProgress],
                Status::Completed => &[],
                Status::Rejected => &[Status::Draft],
            },
            WorkflowKind::Custom => &[],
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "basic" => Ok(WorkflowKind::Basic),
            "agile" => Ok(WorkflowKind::Agile),
            "kanban" => Ok(WorkflowKind::Kanban),
            "custom" => Ok(WorkflowKind::Custom),
            other => Err(format!("unknown workflow kind: {other}")),
        }
    }
}

/// A project-defined transition table, stored as JSON on the project row and
/// consulted only when the project's workflow kind is `custom`. Statuses with
/// no entry have no legal transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionTable(pub BTreeMap<Status, Vec<Status>>);

impl TransitionTable {
    pub fn successors(&self, from: Status) -> &[Status] {
        self.0.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A resolved workflow: a kind plus, for `custom`, the project's own table.
#[derive(Debug, Clone)]
pub struct Workflow {
    kind: WorkflowKind,
    custom: Option<TransitionTable>,
}

impl Workflow {
    pub fn new(kind: WorkflowKind, custom: Option<TransitionTable>) -> Self {
        Self { kind, custom }
    }

    /// The workflow applied to tasks outside any project.
    pub fn basic() -> Self {
        Self::new(WorkflowKind::Basic, None)
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn successors(&self, from: Status) -> &[Status] {
        match (self.kind, &self.custom) {
            (WorkflowKind::Custom, Some(table)) => table.successors(from),
            (WorkflowKind::Custom, None) => &[],
            (kind, _) => kind.successors(from),
        }
    }

    pub fn allows(&self, from: Status, to: Status) -> bool {
        self.successors(from).contains(&to)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("task {0} not found")]
    UnknownTask(Uuid),
    #[error("not allowed to transition this task")]
    PermissionDenied,
    #[error("cannot move task from '{from}' to '{to}' under the '{workflow}' workflow")]
    InvalidTransition {
        workflow: WorkflowKind,
        from: Status,
        to: Status,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_is_terminal_in_every_kind() {
        for kind in [WorkflowKind::Basic, WorkflowKind::Agile, WorkflowKind::Kanban] {
            assert!(
                kind.successors(Status::Completed).is_empty(),
                "{kind} must not allow transitions out of completed"
            );
        }
    }

    #[test]
    fn tables_are_not_transitively_closed() {
        // draft -> assigned -> in_progress is a two-hop path in agile; the
        // direct entry for draft must not contain in_progress.
        assert!(!WorkflowKind::Agile
            .successors(Status::Draft)
            .contains(&Status::InProgress));
        // same for basic: draft -> assigned -> in_progress -> completed.
        assert!(!WorkflowKind::Basic
            .successors(Status::Draft)
            .contains(&Status::Completed));
    }

    #[test]
    fn agile_in_progress_cannot_complete_directly() {
        let next = WorkflowKind::Agile.successors(Status::InProgress);
        assert!(next.contains(&Status::Review));
        assert!(next.contains(&Status::Paused));
        assert!(!next.contains(&Status::Completed));
    }

    #[test]
    fn every_status_maps_to_a_column() {
        use StatusCategory::*;
        let expected = [
            (Status::Draft, NotStarted),
            (Status::Assigned, NotStarted),
            (Status::InProgress, Active),
            (Status::Paused, Active),
            (Status::Review, UnderReview),
            (Status::Completed, Finished),
            (Status::Rejected, Finished),
        ];
        for (status, category) in expected {
            assert_eq!(status.category(), category);
        }
    }

    #[test]
    fn custom_workflow_without_table_freezes_everything() {
        let workflow = Workflow::new(WorkflowKind::Custom, None);
        for status in Status::ALL {
            assert!(workflow.successors(status).is_empty());
        }
    }

    #[test]
    fn custom_table_round_trips_through_json() {
        let mut table = TransitionTable::default();
        table
            .0
            .insert(Status::Draft, vec![Status::InProgress, Status::Rejected]);
        let json = serde_json::to_string(&table).unwrap();
        let parsed: TransitionTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);
        assert_eq!(
            parsed.successors(Status::Draft),
            &[Status::InProgress, Status::Rejected]
        );
        assert!(parsed.successors(Status::Review).is_empty());
    }

    #[test]
    fn invalid_transition_message_names_the_workflow_and_statuses() {
        let err = WorkflowError::InvalidTransition {
            workflow: WorkflowKind::Agile,
            from: Status::InProgress,
            to: Status::Completed,
        };
        let message = err.to_string();
        assert!(message.contains("in_progress"));
        assert!(message.contains("completed"));
        assert!(message.contains("agile"));
    }
}

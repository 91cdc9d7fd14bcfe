//! Static role and permission tables.
//!
//! Everything in this module is immutable at runtime: the global-role
//! hierarchy, the project-role ladder, the closed permission catalog, and the
//! default project-role -> permission table used by projects without a
//! permission scheme. Roles and permissions are sealed enums so an unhandled
//! case is a compile error, not a silent miss.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// GLOBAL ROLES
// =============================================================================

/// Organization-wide roles, ordered by authority level.
///
/// The two protected accounts both hold `Superuser`. The two department leads
/// share a level on purpose; anything that needs to rank them further must use
/// the department, never the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GlobalRole {
    Superuser,
    Executive,
    OpsLead,
    EngLead,
    Operator,
    Member,
}

impl GlobalRole {
    pub const ALL: [GlobalRole; 6] = [
        GlobalRole::Superuser,
        GlobalRole::Executive,
        GlobalRole::OpsLead,
        GlobalRole::EngLead,
        GlobalRole::Operator,
        GlobalRole::Member,
    ];

    pub fn level(&self) -> u8 {
        match self {
            GlobalRole::Superuser => 5,
            GlobalRole::Executive => 4,
            GlobalRole::OpsLead | GlobalRole::EngLead => 3,
            GlobalRole::Operator => 2,
            GlobalRole::Member => 1,
        }
    }

    /// Holders of a bypass role satisfy every project permission check,
    /// member or not, scheme or not.
    pub fn is_bypass(&self) -> bool {
        matches!(self, GlobalRole::Superuser | GlobalRole::Executive)
    }

    /// Roles allowed to manage permission schemes and other system-wide
    /// administration. Currently the same set as the bypass roles.
    pub fn is_system_admin(&self) -> bool {
        self.is_bypass()
    }

    /// The department a department-lead role is bound to.
    pub fn department(&self) -> Option<Department> {
        match self {
            GlobalRole::OpsLead => Some(Department::Operations),
            GlobalRole::EngLead => Some(Department::Engineering),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalRole::Superuser => "superuser",
            GlobalRole::Executive => "executive",
            GlobalRole::OpsLead => "ops_lead",
            GlobalRole::EngLead => "eng_lead",
            GlobalRole::Operator => "operator",
            GlobalRole::Member => "member",
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlobalRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "superuser" => Ok(GlobalRole::Superuser),
            "executive" => Ok(GlobalRole::Executive),
            "ops_lead" => Ok(GlobalRole::OpsLead),
            "eng_lead" => Ok(GlobalRole::EngLead),
            "operator" => Ok(GlobalRole::Operator),
            "member" => Ok(GlobalRole::Member),
            other => Err(format!("unknown global role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Operations,
    Engineering,
}

impl Department {
    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Operations => "operations",
            Department::Engineering => "engineering",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Department {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "operations" => Ok(Department::Operations),
            "engineering" => Ok(Department::Engineering),
            other => Err(format!("unknown department: {other}")),
        }
    }
}

// =============================================================================
// PROJECT ROLES
// =============================================================================

/// Per-project membership roles, strictly ordered. A project's creator is
/// always treated as `Admin` whether or not a membership row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Viewer,
    Reporter,
    Contributor,
    Lead,
    Admin,
}

impl ProjectRole {
    pub const ALL: [ProjectRole; 5] = [
        ProjectRole::Viewer,
        ProjectRole::Reporter,
        ProjectRole::Contributor,
        ProjectRole::Lead,
        ProjectRole::Admin,
    ];

    pub fn level(&self) -> u8 {
        match self {
            ProjectRole::Viewer => 0,
            ProjectRole::Reporter => 1,
            ProjectRole::Contributor => 2,
            ProjectRole::Lead => 3,
            ProjectRole::Admin => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::Viewer => "viewer",
            ProjectRole::Reporter => "reporter",
            ProjectRole::Contributor => "contributor",
            ProjectRole::Lead => "lead",
            ProjectRole::Admin => "admin",
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "viewer" => Ok(ProjectRole::Viewer),
            "reporter" => Ok(ProjectRole::Reporter),
            "contributor" => Ok(ProjectRole::Contributor),
            "lead" => Ok(ProjectRole::Lead),
            "admin" => Ok(ProjectRole::Admin),
            other => Err(format!("unknown project role: {other}")),
        }
    }
}

// =============================================================================
// PERMISSION CATALOG
// =============================================================================

/// The closed catalog of project permissions.
///
/// Every "edit/delete all" permission has an "own" sibling; callers must
/// decide ownership first and try the own variant before the all variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    // Project administration
    AdministerProject,
    EditProject,
    BrowseProject,
    ManageMembers,
    // Issues
    CreateIssues,
    EditIssues,
    EditOwnIssues,
    DeleteIssues,
    DeleteOwnIssues,
    AssignIssues,
    TransitionIssues,
    ResolveIssues,
    CloseIssues,
    MoveIssues,
    LinkIssues,
    // Comments
    AddComments,
    EditAllComments,
    EditOwnComments,
    DeleteAllComments,
    DeleteOwnComments,
    // Attachments
    CreateAttachments,
    DeleteAllAttachments,
    DeleteOwnAttachments,
    // Worklogs
    LogWork,
    EditAllWorklogs,
    EditOwnWorklogs,
    DeleteAllWorklogs,
    DeleteOwnWorklogs,
    // Sprints
    ManageSprints,
    ViewSprints,
    // Epics
    ManageEpics,
    ViewEpics,
}

impl Permission {
    pub const ALL: [Permission; 32] = [
        Permission::AdministerProject,
        Permission::EditProject,
        Permission::BrowseProject,
        Permission::ManageMembers,
        Permission::CreateIssues,
        Permission::EditIssues,
        Permission::EditOwnIssues,
        Permission::DeleteIssues,
        Permission::DeleteOwnIssues,
        Permission::AssignIssues,
        Permission::TransitionIssues,
        Permission::ResolveIssues,
        Permission::CloseIssues,
        Permission::MoveIssues,
        Permission::LinkIssues,
        Permission::AddComments,
        Permission::EditAllComments,
        Permission::EditOwnComments,
        Permission::DeleteAllComments,
        Permission::DeleteOwnComments,
        Permission::CreateAttachments,
        Permission::DeleteAllAttachments,
        Permission::DeleteOwnAttachments,
        Permission::LogWork,
        Permission::EditAllWorklogs,
        Permission::EditOwnWorklogs,
        Permission::DeleteAllWorklogs,
        Permission::DeleteOwnWorklogs,
        Permission::ManageSprints,
        Permission::ViewSprints,
        Permission::ManageEpics,
        Permission::ViewEpics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AdministerProject => "administer_project",
            Permission::EditProject => "edit_project",
            Permission::BrowseProject => "browse_project",
            Permission::ManageMembers => "manage_members",
            Permission::CreateIssues => "create_issues",
            Permission::EditIssues => "edit_issues",
            Permission::EditOwnIssues => "edit_own_issues",
            Permission::DeleteIssues => "delete_issues",
            Permission::DeleteOwnIssues => "delete_own_issues",
            Permission::AssignIssues => "assign_issues",
            Permission::TransitionIssues => "transition_issues",
            Permission::ResolveIssues => "resolve_issues",
            Permission::CloseIssues => "close_issues",
            Permission::MoveIssues => "move_issues",
            Permission::LinkIssues => "link_issues",
            Permission::AddComments => "add_comments",
            Permission::EditAllComments => "edit_all_comments",
            Permission::EditOwnComments => "edit_own_comments",
            Permission::DeleteAllComments => "delete_all_comments",
            Permission::DeleteOwnComments => "delete_own_comments",
            Permission::CreateAttachments => "create_attachments",
            Permission::DeleteAllAttachments => "delete_all_attachments",
            Permission::DeleteOwnAttachments => "delete_own_attachments",
            Permission::LogWork => "log_work",
            Permission::EditAllWorklogs => "edit_all_worklogs",
            Permission::EditOwnWorklogs => "edit_own_worklogs",
            Permission::DeleteAllWorklogs => "delete_all_worklogs",
            Permission::DeleteOwnWorklogs => "delete_own_worklogs",
            Permission::ManageSprints => "manage_sprints",
            Permission::ViewSprints => "view_sprints",
            Permission::ManageEpics => "manage_epics",
            Permission::ViewEpics => "view_epics",
        }
    }

    /// The lowest project role the default table grants this permission to.
    ///
    /// Encoding the default table as a minimum role makes it monotonic by
    /// construction: any role at or above the minimum holds the permission.
    fn default_minimum_role(&self) -> ProjectRole {
        match self {
            Permission::BrowseProject | Permission::ViewSprints | Permission::ViewEpics => {
                ProjectRole::Viewer
            }
            Permission::CreateIssues
            | Permission::EditOwnIssues
            | Permission::AddComments
            | Permission::EditOwnComments
            | Permission::DeleteOwnComments
            | Permission::CreateAttachments
            | Permission::DeleteOwnAttachments => ProjectRole::Reporter,
            Permission::DeleteOwnIssues
            | Permission::TransitionIssues
            | Permission::ResolveIssues
            | Permission::AssignIssues
            | Permission::LinkIssues
            | Permission::LogWork
            | Permission::EditOwnWorklogs
            | Permission::DeleteOwnWorklogs => ProjectRole::Contributor,
            Permission::EditIssues
            | Permission::DeleteIssues
            | Permission::CloseIssues
            | Permission::MoveIssues
            | Permission::EditAllComments
            | Permission::DeleteAllComments
            | Permission::DeleteAllAttachments
            | Permission::EditAllWorklogs
            | Permission::DeleteAllWorklogs
            | Permission::ManageSprints
            | Permission::ManageEpics => ProjectRole::Lead,
            Permission::AdministerProject | Permission::EditProject | Permission::ManageMembers => {
                ProjectRole::Admin
            }
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .find(|candidate| candidate.as_str() == value)
            .copied()
            .ok_or_else(|| format!("unknown permission: {value}"))
    }
}

/// Default project-role -> permission table, applied when a project has no
/// permission scheme assigned.
pub fn default_table_allows(role: ProjectRole, permission: Permission) -> bool {
    role.level() >= permission.default_minimum_role().level()
}

/// The full permission set the default table grants a role.
pub fn default_permissions(role: ProjectRole) -> Vec<Permission> {
    Permission::ALL
        .iter()
        .copied()
        .filter(|permission| default_table_allows(role, *permission))
        .collect()
}

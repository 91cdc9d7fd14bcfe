//! Permission resolution.
//!
//! A single entry point answers "may this user exercise this permission on
//! this project?". The checks run in a fixed order and the first match wins:
//!
//! 1. unknown or inactive user -> deny
//! 2. bypass global role -> allow
//! 3. unknown project -> deny
//! 4. project creator -> allow
//! 5. non-member -> deny, except browse on a public project
//! 6. scheme assigned -> allow only on a matching grant (closed world)
//! 7. no scheme -> default role table
//!
//! Resolution never raises: any lookup failure resolves to deny. Callers get a
//! boolean and decide themselves what status code or message that becomes.

use std::sync::Arc;

use uuid::Uuid;

use super::catalog::{default_table_allows, Permission, ProjectRole};
use super::directory::{Directory, ProjectRecord, SchemeRecord, UserRecord, Visibility};

#[derive(Clone)]
pub struct PermissionResolver {
    directory: Arc<dyn Directory>,
}

impl PermissionResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// The allow/deny decision. Pure read; no lookup failure escapes as an
    /// error.
    pub async fn resolve(&self, user_id: Uuid, project_id: Uuid, permission: Permission) -> bool {
        let Some(user) = self.load_user(user_id).await else {
            tracing::debug!(user_id = %user_id, permission = %permission, "deny: unknown or inactive user");
            return false;
        };

        if user.global_role.is_bypass() {
            tracing::debug!(user_id = %user_id, role = %user.global_role, permission = %permission, "allow: bypass role");
            return true;
        }

        let Some(project) = self.load_project(project_id).await else {
            tracing::debug!(project_id = %project_id, permission = %permission, "deny: unknown project");
            return false;
        };

        if project.creator == user_id {
            tracing::debug!(user_id = %user_id, project_id = %project_id, "allow: project creator");
            return true;
        }

        let Some(role) = project.membership(user_id) else {
            let public_browse = project.visibility == Visibility::Public
                && permission == Permission::BrowseProject;
            if public_browse {
                tracing::debug!(user_id = %user_id, project_id = %project_id, "allow: public project browse");
            } else {
                tracing::debug!(user_id = %user_id, project_id = %project_id, permission = %permission, "deny: not a member");
            }
            return public_browse;
        };

        match project.scheme {
            Some(scheme_id) => {
                // A scheme replaces the default table wholesale: no matching
                // grant means deny, even where the default table would allow.
                let Some(scheme) = self.load_scheme(scheme_id).await else {
                    tracing::warn!(scheme_id = %scheme_id, project_id = %project_id, "deny: scheme lookup failed");
                    return false;
                };
                let allowed = scheme_allows(&scheme, &user, role, permission);
                tracing::debug!(
                    user_id = %user_id,
                    project_id = %project_id,
                    permission = %permission,
                    allowed,
                    "scheme grant evaluation"
                );
                allowed
            }
            None => {
                let allowed = default_table_allows(role, permission);
                tracing::debug!(
                    user_id = %user_id,
                    project_id = %project_id,
                    role = %role,
                    permission = %permission,
                    allowed,
                    "default table evaluation"
                );
                allowed
            }
        }
    }

    /// Ownership-aware edit/delete check. When the acting user owns the record
    /// (creator or assignee), the "own" variant is tried before the "all"
    /// variant; strangers only ever get the "all" check. Every edit/delete
    /// call site goes through here so the ordering holds uniformly.
    ///
    /// Records on personal tasks carry no project; for those only the owner or
    /// assignee may act.
    pub async fn can_edit_record(
        &self,
        user_id: Uuid,
        record_owner: Uuid,
        record_assignee: Option<Uuid>,
        project_id: Option<Uuid>,
        own_permission: Permission,
        all_permission: Permission,
    ) -> bool {
        let owns = user_id == record_owner || record_assignee == Some(user_id);

        let Some(project_id) = project_id else {
            return owns;
        };

        if owns && self.resolve(user_id, project_id, own_permission).await {
            return true;
        }

        self.resolve(user_id, project_id, all_permission).await
    }

    /// Membership test: creator counts as a member.
    pub async fn is_project_member(&self, user_id: Uuid, project_id: Uuid) -> bool {
        let Some(project) = self.load_project(project_id).await else {
            return false;
        };
        project.creator == user_id || project.membership(user_id).is_some()
    }

    /// Role-floor test. Bypass global roles and the creator rank as admin.
    pub async fn has_project_role_at_least(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        minimum: ProjectRole,
    ) -> bool {
        if let Some(user) = self.load_user(user_id).await {
            if user.global_role.is_bypass() {
                return true;
            }
        } else {
            return false;
        }

        let Some(project) = self.load_project(project_id).await else {
            return false;
        };

        if project.creator == user_id {
            return true;
        }

        project
            .membership(user_id)
            .map(|role| role.level() >= minimum.level())
            .unwrap_or(false)
    }

    async fn load_user(&self, id: Uuid) -> Option<UserRecord> {
        match self.directory.user(id).await {
            Ok(Some(user)) if user.active => Some(user),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(user_id = %id, error = %err, "user lookup failed, resolving to deny");
                None
            }
        }
    }

    async fn load_project(&self, id: Uuid) -> Option<ProjectRecord> {
        match self.directory.project(id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(project_id = %id, error = %err, "project lookup failed, resolving to deny");
                None
            }
        }
    }

    async fn load_scheme(&self, id: Uuid) -> Option<SchemeRecord> {
        match self.directory.scheme(id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(scheme_id = %id, error = %err, "scheme lookup failed, resolving to deny");
                None
            }
        }
    }
}

fn scheme_allows(
    scheme: &SchemeRecord,
    user: &UserRecord,
    membership: ProjectRole,
    permission: Permission,
) -> bool {
    scheme.grants.iter().any(|grant| {
        grant.permission == permission
            && (grant.project_role == Some(membership) || grant.global_role == Some(user.global_role))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::authz::catalog::GlobalRole;
    use crate::authz::directory::memory::MemoryDirectory;
    use crate::authz::directory::GrantRecord;
    use crate::workflow::WorkflowKind;

    fn user(role: GlobalRole) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            global_role: role,
            department: None,
            protected: false,
            active: true,
        }
    }

    fn project(creator: Uuid, visibility: Visibility) -> ProjectRecord {
        ProjectRecord {
            id: Uuid::new_v4(),
            creator,
            visibility,
            scheme: None,
            workflow: WorkflowKind::Basic,
            custom_transitions: None,
            members: HashMap::new(),
        }
    }

    fn resolver_with(directory: MemoryDirectory) -> PermissionResolver {
        PermissionResolver::new(Arc::new(directory))
    }

    #[tokio::test]
    async fn unknown_user_and_unknown_project_fail_closed() {
        let directory = MemoryDirectory::new();
        let known = user(GlobalRole::Member);
        let known_id = known.id;
        directory.put_user(known.clone());
        let resolver = resolver_with(directory);

        for permission in Permission::ALL {
            assert!(
                !resolver
                    .resolve(Uuid::new_v4(), Uuid::new_v4(), permission)
                    .await
            );
            assert!(!resolver.resolve(known_id, Uuid::new_v4(), permission).await);
        }
    }

    #[tokio::test]
    async fn inactive_user_is_denied() {
        let directory = MemoryDirectory::new();
        let mut actor = user(GlobalRole::Executive);
        actor.active = false;
        let actor_id = actor.id;
        let proj = project(Uuid::new_v4(), Visibility::Public);
        let proj_id = proj.id;
        directory.put_user(actor);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        assert!(
            !resolver
                .resolve(actor_id, proj_id, Permission::BrowseProject)
                .await
        );
    }

    #[tokio::test]
    async fn bypass_roles_pass_every_check_everywhere() {
        let directory = MemoryDirectory::new();
        let superuser = user(GlobalRole::Superuser);
        let executive = user(GlobalRole::Executive);
        let (su_id, ex_id) = (superuser.id, executive.id);
        // a private project neither of them created or joined
        let proj = project(Uuid::new_v4(), Visibility::Private);
        let proj_id = proj.id;
        directory.put_user(superuser);
        directory.put_user(executive);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        for permission in Permission::ALL {
            assert!(resolver.resolve(su_id, proj_id, permission).await);
            assert!(resolver.resolve(ex_id, proj_id, permission).await);
        }
    }

    #[tokio::test]
    async fn creator_passes_regardless_of_scheme_contents() {
        let directory = MemoryDirectory::new();
        let creator = user(GlobalRole::Member);
        let creator_id = creator.id;
        let mut proj = project(creator_id, Visibility::Private);
        let proj_id = proj.id;
        // empty scheme: deny-everything for ordinary members
        let scheme = SchemeRecord {
            id: Uuid::new_v4(),
            grants: Vec::new(),
        };
        proj.scheme = Some(scheme.id);
        directory.put_user(creator);
        directory.put_project(proj);
        directory.put_scheme(scheme);
        let resolver = resolver_with(directory);

        for permission in Permission::ALL {
            assert!(resolver.resolve(creator_id, proj_id, permission).await);
        }
    }

    #[tokio::test]
    async fn non_member_browse_is_public_only() {
        let directory = MemoryDirectory::new();
        let stranger = user(GlobalRole::Member);
        let stranger_id = stranger.id;
        let public = project(Uuid::new_v4(), Visibility::Public);
        let private = project(Uuid::new_v4(), Visibility::Private);
        let (public_id, private_id) = (public.id, private.id);
        directory.put_user(stranger);
        directory.put_project(public);
        directory.put_project(private);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .resolve(stranger_id, public_id, Permission::BrowseProject)
                .await
        );
        assert!(
            !resolver
                .resolve(stranger_id, public_id, Permission::CreateIssues)
                .await
        );
        assert!(
            !resolver
                .resolve(stranger_id, private_id, Permission::BrowseProject)
                .await
        );
    }

    #[tokio::test]
    async fn scheme_is_deny_by_default() {
        let directory = MemoryDirectory::new();
        let lead = user(GlobalRole::Member);
        let lead_id = lead.id;
        let mut proj = project(Uuid::new_v4(), Visibility::Private);
        let proj_id = proj.id;
        proj.members.insert(lead_id, ProjectRole::Lead);
        // the scheme only grants browse to leads; the default table would have
        // granted a lead far more.
        let scheme = SchemeRecord {
            id: Uuid::new_v4(),
            grants: vec![GrantRecord {
                permission: Permission::BrowseProject,
                project_role: Some(ProjectRole::Lead),
                global_role: None,
            }],
        };
        proj.scheme = Some(scheme.id);
        directory.put_user(lead);
        directory.put_project(proj);
        directory.put_scheme(scheme);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .resolve(lead_id, proj_id, Permission::BrowseProject)
                .await
        );
        assert!(
            !resolver
                .resolve(lead_id, proj_id, Permission::EditIssues)
                .await
        );
        assert!(
            !resolver
                .resolve(lead_id, proj_id, Permission::CreateIssues)
                .await
        );
    }

    #[tokio::test]
    async fn scheme_grants_match_on_global_role_too() {
        let directory = MemoryDirectory::new();
        let operator = user(GlobalRole::Operator);
        let operator_id = operator.id;
        let mut proj = project(Uuid::new_v4(), Visibility::Private);
        let proj_id = proj.id;
        proj.members.insert(operator_id, ProjectRole::Viewer);
        let scheme = SchemeRecord {
            id: Uuid::new_v4(),
            grants: vec![GrantRecord {
                permission: Permission::ManageSprints,
                project_role: None,
                global_role: Some(GlobalRole::Operator),
            }],
        };
        proj.scheme = Some(scheme.id);
        directory.put_user(operator);
        directory.put_project(proj);
        directory.put_scheme(scheme);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .resolve(operator_id, proj_id, Permission::ManageSprints)
                .await
        );
        assert!(
            !resolver
                .resolve(operator_id, proj_id, Permission::ManageEpics)
                .await
        );
    }

    #[tokio::test]
    async fn default_table_applies_without_a_scheme() {
        let directory = MemoryDirectory::new();
        let reporter = user(GlobalRole::Member);
        let reporter_id = reporter.id;
        let mut proj = project(Uuid::new_v4(), Visibility::Private);
        let proj_id = proj.id;
        proj.members.insert(reporter_id, ProjectRole::Reporter);
        directory.put_user(reporter);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .resolve(reporter_id, proj_id, Permission::CreateIssues)
                .await
        );
        assert!(
            !resolver
                .resolve(reporter_id, proj_id, Permission::DeleteIssues)
                .await
        );
    }

    #[tokio::test]
    async fn own_variant_is_tried_before_all_variant() {
        let directory = MemoryDirectory::new();
        let author = user(GlobalRole::Member);
        let bystander = user(GlobalRole::Member);
        let (author_id, bystander_id) = (author.id, bystander.id);
        let mut proj = project(Uuid::new_v4(), Visibility::Private);
        let proj_id = proj.id;
        // reporters hold edit_own_issues but not edit_issues in the default
        // table, so the own/all distinction is observable.
        proj.members.insert(author_id, ProjectRole::Reporter);
        proj.members.insert(bystander_id, ProjectRole::Reporter);
        directory.put_user(author);
        directory.put_user(bystander);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .can_edit_record(
                    author_id,
                    author_id,
                    None,
                    Some(proj_id),
                    Permission::EditOwnIssues,
                    Permission::EditIssues,
                )
                .await
        );
        assert!(
            !resolver
                .can_edit_record(
                    bystander_id,
                    author_id,
                    None,
                    Some(proj_id),
                    Permission::EditOwnIssues,
                    Permission::EditIssues,
                )
                .await
        );
    }

    #[tokio::test]
    async fn assignee_counts_as_owner_for_own_checks() {
        let directory = MemoryDirectory::new();
        let assignee = user(GlobalRole::Member);
        let assignee_id = assignee.id;
        let mut proj = project(Uuid::new_v4(), Visibility::Private);
        let proj_id = proj.id;
        proj.members.insert(assignee_id, ProjectRole::Reporter);
        directory.put_user(assignee);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .can_edit_record(
                    assignee_id,
                    Uuid::new_v4(),
                    Some(assignee_id),
                    Some(proj_id),
                    Permission::EditOwnIssues,
                    Permission::EditIssues,
                )
                .await
        );
    }

    #[tokio::test]
    async fn personal_records_are_owner_only() {
        let directory = MemoryDirectory::new();
        let owner = user(GlobalRole::Member);
        let stranger = user(GlobalRole::Member);
        let (owner_id, stranger_id) = (owner.id, stranger.id);
        directory.put_user(owner);
        directory.put_user(stranger);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .can_edit_record(
                    owner_id,
                    owner_id,
                    None,
                    None,
                    Permission::EditOwnIssues,
                    Permission::EditIssues,
                )
                .await
        );
        assert!(
            !resolver
                .can_edit_record(
                    stranger_id,
                    owner_id,
                    None,
                    None,
                    Permission::EditOwnIssues,
                    Permission::EditIssues,
                )
                .await
        );
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let directory = MemoryDirectory::new();
        let member = user(GlobalRole::Member);
        let member_id = member.id;
        let mut proj = project(Uuid::new_v4(), Visibility::Private);
        let proj_id = proj.id;
        proj.members.insert(member_id, ProjectRole::Contributor);
        directory.put_user(member);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        for permission in [Permission::TransitionIssues, Permission::DeleteIssues] {
            let first = resolver.resolve(member_id, proj_id, permission).await;
            let second = resolver.resolve(member_id, proj_id, permission).await;
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn membership_counts_the_creator() {
        let directory = MemoryDirectory::new();
        let creator = user(GlobalRole::Member);
        let member = user(GlobalRole::Member);
        let stranger = user(GlobalRole::Member);
        let (creator_id, member_id, stranger_id) = (creator.id, member.id, stranger.id);
        let mut proj = project(creator_id, Visibility::Public);
        let proj_id = proj.id;
        proj.members.insert(member_id, ProjectRole::Viewer);
        directory.put_user(creator);
        directory.put_user(member);
        directory.put_user(stranger);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        assert!(resolver.is_project_member(creator_id, proj_id).await);
        assert!(resolver.is_project_member(member_id, proj_id).await);
        assert!(!resolver.is_project_member(stranger_id, proj_id).await);
        assert!(!resolver.is_project_member(member_id, Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn role_floor_counts_creator_and_bypass_as_admin() {
        let directory = MemoryDirectory::new();
        let creator = user(GlobalRole::Member);
        let executive = user(GlobalRole::Executive);
        let viewer = user(GlobalRole::Member);
        let (creator_id, executive_id, viewer_id) = (creator.id, executive.id, viewer.id);
        let mut proj = project(creator_id, Visibility::Private);
        let proj_id = proj.id;
        proj.members.insert(viewer_id, ProjectRole::Viewer);
        directory.put_user(creator);
        directory.put_user(executive);
        directory.put_user(viewer);
        directory.put_project(proj);
        let resolver = resolver_with(directory);

        assert!(
            resolver
                .has_project_role_at_least(creator_id, proj_id, ProjectRole::Admin)
                .await
        );
        assert!(
            resolver
                .has_project_role_at_least(executive_id, proj_id, ProjectRole::Admin)
                .await
        );
        assert!(
            !resolver
                .has_project_role_at_least(viewer_id, proj_id, ProjectRole::Reporter)
                .await
        );
        assert!(
            resolver
                .has_project_role_at_least(viewer_id, proj_id, ProjectRole::Viewer)
                .await
        );
    }
}

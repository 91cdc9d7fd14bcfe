//! Global-role administration rules.
//!
//! Separate from project permissions: this governs who may promote, demote,
//! deactivate, or remove accounts on the organization-wide hierarchy. The
//! protected accounts short-circuit everything; their violations are logged
//! under a dedicated target so audits can tell them apart from ordinary
//! denials.

use std::sync::Arc;

use uuid::Uuid;

use super::catalog::{Department, GlobalRole};
use super::directory::{Directory, UserRecord};

/// Outcome of an attempted role change, for activity logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub role: GlobalRole,
    pub department: Option<Department>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthorityError {
    #[error("user {0} not found")]
    UnknownUser(Uuid),
    #[error("protected accounts cannot be modified")]
    ProtectedAccount,
    #[error("not authorized to perform this role change")]
    Denied,
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Clone)]
pub struct RoleAuthority {
    directory: Arc<dyn Directory>,
}

impl RoleAuthority {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// May `actor` set `target`'s global role to `new_role`? Rules in order:
    /// protected target denies everything; a superuser may assign any role; an
    /// executive may assign anything below superuser; a department lead may
    /// only promote base members to operator (and the target then inherits the
    /// lead's department); everyone else is denied.
    pub async fn can_change_role(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        new_role: GlobalRole,
    ) -> bool {
        match self.authorize_change(actor_id, target_id, new_role).await {
            Ok(_) => true,
            Err(err) => {
                self.log_denial(actor_id, target_id, &err);
                false
            }
        }
    }

    pub async fn can_remove_user(&self, actor_id: Uuid, target_id: Uuid) -> bool {
        self.check_remove_user(actor_id, target_id).await.is_ok()
    }

    pub async fn can_deactivate_user(&self, actor_id: Uuid, target_id: Uuid) -> bool {
        // deactivation and removal share the same authority rules
        self.check_deactivate_user(actor_id, target_id).await.is_ok()
    }

    /// Typed variant of [`Self::can_remove_user`] for callers that need to
    /// distinguish a protected-account violation from an ordinary denial.
    pub async fn check_remove_user(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), AuthorityError> {
        self.authorize_account_action(actor_id, target_id)
            .await
            .map_err(|err| {
                self.log_denial(actor_id, target_id, &err);
                err
            })
    }

    pub async fn check_deactivate_user(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), AuthorityError> {
        self.check_remove_user(actor_id, target_id).await
    }

    /// Validate and apply a role change. Department inheritance from a
    /// department-lead promotion is persisted in the same write as the role,
    /// never separately.
    pub async fn change_role(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        new_role: GlobalRole,
    ) -> Result<RoleChange, AuthorityError> {
        let change = self
            .authorize_change(actor_id, target_id, new_role)
            .await
            .map_err(|err| {
                self.log_denial(actor_id, target_id, &err);
                err
            })?;

        self.directory
            .apply_role_change(target_id, change.role, change.department)
            .await
            .map_err(|err| AuthorityError::Storage(err.to_string()))?;

        tracing::info!(
            target: "worklane::authority",
            actor_id = %actor_id,
            target_id = %target_id,
            role = %change.role,
            department = ?change.department,
            "global role changed"
        );

        Ok(change)
    }

    async fn authorize_change(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        new_role: GlobalRole,
    ) -> Result<RoleChange, AuthorityError> {
        let actor = self.load(actor_id).await?;
        let target = self.load(target_id).await?;

        if target.protected {
            return Err(AuthorityError::ProtectedAccount);
        }

        match actor.global_role {
            GlobalRole::Superuser => Ok(RoleChange {
                role: new_role,
                department: None,
            }),
            GlobalRole::Executive => {
                // executives manage everything below the protected tier
                if new_role == GlobalRole::Superuser {
                    Err(AuthorityError::Denied)
                } else {
                    Ok(RoleChange {
                        role: new_role,
                        department: None,
                    })
                }
            }
            GlobalRole::OpsLead | GlobalRole::EngLead => {
                let promotes_base_to_operator =
                    target.global_role == GlobalRole::Member && new_role == GlobalRole::Operator;
                if !promotes_base_to_operator {
                    return Err(AuthorityError::Denied);
                }
                // the promoted account joins the promoter's department;
                // leads don't get to pick.
                Ok(RoleChange {
                    role: new_role,
                    department: actor.global_role.department(),
                })
            }
            GlobalRole::Operator | GlobalRole::Member => Err(AuthorityError::Denied),
        }
    }

    async fn authorize_account_action(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), AuthorityError> {
        let actor = self.load(actor_id).await?;
        let target = self.load(target_id).await?;

        if target.protected {
            return Err(AuthorityError::ProtectedAccount);
        }

        match actor.global_role {
            GlobalRole::Superuser => Ok(()),
            GlobalRole::Executive => {
                if target.global_role == GlobalRole::Superuser {
                    Err(AuthorityError::Denied)
                } else {
                    Ok(())
                }
            }
            GlobalRole::OpsLead | GlobalRole::EngLead => {
                let junior = matches!(
                    target.global_role,
                    GlobalRole::Member | GlobalRole::Operator
                );
                let same_department = target.department == actor.global_role.department();
                if junior && same_department {
                    Ok(())
                } else {
                    Err(AuthorityError::Denied)
                }
            }
            GlobalRole::Operator | GlobalRole::Member => Err(AuthorityError::Denied),
        }
    }

    async fn load(&self, id: Uuid) -> Result<UserRecord, AuthorityError> {
        match self.directory.user(id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(AuthorityError::UnknownUser(id)),
            Err(err) => Err(AuthorityError::Storage(err.to_string())),
        }
    }

    fn log_denial(&self, actor_id: Uuid, target_id: Uuid, err: &AuthorityError) {
        match err {
            AuthorityError::ProtectedAccount => {
                tracing::warn!(
                    target: "worklane::authority",
                    actor_id = %actor_id,
                    target_id = %target_id,
                    "attempted mutation of a protected account"
                );
            }
            other => {
                tracing::debug!(
                    target: "worklane::authority",
                    actor_id = %actor_id,
                    target_id = %target_id,
                    reason = %other,
                    "role authority denied"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::directory::memory::MemoryDirectory;

    fn user(role: GlobalRole) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            global_role: role,
            department: None,
            protected: false,
            active: true,
        }
    }

    fn protected_superuser() -> UserRecord {
        UserRecord {
            protected: true,
            ..user(GlobalRole::Superuser)
        }
    }

    struct Fixture {
        directory: Arc<MemoryDirectory>,
        authority: RoleAuthority,
    }

    impl Fixture {
        fn new() -> Self {
            let directory = Arc::new(MemoryDirectory::new());
            let authority = RoleAuthority::new(directory.clone());
            Self {
                directory,
                authority,
            }
        }

        fn add(&self, record: UserRecord) -> Uuid {
            let id = record.id;
            self.directory.put_user(record);
            id
        }
    }

    #[tokio::test]
    async fn protected_accounts_are_untouchable_by_everyone() {
        let fx = Fixture::new();
        let guarded = fx.add(protected_superuser());
        let other_guarded = fx.add(protected_superuser());

        let actors = [
            fx.add(user(GlobalRole::Superuser)),
            fx.add(user(GlobalRole::Executive)),
            fx.add(user(GlobalRole::OpsLead)),
            fx.add(user(GlobalRole::Member)),
            // even the other protected account
            other_guarded,
        ];

        for actor in actors {
            assert!(
                !fx.authority
                    .can_change_role(actor, guarded, GlobalRole::Member)
                    .await
            );
            assert!(!fx.authority.can_remove_user(actor, guarded).await);
            assert!(!fx.authority.can_deactivate_user(actor, guarded).await);
        }
    }

    #[tokio::test]
    async fn superuser_may_assign_any_role() {
        let fx = Fixture::new();
        let root = fx.add(user(GlobalRole::Superuser));
        let target = fx.add(user(GlobalRole::Member));

        for role in GlobalRole::ALL {
            assert!(fx.authority.can_change_role(root, target, role).await);
        }
    }

    #[tokio::test]
    async fn executive_cannot_mint_superusers() {
        let fx = Fixture::new();
        let executive = fx.add(user(GlobalRole::Executive));
        let target = fx.add(user(GlobalRole::Operator));

        assert!(
            !fx.authority
                .can_change_role(executive, target, GlobalRole::Superuser)
                .await
        );
        assert!(
            fx.authority
                .can_change_role(executive, target, GlobalRole::Executive)
                .await
        );
        assert!(
            fx.authority
                .can_change_role(executive, target, GlobalRole::Member)
                .await
        );
    }

    #[tokio::test]
    async fn department_lead_promotion_is_narrow_and_assigns_department() {
        let fx = Fixture::new();
        let lead = fx.add(user(GlobalRole::OpsLead));
        let recruit = fx.add(user(GlobalRole::Member));

        // only member -> operator is allowed
        assert!(
            !fx.authority
                .can_change_role(lead, recruit, GlobalRole::Executive)
                .await
        );
        assert!(
            !fx.authority
                .can_change_role(lead, recruit, GlobalRole::EngLead)
                .await
        );

        let change = fx
            .authority
            .change_role(lead, recruit, GlobalRole::Operator)
            .await
            .unwrap();
        assert_eq!(change.role, GlobalRole::Operator);
        assert_eq!(change.department, Some(Department::Operations));

        // role and department landed together
        let promoted = fx.directory.user_snapshot(recruit).unwrap();
        assert_eq!(promoted.global_role, GlobalRole::Operator);
        assert_eq!(promoted.department, Some(Department::Operations));

        // an already-promoted operator is out of reach for a lead
        assert!(
            !fx.authority
                .can_change_role(lead, recruit, GlobalRole::Operator)
                .await
        );
    }

    #[tokio::test]
    async fn executive_role_changes_leave_department_alone() {
        let fx = Fixture::new();
        let executive = fx.add(user(GlobalRole::Executive));
        let mut target = user(GlobalRole::Operator);
        target.department = Some(Department::Engineering);
        let target_id = fx.add(target);

        fx.authority
            .change_role(executive, target_id, GlobalRole::OpsLead)
            .await
            .unwrap();

        let updated = fx.directory.user_snapshot(target_id).unwrap();
        assert_eq!(updated.global_role, GlobalRole::OpsLead);
        assert_eq!(updated.department, Some(Department::Engineering));
    }

    #[tokio::test]
    async fn rank_and_file_cannot_change_roles() {
        let fx = Fixture::new();
        let operator = fx.add(user(GlobalRole::Operator));
        let member = fx.add(user(GlobalRole::Member));
        let target = fx.add(user(GlobalRole::Member));

        for actor in [operator, member] {
            assert!(
                !fx.authority
                    .can_change_role(actor, target, GlobalRole::Operator)
                    .await
            );
        }
    }

    #[tokio::test]
    async fn removal_rules_respect_rank_and_department() {
        let fx = Fixture::new();
        let executive = fx.add(user(GlobalRole::Executive));
        let root = fx.add(user(GlobalRole::Superuser));
        let ops_lead = fx.add(user(GlobalRole::OpsLead));

        let mut ops_member = user(GlobalRole::Member);
        ops_member.department = Some(Department::Operations);
        let ops_member_id = fx.add(ops_member);

        let mut eng_member = user(GlobalRole::Member);
        eng_member.department = Some(Department::Engineering);
        let eng_member_id = fx.add(eng_member);

        // executives cannot remove a (non-protected) superuser
        assert!(!fx.authority.can_remove_user(executive, root).await);
        assert!(fx.authority.can_remove_user(executive, ops_member_id).await);

        // leads only reach juniors inside their own department
        assert!(fx.authority.can_remove_user(ops_lead, ops_member_id).await);
        assert!(!fx.authority.can_remove_user(ops_lead, eng_member_id).await);
        assert!(!fx.authority.can_remove_user(ops_lead, executive).await);
    }

    #[tokio::test]
    async fn unknown_users_are_denied() {
        let fx = Fixture::new();
        let actor = fx.add(user(GlobalRole::Superuser));

        assert!(
            !fx.authority
                .can_change_role(actor, Uuid::new_v4(), GlobalRole::Member)
                .await
        );
        assert!(
            !fx.authority
                .can_change_role(Uuid::new_v4(), actor, GlobalRole::Member)
                .await
        );
    }
}

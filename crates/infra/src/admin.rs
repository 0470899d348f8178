//! Membership administration built on top of the policy engine.
//!
//! Invite flow: policy check → subscription limit → store mutation. A team
//! listing is gated by a decision on the project, then served from the
//! store's elevated listing so the rows themselves are never re-evaluated.

use std::sync::Arc;

use thiserror::Error;

use projectgate_auth::{
    AccessError, Action, LimitChecker, LimitStatus, LimitType, MembershipBackend, MembershipError, MembershipStore,
    PolicyEngine, ProjectMembership, ProjectRole, ResourceInstance, ResourceRef, ResourceType, UserContext,
};
use projectgate_core::{ProjectId, UserId};
use projectgate_events::InvalidationEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("subscription limit reached for {limit}: {current} of {max}")]
    LimitReached { limit: LimitType, current: u32, max: u32 },

    #[error(transparent)]
    Membership(#[from] MembershipError),
}

impl AdminError {
    /// Text safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            AdminError::Access(err) => err.public_message(),
            other => other.to_string(),
        }
    }
}

pub struct MembershipAdmin {
    engine: Arc<PolicyEngine>,
    store: Arc<dyn MembershipStore>,
    limits: Arc<dyn LimitChecker>,
}

impl MembershipAdmin {
    pub fn new(engine: Arc<PolicyEngine>, store: Arc<dyn MembershipStore>, limits: Arc<dyn LimitChecker>) -> Self {
        Self { engine, store, limits }
    }

    /// Grant `invitee` a role on `project` on behalf of `ctx`.
    pub fn invite_project_member(
        &self,
        ctx: &UserContext,
        project: ProjectId,
        invitee: UserId,
        role: ProjectRole,
    ) -> Result<InvalidationEvent, AdminError> {
        let proposed = ResourceInstance::new(ResourceType::ProjectMembership, None)
            .in_project(project)
            .with_owner("user_id", invitee);
        self.engine
            .authorize(ctx, Action::Create, &ResourceRef::proposed(proposed))?;

        let organisation = self
            .store
            .project_organisation(project)
            .map_err(AccessError::from)?
            .ok_or(MembershipError::UnknownProject(project))?;

        let status = self.limits.check_limit(organisation, LimitType::ProjectMembers)?;
        ensure_within(LimitType::ProjectMembers, status)?;

        let event = self.store.add_project_member(invitee, project, role)?;
        tracing::info!(
            actor = %ctx.user_id(),
            user_id = %invitee,
            project_id = %project,
            role = %role,
            "project member invited"
        );
        Ok(event)
    }

    /// Live project members, for anyone allowed to read the project.
    pub fn team_listing(&self, ctx: &UserContext, project: ProjectId) -> Result<Vec<ProjectMembership>, AdminError> {
        self.engine
            .authorize(ctx, Action::Read, &ResourceRef::project(project))?;

        let members = self.store.list_project_members(project)?;
        Ok(members.into_iter().filter(|m| !m.dormant).collect())
    }
}

fn ensure_within(limit: LimitType, status: LimitStatus) -> Result<(), AdminError> {
    match status.max {
        Some(max) if !status.allowed => Err(AdminError::LimitReached {
            limit,
            current: status.current,
            max,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use projectgate_auth::OrgRole;
    use projectgate_core::OrganisationId;

    use crate::bootstrap::InMemoryServices;
    use crate::config::EngineConfig;
    use crate::limits::InMemoryLimitChecker;

    struct Fixture {
        services: InMemoryServices,
        admin: MembershipAdmin,
        limits: Arc<InMemoryLimitChecker<crate::bootstrap::InvalidationBus>>,
        org: OrganisationId,
        project: ProjectId,
        manager: UserId,
    }

    fn fixture() -> Fixture {
        let services = InMemoryServices::build(&EngineConfig::default()).unwrap();
        let limits = Arc::new(InMemoryLimitChecker::new(services.memberships.clone()));
        let admin = MembershipAdmin::new(services.engine.clone(), services.memberships.clone(), limits.clone());

        let org = OrganisationId::new();
        let project = ProjectId::new();
        let manager = UserId::new();
        let store = &services.memberships;
        store.register_project(project, org).unwrap();
        store.add_org_member(manager, org, OrgRole::OrgMember).unwrap();
        store.add_project_member(manager, project, ProjectRole::SupplierPm).unwrap();

        Fixture {
            services,
            admin,
            limits,
            org,
            project,
            manager,
        }
    }

    fn org_member(f: &Fixture) -> UserId {
        let user = UserId::new();
        f.services
            .memberships
            .add_org_member(user, f.org, OrgRole::OrgMember)
            .unwrap();
        user
    }

    #[test]
    fn manager_invites_into_project() {
        let f = fixture();
        let invitee = org_member(&f);

        f.admin
            .invite_project_member(&UserContext::standard(f.manager), f.project, invitee, ProjectRole::Contributor)
            .unwrap();

        let team = f
            .admin
            .team_listing(&UserContext::standard(invitee), f.project)
            .unwrap();
        assert_eq!(team.len(), 2);
    }

    #[test]
    fn viewer_cannot_invite() {
        let f = fixture();
        let viewer = org_member(&f);
        f.services
            .memberships
            .add_project_member(viewer, f.project, ProjectRole::Viewer)
            .unwrap();

        let err = f
            .admin
            .invite_project_member(&UserContext::standard(viewer), f.project, org_member(&f), ProjectRole::Viewer)
            .unwrap_err();
        assert!(matches!(err, AdminError::Access(AccessError::Denied(_))));
    }

    #[test]
    fn limit_is_checked_after_the_policy_decision() {
        let f = fixture();
        f.limits.set_limit(f.org, LimitType::ProjectMembers, Some(1));

        let err = f
            .admin
            .invite_project_member(&UserContext::standard(f.manager), f.project, org_member(&f), ProjectRole::Viewer)
            .unwrap_err();
        assert_eq!(
            err,
            AdminError::LimitReached {
                limit: LimitType::ProjectMembers,
                current: 1,
                max: 1
            }
        );
    }

    #[test]
    fn invitee_needs_an_active_org_membership() {
        let f = fixture();

        let err = f
            .admin
            .invite_project_member(&UserContext::standard(f.manager), f.project, UserId::new(), ProjectRole::Viewer)
            .unwrap_err();
        assert!(matches!(
            err,
            AdminError::Membership(MembershipError::InactiveOrgMembership { .. })
        ));
    }

    #[test]
    fn outsiders_cannot_list_the_team() {
        let f = fixture();
        let err = f
            .admin
            .team_listing(&UserContext::standard(UserId::new()), f.project)
            .unwrap_err();
        assert!(err.public_message().starts_with("Access denied"));
    }
}

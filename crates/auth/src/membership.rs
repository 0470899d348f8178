//! Membership rows and the store contracts around them.
//!
//! Two traits, two audiences:
//!
//! - [`MembershipBackend`] is the **trusted read path**. It touches the
//!   backing rows directly and is consumed only by
//!   [`crate::EffectiveAccessResolver`]. Nothing in rule evaluation can reach
//!   it, so resolving access to membership rows can never recurse into the
//!   policy engine.
//! - [`MembershipStore`] adds the mutations and the explicitly elevated
//!   listings used to show team members to end users. Each mutation returns
//!   the [`InvalidationEvent`] it already published.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use projectgate_core::{OrganisationId, ProjectId, ResourceId, UserId};
use projectgate_events::InvalidationEvent;

use crate::error::StoreError;
use crate::roles::{OrgRole, ProjectRole, RoleCatalogError};

/// Organisation membership row. Unique per (user, organisation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMembership {
    pub id: ResourceId,
    pub user_id: UserId,
    pub organisation_id: OrganisationId,
    pub role: OrgRole,
    /// Soft-disable flag; rows are never deleted so audit trails survive.
    pub is_active: bool,
}

/// Project membership row. Unique per (user, project).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMembership {
    pub id: ResourceId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub role: ProjectRole,
    /// Set when the organisation membership was deactivated. A dormant grant
    /// gives no access until explicitly restored.
    #[serde(default)]
    pub dormant: bool,
}

/// Whether re-activating an organisation membership also revives the
/// project grants that went dormant when it was deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreGrants {
    Yes,
    No,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("user {user} is already a member of {tenant}")]
    AlreadyMember { user: UserId, tenant: String },

    #[error("user {user} has no membership in {tenant}")]
    NotMember { user: UserId, tenant: String },

    #[error("user {user} needs an active membership in organisation {organisation}")]
    InactiveOrgMembership {
        user: UserId,
        organisation: OrganisationId,
    },

    #[error("unknown project {0}")]
    UnknownProject(ProjectId),

    /// A project belongs to exactly one organisation for its lifetime.
    #[error("project {project} already belongs to organisation {organisation}")]
    ProjectOrganisationFixed {
        project: ProjectId,
        organisation: OrganisationId,
    },

    #[error(transparent)]
    Role(#[from] RoleCatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The row changed but the invalidation event could not be delivered.
    #[error("failed to publish invalidation: {0}")]
    Publish(String),
}

/// Trusted raw lookups (`RawLookup`). Used only inside effective-access
/// resolution.
pub trait MembershipBackend: Send + Sync {
    fn project_organisation(&self, project: ProjectId) -> Result<Option<OrganisationId>, StoreError>;

    fn org_membership(
        &self,
        user: UserId,
        organisation: OrganisationId,
    ) -> Result<Option<OrgMembership>, StoreError>;

    fn project_membership(
        &self,
        user: UserId,
        project: ProjectId,
    ) -> Result<Option<ProjectMembership>, StoreError>;
}

impl<B> MembershipBackend for Arc<B>
where
    B: MembershipBackend + ?Sized,
{
    fn project_organisation(&self, project: ProjectId) -> Result<Option<OrganisationId>, StoreError> {
        (**self).project_organisation(project)
    }

    fn org_membership(
        &self,
        user: UserId,
        organisation: OrganisationId,
    ) -> Result<Option<OrgMembership>, StoreError> {
        (**self).org_membership(user, organisation)
    }

    fn project_membership(
        &self,
        user: UserId,
        project: ProjectId,
    ) -> Result<Option<ProjectMembership>, StoreError> {
        (**self).project_membership(user, project)
    }
}

/// Membership mutations and elevated listings.
///
/// Implementations serialize mutations per (user, tenant) key and publish the
/// returned event synchronously before reporting success.
pub trait MembershipStore: MembershipBackend {
    fn add_org_member(
        &self,
        user: UserId,
        organisation: OrganisationId,
        role: OrgRole,
    ) -> Result<InvalidationEvent, MembershipError>;

    fn change_org_role(
        &self,
        user: UserId,
        organisation: OrganisationId,
        role: OrgRole,
    ) -> Result<InvalidationEvent, MembershipError>;

    /// Soft-disable; project grants in the organisation become dormant.
    fn deactivate_org_member(
        &self,
        user: UserId,
        organisation: OrganisationId,
    ) -> Result<InvalidationEvent, MembershipError>;

    fn reactivate_org_member(
        &self,
        user: UserId,
        organisation: OrganisationId,
        restore: RestoreGrants,
    ) -> Result<InvalidationEvent, MembershipError>;

    fn add_project_member(
        &self,
        user: UserId,
        project: ProjectId,
        role: ProjectRole,
    ) -> Result<InvalidationEvent, MembershipError>;

    fn change_project_role(
        &self,
        user: UserId,
        project: ProjectId,
        role: ProjectRole,
    ) -> Result<InvalidationEvent, MembershipError>;

    fn remove_project_member(
        &self,
        user: UserId,
        project: ProjectId,
    ) -> Result<InvalidationEvent, MembershipError>;

    /// Explicitly elevated listing; callers gate it with their own decision.
    fn list_project_members(&self, project: ProjectId) -> Result<Vec<ProjectMembership>, MembershipError>;

    fn list_org_members(&self, organisation: OrganisationId) -> Result<Vec<OrgMembership>, MembershipError>;
}

//! Membership change notifications.
//!
//! Every membership mutation publishes exactly one [`InvalidationEvent`]
//! naming the tenant it touched and the users whose effective access may have
//! changed. Consumers drop cached state for those keys only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use projectgate_core::{OrganisationId, ProjectId, UserId};

/// Tenant touched by a membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Organisation-level change: affects every project of the organisation.
    Organisation(OrganisationId),
    /// Project-level change: affects that project only.
    Project(ProjectId),
}

/// What kind of mutation produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChange {
    OrgMemberAdded,
    OrgRoleChanged,
    OrgMemberDeactivated,
    OrgMemberReactivated,
    ProjectMemberAdded,
    ProjectMemberRemoved,
    ProjectRoleChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    event_id: Uuid,
    scope: InvalidationScope,
    keys: Vec<UserId>,
    change: MembershipChange,
    occurred_at: DateTime<Utc>,
}

impl InvalidationEvent {
    pub fn new(
        scope: InvalidationScope,
        keys: Vec<UserId>,
        change: MembershipChange,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            scope,
            keys,
            change,
            occurred_at,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn scope(&self) -> InvalidationScope {
        self.scope
    }

    pub fn keys(&self) -> &[UserId] {
        &self.keys
    }

    pub fn change(&self) -> MembershipChange {
        self.change
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Whether cached access for `user` in `project` (owned by `organisation`)
    /// must be dropped.
    ///
    /// `project` is `None` for organisation-scoped cache entries.
    pub fn covers(
        &self,
        user: UserId,
        organisation: OrganisationId,
        project: Option<ProjectId>,
    ) -> bool {
        if !self.keys.contains(&user) {
            return false;
        }
        match self.scope {
            InvalidationScope::Organisation(org) => org == organisation,
            InvalidationScope::Project(p) => project == Some(p),
        }
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;

use projectgate_auth::{
    MembershipBackend, MembershipError, MembershipStore, OrgMembership, OrgRole, ProjectMembership, ProjectRole,
    ResourceInstance, ResourceLookup, ResourceType, RestoreGrants, RoleCatalog, StoreError,
};
use projectgate_core::{OrganisationId, ProjectId, ResourceId, UserId};
use projectgate_events::{EventBus, InMemoryEventBus, InvalidationEvent, InvalidationScope, MembershipChange};

/// Mutations are serialized per (user, tenant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum MutationKey {
    Org(UserId, OrganisationId),
    Project(UserId, ProjectId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RowRef {
    Org(UserId, OrganisationId),
    Project(UserId, ProjectId),
}

#[derive(Debug, Default)]
struct State {
    projects: HashMap<ProjectId, OrganisationId>,
    org_members: HashMap<(UserId, OrganisationId), OrgMembership>,
    project_members: HashMap<(UserId, ProjectId), ProjectMembership>,
    rows: HashMap<ResourceId, RowRef>,
}

impl State {
    fn projects_of(&self, organisation: OrganisationId) -> Vec<ProjectId> {
        self.projects
            .iter()
            .filter(|(_, org)| **org == organisation)
            .map(|(p, _)| *p)
            .collect()
    }
}

/// Usage counts for one organisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MembershipCounts {
    pub projects: u32,
    /// Active organisation members.
    pub org_members: u32,
    /// Distinct users holding a live grant on any project of the organisation.
    pub project_members: u32,
}

/// In-memory membership store for tests/dev.
///
/// Every successful mutation publishes exactly one [`InvalidationEvent`] on
/// the bus before returning, so listeners such as the decision cache have
/// already dropped affected entries when the caller sees `Ok`.
pub struct InMemoryMembershipStore<B = Arc<InMemoryEventBus<InvalidationEvent>>> {
    state: RwLock<State>,
    key_locks: Mutex<HashMap<MutationKey, Arc<Mutex<()>>>>,
    catalog: Arc<RoleCatalog>,
    bus: B,
}

impl<B> core::fmt::Debug for InMemoryMembershipStore<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryMembershipStore").finish_non_exhaustive()
    }
}

impl<B> InMemoryMembershipStore<B>
where
    B: EventBus<InvalidationEvent>,
{
    pub fn new(catalog: Arc<RoleCatalog>, bus: B) -> Self {
        Self {
            state: RwLock::new(State::default()),
            key_locks: Mutex::new(HashMap::new()),
            catalog,
            bus,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Record that `project` belongs to `organisation`. Idempotent; moving a
    /// project to another organisation is refused.
    pub fn register_project(&self, project: ProjectId, organisation: OrganisationId) -> Result<(), MembershipError> {
        let mut state = self.write()?;
        match state.projects.get(&project) {
            Some(existing) if *existing != organisation => Err(MembershipError::ProjectOrganisationFixed {
                project,
                organisation: *existing,
            }),
            Some(_) => Ok(()),
            None => {
                state.projects.insert(project, organisation);
                tracing::info!(project_id = %project, organisation_id = %organisation, "project registered");
                Ok(())
            }
        }
    }

    pub fn counts(&self, organisation: OrganisationId) -> Result<MembershipCounts, StoreError> {
        let state = self.read()?;
        let projects = state.projects_of(organisation);

        let org_members = state
            .org_members
            .values()
            .filter(|m| m.organisation_id == organisation && m.is_active)
            .count();

        let project_members: BTreeSet<UserId> = state
            .project_members
            .values()
            .filter(|m| !m.dormant && projects.contains(&m.project_id))
            .map(|m| m.user_id)
            .collect();

        Ok(MembershipCounts {
            projects: projects.len() as u32,
            org_members: org_members as u32,
            project_members: project_members.len() as u32,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::unavailable("membership state lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::unavailable("membership state lock poisoned"))
    }

    fn with_key<T>(
        &self,
        key: MutationKey,
        f: impl FnOnce() -> Result<T, MembershipError>,
    ) -> Result<T, MembershipError> {
        let lock = {
            let mut locks = self
                .key_locks
                .lock()
                .map_err(|_| StoreError::unavailable("membership key table poisoned"))?;
            locks.entry(key).or_default().clone()
        };
        let result = {
            let _guard = lock
                .lock()
                .map_err(|_| StoreError::unavailable("membership key lock poisoned"))?;
            f()
        };

        // Clones are taken and released under the table lock, so a table entry
        // with no other holder has nobody waiting on it.
        if let Ok(mut locks) = self.key_locks.lock() {
            drop(lock);
            if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&key);
            }
        }
        result
    }

    #[cfg(test)]
    fn key_lock_count(&self) -> usize {
        self.key_locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn publish(
        &self,
        scope: InvalidationScope,
        user: UserId,
        change: MembershipChange,
    ) -> Result<InvalidationEvent, MembershipError> {
        let event = InvalidationEvent::new(scope, vec![user], change, Utc::now());
        self.bus
            .publish(event.clone())
            .map_err(|err| MembershipError::Publish(format!("{err:?}")))?;
        Ok(event)
    }

    fn set_dormant(state: &mut State, user: UserId, organisation: OrganisationId, dormant: bool) -> usize {
        let mut touched = 0;
        for project in state.projects_of(organisation) {
            if let Some(grant) = state.project_members.get_mut(&(user, project)) {
                if grant.dormant != dormant {
                    grant.dormant = dormant;
                    touched += 1;
                }
            }
        }
        touched
    }
}

fn org_tenant(organisation: OrganisationId) -> String {
    format!("organisation {organisation}")
}

fn project_tenant(project: ProjectId) -> String {
    format!("project {project}")
}

impl<B> MembershipBackend for InMemoryMembershipStore<B>
where
    B: EventBus<InvalidationEvent>,
{
    fn project_organisation(&self, project: ProjectId) -> Result<Option<OrganisationId>, StoreError> {
        Ok(self.read()?.projects.get(&project).copied())
    }

    fn org_membership(
        &self,
        user: UserId,
        organisation: OrganisationId,
    ) -> Result<Option<OrgMembership>, StoreError> {
        Ok(self.read()?.org_members.get(&(user, organisation)).cloned())
    }

    fn project_membership(
        &self,
        user: UserId,
        project: ProjectId,
    ) -> Result<Option<ProjectMembership>, StoreError> {
        Ok(self.read()?.project_members.get(&(user, project)).cloned())
    }
}

impl<B> MembershipStore for InMemoryMembershipStore<B>
where
    B: EventBus<InvalidationEvent>,
{
    fn add_org_member(
        &self,
        user: UserId,
        organisation: OrganisationId,
        role: OrgRole,
    ) -> Result<InvalidationEvent, MembershipError> {
        let role = self.catalog.validate_org_role(role)?;
        self.with_key(MutationKey::Org(user, organisation), || {
            {
                let mut state = self.write()?;
                if state.org_members.contains_key(&(user, organisation)) {
                    return Err(MembershipError::AlreadyMember {
                        user,
                        tenant: org_tenant(organisation),
                    });
                }
                let id = ResourceId::new();
                state.org_members.insert(
                    (user, organisation),
                    OrgMembership {
                        id,
                        user_id: user,
                        organisation_id: organisation,
                        role,
                        is_active: true,
                    },
                );
                state.rows.insert(id, RowRef::Org(user, organisation));
            }
            tracing::info!(user_id = %user, organisation_id = %organisation, role = %role, "organisation member added");
            self.publish(
                InvalidationScope::Organisation(organisation),
                user,
                MembershipChange::OrgMemberAdded,
            )
        })
    }

    fn change_org_role(
        &self,
        user: UserId,
        organisation: OrganisationId,
        role: OrgRole,
    ) -> Result<InvalidationEvent, MembershipError> {
        let role = self.catalog.validate_org_role(role)?;
        self.with_key(MutationKey::Org(user, organisation), || {
            {
                let mut state = self.write()?;
                let membership = state
                    .org_members
                    .get_mut(&(user, organisation))
                    .ok_or_else(|| MembershipError::NotMember {
                        user,
                        tenant: org_tenant(organisation),
                    })?;
                membership.role = role;
            }
            tracing::info!(user_id = %user, organisation_id = %organisation, role = %role, "organisation role changed");
            self.publish(
                InvalidationScope::Organisation(organisation),
                user,
                MembershipChange::OrgRoleChanged,
            )
        })
    }

    fn deactivate_org_member(
        &self,
        user: UserId,
        organisation: OrganisationId,
    ) -> Result<InvalidationEvent, MembershipError> {
        self.with_key(MutationKey::Org(user, organisation), || {
            let dormant = {
                let mut state = self.write()?;
                let membership = state
                    .org_members
                    .get_mut(&(user, organisation))
                    .ok_or_else(|| MembershipError::NotMember {
                        user,
                        tenant: org_tenant(organisation),
                    })?;
                membership.is_active = false;
                Self::set_dormant(&mut state, user, organisation, true)
            };
            tracing::info!(
                user_id = %user,
                organisation_id = %organisation,
                dormant_grants = dormant,
                "organisation member deactivated"
            );
            self.publish(
                InvalidationScope::Organisation(organisation),
                user,
                MembershipChange::OrgMemberDeactivated,
            )
        })
    }

    fn reactivate_org_member(
        &self,
        user: UserId,
        organisation: OrganisationId,
        restore: RestoreGrants,
    ) -> Result<InvalidationEvent, MembershipError> {
        self.with_key(MutationKey::Org(user, organisation), || {
            let restored = {
                let mut state = self.write()?;
                let membership = state
                    .org_members
                    .get_mut(&(user, organisation))
                    .ok_or_else(|| MembershipError::NotMember {
                        user,
                        tenant: org_tenant(organisation),
                    })?;
                membership.is_active = true;
                match restore {
                    RestoreGrants::Yes => Self::set_dormant(&mut state, user, organisation, false),
                    RestoreGrants::No => 0,
                }
            };
            tracing::info!(
                user_id = %user,
                organisation_id = %organisation,
                restored_grants = restored,
                "organisation member reactivated"
            );
            self.publish(
                InvalidationScope::Organisation(organisation),
                user,
                MembershipChange::OrgMemberReactivated,
            )
        })
    }

    /// Adding a member whose grant went dormant revives it with `role`.
    fn add_project_member(
        &self,
        user: UserId,
        project: ProjectId,
        role: ProjectRole,
    ) -> Result<InvalidationEvent, MembershipError> {
        let role = self.catalog.validate_project_role(role)?;
        self.with_key(MutationKey::Project(user, project), || {
            {
                let mut state = self.write()?;
                let organisation = *state
                    .projects
                    .get(&project)
                    .ok_or(MembershipError::UnknownProject(project))?;

                let active = state
                    .org_members
                    .get(&(user, organisation))
                    .is_some_and(|m| m.is_active);
                if !active {
                    return Err(MembershipError::InactiveOrgMembership { user, organisation });
                }

                match state.project_members.get_mut(&(user, project)) {
                    Some(grant) if grant.dormant => {
                        grant.dormant = false;
                        grant.role = role;
                    }
                    Some(_) => {
                        return Err(MembershipError::AlreadyMember {
                            user,
                            tenant: project_tenant(project),
                        });
                    }
                    None => {
                        let id = ResourceId::new();
                        state.project_members.insert(
                            (user, project),
                            ProjectMembership {
                                id,
                                user_id: user,
                                project_id: project,
                                role,
                                dormant: false,
                            },
                        );
                        state.rows.insert(id, RowRef::Project(user, project));
                    }
                }
            }
            tracing::info!(user_id = %user, project_id = %project, role = %role, "project member added");
            self.publish(
                InvalidationScope::Project(project),
                user,
                MembershipChange::ProjectMemberAdded,
            )
        })
    }

    fn change_project_role(
        &self,
        user: UserId,
        project: ProjectId,
        role: ProjectRole,
    ) -> Result<InvalidationEvent, MembershipError> {
        let role = self.catalog.validate_project_role(role)?;
        self.with_key(MutationKey::Project(user, project), || {
            {
                let mut state = self.write()?;
                let grant = state
                    .project_members
                    .get_mut(&(user, project))
                    .ok_or_else(|| MembershipError::NotMember {
                        user,
                        tenant: project_tenant(project),
                    })?;
                grant.role = role;
            }
            tracing::info!(user_id = %user, project_id = %project, role = %role, "project role changed");
            self.publish(
                InvalidationScope::Project(project),
                user,
                MembershipChange::ProjectRoleChanged,
            )
        })
    }

    fn remove_project_member(&self, user: UserId, project: ProjectId) -> Result<InvalidationEvent, MembershipError> {
        self.with_key(MutationKey::Project(user, project), || {
            {
                let mut state = self.write()?;
                let removed = state
                    .project_members
                    .remove(&(user, project))
                    .ok_or_else(|| MembershipError::NotMember {
                        user,
                        tenant: project_tenant(project),
                    })?;
                state.rows.remove(&removed.id);
            }
            tracing::info!(user_id = %user, project_id = %project, "project member removed");
            self.publish(
                InvalidationScope::Project(project),
                user,
                MembershipChange::ProjectMemberRemoved,
            )
        })
    }

    fn list_project_members(&self, project: ProjectId) -> Result<Vec<ProjectMembership>, MembershipError> {
        let state = self.read()?;
        if !state.projects.contains_key(&project) {
            return Err(MembershipError::UnknownProject(project));
        }
        let mut members: Vec<_> = state
            .project_members
            .values()
            .filter(|m| m.project_id == project)
            .cloned()
            .collect();
        members.sort_by_key(|m| (m.role, m.user_id));
        Ok(members)
    }

    fn list_org_members(&self, organisation: OrganisationId) -> Result<Vec<OrgMembership>, MembershipError> {
        let state = self.read()?;
        let mut members: Vec<_> = state
            .org_members
            .values()
            .filter(|m| m.organisation_id == organisation)
            .cloned()
            .collect();
        members.sort_by_key(|m| (m.role, m.user_id));
        Ok(members)
    }
}

/// Membership rows as resources: they carry their tenant and their member as
/// the `user_id` owner, so the resolver never needs the policy engine to
/// place them.
impl<B> ResourceLookup for InMemoryMembershipStore<B>
where
    B: EventBus<InvalidationEvent>,
{
    fn load(&self, resource_type: ResourceType, id: ResourceId) -> Result<Option<ResourceInstance>, StoreError> {
        let state = self.read()?;
        let row = match (resource_type, state.rows.get(&id)) {
            (ResourceType::OrganisationMembership, Some(RowRef::Org(user, org))) => {
                state.org_members.get(&(*user, *org)).map(|m| {
                    ResourceInstance::new(resource_type, Some(m.id))
                        .in_organisation(m.organisation_id)
                        .with_owner("user_id", m.user_id)
                })
            }
            (ResourceType::ProjectMembership, Some(RowRef::Project(user, project))) => {
                state.project_members.get(&(*user, *project)).map(|m| {
                    ResourceInstance::new(resource_type, Some(m.id))
                        .in_project(m.project_id)
                        .with_owner("user_id", m.user_id)
                })
            }
            _ => None,
        };
        Ok(row)
    }
}

//! Maps a resource to the tenant that owns it.
//!
//! Direct resources carry their project or organisation id and resolve
//! without a parent lookup. Child resources follow `parent` links, bounded by
//! a configurable number of hops that can never exceed [`MAX_PARENT_HOPS`].
//! Projects and organisations resolve to themselves with no lookup at all.

use std::collections::HashSet;
use std::sync::Arc;

use projectgate_core::{OrganisationId, ProjectId, ResourceId};

use crate::effective::Scope;
use crate::error::{AccessError, StoreError};
use crate::resource::{ResourceInstance, ResourceKey, ResourceRef, ResourceTarget, ResourceType, Tenancy};

/// Hard cap on parent hops.
pub const MAX_PARENT_HOPS: u8 = 2;

/// Default bound: one parent lookup.
pub const DEFAULT_PARENT_HOPS: u8 = 1;

/// Backing store for resource rows.
pub trait ResourceLookup: Send + Sync {
    fn load(&self, resource_type: ResourceType, id: ResourceId) -> Result<Option<ResourceInstance>, StoreError>;
}

impl<L> ResourceLookup for Arc<L>
where
    L: ResourceLookup + ?Sized,
{
    fn load(&self, resource_type: ResourceType, id: ResourceId) -> Result<Option<ResourceInstance>, StoreError> {
        (**self).load(resource_type, id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub instance: ResourceInstance,
    pub scope: Scope,
    /// Parent links followed.
    pub hops: u8,
}

pub struct ScopeResolver {
    lookup: Arc<dyn ResourceLookup>,
    max_hops: u8,
}

impl ScopeResolver {
    pub fn new(lookup: Arc<dyn ResourceLookup>) -> Self {
        Self {
            lookup,
            max_hops: DEFAULT_PARENT_HOPS,
        }
    }

    /// Clamped to `1..=MAX_PARENT_HOPS`.
    pub fn with_max_hops(mut self, hops: u8) -> Self {
        self.max_hops = hops.clamp(1, MAX_PARENT_HOPS);
        self
    }

    pub fn max_hops(&self) -> u8 {
        self.max_hops
    }

    pub fn resolve(&self, target: &ResourceRef) -> Result<ResolvedResource, AccessError> {
        let resource_type = target.resource_type();

        let instance = match target.target() {
            ResourceTarget::Existing(id) => match resource_type {
                ResourceType::Project => {
                    let project = ProjectId::from_uuid(*id.as_uuid());
                    return Ok(ResolvedResource {
                        instance: ResourceInstance::new(resource_type, Some(*id)).in_project(project),
                        scope: Scope::Project(project),
                        hops: 0,
                    });
                }
                ResourceType::Organisation => {
                    let org = OrganisationId::from_uuid(*id.as_uuid());
                    return Ok(ResolvedResource {
                        instance: ResourceInstance::new(resource_type, Some(*id)).in_organisation(org),
                        scope: Scope::Organisation(org),
                        hops: 0,
                    });
                }
                _ => self
                    .lookup
                    .load(resource_type, *id)?
                    .ok_or_else(|| AccessError::ambiguous(resource_type, Some(*id), "not found"))?,
            },
            ResourceTarget::Proposed(instance) => (**instance).clone(),
        };

        if instance.resource_type != resource_type {
            return Err(AccessError::ambiguous(
                resource_type,
                instance.id,
                format!("row is a {}", instance.resource_type),
            ));
        }

        let (scope, hops) = self.scope_of(&instance)?;
        Ok(ResolvedResource { instance, scope, hops })
    }

    /// Project owning an existing resource.
    pub fn resolve_project(&self, resource_type: ResourceType, id: ResourceId) -> Result<ProjectId, AccessError> {
        match self.resolve(&ResourceRef::existing(resource_type, id))?.scope {
            Scope::Project(project) => Ok(project),
            Scope::Organisation(_) => Err(AccessError::ambiguous(
                resource_type,
                Some(id),
                "organisation-scoped resource has no project",
            )),
        }
    }

    fn scope_of(&self, instance: &ResourceInstance) -> Result<(Scope, u8), AccessError> {
        let ambiguous = |detail: &str| AccessError::ambiguous(instance.resource_type, instance.id, detail);

        match instance.resource_type.tenancy() {
            Tenancy::Organisation => instance
                .organisation_id
                .map(|o| (Scope::Organisation(o), 0))
                .ok_or_else(|| ambiguous("no organisation reference")),
            Tenancy::Project => instance
                .project_id
                .map(|p| (Scope::Project(p), 0))
                .ok_or_else(|| ambiguous("no project reference")),
            Tenancy::Child(expected) => {
                match instance.parent {
                    Some(parent) if parent.resource_type != expected => {
                        return Err(ambiguous(&format!(
                            "parent is a {}, expected {expected}",
                            parent.resource_type
                        )));
                    }
                    None => return Err(ambiguous("no parent reference")),
                    Some(_) => {}
                }

                let (scope, hops) = self.walk(instance)?;
                // A child may echo its project id, but it must agree with the parent's.
                if let Some(own) = instance.project_id {
                    if scope != Scope::Project(own) {
                        return Err(ambiguous("project reference disagrees with parent"));
                    }
                }
                Ok((scope, hops))
            }
        }
    }

    fn walk(&self, start: &ResourceInstance) -> Result<(Scope, u8), AccessError> {
        let ambiguous = |detail: String| AccessError::ambiguous(start.resource_type, start.id, detail);

        let mut visited: HashSet<ResourceKey> = HashSet::new();
        if let Some(key) = start.key() {
            visited.insert(key);
        }

        let mut next = start.parent;
        let mut hops = 0u8;
        loop {
            let Some(key) = next else {
                return Err(ambiguous("parent chain ends without a tenant".to_string()));
            };
            if hops >= self.max_hops {
                return Err(ambiguous(format!("parent chain exceeds {} hop(s)", self.max_hops)));
            }
            if !visited.insert(key) {
                return Err(ambiguous(format!("parent cycle at {} {}", key.resource_type, key.id)));
            }

            let row = self
                .lookup
                .load(key.resource_type, key.id)?
                .ok_or_else(|| ambiguous(format!("parent {} {} not found", key.resource_type, key.id)))?;
            hops += 1;

            match key.resource_type.tenancy() {
                Tenancy::Project => {
                    return row
                        .project_id
                        .map(|p| (Scope::Project(p), hops))
                        .ok_or_else(|| ambiguous("parent has no project reference".to_string()));
                }
                Tenancy::Organisation => {
                    return row
                        .organisation_id
                        .map(|o| (Scope::Organisation(o), hops))
                        .ok_or_else(|| ambiguous("parent has no organisation reference".to_string()));
                }
                Tenancy::Child(_) => next = row.parent,
            }
        }
    }
}

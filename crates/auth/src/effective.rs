//! Dual-membership resolution: the single chokepoint for tenancy scoping.
//!
//! [`EffectiveAccessResolver::resolve_effective`] turns (user, tenant) into an
//! [`EffectiveAccess`]:
//!
//! 1. platform superuser → elevated, nothing else is read;
//! 2. the project's organisation is fetched, then the organisation
//!    membership; absent or inactive → no access (never skipped);
//! 3. elevated organisation role → access without a project grant;
//! 4. otherwise the project membership decides (absent or dormant → no access).
//!
//! Only this module reads [`MembershipBackend`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use projectgate_core::{OrganisationId, ProjectId, UserId};

use crate::cache::DecisionCache;
use crate::error::AccessError;
use crate::identity::UserContext;
use crate::membership::MembershipBackend;
use crate::roles::{OrgRole, ProjectRole, RoleCatalog};

/// Tenant a resource resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Organisation(OrganisationId),
    Project(ProjectId),
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::Organisation(id) => write!(f, "organisation:{id}"),
            Scope::Project(id) => write!(f, "project:{id}"),
        }
    }
}

/// Why access is elevated above ordinary project membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Elevation {
    PlatformSuperuser,
    OrgRole { role: OrgRole },
}

impl core::fmt::Display for Elevation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Elevation::PlatformSuperuser => f.write_str("platform superuser"),
            Elevation::OrgRole { role } => write!(f, "organisation role {role}"),
        }
    }
}

/// Why a user has no access to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessGap {
    UnknownProject,
    NoOrgMembership,
    OrgMembershipInactive,
    NoProjectGrant,
    DormantProjectGrant,
    /// The stored role is not part of the configured taxonomy.
    RoleNotEnabled,
}

impl core::fmt::Display for AccessGap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AccessGap::UnknownProject => "unknown project",
            AccessGap::NoOrgMembership => "no organisation membership",
            AccessGap::OrgMembershipInactive => "organisation membership inactive",
            AccessGap::NoProjectGrant => "no project grant",
            AccessGap::DormantProjectGrant => "project grant dormant",
            AccessGap::RoleNotEnabled => "role not enabled",
        };
        f.write_str(s)
    }
}

/// Result of dual-membership resolution for one (user, tenant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveAccess {
    pub scope: Scope,
    /// Organisation owning the scope. `None` for superusers (never looked up)
    /// and unknown projects.
    pub organisation_id: Option<OrganisationId>,
    pub present: bool,
    pub org_role: Option<OrgRole>,
    pub project_role: Option<ProjectRole>,
    pub elevation: Option<Elevation>,
    pub gap: Option<AccessGap>,
}

impl EffectiveAccess {
    pub fn superuser(scope: Scope) -> Self {
        Self {
            scope,
            organisation_id: None,
            present: true,
            org_role: None,
            project_role: None,
            elevation: Some(Elevation::PlatformSuperuser),
            gap: None,
        }
    }

    pub fn absent(
        scope: Scope,
        organisation_id: Option<OrganisationId>,
        org_role: Option<OrgRole>,
        gap: AccessGap,
    ) -> Self {
        Self {
            scope,
            organisation_id,
            present: false,
            org_role,
            project_role: None,
            elevation: None,
            gap: Some(gap),
        }
    }

    pub fn elevated_by_org(scope: Scope, organisation_id: OrganisationId, role: OrgRole) -> Self {
        Self {
            scope,
            organisation_id: Some(organisation_id),
            present: true,
            org_role: Some(role),
            project_role: None,
            elevation: Some(Elevation::OrgRole { role }),
            gap: None,
        }
    }

    pub fn granted(
        scope: Scope,
        organisation_id: OrganisationId,
        org_role: OrgRole,
        project_role: Option<ProjectRole>,
    ) -> Self {
        Self {
            scope,
            organisation_id: Some(organisation_id),
            present: true,
            org_role: Some(org_role),
            project_role,
            elevation: None,
            gap: None,
        }
    }
}

/// Resolves [`EffectiveAccess`] through the trusted membership read path.
pub struct EffectiveAccessResolver {
    backend: Arc<dyn MembershipBackend>,
    catalog: Arc<RoleCatalog>,
    cache: Option<Arc<DecisionCache>>,
}

impl EffectiveAccessResolver {
    pub fn new(backend: Arc<dyn MembershipBackend>, catalog: Arc<RoleCatalog>) -> Self {
        Self {
            backend,
            catalog,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> Option<&Arc<DecisionCache>> {
        self.cache.as_ref()
    }

    #[instrument(
        level = "debug",
        skip(self, ctx),
        fields(user_id = %ctx.user_id(), scope = %scope)
    )]
    pub fn resolve_effective(&self, ctx: &UserContext, scope: Scope) -> Result<EffectiveAccess, AccessError> {
        if ctx.is_platform_superuser() {
            return Ok(EffectiveAccess::superuser(scope));
        }

        let user = ctx.user_id();
        let Some(cache) = &self.cache else {
            return self.resolve_uncached(user, scope);
        };

        if let Some(hit) = cache.get(user, scope) {
            return Ok(hit);
        }

        let epoch = cache.epoch();
        let access = self.resolve_uncached(user, scope)?;
        cache.insert(user, scope, access.clone(), epoch);
        Ok(access)
    }

    fn resolve_uncached(&self, user: UserId, scope: Scope) -> Result<EffectiveAccess, AccessError> {
        let (organisation, project) = match scope {
            Scope::Organisation(org) => (org, None),
            Scope::Project(project) => match self.backend.project_organisation(project)? {
                Some(org) => (org, Some(project)),
                None => {
                    return Ok(EffectiveAccess::absent(scope, None, None, AccessGap::UnknownProject));
                }
            },
        };

        let membership = match self.backend.org_membership(user, organisation)? {
            None => {
                return Ok(EffectiveAccess::absent(
                    scope,
                    Some(organisation),
                    None,
                    AccessGap::NoOrgMembership,
                ));
            }
            Some(m) if !m.is_active => {
                return Ok(EffectiveAccess::absent(
                    scope,
                    Some(organisation),
                    Some(m.role),
                    AccessGap::OrgMembershipInactive,
                ));
            }
            Some(m) => m,
        };

        if !self.catalog.is_org_role_enabled(membership.role) {
            tracing::warn!(
                user_id = %user,
                role = %membership.role,
                "organisation membership holds a role outside the configured taxonomy"
            );
            return Ok(EffectiveAccess::absent(
                scope,
                Some(organisation),
                Some(membership.role),
                AccessGap::RoleNotEnabled,
            ));
        }

        if self.catalog.is_elevated_org_role(membership.role) {
            return Ok(EffectiveAccess::elevated_by_org(scope, organisation, membership.role));
        }

        let Some(project) = project else {
            return Ok(EffectiveAccess::granted(scope, organisation, membership.role, None));
        };

        let access = match self.backend.project_membership(user, project)? {
            None => EffectiveAccess::absent(
                scope,
                Some(organisation),
                Some(membership.role),
                AccessGap::NoProjectGrant,
            ),
            Some(pm) if pm.dormant => EffectiveAccess::absent(
                scope,
                Some(organisation),
                Some(membership.role),
                AccessGap::DormantProjectGrant,
            ),
            Some(pm) if !self.catalog.is_project_role_enabled(pm.role) => {
                tracing::warn!(
                    user_id = %user,
                    role = %pm.role,
                    "project membership holds a role outside the configured taxonomy"
                );
                EffectiveAccess::absent(
                    scope,
                    Some(organisation),
                    Some(membership.role),
                    AccessGap::RoleNotEnabled,
                )
            }
            Some(pm) => EffectiveAccess::granted(scope, organisation, membership.role, Some(pm.role)),
        };

        Ok(access)
    }
}

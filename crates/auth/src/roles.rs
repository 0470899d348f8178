//! Role catalog: closed role enumerations plus the configured taxonomy.
//!
//! Role names are parsed once, at the boundary, into exhaustive enums. Which
//! of those roles a deployment actually uses, which organisation roles are
//! elevated and the advisory levels are configuration data
//! ([`RoleCatalogConfig`]), not code.
//!
//! Levels are a partial ordering used for UI gating only. Rule evaluation
//! never consults them: finance roles sit on opposite counterpart sides and
//! have no level at all.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleCatalogError {
    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("role '{0}' is not enabled in the configured taxonomy")]
    Disabled(String),

    #[error("role '{0}' is configured more than once")]
    Duplicate(String),

    #[error("role catalog must enable at least one organisation role")]
    NoOrgRoles,

    #[error("invalid role catalog document: {0}")]
    Json(String),
}

/// Organisation-level role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    OrgAdmin,
    SupplierPm,
    OrgMember,
}

/// Project-level role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    /// Legacy project administrator; disabled in the default taxonomy.
    Admin,
    SupplierPm,
    CustomerPm,
    SupplierFinance,
    CustomerFinance,
    Contributor,
    Viewer,
}

/// Side of the commercial relationship a role acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counterpart {
    /// The party performing the work.
    Supplier,
    /// The party receiving (and paying for) the work.
    Customer,
}

/// Platform-wide role derived from the identity provider's superuser flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
    Standard,
    Superuser,
}

impl PlatformRole {
    pub fn satisfies(self, required: PlatformRole) -> bool {
        self >= required
    }
}

macro_rules! impl_role_strings {
    ($t:ident, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $t {
            pub const ALL: &'static [$t] = &[$($t::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($t::$variant => $s),+
                }
            }
        }

        impl FromStr for $t {
            type Err = RoleCatalogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($t::$variant),)+
                    other => Err(RoleCatalogError::UnknownRole(other.to_string())),
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_role_strings!(OrgRole, {
    OrgAdmin => "org_admin",
    SupplierPm => "supplier_pm",
    OrgMember => "org_member",
});

impl_role_strings!(ProjectRole, {
    Admin => "admin",
    SupplierPm => "supplier_pm",
    CustomerPm => "customer_pm",
    SupplierFinance => "supplier_finance",
    CustomerFinance => "customer_finance",
    Contributor => "contributor",
    Viewer => "viewer",
});

impl_role_strings!(PlatformRole, {
    Standard => "standard",
    Superuser => "superuser",
});

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRoleConfig {
    pub role: OrgRole,
    /// Grants access to every project of the organisation without a project grant.
    #[serde(default)]
    pub elevated: bool,
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRoleConfig {
    pub role: ProjectRole,
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default)]
    pub counterpart: Option<Counterpart>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Externally supplied role taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCatalogConfig {
    pub org_roles: Vec<OrgRoleConfig>,
    pub project_roles: Vec<ProjectRoleConfig>,
}

impl Default for RoleCatalogConfig {
    fn default() -> Self {
        fn org(role: OrgRole, elevated: bool, level: u8, description: &str) -> OrgRoleConfig {
            OrgRoleConfig {
                role,
                elevated,
                level: Some(level),
                description: Some(description.to_string()),
            }
        }

        fn project(
            role: ProjectRole,
            level: Option<u8>,
            counterpart: Option<Counterpart>,
            capabilities: &[&str],
        ) -> ProjectRoleConfig {
            ProjectRoleConfig {
                role,
                level,
                counterpart,
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                description: None,
            }
        }

        Self {
            org_roles: vec![
                org(OrgRole::OrgAdmin, true, 100, "Full access to every project in the organisation"),
                org(OrgRole::SupplierPm, true, 80, "Supplier-side manager across all projects"),
                org(OrgRole::OrgMember, false, 10, "Needs an explicit project grant"),
            ],
            project_roles: vec![
                project(
                    ProjectRole::SupplierPm,
                    Some(80),
                    Some(Counterpart::Supplier),
                    &["manage_project", "manage_members", "approve_timesheets", "approve_variations"],
                ),
                project(
                    ProjectRole::CustomerPm,
                    Some(60),
                    Some(Counterpart::Customer),
                    &["approve_milestones", "approve_variations"],
                ),
                project(
                    ProjectRole::SupplierFinance,
                    None,
                    Some(Counterpart::Supplier),
                    &["validate_expenses", "manage_invoices"],
                ),
                project(
                    ProjectRole::CustomerFinance,
                    None,
                    Some(Counterpart::Customer),
                    &["validate_expenses"],
                ),
                project(ProjectRole::Contributor, Some(30), None, &["record_time", "record_expenses"]),
                project(ProjectRole::Viewer, Some(10), None, &["read"]),
            ],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Validated role taxonomy in force for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCatalog {
    org: BTreeMap<OrgRole, OrgRoleConfig>,
    project: BTreeMap<ProjectRole, ProjectRoleConfig>,
}

impl Default for RoleCatalog {
    fn default() -> Self {
        let config = RoleCatalogConfig::default();
        Self {
            org: config.org_roles.into_iter().map(|c| (c.role, c)).collect(),
            project: config.project_roles.into_iter().map(|c| (c.role, c)).collect(),
        }
    }
}

impl RoleCatalog {
    pub fn from_config(config: RoleCatalogConfig) -> Result<Self, RoleCatalogError> {
        if config.org_roles.is_empty() {
            return Err(RoleCatalogError::NoOrgRoles);
        }

        let mut org = BTreeMap::new();
        for entry in config.org_roles {
            let role = entry.role;
            if org.insert(role, entry).is_some() {
                return Err(RoleCatalogError::Duplicate(role.to_string()));
            }
        }

        let mut project = BTreeMap::new();
        for entry in config.project_roles {
            let role = entry.role;
            if project.insert(role, entry).is_some() {
                return Err(RoleCatalogError::Duplicate(role.to_string()));
            }
        }

        Ok(Self { org, project })
    }

    pub fn from_json(json: &str) -> Result<Self, RoleCatalogError> {
        let config: RoleCatalogConfig =
            serde_json::from_str(json).map_err(|e| RoleCatalogError::Json(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn is_org_role_enabled(&self, role: OrgRole) -> bool {
        self.org.contains_key(&role)
    }

    pub fn is_project_role_enabled(&self, role: ProjectRole) -> bool {
        self.project.contains_key(&role)
    }

    pub fn org_roles(&self) -> impl Iterator<Item = OrgRole> + '_ {
        self.org.keys().copied()
    }

    pub fn project_roles(&self) -> impl Iterator<Item = ProjectRole> + '_ {
        self.project.keys().copied()
    }

    /// Whether `role` grants access to every project of its organisation.
    ///
    /// Roles that are not enabled are never elevated.
    pub fn is_elevated_org_role(&self, role: OrgRole) -> bool {
        self.org.get(&role).is_some_and(|c| c.elevated)
    }

    /// Advisory level of a project role. `None` for cross-cutting roles.
    pub fn level(&self, role: ProjectRole) -> Option<u8> {
        self.project.get(&role).and_then(|c| c.level)
    }

    pub fn org_level(&self, role: OrgRole) -> Option<u8> {
        self.org.get(&role).and_then(|c| c.level)
    }

    /// UI convenience check: `role` is at least as senior as `min`.
    ///
    /// False whenever either role has no level.
    pub fn has_min_role(&self, role: ProjectRole, min: ProjectRole) -> bool {
        match (self.level(role), self.level(min)) {
            (Some(have), Some(need)) => have >= need,
            _ => false,
        }
    }

    pub fn counterpart(&self, role: ProjectRole) -> Option<Counterpart> {
        self.project.get(&role).and_then(|c| c.counterpart)
    }

    pub fn capabilities(&self, role: ProjectRole) -> &[String] {
        self.project
            .get(&role)
            .map(|c| c.capabilities.as_slice())
            .unwrap_or(&[])
    }

    pub fn validate_org_role(&self, role: OrgRole) -> Result<OrgRole, RoleCatalogError> {
        if self.is_org_role_enabled(role) {
            Ok(role)
        } else {
            Err(RoleCatalogError::Disabled(role.to_string()))
        }
    }

    pub fn validate_project_role(&self, role: ProjectRole) -> Result<ProjectRole, RoleCatalogError> {
        if self.is_project_role_enabled(role) {
            Ok(role)
        } else {
            Err(RoleCatalogError::Disabled(role.to_string()))
        }
    }

    /// Parse and validate a role name received at a boundary.
    pub fn parse_org_role(&self, name: &str) -> Result<OrgRole, RoleCatalogError> {
        self.validate_org_role(name.parse()?)
    }

    pub fn parse_project_role(&self, name: &str) -> Result<ProjectRole, RoleCatalogError> {
        self.validate_project_role(name.parse()?)
    }
}
